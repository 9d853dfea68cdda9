//! sshprov-controller: reconciles managed resources on remote hosts.
//!
//! This daemon:
//! - Loads provider configs and managed objects from a manifest file
//! - Re-reads the manifest periodically and applies changes
//! - Runs a controller per resource kind that converges each object's
//!   external resource over SSH and reports its conditions

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use sshprov_api::{File, Manifest, MemoryStore, ResourceKind};
use sshprov_controller::clients::FileClient;
use sshprov_controller::remote::{SshDialer, SshOptions};
use sshprov_controller::{Controller, ControllerOptions, LogRecorder, Reconciler};
use tokio::sync::watch;
use tracing::{error, info, info_span, Instrument};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// sshprov controller
#[derive(Parser, Debug)]
#[command(name = "sshprov-controller", version, about)]
struct Args {
    /// Manifest with provider configs and managed objects (JSON)
    #[arg(long)]
    manifest: PathBuf,

    /// Controller name (defaults to hostname)
    #[arg(long)]
    name: Option<String>,

    /// Interval in seconds for re-reading the manifest and resyncing objects
    #[arg(long, default_value = "300")]
    resync_interval: u64,

    /// Interval in seconds for re-checking converged objects
    #[arg(long, default_value = "60")]
    poll_interval: u64,

    /// Backoff after the first failure, in milliseconds
    #[arg(long, default_value = "1000")]
    backoff_base: u64,

    /// Maximum backoff, in seconds
    #[arg(long, default_value = "60")]
    backoff_max: u64,

    /// Objects reconciled in parallel
    #[arg(long, default_value = "4")]
    max_concurrent_reconciles: usize,

    /// SSH connect timeout in seconds
    #[arg(long, default_value = "10")]
    connect_timeout: u64,

    /// Timeout for a single remote command in seconds
    #[arg(long, default_value = "60")]
    command_timeout: u64,

    /// Do not allocate a pseudo-terminal for remote commands
    #[arg(long)]
    no_pty: bool,

    /// OpenSSH client binary
    #[arg(long, default_value = "ssh")]
    ssh_binary: PathBuf,

    /// sshpass binary, used for password authentication
    #[arg(long, default_value = "sshpass")]
    sshpass_binary: PathBuf,
}

impl Args {
    fn controller_options(&self) -> ControllerOptions {
        ControllerOptions {
            poll_interval: Duration::from_secs(self.poll_interval),
            backoff_base: Duration::from_millis(self.backoff_base),
            backoff_max: Duration::from_secs(self.backoff_max),
            max_concurrent_reconciles: self.max_concurrent_reconciles,
            resync_interval: Duration::from_secs(self.resync_interval.max(1)),
            ..ControllerOptions::default()
        }
    }

    fn ssh_options(&self) -> SshOptions {
        SshOptions {
            ssh_binary: self.ssh_binary.clone(),
            sshpass_binary: self.sshpass_binary.clone(),
            connect_timeout: Duration::from_secs(self.connect_timeout),
            command_timeout: Duration::from_secs(self.command_timeout),
            request_pty: !self.no_pty,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sshprov_controller=info,sshprov_api=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let name = args.name.clone().unwrap_or_else(|| {
        hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string())
    });

    info!("Starting sshprov-controller: {}", name);
    let span = info_span!("controller", name = %name);
    info!("Manifest: {}", args.manifest.display());

    let store = Arc::new(MemoryStore::new());
    apply_manifest(&args.manifest, &store)
        .await
        .context("initial manifest apply failed")?;

    let options = args.controller_options();
    let dialer = Arc::new(SshDialer::new(args.ssh_options()));
    let reconciler = Reconciler::<File>::new(
        store.clone(),
        dialer,
        Arc::new(FileClient::new()),
        Arc::new(LogRecorder),
        &options,
    );
    let controller = Controller::new(store.clone(), reconciler, options.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let reload = tokio::spawn(reload_loop(
        args.manifest.clone(),
        store.clone(),
        options.resync_interval,
        shutdown_rx.clone(),
    ));
    let run = tokio::spawn(async move { controller.run(shutdown_rx).instrument(span).await });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutting down");
    let _ = shutdown_tx.send(true);

    if let Err(e) = run.await {
        error!("Controller task failed: {}", e);
    }
    if let Err(e) = reload.await {
        error!("Manifest reload task failed: {}", e);
    }
    Ok(())
}

async fn apply_manifest(path: &Path, store: &MemoryStore) -> Result<()> {
    let manifest = Manifest::load(path).await?;
    let summary = manifest
        .apply(store, &[File::KIND])
        .await
        .with_context(|| format!("failed to apply {}", path.display()))?;
    if summary.created + summary.updated + summary.deleted > 0 {
        info!(
            "Manifest applied: {} created, {} updated, {} deleted",
            summary.created, summary.updated, summary.deleted
        );
    }
    Ok(())
}

async fn reload_loop(
    path: PathBuf,
    store: Arc<MemoryStore>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = sshprov_controller::controller::shutdown_requested(&mut shutdown) => break,
            _ = ticker.tick() => {
                if let Err(e) = apply_manifest(&path, &store).await {
                    error!("Manifest reload failed: {:#}", e);
                }
            }
        }
    }
}
