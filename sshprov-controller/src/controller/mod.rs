//! Controller: drives a reconciler from store events.
//!
//! Store events and a periodic resync feed object names into a
//! [`WorkQueue`]. A pool of workers drains the queue, runs one reconcile
//! pass per item and schedules the next one: after the requested delay on
//! success, after an exponential backoff on failure.

pub mod backoff;
pub mod queue;

use std::sync::{Arc, Mutex};

use sshprov_api::{Event, ResourceKind, Store};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::ControllerOptions;
use crate::error::ReconcileError;
use crate::reconciler::{Reconciler, Requeue};

pub use backoff::ItemBackoff;
pub use queue::WorkQueue;

/// Resolves once shutdown is requested or the sender is gone.
pub async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

pub struct Controller<K: ResourceKind> {
    store: Arc<dyn Store>,
    reconciler: Arc<Reconciler<K>>,
    queue: Arc<WorkQueue>,
    backoff: Arc<Mutex<ItemBackoff>>,
    options: ControllerOptions,
}

impl<K: ResourceKind> Controller<K> {
    pub fn new<S>(store: Arc<S>, reconciler: Reconciler<K>, options: ControllerOptions) -> Self
    where
        S: Store + 'static,
    {
        Self {
            store,
            reconciler: Arc::new(reconciler),
            queue: Arc::new(WorkQueue::new()),
            backoff: Arc::new(Mutex::new(ItemBackoff::new(
                options.backoff_base,
                options.backoff_max,
            ))),
            options,
        }
    }

    /// The queue feeding the workers.
    pub fn queue(&self) -> Arc<WorkQueue> {
        Arc::clone(&self.queue)
    }

    /// Consecutive failures recorded for an object.
    pub fn failures(&self, name: &str) -> u32 {
        self.backoff
            .lock()
            .map(|b| b.failures(name))
            .unwrap_or(0)
    }

    /// Run until `shutdown` turns true. A pass in progress at that point is
    /// abandoned, not rolled back.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        // Subscribe before listing so no change falls in between.
        let mut events = BroadcastStream::new(self.store.subscribe());
        self.enqueue_all().await;

        let workers = self.options.max_concurrent_reconciles.max(1);
        info!("Starting {} controller with {} workers", K::KIND, workers);

        let mut tasks = JoinSet::new();
        for id in 0..workers {
            tasks.spawn(worker(
                id,
                Arc::clone(&self.reconciler),
                Arc::clone(&self.queue),
                Arc::clone(&self.backoff),
                shutdown.clone(),
            ));
        }

        let mut resync = tokio::time::interval(self.options.resync_interval);
        // The first tick fires at once and the initial list already ran.
        resync.tick().await;

        let mut stop = shutdown.clone();
        loop {
            tokio::select! {
                _ = shutdown_requested(&mut stop) => break,
                event = events.next() => match event {
                    Some(Ok(event)) => self.handle_event(event).await,
                    Some(Err(BroadcastStreamRecvError::Lagged(missed))) => {
                        warn!("Missed {} store events, resyncing {}", missed, K::KIND);
                        self.enqueue_all().await;
                    }
                    None => {
                        error!("Store event stream closed");
                        break;
                    }
                },
                _ = resync.tick() => {
                    debug!("Resyncing {}", K::KIND);
                    self.enqueue_all().await;
                }
            }
        }

        info!("Stopping {} controller", K::KIND);
        self.queue.shutdown();
        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res {
                error!("Worker failed: {}", e);
            }
        }
    }

    async fn handle_event(&self, event: Event) {
        match &event {
            Event::ProviderConfigUpdated { name } => {
                // Objects using the config must pick up new credentials.
                match self.store.list(K::KIND).await {
                    Ok(objects) => objects
                        .iter()
                        .filter(|o| o.spec.provider_config_ref.name == *name)
                        .for_each(|o| self.queue.add(o.name())),
                    Err(e) => warn!("Failed to list {}: {}", K::KIND, e),
                }
            }
            Event::ObjectDeleted { kind, name } if kind == K::KIND => {
                if let Ok(mut backoff) = self.backoff.lock() {
                    backoff.forget(name);
                }
            }
            _ if event.object_kind() == Some(K::KIND) && event.needs_reconcile() => {
                self.queue.add(event.name());
            }
            _ => {}
        }
    }

    async fn enqueue_all(&self) {
        match self.store.list(K::KIND).await {
            Ok(objects) => {
                for obj in &objects {
                    self.queue.add(obj.name());
                }
            }
            Err(e) => warn!("Failed to list {}: {}", K::KIND, e),
        }
    }
}

async fn worker<K: ResourceKind>(
    id: usize,
    reconciler: Arc<Reconciler<K>>,
    queue: Arc<WorkQueue>,
    backoff: Arc<Mutex<ItemBackoff>>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!("Worker {} started", id);
    loop {
        let name = tokio::select! {
            _ = shutdown_requested(&mut shutdown) => break,
            name = queue.get() => match name {
                Some(name) => name,
                None => break,
            },
        };

        let span = info_span!("reconcile", kind = K::KIND, name = %name);
        let result = tokio::select! {
            _ = shutdown_requested(&mut shutdown) => None,
            result = reconciler.reconcile(&name).instrument(span.clone()) => Some(result),
        };

        match result {
            Some(result) => span.in_scope(|| schedule(&name, result, &queue, &backoff)),
            None => {
                debug!("Abandoned pass for {} {}", K::KIND, name);
                queue.done(&name);
                break;
            }
        }
        queue.done(&name);
    }
    debug!("Worker {} stopped", id);
}

/// Decide when an item runs next.
fn schedule(
    name: &str,
    result: Result<Requeue, ReconcileError>,
    queue: &Arc<WorkQueue>,
    backoff: &Mutex<ItemBackoff>,
) {
    let mut backoff = backoff.lock().unwrap_or_else(|e| e.into_inner());
    match result {
        Ok(Requeue::Never) => backoff.forget(name),
        Ok(Requeue::After(delay)) => {
            backoff.forget(name);
            queue.add_after(name, delay);
        }
        Err(e) if !e.is_retryable() => {
            backoff.forget(name);
            warn!("Reconcile failed permanently: {}", e);
        }
        Err(e) => {
            let delay = backoff.next_delay(name);
            warn!(
                "Reconcile failed: {}. Retrying in {:?} (attempt {})",
                e,
                delay,
                backoff.failures(name)
            );
            queue.add_after(name, delay);
        }
    }
}
