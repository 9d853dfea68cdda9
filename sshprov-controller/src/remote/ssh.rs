//! SSH sessions through the OpenSSH client.
//!
//! Dialing starts a ControlMaster (`ssh -M -N`) on a socket in a private
//! temp dir. Every script then runs as a separate `ssh -S <socket>` client
//! multiplexed over that master, so authentication happens once per session.
//! Passwords go through `sshpass -e` and the `SSHPASS` environment variable,
//! never the command line. Private keys are written to a 0600 file in the
//! same temp dir, which is removed with the session.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

use super::{
    Credentials, DialError, Dialer, Endpoint, ExecError, ExecOutput, RemoteSession, Script,
    Secret,
};

/// Exit status ssh uses for its own errors.
const SSH_ERROR_EXIT: i32 = 255;
/// Exit status sshpass uses when the password was rejected.
const SSHPASS_BAD_PASSWORD_EXIT: i32 = 5;
const MASTER_POLL_INTERVAL: Duration = Duration::from_millis(100);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings for the OpenSSH transport.
#[derive(Debug, Clone)]
pub struct SshOptions {
    pub ssh_binary: PathBuf,
    pub sshpass_binary: PathBuf,
    /// Bound on establishing and authenticating a session.
    pub connect_timeout: Duration,
    /// Bound on a single script run.
    pub command_timeout: Duration,
    /// Allocate a remote pseudo-terminal (with echo disabled).
    pub request_pty: bool,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            ssh_binary: PathBuf::from("ssh"),
            sshpass_binary: PathBuf::from("sshpass"),
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(60),
            request_pty: true,
        }
    }
}

/// Opens sessions with the system OpenSSH client.
#[derive(Debug, Clone, Default)]
pub struct SshDialer {
    options: SshOptions,
}

impl SshDialer {
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }

    /// Options shared by the master and every multiplexed client.
    fn common_args(&self, endpoint: &Endpoint, user: &str, control: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-S".into(),
            control.into(),
            "-p".into(),
            endpoint.port.to_string().into(),
            "-l".into(),
            user.into(),
            "-o".into(),
            format!("ConnectTimeout={}", self.options.connect_timeout.as_secs().max(1)).into(),
            "-o".into(),
            "ServerAliveInterval=15".into(),
        ];

        match &endpoint.known_hosts {
            Some(path) => {
                args.push("-o".into());
                args.push("StrictHostKeyChecking=yes".into());
                let mut opt = OsString::from("UserKnownHostsFile=");
                opt.push(path);
                args.push("-o".into());
                args.push(opt);
            }
            None => {
                args.extend(
                    [
                        "-o",
                        "StrictHostKeyChecking=no",
                        "-o",
                        "UserKnownHostsFile=/dev/null",
                        "-o",
                        "LogLevel=ERROR",
                    ]
                    .map(OsString::from),
                );
            }
        }
        args
    }

    /// Arguments for the ControlMaster process, excluding the program.
    fn master_args(
        &self,
        endpoint: &Endpoint,
        user: &str,
        control: &Path,
        key_file: Option<&Path>,
    ) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-M".into(), "-N".into()];
        args.extend(self.common_args(endpoint, user, control));
        args.extend(["-o", "ControlPersist=no"].map(OsString::from));

        match key_file {
            Some(key) => {
                args.push("-i".into());
                args.push(key.into());
                args.extend(
                    [
                        "-o",
                        "IdentitiesOnly=yes",
                        "-o",
                        "BatchMode=yes",
                        "-o",
                        "PasswordAuthentication=no",
                    ]
                    .map(OsString::from),
                );
            }
            None => {
                args.extend(
                    [
                        "-o",
                        "PreferredAuthentications=password,keyboard-interactive",
                        "-o",
                        "PubkeyAuthentication=no",
                        "-o",
                        "NumberOfPasswordPrompts=1",
                    ]
                    .map(OsString::from),
                );
            }
        }

        args.push(endpoint.host.clone().into());
        args
    }

    fn master_command(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
        control: &Path,
        key_file: Option<&Path>,
    ) -> Command {
        let args = self.master_args(endpoint, &credentials.user, control, key_file);
        let mut cmd = match &credentials.secret {
            Secret::Password(password) => {
                let mut cmd = Command::new(&self.options.sshpass_binary);
                cmd.arg("-e").arg(&self.options.ssh_binary);
                cmd.env("SSHPASS", password);
                cmd
            }
            Secret::PrivateKey(_) => Command::new(&self.options.ssh_binary),
        };
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Ask the master whether it is up.
    async fn master_ready(&self, endpoint: &Endpoint, user: &str, control: &Path) -> bool {
        let mut cmd = Command::new(&self.options.ssh_binary);
        cmd.args(self.common_args(endpoint, user, control))
            .args(["-O", "check"])
            .arg(&endpoint.host)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        matches!(cmd.status().await, Ok(status) if status.success())
    }
}

async fn write_key_file(dir: &Path, key: &str) -> std::io::Result<PathBuf> {
    let path = dir.join("id");
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(&path)
        .await?;
    file.write_all(key.as_bytes()).await?;
    // OpenSSH rejects keys without a trailing newline
    if !key.ends_with('\n') {
        file.write_all(b"\n").await?;
    }
    file.flush().await?;
    Ok(path)
}

/// Classify an early exit of the master process.
fn classify_master_failure(address: &str, code: Option<i32>, stderr: &str) -> DialError {
    let message = match stderr.trim() {
        "" => format!("ssh exited with status {:?}", code),
        msg => msg.to_string(),
    };
    let lower = stderr.to_ascii_lowercase();
    let rejected = code == Some(SSHPASS_BAD_PASSWORD_EXIT)
        || lower.contains("permission denied")
        || lower.contains("authentication failed")
        || lower.contains("too many authentication failures")
        || lower.contains("host key verification failed");

    if rejected {
        DialError::Auth {
            address: address.to_string(),
            message,
        }
    } else {
        DialError::Network {
            address: address.to_string(),
            message,
        }
    }
}

#[async_trait]
impl Dialer for SshDialer {
    async fn dial(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> Result<Box<dyn RemoteSession>, DialError> {
        let address = endpoint.address();
        let setup_err = |e: std::io::Error| DialError::Setup {
            address: address.clone(),
            message: e.to_string(),
        };

        if endpoint.known_hosts.is_none() {
            warn!("Host key for {} will not be verified", address);
        }

        let dir = tempfile::Builder::new()
            .prefix("sshprov-")
            .tempdir()
            .map_err(setup_err)?;
        let control = dir.path().join("ctl");
        let key_file = match &credentials.secret {
            Secret::PrivateKey(key) => Some(write_key_file(dir.path(), key).await.map_err(setup_err)?),
            Secret::Password(_) => None,
        };

        debug!("Connecting to {} as {}", address, credentials.user);
        let mut master = self
            .master_command(endpoint, credentials, &control, key_file.as_deref())
            .spawn()
            .map_err(setup_err)?;

        let deadline = Instant::now() + self.options.connect_timeout;
        loop {
            if let Some(status) = master.try_wait().map_err(setup_err)? {
                let mut stderr = String::new();
                if let Some(mut pipe) = master.stderr.take() {
                    let _ = pipe.read_to_string(&mut stderr).await;
                }
                return Err(classify_master_failure(&address, status.code(), &stderr));
            }

            if self
                .master_ready(endpoint, &credentials.user, &control)
                .await
            {
                break;
            }

            if Instant::now() >= deadline {
                let _ = master.kill().await;
                return Err(DialError::Network {
                    address: address.clone(),
                    message: format!(
                        "timed out after {}s",
                        self.options.connect_timeout.as_secs_f32()
                    ),
                });
            }
            sleep(MASTER_POLL_INTERVAL).await;
        }

        debug!("Connected to {}", address);
        let mut target = self.common_args(endpoint, &credentials.user, &control);
        if self.options.request_pty {
            target.push("-tt".into());
        } else {
            target.push("-T".into());
        }
        target.push(endpoint.host.clone().into());

        Ok(Box::new(SshSession {
            address,
            ssh_binary: self.options.ssh_binary.clone(),
            command_timeout: self.options.command_timeout,
            request_pty: self.options.request_pty,
            target,
            control,
            host: endpoint.host.clone(),
            master: Some(master),
            _dir: dir,
        }))
    }
}

/// A session multiplexed over one ControlMaster.
pub struct SshSession {
    address: String,
    ssh_binary: PathBuf,
    command_timeout: Duration,
    request_pty: bool,
    /// Client arguments up to and including the host.
    target: Vec<OsString>,
    control: PathBuf,
    host: String,
    /// Killed on drop if the session is never closed.
    master: Option<Child>,
    _dir: TempDir,
}

impl SshSession {
    /// The remote command line for a script.
    fn remote_command(&self, script: &Script) -> String {
        let rendered = script.render();
        if self.request_pty {
            // A pty merges stdout and stderr already
            format!("stty -echo 2>/dev/null; {}", rendered)
        } else {
            format!("exec 2>&1; {}", rendered)
        }
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn execute(&mut self, script: &Script) -> Result<ExecOutput, ExecError> {
        let rendered = script.render();
        let remote = self.remote_command(script);
        debug!("Executing on {}: {}", self.address, rendered);

        let mut cmd = Command::new(&self.ssh_binary);
        cmd.args(&self.target)
            .arg("--")
            .arg(remote)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match timeout(self.command_timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(ExecError::new(rendered, e.to_string())),
            Err(_) => {
                return Err(ExecError::new(
                    rendered,
                    format!("timed out after {}s", self.command_timeout.as_secs_f32()),
                ))
            }
        };

        let mut combined = output.stdout;
        match output.status.code() {
            Some(0) => Ok(ExecOutput { output: combined }),
            Some(SSH_ERROR_EXIT) | None => {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                let mut err = ExecError::new(rendered, format!("transport failure: {}", stderr));
                err.output = combined;
                Err(err)
            }
            Some(code) => {
                combined.extend_from_slice(&output.stderr);
                Err(ExecError::new(rendered, format!("exit status {}", code))
                    .with_exit(code, combined))
            }
        }
    }

    async fn close(&mut self) {
        let Some(mut master) = self.master.take() else {
            return;
        };

        let mut cmd = Command::new(&self.ssh_binary);
        cmd.arg("-S")
            .arg(&self.control)
            .args(["-O", "exit"])
            .arg(&self.host)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        let _ = timeout(CLOSE_TIMEOUT, cmd.status()).await;
        let _ = master.kill().await;
        debug!("Closed session to {}", self.address);
    }
}
