//! A simulated remote host.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::flight::{FlightGuard, FlightRecorder};
use crate::remote::{
    Credentials, DialError, Dialer, Endpoint, ExecError, ExecOutput, RemoteCommand,
    RemoteSession, Script, Secret,
};

/// An injected command failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecFailure {
    /// The command ran and exited with this status.
    Exit(i32),
    /// The channel broke before an exit status arrived.
    Transport,
}

/// An injected dial failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialFailure {
    Auth,
    Network,
}

#[derive(Default)]
struct HostState {
    files: BTreeSet<String>,
    commands: Vec<String>,
    dial_failure: Option<DialFailure>,
    command_failures: HashMap<String, ExecFailure>,
    password: Option<String>,
    exec_delay: Duration,
    dials: usize,
    closed: usize,
    last_credentials: Option<Credentials>,
}

/// A host with an in-memory filesystem, reachable through [`Dialer`].
///
/// Understands the commands the built-in clients emit (`test -e`, `touch`,
/// `rm -f`, `mkdir -p`). Failures and delays can be injected per host.
/// Clones share state.
#[derive(Clone, Default)]
pub struct MemoryHost {
    state: Arc<Mutex<HostState>>,
    flights: Arc<FlightRecorder>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create a file directly on the host.
    pub fn put_file(&self, path: &str) {
        self.state().files.insert(path.to_string());
    }

    /// Remove a file directly on the host.
    pub fn remove_file(&self, path: &str) {
        self.state().files.remove(path);
    }

    pub fn exists(&self, path: &str) -> bool {
        self.state().files.contains(path)
    }

    pub fn files(&self) -> Vec<String> {
        self.state().files.iter().cloned().collect()
    }

    /// Rendered commands executed so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.state().commands.clone()
    }

    pub fn clear_commands(&self) {
        self.state().commands.clear();
    }

    /// Make every dial fail, or stop failing with `None`.
    pub fn set_dial_failure(&self, failure: Option<DialFailure>) {
        self.state().dial_failure = failure;
    }

    /// Make every run of `program` fail.
    pub fn fail_command(&self, program: &str, failure: ExecFailure) {
        self.state()
            .command_failures
            .insert(program.to_string(), failure);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.command_failures.clear();
        state.dial_failure = None;
    }

    /// Reject password logins that don't use `password`.
    pub fn require_password(&self, password: &str) {
        self.state().password = Some(password.to_string());
    }

    /// Delay every execute by `delay`.
    pub fn set_exec_delay(&self, delay: Duration) {
        self.state().exec_delay = delay;
    }

    /// Number of successful dials.
    pub fn dials(&self) -> usize {
        self.state().dials
    }

    /// Sessions dialed but not closed.
    pub fn open_sessions(&self) -> usize {
        let state = self.state();
        state.dials - state.closed
    }

    pub fn last_credentials(&self) -> Option<Credentials> {
        self.state().last_credentials.clone()
    }

    /// Per-path record of overlapping sessions.
    pub fn flights(&self) -> Arc<FlightRecorder> {
        Arc::clone(&self.flights)
    }

    /// Apply one command to the filesystem.
    fn run(&self, command: &RemoteCommand) -> Result<(), ExecError> {
        let rendered = command.render();
        let mut state = self.state();
        state.commands.push(rendered.clone());

        match state.command_failures.get(&command.program) {
            Some(ExecFailure::Exit(code)) => {
                return Err(ExecError::new(rendered, format!("exit status {}", code))
                    .with_exit(*code, Vec::new()))
            }
            Some(ExecFailure::Transport) => {
                return Err(ExecError::new(rendered, "transport failure: connection reset"))
            }
            None => {}
        }

        let args: Vec<&str> = command
            .args
            .iter()
            .map(String::as_str)
            .filter(|a| !a.starts_with('-'))
            .collect();

        match (command.program.as_str(), args.as_slice()) {
            ("test", [path]) => {
                if state.files.contains(*path) {
                    Ok(())
                } else {
                    Err(ExecError::new(rendered, "exit status 1").with_exit(1, Vec::new()))
                }
            }
            ("touch", [path]) => {
                state.files.insert(path.to_string());
                Ok(())
            }
            ("rm", [path]) => {
                state.files.remove(*path);
                Ok(())
            }
            ("mkdir", _) => Ok(()),
            _ => Err(ExecError::new(rendered, "exit status 127")
                .with_exit(127, b"command not found".to_vec())),
        }
    }
}

#[async_trait]
impl Dialer for MemoryHost {
    async fn dial(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> Result<Box<dyn RemoteSession>, DialError> {
        let address = endpoint.address();
        let mut state = self.state();
        state.last_credentials = Some(credentials.clone());

        match state.dial_failure {
            Some(DialFailure::Auth) => {
                return Err(DialError::Auth {
                    address,
                    message: "Permission denied".to_string(),
                })
            }
            Some(DialFailure::Network) => {
                return Err(DialError::Network {
                    address,
                    message: "Connection refused".to_string(),
                })
            }
            None => {}
        }

        if let (Some(expected), Secret::Password(given)) = (&state.password, &credentials.secret)
        {
            if expected != given {
                return Err(DialError::Auth {
                    address,
                    message: "Permission denied".to_string(),
                });
            }
        }

        state.dials += 1;
        drop(state);

        Ok(Box::new(MemorySession {
            host: self.clone(),
            flight: None,
            closed: false,
        }))
    }
}

/// A session to a [`MemoryHost`].
///
/// The flight opens at the first script and lasts until close, keyed by the
/// path the first command acts on.
pub struct MemorySession {
    host: MemoryHost,
    flight: Option<FlightGuard>,
    closed: bool,
}

#[async_trait]
impl RemoteSession for MemorySession {
    async fn execute(&mut self, script: &Script) -> Result<ExecOutput, ExecError> {
        if self.closed {
            return Err(ExecError::new(script.render(), "session closed"));
        }

        if self.flight.is_none() {
            if let Some(key) = script.commands.first().and_then(|c| c.args.last()) {
                self.flight = Some(self.host.flights.enter(key));
            }
        }

        let delay = self.host.state().exec_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        for command in &script.commands {
            self.host.run(command)?;
        }
        Ok(ExecOutput::default())
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.flight = None;
        self.host.state().closed += 1;
    }
}
