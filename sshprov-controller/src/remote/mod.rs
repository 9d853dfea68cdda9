//! Remote actuation channel.
//!
//! A [`Dialer`] opens an authenticated [`RemoteSession`] to a host. The
//! session runs [`Script`]s: ordered sequences of structured commands that
//! are rendered into a single shell invocation with every argument escaped.
//! Sessions are owned by one reconcile pass and closed at its end.

pub mod ssh;

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

pub use ssh::{SshDialer, SshOptions};

// =============================================================================
// Commands
// =============================================================================

/// Escape a string for safe use as a single shell word.
///
/// Wraps the value in single quotes and escapes any embedded single quotes
/// using the `'\''` idiom.
pub fn shell_escape(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    if s.chars().all(|c| {
        c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | '%' | ':' | '+' | ',')
    }) {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// A single remote command: a program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl RemoteCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// `test -e <path>`: exits 0 if the path exists, 1 if not.
    pub fn path_exists(path: &str) -> Self {
        Self::new("test").args(["-e", path])
    }

    /// `touch -- <path>`
    pub fn touch(path: &str) -> Self {
        Self::new("touch").args(["--", path])
    }

    /// `rm -f -- <path>`: succeeds if the path is already gone.
    pub fn remove(path: &str) -> Self {
        Self::new("rm").args(["-f", "--", path])
    }

    /// Render as one shell-safe command line.
    pub fn render(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|s| shell_escape(s))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl std::fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

/// Ordered commands run as a single remote invocation.
///
/// Commands are chained with `&&`: the first failing command fails the
/// whole script, and output produced so far is still returned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    pub commands: Vec<RemoteCommand>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, command: RemoteCommand) -> Self {
        self.commands.push(command);
        self
    }

    pub fn render(&self) -> String {
        self.commands
            .iter()
            .map(RemoteCommand::render)
            .collect::<Vec<_>>()
            .join(" && ")
    }
}

impl From<RemoteCommand> for Script {
    fn from(command: RemoteCommand) -> Self {
        Script {
            commands: vec![command],
        }
    }
}

// =============================================================================
// Endpoint and credentials
// =============================================================================

/// Where to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    /// Known-hosts file for host key verification; unverified if `None`.
    pub known_hosts: Option<PathBuf>,
}

impl Endpoint {
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Resolved secret material.
#[derive(Clone, PartialEq, Eq)]
pub enum Secret {
    Password(String),
    PrivateKey(String),
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Secret::Password(_) => f.write_str("Password(<redacted>)"),
            Secret::PrivateKey(_) => f.write_str("PrivateKey(<redacted>)"),
        }
    }
}

/// Principal and secret used to authenticate a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub secret: Secret,
}

// =============================================================================
// Sessions
// =============================================================================

/// Combined output of a successful script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub output: Vec<u8>,
}

impl ExecOutput {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

/// Failure to run a script.
///
/// Transport failures, timeouts and non-zero exits all surface as this one
/// error; `exit_status` is `None` when the remote command never reported one.
#[derive(Debug, Clone, Error)]
#[error("failed to execute command '{command}' on server: {message}")]
pub struct ExecError {
    pub command: String,
    pub exit_status: Option<i32>,
    /// Output produced before the failure.
    pub output: Vec<u8>,
    pub message: String,
}

impl ExecError {
    pub fn new(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            exit_status: None,
            output: Vec::new(),
            message: message.into(),
        }
    }

    pub fn with_exit(mut self, status: i32, output: Vec<u8>) -> Self {
        self.exit_status = Some(status);
        self.output = output;
        self
    }

    /// True if the remote command ran and exited with `code`.
    pub fn exited_with(&self, code: i32) -> bool {
        self.exit_status == Some(code)
    }
}

/// Failure to open a session.
#[derive(Debug, Error)]
pub enum DialError {
    /// The host rejected the credentials.
    #[error("authentication to {address} rejected: {message}")]
    Auth { address: String, message: String },

    /// The host could not be reached in time.
    #[error("cannot reach {address}: {message}")]
    Network { address: String, message: String },

    /// Local setup failed before anything was sent.
    #[error("session setup for {address} failed: {message}")]
    Setup { address: String, message: String },
}

/// An open, authenticated session to a remote host.
#[async_trait]
pub trait RemoteSession: Send {
    /// Run a script as a single remote invocation.
    async fn execute(&mut self, script: &Script) -> Result<ExecOutput, ExecError>;

    /// Close the session. Dropping a session without closing it must still
    /// release it.
    async fn close(&mut self);
}

/// Opens sessions to remote hosts.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> Result<Box<dyn RemoteSession>, DialError>;
}
