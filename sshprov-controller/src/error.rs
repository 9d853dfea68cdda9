//! Error types for the reconcile path.

use sshprov_api::{DecodeError, Reason, StoreError};
use thiserror::Error;

use crate::remote::{DialError, ExecError};

/// Failure to resolve a secret from its source.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("environment variable {var} is not set")]
    MissingEnv { var: String },

    #[error("failed to read secret file {path}: {source}")]
    File {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("secret resolved from {from} is empty")]
    Empty { from: String },

    #[error("provider config {config} has no user")]
    MissingUser { config: String },
}

/// Failure to produce a connected session for a resource.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("cannot track usage of provider config {config}: {source}")]
    Track {
        config: String,
        #[source]
        source: StoreError,
    },

    #[error("cannot get provider config {config}: {source}")]
    ConfigLookup {
        config: String,
        #[source]
        source: StoreError,
    },

    #[error("cannot resolve credentials of provider config {config}: {source}")]
    Credentials {
        config: String,
        #[source]
        source: CredentialError,
    },

    #[error(transparent)]
    Dial(#[from] DialError),
}

/// Failure of one reconcile pass.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("managed resource is not a {expected}: {source}")]
    TypeMismatch {
        expected: &'static str,
        #[source]
        source: DecodeError,
    },

    #[error("connect: {0}")]
    Config(ConnectError),

    #[error("connect: {0}")]
    Dial(DialError),

    #[error("{operation}: {source}")]
    Execution {
        operation: &'static str,
        #[source]
        source: ExecError,
    },

    #[error("{operation}: {source}")]
    Store {
        operation: &'static str,
        #[source]
        source: StoreError,
    },
}

impl ReconcileError {
    pub fn execution(operation: &'static str, source: ExecError) -> Self {
        ReconcileError::Execution { operation, source }
    }

    pub fn store(operation: &'static str, source: StoreError) -> Self {
        ReconcileError::Store { operation, source }
    }

    /// The condition reason reported for this error.
    pub fn reason(&self) -> Reason {
        match self {
            ReconcileError::TypeMismatch { .. } => Reason::TypeMismatch,
            ReconcileError::Config(_) => Reason::ConfigError,
            ReconcileError::Dial(_) => Reason::DialError,
            ReconcileError::Execution { .. } => Reason::ExecutionError,
            ReconcileError::Store { .. } => Reason::StoreError,
        }
    }

    /// Whether another pass could succeed without a spec change.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ReconcileError::TypeMismatch { .. })
    }
}

impl From<ConnectError> for ReconcileError {
    /// Auth rejections are a configuration problem; every other dial failure
    /// is reported as a dial error.
    fn from(err: ConnectError) -> Self {
        match err {
            ConnectError::Dial(e @ (DialError::Network { .. } | DialError::Setup { .. })) => {
                ReconcileError::Dial(e)
            }
            e => ReconcileError::Config(e),
        }
    }
}
