//! sshprov controller library.
//!
//! Reconciles managed resources against hosts reachable over SSH:
//! - [`remote`]: sessions and the structured commands they run
//! - [`clients`]: per-kind Observe/Create/Update/Delete
//! - [`connector`]: provider config lookup, credentials and dialing
//! - [`reconciler`]: the per-object state machine and status projection
//! - [`controller`]: work queue, workers and backoff

pub mod clients;
pub mod config;
pub mod connector;
pub mod controller;
pub mod error;
pub mod events;
pub mod reconciler;
pub mod remote;
pub mod test_util;

pub use config::ControllerOptions;
pub use controller::Controller;
pub use error::{ConnectError, CredentialError, ReconcileError};
pub use events::{EventKind, EventRecorder, LogRecorder, MemoryRecorder};
pub use reconciler::{Reconciler, Requeue, FINALIZER};
