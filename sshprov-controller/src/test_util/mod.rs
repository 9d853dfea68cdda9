//! Test utilities: a simulated remote host and a per-key flight recorder.

pub mod flight;
pub mod host;

pub use flight::{FlightGuard, FlightRecorder};
pub use host::{DialFailure, ExecFailure, MemoryHost, MemorySession};
