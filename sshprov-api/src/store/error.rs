//! Store error types.

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Object not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Conflict with an existing object.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Version mismatch (optimistic concurrency control).
    #[error("version mismatch on {name}: expected {expected}, got {actual}")]
    VersionMismatch {
        name: String,
        expected: u64,
        actual: u64,
    },

    /// Provider config is still referenced by managed objects.
    #[error("provider config {name} is in use by {users:?}")]
    InUse { name: String, users: Vec<String> },

    /// Internal error.
    #[error("internal: {0}")]
    Internal(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
