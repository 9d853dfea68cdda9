//! Object metadata shared by every stored object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata attached to every managed object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Unique name, the identity of the object.
    pub name: String,
    #[serde(default)]
    pub uid: String,
    /// Bumped on every write. Used for optimistic concurrency.
    #[serde(default)]
    pub resource_version: u64,
    /// Bumped on every spec change.
    #[serde(default)]
    pub generation: u64,
    #[serde(default = "Utc::now")]
    pub creation_timestamp: DateTime<Utc>,
    /// Set once the object has been marked for removal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
}

impl ObjectMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uid: String::new(),
            resource_version: 0,
            generation: 0,
            creation_timestamp: Utc::now(),
            deletion_timestamp: None,
            finalizers: Vec::new(),
        }
    }

    pub fn is_being_deleted(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|f| f == finalizer)
    }
}

/// A by-name reference to another object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    pub name: String,
}

impl Reference {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for Reference {
    fn default() -> Self {
        Self::new("default")
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}
