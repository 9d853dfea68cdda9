//! Store trait definitions.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::error::Result;
use super::event::Event;
use crate::managed::{ManagedObject, ManagedSpec, ManagedStatus};
use crate::meta::Reference;
use crate::provider_config::ProviderConfig;

/// Connection details an external resource exposes to its dependents.
pub type ConnectionDetails = BTreeMap<String, Vec<u8>>;

/// Store for managed objects.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Get an object by name.
    async fn get(&self, name: &str) -> Result<Option<ManagedObject>>;

    /// List all objects of a kind.
    async fn list(&self, kind: &str) -> Result<Vec<ManagedObject>>;

    /// Create a new object. Fails with `Conflict` if the name is taken.
    async fn create(&self, obj: ManagedObject) -> Result<ManagedObject>;

    /// Replace an object's spec. The generation is bumped if it changed.
    async fn update_spec(&self, name: &str, spec: ManagedSpec) -> Result<ManagedObject>;

    /// Replace an object's status.
    ///
    /// Fails with `VersionMismatch` if the object was written since
    /// `expected_version` was read.
    async fn update_status(
        &self,
        name: &str,
        expected_version: u64,
        status: ManagedStatus,
    ) -> Result<ManagedObject>;

    /// Add a finalizer. No-op if already present.
    async fn add_finalizer(&self, name: &str, finalizer: &str) -> Result<ManagedObject>;

    /// Remove a finalizer. Returns `None` if this released an object marked
    /// for deletion and it was removed from the store.
    async fn remove_finalizer(&self, name: &str, finalizer: &str)
        -> Result<Option<ManagedObject>>;

    /// Request deletion. The object is removed at once if it has no
    /// finalizers, in which case `None` is returned.
    async fn mark_for_deletion(&self, name: &str) -> Result<Option<ManagedObject>>;

    /// Subscribe to change events.
    fn subscribe(&self) -> broadcast::Receiver<Event>;
}

/// Store for provider configs and their usages.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get_provider_config(&self, name: &str) -> Result<Option<ProviderConfig>>;

    /// Create or replace a provider config.
    async fn put_provider_config(&self, config: ProviderConfig) -> Result<()>;

    /// Delete a provider config. Fails with `InUse` while tracked usages
    /// remain.
    async fn delete_provider_config(&self, name: &str) -> Result<()>;

    /// Record that `object` uses the referenced config.
    async fn track_usage(&self, config: &Reference, object: &str) -> Result<()>;

    /// Drop the usage record of `object`.
    async fn release_usage(&self, config: &Reference, object: &str) -> Result<()>;

    /// Names of objects using a config.
    async fn usages(&self, config: &str) -> Result<Vec<String>>;
}

/// Sink for connection details of external resources.
#[async_trait]
pub trait ConnectionPublisher: Send + Sync {
    /// Merge `details` into the secret named by `to`.
    async fn publish(&self, to: &Reference, details: &ConnectionDetails) -> Result<()>;

    /// Remove the secret named by `to`.
    async fn unpublish(&self, to: &Reference) -> Result<()>;
}

/// Everything a controller needs from its backing store.
pub trait Store: ObjectStore + ConfigStore + ConnectionPublisher {}

impl<T> Store for T where T: ObjectStore + ConfigStore + ConnectionPublisher {}
