//! sshprov API objects.
//!
//! Declarative managed resources, the provider configs that hold their
//! credentials, and the store abstractions the controller reads spec from
//! and writes status to.

pub mod condition;
pub mod file;
pub mod managed;
pub mod manifest;
pub mod meta;
pub mod provider_config;
pub mod store;

pub use condition::{Condition, ConditionStatus, ConditionType, Reason};
pub use file::{File, FileObservation, FileParameters};
pub use managed::{
    DecodeError, DeletionPolicy, ManagedObject, ManagedSpec, ManagedStatus, Resource,
    ResourceKind, ResourceStatus,
};
pub use manifest::{Manifest, ManifestError};
pub use meta::{ObjectMeta, Reference};
pub use provider_config::{CredentialsSource, ProviderConfig, SecretSource};
pub use store::{
    ConfigStore, ConnectionDetails, ConnectionPublisher, Event, MemoryStore, ObjectStore, Store,
    StoreError,
};
