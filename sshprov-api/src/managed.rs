//! Managed resources.
//!
//! The store keeps every managed object in its untyped form
//! ([`ManagedObject`]); controllers work on the typed view
//! ([`Resource<K>`]) of the kind they were registered for.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::condition::{self, Condition, ConditionType};
use crate::meta::{ObjectMeta, Reference};

/// A kind of external resource with its own parameters and observation.
pub trait ResourceKind: Send + Sync + 'static {
    /// Kind name as it appears on stored objects.
    const KIND: &'static str;
    /// Desired state (`spec.for_provider`).
    type Parameters: Serialize + DeserializeOwned + Clone + Send + Sync + std::fmt::Debug;
    /// Observed state (`status.at_provider`).
    type Observation: Serialize
        + DeserializeOwned
        + Clone
        + Default
        + Send
        + Sync
        + std::fmt::Debug;
}

/// What happens to the external resource when its object is deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeletionPolicy {
    #[default]
    Delete,
    Orphan,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedSpec {
    pub for_provider: serde_json::Value,
    #[serde(default)]
    pub provider_config_ref: Reference,
    #[serde(default)]
    pub deletion_policy: DeletionPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_connection_secret_to_ref: Option<Reference>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManagedStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub at_provider: serde_json::Value,
}

/// A managed object as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedObject {
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: ManagedSpec,
    #[serde(default)]
    pub status: ManagedStatus,
}

impl ManagedObject {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn condition(&self, kind: ConditionType) -> Option<&Condition> {
        condition::get_condition(&self.status.conditions, kind)
    }
}

/// Failure to view a stored object as a given resource kind.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("object {name} is of kind {actual}, expected {expected}")]
    WrongKind {
        name: String,
        expected: &'static str,
        actual: String,
    },

    #[error("invalid forProvider for {name}: {source}")]
    InvalidParameters {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid atProvider for {name}: {source}")]
    InvalidObservation {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceStatus<O> {
    pub conditions: Vec<Condition>,
    pub at_provider: O,
}

impl<O> ResourceStatus<O> {
    /// Set a condition, replacing the current one of the same type.
    /// Returns true on a status or reason transition.
    pub fn set_condition(&mut self, condition: Condition) -> bool {
        condition::set_condition(&mut self.conditions, condition)
    }

    pub fn condition(&self, kind: ConditionType) -> Option<&Condition> {
        condition::get_condition(&self.conditions, kind)
    }
}

/// Typed view of a managed object of kind `K`.
#[derive(Debug, Clone)]
pub struct Resource<K: ResourceKind> {
    pub metadata: ObjectMeta,
    pub for_provider: K::Parameters,
    pub provider_config_ref: Reference,
    pub deletion_policy: DeletionPolicy,
    pub write_connection_secret_to_ref: Option<Reference>,
    pub status: ResourceStatus<K::Observation>,
}

impl<K: ResourceKind> Resource<K> {
    /// Decode a stored object. Fails if the kind or the parameters don't
    /// match `K`.
    pub fn decode(obj: &ManagedObject) -> Result<Self, DecodeError> {
        if obj.kind != K::KIND {
            return Err(DecodeError::WrongKind {
                name: obj.metadata.name.clone(),
                expected: K::KIND,
                actual: obj.kind.clone(),
            });
        }

        let for_provider = serde_json::from_value(obj.spec.for_provider.clone()).map_err(
            |source| DecodeError::InvalidParameters {
                name: obj.metadata.name.clone(),
                source,
            },
        )?;

        let at_provider = if obj.status.at_provider.is_null() {
            K::Observation::default()
        } else {
            serde_json::from_value(obj.status.at_provider.clone()).map_err(|source| {
                DecodeError::InvalidObservation {
                    name: obj.metadata.name.clone(),
                    source,
                }
            })?
        };

        Ok(Self {
            metadata: obj.metadata.clone(),
            for_provider,
            provider_config_ref: obj.spec.provider_config_ref.clone(),
            deletion_policy: obj.spec.deletion_policy,
            write_connection_secret_to_ref: obj.spec.write_connection_secret_to_ref.clone(),
            status: ResourceStatus {
                conditions: obj.status.conditions.clone(),
                at_provider,
            },
        })
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Encode the status for writing back to the store. Spec is never
    /// encoded: the reconciler only writes status.
    pub fn encode_status(&self) -> ManagedStatus {
        ManagedStatus {
            conditions: self.status.conditions.clone(),
            at_provider: serde_json::to_value(&self.status.at_provider)
                .unwrap_or(serde_json::Value::Null),
        }
    }
}
