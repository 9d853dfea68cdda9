//! External clients: the per-kind Observe/Create/Update/Delete contract.
//!
//! A client acts on one external resource through a session owned by the
//! current reconcile pass. Clients never retry and never write to the store;
//! they report through their return values and the resource's conditions.

pub mod file;

use async_trait::async_trait;
use sshprov_api::{ConnectionDetails, Resource, ResourceKind};

use crate::error::ReconcileError;
use crate::remote::RemoteSession;

pub use file::FileClient;

/// Result of observing an external resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalObservation {
    pub resource_exists: bool,
    pub resource_up_to_date: bool,
    pub connection_details: ConnectionDetails,
}

impl ExternalObservation {
    pub fn absent() -> Self {
        Self::default()
    }

    pub fn up_to_date() -> Self {
        Self {
            resource_exists: true,
            resource_up_to_date: true,
            connection_details: ConnectionDetails::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalCreation {
    pub connection_details: ConnectionDetails,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalUpdate {
    pub connection_details: ConnectionDetails,
}

/// Operations on the external resource behind a managed resource of kind `K`.
#[async_trait]
pub trait ExternalClient<K: ResourceKind>: Send + Sync {
    /// Report whether the resource exists and matches `for_provider`.
    ///
    /// A definite "absent" answer is not an error. Failing to find out is.
    async fn observe(
        &self,
        session: &mut dyn RemoteSession,
        resource: &mut Resource<K>,
    ) -> Result<ExternalObservation, ReconcileError>;

    async fn create(
        &self,
        session: &mut dyn RemoteSession,
        resource: &mut Resource<K>,
    ) -> Result<ExternalCreation, ReconcileError>;

    /// Bring an existing resource in line with `for_provider`.
    ///
    /// Kinds with mutable fields must diff `for_provider` against
    /// `status.at_provider` here and only apply what changed.
    async fn update(
        &self,
        session: &mut dyn RemoteSession,
        resource: &mut Resource<K>,
    ) -> Result<ExternalUpdate, ReconcileError>;

    /// Remove the resource. Deleting an absent resource succeeds.
    async fn delete(
        &self,
        session: &mut dyn RemoteSession,
        resource: &mut Resource<K>,
    ) -> Result<(), ReconcileError>;
}
