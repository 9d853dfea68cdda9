//! Reconciler for managed resources.
//!
//! One pass reads the object, observes the external resource through a
//! fresh session and takes at most one action (create, update or delete)
//! to converge it. Decisions come from the live observation only; nothing
//! is remembered between passes.

pub mod status;

use std::sync::Arc;
use std::time::Duration;

use sshprov_api::{Condition, ConnectionDetails, DeletionPolicy, Resource, ResourceKind, Store};
use tracing::{debug, info, warn};

use crate::clients::ExternalClient;
use crate::config::ControllerOptions;
use crate::connector::Connector;
use crate::error::ReconcileError;
use crate::events::EventRecorder;
use crate::remote::{Dialer, RemoteSession};

pub use status::StatusProjector;

/// Finalizer holding managed objects until their external resource is gone.
pub const FINALIZER: &str = "sshprov.io/managed-resource";

/// When to run the next pass for an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// Nothing left to do until the object changes.
    Never,
    After(Duration),
}

/// How a pass that did not fail ended.
enum Outcome {
    Requeue(Requeue),
    /// The finalizer was removed; the object may be gone.
    Finalized,
}

pub struct Reconciler<K: ResourceKind> {
    store: Arc<dyn Store>,
    connector: Connector,
    client: Arc<dyn ExternalClient<K>>,
    projector: StatusProjector,
    short_wait: Duration,
    poll_interval: Duration,
}

impl<K: ResourceKind> Reconciler<K> {
    pub fn new<S>(
        store: Arc<S>,
        dialer: Arc<dyn Dialer>,
        client: Arc<dyn ExternalClient<K>>,
        recorder: Arc<dyn EventRecorder>,
        options: &ControllerOptions,
    ) -> Self
    where
        S: Store + 'static,
    {
        Self {
            connector: Connector::new(store.clone(), dialer),
            store,
            client,
            projector: StatusProjector::new(recorder),
            short_wait: options.short_wait,
            poll_interval: options.poll_interval,
        }
    }

    /// Run one pass for the named object.
    pub async fn reconcile(&self, name: &str) -> Result<Requeue, ReconcileError> {
        let Some(obj) = self
            .store
            .get(name)
            .await
            .map_err(|e| ReconcileError::store("get managed resource", e))?
        else {
            debug!("{} {} is gone", K::KIND, name);
            return Ok(Requeue::Never);
        };

        let mut resource = match Resource::<K>::decode(&obj) {
            Ok(resource) => resource,
            Err(source) => {
                let err = ReconcileError::TypeMismatch {
                    expected: K::KIND,
                    source,
                };
                warn!("Not retrying {}: {}", name, err);
                let cond = Condition::reconcile_error(err.reason(), err.to_string());
                if let Err(e) = self
                    .projector
                    .project_untyped(self.store.as_ref(), &obj, K::KIND, cond)
                    .await
                {
                    warn!("Failed to report type mismatch on {}: {}", name, e);
                }
                return Ok(Requeue::Never);
            }
        };

        let before = resource.status.conditions.clone();
        match self.run(&mut resource).await {
            Ok(Outcome::Requeue(requeue)) => {
                resource.status.set_condition(Condition::reconcile_success());
                self.projector
                    .project(self.store.as_ref(), &mut resource, &before)
                    .await?;
                Ok(requeue)
            }
            Ok(Outcome::Finalized) => Ok(Requeue::Never),
            Err(err) => {
                resource
                    .status
                    .set_condition(Condition::reconcile_error(err.reason(), err.to_string()));
                if let Err(e) = self
                    .projector
                    .project(self.store.as_ref(), &mut resource, &before)
                    .await
                {
                    warn!("Failed to report error on {}: {}", name, e);
                }
                Err(err)
            }
        }
    }

    async fn run(&self, resource: &mut Resource<K>) -> Result<Outcome, ReconcileError> {
        let name = resource.name().to_string();

        if resource.metadata.is_being_deleted() {
            if !resource.metadata.has_finalizer(FINALIZER) {
                return Ok(Outcome::Finalized);
            }
        } else if !resource.metadata.has_finalizer(FINALIZER) {
            let updated = self
                .store
                .add_finalizer(&name, FINALIZER)
                .await
                .map_err(|e| ReconcileError::store("add finalizer", e))?;
            resource.metadata = updated.metadata;
        }

        let mut session = self.connector.connect(resource).await?;
        let result = self.act(session.as_mut(), resource).await;
        session.close().await;
        result
    }

    async fn act(
        &self,
        session: &mut dyn RemoteSession,
        resource: &mut Resource<K>,
    ) -> Result<Outcome, ReconcileError> {
        let observation = self.client.observe(session, resource).await?;

        if resource.metadata.is_being_deleted() {
            if observation.resource_exists && resource.deletion_policy == DeletionPolicy::Delete {
                info!("Deleting external resource of {} {}", K::KIND, resource.name());
                self.client.delete(session, resource).await?;
                return Ok(Outcome::Requeue(Requeue::After(self.short_wait)));
            }
            self.finalize(resource).await?;
            return Ok(Outcome::Finalized);
        }

        self.publish(resource, &observation.connection_details)
            .await?;

        if !observation.resource_exists {
            info!("Creating external resource of {} {}", K::KIND, resource.name());
            let created = self.client.create(session, resource).await?;
            self.publish(resource, &created.connection_details).await?;
            return Ok(Outcome::Requeue(Requeue::After(self.short_wait)));
        }

        if !observation.resource_up_to_date {
            info!("Updating external resource of {} {}", K::KIND, resource.name());
            let updated = self.client.update(session, resource).await?;
            self.publish(resource, &updated.connection_details).await?;
            return Ok(Outcome::Requeue(Requeue::After(self.short_wait)));
        }

        debug!("{} {} is up to date", K::KIND, resource.name());
        Ok(Outcome::Requeue(Requeue::After(self.poll_interval)))
    }

    async fn publish(
        &self,
        resource: &Resource<K>,
        details: &ConnectionDetails,
    ) -> Result<(), ReconcileError> {
        let Some(to) = &resource.write_connection_secret_to_ref else {
            return Ok(());
        };
        self.store
            .publish(to, details)
            .await
            .map_err(|e| ReconcileError::store("publish connection details", e))
    }

    /// Release everything the object holds and drop the finalizer.
    async fn finalize(&self, resource: &Resource<K>) -> Result<(), ReconcileError> {
        let name = resource.name();
        if let Some(to) = &resource.write_connection_secret_to_ref {
            self.store
                .unpublish(to)
                .await
                .map_err(|e| ReconcileError::store("unpublish connection details", e))?;
        }
        self.store
            .release_usage(&resource.provider_config_ref, name)
            .await
            .map_err(|e| ReconcileError::store("release provider config usage", e))?;
        self.store
            .remove_finalizer(name, FINALIZER)
            .await
            .map_err(|e| ReconcileError::store("remove finalizer", e))?;

        if resource.deletion_policy == DeletionPolicy::Orphan {
            info!("Orphaned external resource of {} {}", K::KIND, name);
        } else {
            info!("Finalized {} {}", K::KIND, name);
        }
        Ok(())
    }
}
