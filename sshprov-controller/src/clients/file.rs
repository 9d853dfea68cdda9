//! Client for File resources.

use async_trait::async_trait;
use sshprov_api::{Condition, File, Resource};
use tracing::debug;

use super::{ExternalClient, ExternalCreation, ExternalObservation, ExternalUpdate};
use crate::error::ReconcileError;
use crate::remote::{RemoteCommand, RemoteSession};

/// Exit status of `test -e` for a missing path.
const NOT_FOUND_ON_CHECK: i32 = 1;

const AVAILABLE: &str = "Available";

/// Manages plain files on the remote host.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileClient;

impl FileClient {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ExternalClient<File> for FileClient {
    async fn observe(
        &self,
        session: &mut dyn RemoteSession,
        resource: &mut Resource<File>,
    ) -> Result<ExternalObservation, ReconcileError> {
        let path = &resource.for_provider.file;
        match session
            .execute(&RemoteCommand::path_exists(path).into())
            .await
        {
            Ok(_) => {
                resource.status.set_condition(Condition::available());
                resource.status.at_provider.status = AVAILABLE.to_string();
                Ok(ExternalObservation::up_to_date())
            }
            Err(e) if e.exited_with(NOT_FOUND_ON_CHECK) => {
                debug!("File {} not found on check", path);
                Ok(ExternalObservation::absent())
            }
            Err(e) => Err(ReconcileError::execution("observe file", e)),
        }
    }

    async fn create(
        &self,
        session: &mut dyn RemoteSession,
        resource: &mut Resource<File>,
    ) -> Result<ExternalCreation, ReconcileError> {
        resource.status.set_condition(Condition::creating());
        session
            .execute(&RemoteCommand::touch(&resource.for_provider.file).into())
            .await
            .map_err(|e| ReconcileError::execution("create file", e))?;
        Ok(ExternalCreation::default())
    }

    async fn update(
        &self,
        _session: &mut dyn RemoteSession,
        _resource: &mut Resource<File>,
    ) -> Result<ExternalUpdate, ReconcileError> {
        // A File has nothing to change besides its existence.
        Ok(ExternalUpdate::default())
    }

    async fn delete(
        &self,
        session: &mut dyn RemoteSession,
        resource: &mut Resource<File>,
    ) -> Result<(), ReconcileError> {
        resource.status.set_condition(Condition::deleting());
        session
            .execute(&RemoteCommand::remove(&resource.for_provider.file).into())
            .await
            .map_err(|e| ReconcileError::execution("delete file", e))?;
        Ok(())
    }
}
