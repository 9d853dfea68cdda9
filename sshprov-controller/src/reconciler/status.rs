//! Writes conditions back to the store and reports their transitions.

use std::sync::Arc;

use sshprov_api::{
    condition, Condition, ConditionStatus, ManagedObject, ObjectStore, Resource, ResourceKind,
};
use tracing::debug;

use crate::error::ReconcileError;
use crate::events::{EventKind, EventRecorder};

pub struct StatusProjector {
    recorder: Arc<dyn EventRecorder>,
}

impl StatusProjector {
    pub fn new(recorder: Arc<dyn EventRecorder>) -> Self {
        Self { recorder }
    }

    /// Persist the status of `resource` and record an event for every
    /// condition whose status or reason differs from `before`.
    ///
    /// The write is conditional on the resource version the resource was
    /// read at. On success that version is advanced. Events are recorded
    /// only for a status that was actually written.
    pub async fn project<K, S>(
        &self,
        store: &S,
        resource: &mut Resource<K>,
        before: &[Condition],
    ) -> Result<(), ReconcileError>
    where
        K: ResourceKind,
        S: ObjectStore + ?Sized,
    {
        let status = resource.encode_status();
        let stored = store
            .get(resource.name())
            .await
            .map_err(|e| ReconcileError::store("read status", e))?;
        if stored.as_ref().map(|o| &o.status) == Some(&status) {
            return Ok(());
        }

        let updated = store
            .update_status(resource.name(), resource.metadata.resource_version, status)
            .await
            .map_err(|e| ReconcileError::store("update status", e))?;
        resource.metadata.resource_version = updated.metadata.resource_version;
        self.record_transitions(K::KIND, resource.name(), before, &resource.status.conditions);
        debug!("Updated status of {} {}", K::KIND, resource.name());
        Ok(())
    }

    /// Set one condition on an object that could not be decoded.
    pub async fn project_untyped<S: ObjectStore + ?Sized>(
        &self,
        store: &S,
        obj: &ManagedObject,
        kind: &'static str,
        cond: Condition,
    ) -> Result<(), ReconcileError> {
        let mut status = obj.status.clone();
        condition::set_condition(&mut status.conditions, cond);

        if status == obj.status {
            return Ok(());
        }
        let updated = store
            .update_status(obj.name(), obj.metadata.resource_version, status)
            .await
            .map_err(|e| ReconcileError::store("update status", e))?;
        self.record_transitions(
            kind,
            obj.name(),
            &obj.status.conditions,
            &updated.status.conditions,
        );
        Ok(())
    }

    fn record_transitions(
        &self,
        kind: &'static str,
        name: &str,
        before: &[Condition],
        after: &[Condition],
    ) {
        for cond in after {
            let previous = condition::get_condition(before, cond.kind);
            let transitioned = previous
                .map(|p| p.status != cond.status || p.reason != cond.reason)
                .unwrap_or(true);
            if !transitioned {
                continue;
            }

            let event_kind = if cond.status == ConditionStatus::False && cond.reason.is_error() {
                EventKind::Warning
            } else {
                EventKind::Normal
            };
            let message = if cond.message.is_empty() {
                format!("{:?} is now {:?}", cond.kind, cond.status)
            } else {
                cond.message.clone()
            };
            self.recorder
                .record(kind, name, event_kind, cond.reason, &message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemoryRecorder;
    use serde_json::json;
    use sshprov_api::{
        ConditionType, DeletionPolicy, File, ManagedSpec, ManagedStatus, MemoryStore, ObjectMeta,
        Reason, Reference, StoreError,
    };

    async fn stored_file(store: &MemoryStore) -> Resource<File> {
        let obj = store
            .create(ManagedObject {
                kind: "File".to_string(),
                metadata: ObjectMeta::new("a"),
                spec: ManagedSpec {
                    for_provider: json!({ "file": "/tmp/a" }),
                    provider_config_ref: Reference::default(),
                    deletion_policy: DeletionPolicy::Delete,
                    write_connection_secret_to_ref: None,
                },
                status: ManagedStatus::default(),
            })
            .await
            .unwrap();
        Resource::decode(&obj).unwrap()
    }

    #[tokio::test]
    async fn test_event_once_per_transition() {
        let store = MemoryStore::new();
        let recorder = Arc::new(MemoryRecorder::new());
        let projector = StatusProjector::new(recorder.clone());
        let mut res = stored_file(&store).await;

        let before = res.status.conditions.clone();
        res.status.set_condition(Condition::available());
        res.status.set_condition(Condition::reconcile_success());
        projector.project(&store, &mut res, &before).await.unwrap();
        assert_eq!(recorder.events().len(), 2);

        // Same state again: no events, no write
        let version = res.metadata.resource_version;
        let before = res.status.conditions.clone();
        res.status.set_condition(Condition::available());
        projector.project(&store, &mut res, &before).await.unwrap();
        assert_eq!(recorder.events().len(), 2);
        assert_eq!(res.metadata.resource_version, version);

        let stored = store.get("a").await.unwrap().unwrap();
        assert_eq!(
            stored.condition(ConditionType::Ready).map(|c| c.reason),
            Some(Reason::Available)
        );
    }

    #[tokio::test]
    async fn test_errors_are_warnings() {
        let store = MemoryStore::new();
        let recorder = Arc::new(MemoryRecorder::new());
        let projector = StatusProjector::new(recorder.clone());
        let mut res = stored_file(&store).await;

        let before = res.status.conditions.clone();
        res.status
            .set_condition(Condition::reconcile_error(Reason::DialError, "refused"));
        projector.project(&store, &mut res, &before).await.unwrap();

        let events = recorder.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_kind, EventKind::Warning);
        assert_eq!(events[0].message, "refused");
    }

    #[tokio::test]
    async fn test_stale_write_is_rejected() {
        let store = MemoryStore::new();
        let recorder = Arc::new(MemoryRecorder::new());
        let projector = StatusProjector::new(recorder.clone());
        let mut res = stored_file(&store).await;

        // Someone else writes first
        store.add_finalizer("a", "other/finalizer").await.unwrap();

        let before = res.status.conditions.clone();
        res.status.set_condition(Condition::available());
        let err = projector
            .project(&store, &mut res, &before)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::Store {
                source: StoreError::VersionMismatch { .. },
                ..
            }
        ));
        assert!(recorder.events().is_empty());

        // The next pass reads again and reports the transition once
        let obj = store.get("a").await.unwrap().unwrap();
        let mut res: Resource<File> = Resource::decode(&obj).unwrap();
        let before = res.status.conditions.clone();
        res.status.set_condition(Condition::available());
        projector.project(&store, &mut res, &before).await.unwrap();

        let events = recorder.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].reason, Reason::Available);
    }

    #[tokio::test]
    async fn test_untyped_projection_records_after_write() {
        let store = MemoryStore::new();
        let recorder = Arc::new(MemoryRecorder::new());
        let projector = StatusProjector::new(recorder.clone());
        let obj = stored_file(&store).await;
        let stale = store.get(obj.name()).await.unwrap().unwrap();

        store.add_finalizer("a", "other/finalizer").await.unwrap();
        let cond = Condition::reconcile_error(Reason::TypeMismatch, "not a File");
        assert!(projector
            .project_untyped(&store, &stale, "File", cond.clone())
            .await
            .is_err());
        assert!(recorder.events().is_empty());

        let fresh = store.get("a").await.unwrap().unwrap();
        projector
            .project_untyped(&store, &fresh, "File", cond)
            .await
            .unwrap();
        assert_eq!(recorder.events().len(), 1);
        assert_eq!(
            store
                .get("a")
                .await
                .unwrap()
                .unwrap()
                .condition(ConditionType::Synced)
                .map(|c| c.reason),
            Some(Reason::TypeMismatch)
        );
    }
}
