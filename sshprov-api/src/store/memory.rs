//! In-process store backed by hash maps.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use super::error::{Result, StoreError};
use super::event::Event;
use super::traits::{ConfigStore, ConnectionDetails, ConnectionPublisher, ObjectStore};
use crate::managed::{ManagedObject, ManagedSpec, ManagedStatus};
use crate::meta::Reference;
use crate::provider_config::ProviderConfig;

const EVENT_CAPACITY: usize = 1024;

#[derive(Default)]
struct State {
    objects: HashMap<String, ManagedObject>,
    configs: HashMap<String, ProviderConfig>,
    usages: HashMap<String, BTreeSet<String>>,
    secrets: HashMap<String, ConnectionDetails>,
    /// Last resource version handed out. Versions are store-wide.
    version: u64,
}

impl State {
    fn next_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }
}

/// Store keeping everything in memory.
pub struct MemoryStore {
    state: RwLock<State>,
    events: broadcast::Sender<Event>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: RwLock::new(State::default()),
            events,
        }
    }

    fn emit(&self, event: Event) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Read back a published connection secret.
    pub async fn secret(&self, name: &str) -> Option<ConnectionDetails> {
        self.state.read().await.secrets.get(name).cloned()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, name: &str) -> Result<Option<ManagedObject>> {
        Ok(self.state.read().await.objects.get(name).cloned())
    }

    async fn list(&self, kind: &str) -> Result<Vec<ManagedObject>> {
        let state = self.state.read().await;
        let mut objects: Vec<ManagedObject> = state
            .objects
            .values()
            .filter(|o| o.kind == kind)
            .cloned()
            .collect();
        objects.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        Ok(objects)
    }

    async fn create(&self, mut obj: ManagedObject) -> Result<ManagedObject> {
        let mut state = self.state.write().await;
        if state.objects.contains_key(obj.name()) {
            return Err(StoreError::Conflict(format!(
                "object {} already exists",
                obj.name()
            )));
        }

        obj.metadata.uid = uuid::Uuid::new_v4().to_string();
        obj.metadata.resource_version = state.next_version();
        obj.metadata.generation = 1;
        obj.metadata.creation_timestamp = Utc::now();
        obj.metadata.deletion_timestamp = None;

        state
            .objects
            .insert(obj.metadata.name.clone(), obj.clone());
        drop(state);

        debug!("Created {} {}", obj.kind, obj.name());
        self.emit(Event::ObjectCreated(obj.clone()));
        Ok(obj)
    }

    async fn update_spec(&self, name: &str, spec: ManagedSpec) -> Result<ManagedObject> {
        let mut state = self.state.write().await;
        let version = state.next_version();
        let current = state
            .objects
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;

        if current.spec == spec {
            return Ok(current.clone());
        }

        let old = current.clone();
        current.spec = spec;
        current.metadata.generation += 1;
        current.metadata.resource_version = version;
        let new = current.clone();
        drop(state);

        self.emit(Event::ObjectUpdated {
            old,
            new: new.clone(),
        });
        Ok(new)
    }

    async fn update_status(
        &self,
        name: &str,
        expected_version: u64,
        status: ManagedStatus,
    ) -> Result<ManagedObject> {
        let mut state = self.state.write().await;
        let actual = state
            .objects
            .get(name)
            .map(|o| o.metadata.resource_version)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;

        if actual != expected_version {
            return Err(StoreError::VersionMismatch {
                name: name.to_string(),
                expected: expected_version,
                actual,
            });
        }

        let version = state.next_version();
        let Some(current) = state.objects.get_mut(name) else {
            return Err(StoreError::NotFound(name.to_string()));
        };
        let old = current.clone();
        current.status = status;
        current.metadata.resource_version = version;
        let new = current.clone();
        drop(state);

        self.emit(Event::ObjectUpdated {
            old,
            new: new.clone(),
        });
        Ok(new)
    }

    async fn add_finalizer(&self, name: &str, finalizer: &str) -> Result<ManagedObject> {
        let mut state = self.state.write().await;
        let version = state.next_version();
        let current = state
            .objects
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;

        if current.metadata.has_finalizer(finalizer) {
            return Ok(current.clone());
        }

        let old = current.clone();
        current.metadata.finalizers.push(finalizer.to_string());
        current.metadata.resource_version = version;
        let new = current.clone();
        drop(state);

        self.emit(Event::ObjectUpdated {
            old,
            new: new.clone(),
        });
        Ok(new)
    }

    async fn remove_finalizer(
        &self,
        name: &str,
        finalizer: &str,
    ) -> Result<Option<ManagedObject>> {
        let mut state = self.state.write().await;
        let version = state.next_version();
        let current = state
            .objects
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;

        let old = current.clone();
        current.metadata.finalizers.retain(|f| f != finalizer);
        current.metadata.resource_version = version;

        if current.metadata.is_being_deleted() && current.metadata.finalizers.is_empty() {
            let kind = current.kind.clone();
            state.objects.remove(name);
            drop(state);

            debug!("Removed {} {} after last finalizer", kind, name);
            self.emit(Event::ObjectDeleted {
                kind,
                name: name.to_string(),
            });
            return Ok(None);
        }

        let new = current.clone();
        drop(state);

        if old.metadata.finalizers != new.metadata.finalizers {
            self.emit(Event::ObjectUpdated {
                old,
                new: new.clone(),
            });
        }
        Ok(Some(new))
    }

    async fn mark_for_deletion(&self, name: &str) -> Result<Option<ManagedObject>> {
        let mut state = self.state.write().await;
        let version = state.next_version();
        let current = state
            .objects
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;

        if current.metadata.finalizers.is_empty() {
            let kind = current.kind.clone();
            state.objects.remove(name);
            drop(state);

            self.emit(Event::ObjectDeleted {
                kind,
                name: name.to_string(),
            });
            return Ok(None);
        }

        if current.metadata.is_being_deleted() {
            return Ok(Some(current.clone()));
        }

        let old = current.clone();
        current.metadata.deletion_timestamp = Some(Utc::now());
        current.metadata.resource_version = version;
        let new = current.clone();
        drop(state);

        self.emit(Event::ObjectUpdated {
            old,
            new: new.clone(),
        });
        Ok(Some(new))
    }

    fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn get_provider_config(&self, name: &str) -> Result<Option<ProviderConfig>> {
        Ok(self.state.read().await.configs.get(name).cloned())
    }

    async fn put_provider_config(&self, config: ProviderConfig) -> Result<()> {
        let name = config.name.clone();
        let mut state = self.state.write().await;
        if state.configs.get(&name) == Some(&config) {
            return Ok(());
        }
        state.configs.insert(name.clone(), config);
        drop(state);

        self.emit(Event::ProviderConfigUpdated { name });
        Ok(())
    }

    async fn delete_provider_config(&self, name: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(users) = state.usages.get(name) {
            if !users.is_empty() {
                return Err(StoreError::InUse {
                    name: name.to_string(),
                    users: users.iter().cloned().collect(),
                });
            }
        }
        if state.configs.remove(name).is_none() {
            return Err(StoreError::NotFound(name.to_string()));
        }
        state.usages.remove(name);
        drop(state);

        self.emit(Event::ProviderConfigDeleted {
            name: name.to_string(),
        });
        Ok(())
    }

    async fn track_usage(&self, config: &Reference, object: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .usages
            .entry(config.name.clone())
            .or_default()
            .insert(object.to_string());
        Ok(())
    }

    async fn release_usage(&self, config: &Reference, object: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(users) = state.usages.get_mut(&config.name) {
            users.remove(object);
        }
        Ok(())
    }

    async fn usages(&self, config: &str) -> Result<Vec<String>> {
        let state = self.state.read().await;
        Ok(state
            .usages
            .get(config)
            .map(|u| u.iter().cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl ConnectionPublisher for MemoryStore {
    async fn publish(&self, to: &Reference, details: &ConnectionDetails) -> Result<()> {
        let mut state = self.state.write().await;
        let secret = state.secrets.entry(to.name.clone()).or_default();
        for (key, value) in details {
            secret.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    async fn unpublish(&self, to: &Reference) -> Result<()> {
        self.state.write().await.secrets.remove(&to.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managed::DeletionPolicy;
    use crate::meta::ObjectMeta;
    use crate::provider_config::{CredentialsSource, SecretSource};
    use serde_json::json;

    fn file(name: &str, path: &str) -> ManagedObject {
        ManagedObject {
            kind: "File".to_string(),
            metadata: ObjectMeta::new(name),
            spec: ManagedSpec {
                for_provider: json!({ "file": path }),
                provider_config_ref: Reference::default(),
                deletion_policy: DeletionPolicy::Delete,
                write_connection_secret_to_ref: None,
            },
            status: ManagedStatus::default(),
        }
    }

    fn config(name: &str) -> ProviderConfig {
        ProviderConfig {
            name: name.to_string(),
            host: "127.0.0.1".to_string(),
            port: 22,
            user: "root".to_string(),
            credentials: CredentialsSource::Password {
                secret: SecretSource::Inline {
                    value: "secret".to_string(),
                },
            },
            known_hosts: None,
        }
    }

    #[tokio::test]
    async fn test_object_crud() {
        let store = MemoryStore::new();

        let created = store.create(file("a", "/tmp/a")).await.unwrap();
        assert_eq!(created.metadata.generation, 1);
        assert!(!created.metadata.uid.is_empty());

        let err = store.create(file("a", "/tmp/a")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let mut spec = created.spec.clone();
        spec.for_provider = json!({ "file": "/tmp/b" });
        let updated = store.update_spec("a", spec).await.unwrap();
        assert_eq!(updated.metadata.generation, 2);
        assert!(updated.metadata.resource_version > created.metadata.resource_version);

        assert_eq!(store.list("File").await.unwrap().len(), 1);
        assert!(store.list("Directory").await.unwrap().is_empty());

        // No finalizers: removed right away
        assert!(store.mark_for_deletion("a").await.unwrap().is_none());
        assert!(store.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_status_write_rejects_stale_version() {
        let store = MemoryStore::new();
        let created = store.create(file("a", "/tmp/a")).await.unwrap();

        // A spec change races the status write
        let mut spec = created.spec.clone();
        spec.for_provider = json!({ "file": "/tmp/b" });
        store.update_spec("a", spec).await.unwrap();

        let err = store
            .update_status("a", created.metadata.resource_version, ManagedStatus::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::VersionMismatch { .. }));

        let current = store.get("a").await.unwrap().unwrap();
        let written = store
            .update_status("a", current.metadata.resource_version, ManagedStatus::default())
            .await
            .unwrap();
        assert_eq!(written.spec.for_provider, json!({ "file": "/tmp/b" }));
    }

    #[tokio::test]
    async fn test_finalizer_blocks_removal() {
        let store = MemoryStore::new();
        store.create(file("a", "/tmp/a")).await.unwrap();
        store.add_finalizer("a", "test/finalizer").await.unwrap();

        let marked = store.mark_for_deletion("a").await.unwrap().unwrap();
        assert!(marked.metadata.is_being_deleted());

        let removed = store.remove_finalizer("a", "test/finalizer").await.unwrap();
        assert!(removed.is_none());
        assert!(store.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_status_write_does_not_need_reconcile() {
        let store = MemoryStore::new();
        let mut events = store.subscribe();
        let created = store.create(file("a", "/tmp/a")).await.unwrap();
        assert!(events.recv().await.unwrap().needs_reconcile());

        store
            .update_status("a", created.metadata.resource_version, ManagedStatus::default())
            .await
            .unwrap();
        assert!(!events.recv().await.unwrap().needs_reconcile());

        store.mark_for_deletion("a").await.unwrap();
        let event = events.recv().await.unwrap();
        assert!(matches!(event, Event::ObjectDeleted { .. }));
    }

    #[tokio::test]
    async fn test_config_in_use_cannot_be_deleted() {
        let store = MemoryStore::new();
        store.put_provider_config(config("default")).await.unwrap();
        store
            .track_usage(&Reference::default(), "a")
            .await
            .unwrap();

        let err = store.delete_provider_config("default").await.unwrap_err();
        assert!(matches!(err, StoreError::InUse { .. }));

        store
            .release_usage(&Reference::default(), "a")
            .await
            .unwrap();
        store.delete_provider_config("default").await.unwrap();
        assert!(store.get_provider_config("default").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_publish_merges_details() {
        let store = MemoryStore::new();
        let to = Reference::new("conn");

        let mut details = ConnectionDetails::new();
        details.insert("path".to_string(), b"/tmp/a".to_vec());
        store.publish(&to, &details).await.unwrap();

        let mut more = ConnectionDetails::new();
        more.insert("host".to_string(), b"10.0.0.7".to_vec());
        store.publish(&to, &more).await.unwrap();

        let secret = store.secret("conn").await.unwrap();
        assert_eq!(secret.len(), 2);

        store.unpublish(&to).await.unwrap();
        assert!(store.secret("conn").await.is_none());
    }
}
