//! Shared test utilities for sshprov-controller integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use sshprov_api::{
    ConditionType, ConfigStore, CredentialsSource, DeletionPolicy, File, ManagedObject,
    ManagedSpec, ManagedStatus, MemoryStore, ObjectMeta, ObjectStore, ProviderConfig, Reason,
    Reference, SecretSource,
};
use sshprov_controller::clients::FileClient;
use sshprov_controller::test_util::MemoryHost;
use sshprov_controller::{Controller, ControllerOptions, MemoryRecorder, Reconciler};

pub const PASSWORD: &str = "hunter2";

/// A store, a simulated host and an event recorder wired to File reconcilers.
pub struct TestEnv {
    pub store: Arc<MemoryStore>,
    pub host: MemoryHost,
    pub recorder: Arc<MemoryRecorder>,
    pub options: ControllerOptions,
}

impl TestEnv {
    /// An environment with a "default" provider config whose password the
    /// host accepts.
    pub async fn new() -> Self {
        let env = Self {
            store: Arc::new(MemoryStore::new()),
            host: MemoryHost::new(),
            recorder: Arc::new(MemoryRecorder::new()),
            options: ControllerOptions {
                poll_interval: Duration::from_secs(60),
                short_wait: Duration::from_millis(10),
                backoff_base: Duration::from_millis(100),
                backoff_max: Duration::from_secs(5),
                max_concurrent_reconciles: 4,
                resync_interval: Duration::from_secs(600),
            },
        };
        env.host.require_password(PASSWORD);
        env.put_config("default", PASSWORD).await;
        env
    }

    pub async fn put_config(&self, name: &str, password: &str) {
        self.store
            .put_provider_config(ProviderConfig {
                name: name.to_string(),
                host: "10.0.0.7".to_string(),
                port: 22,
                user: "root".to_string(),
                credentials: CredentialsSource::Password {
                    secret: SecretSource::Inline {
                        value: password.to_string(),
                    },
                },
                known_hosts: None,
            })
            .await
            .unwrap();
    }

    pub fn reconciler(&self) -> Reconciler<File> {
        Reconciler::new(
            self.store.clone(),
            Arc::new(self.host.clone()),
            Arc::new(FileClient::new()),
            self.recorder.clone(),
            &self.options,
        )
    }

    pub fn controller(&self) -> Controller<File> {
        Controller::new(self.store.clone(), self.reconciler(), self.options.clone())
    }

    pub async fn create_file(&self, name: &str, path: &str) -> ManagedObject {
        self.create(name, file_spec(path)).await
    }

    pub async fn create(&self, name: &str, spec: ManagedSpec) -> ManagedObject {
        self.store
            .create(ManagedObject {
                kind: "File".to_string(),
                metadata: ObjectMeta::new(name),
                spec,
                status: ManagedStatus::default(),
            })
            .await
            .unwrap()
    }

    pub async fn get(&self, name: &str) -> Option<ManagedObject> {
        self.store.get(name).await.unwrap()
    }

    pub async fn reason(&self, name: &str, kind: ConditionType) -> Option<Reason> {
        self.get(name)
            .await
            .and_then(|o| o.condition(kind).map(|c| c.reason))
    }
}

pub fn file_spec(path: &str) -> ManagedSpec {
    ManagedSpec {
        for_provider: json!({ "file": path }),
        provider_config_ref: Reference::default(),
        deletion_policy: DeletionPolicy::Delete,
        write_connection_secret_to_ref: None,
    }
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
