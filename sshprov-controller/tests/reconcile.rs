//! Reconcile pass integration tests.
//!
//! Drive single passes of the File reconciler against a simulated host and
//! check conditions, commands, finalizers and published secrets.

mod common;

use std::time::Duration;

use common::{file_spec, TestEnv};
use serde_json::json;
use sshprov_api::{
    ConditionStatus, ConditionType, ConfigStore, DeletionPolicy, ObjectStore, Reason, Reference,
    StoreError,
};
use sshprov_controller::test_util::{DialFailure, ExecFailure};
use sshprov_controller::{EventKind, ReconcileError, Requeue, FINALIZER};

/// Object without status, file absent: the first pass creates the file and
/// reports Creating, the second observes it and reports Available.
#[tokio::test]
async fn test_create_then_available() {
    let env = TestEnv::new().await;
    env.create_file("a", "/tmp/a").await;
    let reconciler = env.reconciler();

    let requeue = reconciler.reconcile("a").await.unwrap();
    assert_eq!(requeue, Requeue::After(env.options.short_wait));
    assert!(env.host.exists("/tmp/a"));
    assert_eq!(
        env.host.commands(),
        vec!["test -e /tmp/a".to_string(), "touch -- /tmp/a".to_string()]
    );
    assert_eq!(
        env.reason("a", ConditionType::Ready).await,
        Some(Reason::Creating)
    );
    assert_eq!(
        env.reason("a", ConditionType::Synced).await,
        Some(Reason::ReconcileSuccess)
    );

    let requeue = reconciler.reconcile("a").await.unwrap();
    assert_eq!(requeue, Requeue::After(env.options.poll_interval));
    assert_eq!(
        env.reason("a", ConditionType::Ready).await,
        Some(Reason::Available)
    );

    let obj = env.get("a").await.unwrap();
    assert_eq!(obj.status.at_provider, json!({ "status": "Available" }));
    assert!(obj.metadata.has_finalizer(FINALIZER));
    assert_eq!(env.host.open_sessions(), 0);
}

#[tokio::test]
async fn test_converged_pass_does_not_recreate() {
    let env = TestEnv::new().await;
    env.create_file("a", "/tmp/a").await;
    let reconciler = env.reconciler();

    reconciler.reconcile("a").await.unwrap();
    reconciler.reconcile("a").await.unwrap();
    env.host.clear_commands();

    for _ in 0..3 {
        let requeue = reconciler.reconcile("a").await.unwrap();
        assert_eq!(requeue, Requeue::After(env.options.poll_interval));
    }
    assert!(env
        .host
        .commands()
        .iter()
        .all(|c| c.starts_with("test -e")));
}

/// Repeated passes over a converged object write no status and emit no
/// events.
#[tokio::test]
async fn test_converged_pass_is_quiet() {
    let env = TestEnv::new().await;
    env.create_file("a", "/tmp/a").await;
    let reconciler = env.reconciler();

    reconciler.reconcile("a").await.unwrap();
    reconciler.reconcile("a").await.unwrap();
    let version = env.get("a").await.unwrap().metadata.resource_version;
    let events = env.recorder.events().len();

    reconciler.reconcile("a").await.unwrap();
    assert_eq!(env.get("a").await.unwrap().metadata.resource_version, version);
    assert_eq!(env.recorder.events().len(), events);
}

/// Bad credentials: ConfigError, and nothing runs on the host.
#[tokio::test]
async fn test_bad_credentials() {
    let env = TestEnv::new().await;
    env.put_config("default", "wrong").await;
    env.create_file("a", "/tmp/a").await;

    let err = env.reconciler().reconcile("a").await.unwrap_err();
    assert_eq!(err.reason(), Reason::ConfigError);
    assert!(err.is_retryable());
    assert!(env.host.commands().is_empty());

    let obj = env.get("a").await.unwrap();
    let synced = obj.condition(ConditionType::Synced).unwrap();
    assert_eq!(synced.status, ConditionStatus::False);
    assert_eq!(synced.reason, Reason::ConfigError);
    assert!(obj.condition(ConditionType::Ready).is_none());

    let warnings: Vec<_> = env
        .recorder
        .events_for("a")
        .into_iter()
        .filter(|e| e.event_kind == EventKind::Warning)
        .collect();
    assert_eq!(warnings.len(), 1);
}

#[tokio::test]
async fn test_missing_provider_config() {
    let env = TestEnv::new().await;
    let mut spec = file_spec("/tmp/a");
    spec.provider_config_ref = Reference::new("nowhere");
    env.create("a", spec).await;

    let err = env.reconciler().reconcile("a").await.unwrap_err();
    assert_eq!(err.reason(), Reason::ConfigError);
    assert!(err.to_string().contains("nowhere"));
}

#[tokio::test]
async fn test_unreachable_host() {
    let env = TestEnv::new().await;
    env.host.set_dial_failure(Some(DialFailure::Network));
    env.create_file("a", "/tmp/a").await;

    let err = env.reconciler().reconcile("a").await.unwrap_err();
    assert!(matches!(err, ReconcileError::Dial(_)));
    assert_eq!(
        env.reason("a", ConditionType::Synced).await,
        Some(Reason::DialError)
    );
}

#[tokio::test]
async fn test_observe_failure_is_not_absence() {
    let env = TestEnv::new().await;
    env.host.fail_command("test", ExecFailure::Transport);
    env.create_file("a", "/tmp/a").await;

    let err = env.reconciler().reconcile("a").await.unwrap_err();
    assert_eq!(err.reason(), Reason::ExecutionError);
    assert!(!env.host.exists("/tmp/a"));
    assert!(env.host.commands().iter().all(|c| !c.starts_with("touch")));
    assert_eq!(env.host.open_sessions(), 0);
}

#[tokio::test]
async fn test_create_failure_reports_execution_error() {
    let env = TestEnv::new().await;
    env.host.fail_command("touch", ExecFailure::Exit(1));
    env.create_file("a", "/tmp/a").await;

    let err = env.reconciler().reconcile("a").await.unwrap_err();
    assert!(err.to_string().starts_with("create file:"));

    let obj = env.get("a").await.unwrap();
    assert_eq!(
        obj.condition(ConditionType::Synced).map(|c| c.reason),
        Some(Reason::ExecutionError)
    );
    assert_eq!(
        obj.condition(ConditionType::Ready).map(|c| c.reason),
        Some(Reason::Creating)
    );
}

/// An error followed by a success flips Synced back to True.
#[tokio::test]
async fn test_recovery_after_error() {
    let env = TestEnv::new().await;
    env.host.set_dial_failure(Some(DialFailure::Network));
    env.create_file("a", "/tmp/a").await;
    let reconciler = env.reconciler();

    assert!(reconciler.reconcile("a").await.is_err());
    env.host.clear_failures();
    reconciler.reconcile("a").await.unwrap();

    let obj = env.get("a").await.unwrap();
    let synced = obj.condition(ConditionType::Synced).unwrap();
    assert_eq!(synced.status, ConditionStatus::True);
    assert!(synced.message.is_empty());
}

/// File present, object marked for deletion: Deleting and rm, then the next
/// pass sees it absent and finalizes.
#[tokio::test]
async fn test_delete_then_finalize() {
    let env = TestEnv::new().await;
    env.create_file("a", "/tmp/a").await;
    let reconciler = env.reconciler();
    reconciler.reconcile("a").await.unwrap();
    reconciler.reconcile("a").await.unwrap();
    assert_eq!(env.store.usages("default").await.unwrap(), vec!["a"]);

    env.store.mark_for_deletion("a").await.unwrap();
    env.host.clear_commands();

    let requeue = reconciler.reconcile("a").await.unwrap();
    assert_eq!(requeue, Requeue::After(env.options.short_wait));
    assert_eq!(
        env.reason("a", ConditionType::Ready).await,
        Some(Reason::Deleting)
    );
    assert!(env
        .host
        .commands()
        .contains(&"rm -f -- /tmp/a".to_string()));
    assert!(!env.host.exists("/tmp/a"));

    let requeue = reconciler.reconcile("a").await.unwrap();
    assert_eq!(requeue, Requeue::Never);
    assert!(env.get("a").await.is_none());
    assert!(env.store.usages("default").await.unwrap().is_empty());
    env.store.delete_provider_config("default").await.unwrap();
    assert_eq!(env.host.open_sessions(), 0);
}

#[tokio::test]
async fn test_delete_of_absent_file_finalizes_at_once() {
    let env = TestEnv::new().await;
    env.create_file("a", "/tmp/a").await;
    let reconciler = env.reconciler();
    reconciler.reconcile("a").await.unwrap();

    env.host.remove_file("/tmp/a");
    env.store.mark_for_deletion("a").await.unwrap();

    assert_eq!(reconciler.reconcile("a").await.unwrap(), Requeue::Never);
    assert!(env.get("a").await.is_none());
    assert!(env.host.commands().iter().all(|c| !c.starts_with("rm")));
}

#[tokio::test]
async fn test_orphan_keeps_file() {
    let env = TestEnv::new().await;
    let mut spec = file_spec("/tmp/keep");
    spec.deletion_policy = DeletionPolicy::Orphan;
    env.create("a", spec).await;
    let reconciler = env.reconciler();
    reconciler.reconcile("a").await.unwrap();

    env.store.mark_for_deletion("a").await.unwrap();
    assert_eq!(reconciler.reconcile("a").await.unwrap(), Requeue::Never);

    assert!(env.get("a").await.is_none());
    assert!(env.host.exists("/tmp/keep"));
}

#[tokio::test]
async fn test_provider_config_in_use_cannot_be_deleted() {
    let env = TestEnv::new().await;
    env.create_file("a", "/tmp/a").await;
    env.reconciler().reconcile("a").await.unwrap();

    let err = env.store.delete_provider_config("default").await.unwrap_err();
    assert!(matches!(err, StoreError::InUse { .. }));
}

#[tokio::test]
async fn test_connection_secret_published_and_removed() {
    let env = TestEnv::new().await;
    let mut spec = file_spec("/tmp/a");
    spec.write_connection_secret_to_ref = Some(Reference::new("a-conn"));
    env.create("a", spec).await;
    let reconciler = env.reconciler();

    reconciler.reconcile("a").await.unwrap();
    assert!(env.store.secret("a-conn").await.is_some());

    env.store.mark_for_deletion("a").await.unwrap();
    reconciler.reconcile("a").await.unwrap();
    reconciler.reconcile("a").await.unwrap();
    assert!(env.get("a").await.is_none());
    assert!(env.store.secret("a-conn").await.is_none());
}

/// Wrong parameters cannot be fixed by retrying.
#[tokio::test]
async fn test_type_mismatch_is_not_retried() {
    let env = TestEnv::new().await;
    let mut spec = file_spec("/tmp/a");
    spec.for_provider = json!({ "path": "/tmp/a" });
    env.create("a", spec).await;

    let requeue = env.reconciler().reconcile("a").await.unwrap();
    assert_eq!(requeue, Requeue::Never);
    assert_eq!(
        env.reason("a", ConditionType::Synced).await,
        Some(Reason::TypeMismatch)
    );
    assert_eq!(env.host.dials(), 0);
}

#[tokio::test]
async fn test_missing_object_is_a_no_op() {
    let env = TestEnv::new().await;
    let requeue = env.reconciler().reconcile("nope").await.unwrap();
    assert_eq!(requeue, Requeue::Never);
    assert_eq!(env.host.dials(), 0);
}

/// A pass never touches spec, and only one Ready/Synced condition exists.
#[tokio::test]
async fn test_spec_untouched_and_one_condition_per_type() {
    let env = TestEnv::new().await;
    let created = env.create_file("a", "/tmp/a").await;
    let reconciler = env.reconciler();
    for _ in 0..3 {
        reconciler.reconcile("a").await.unwrap();
    }

    let obj = env.get("a").await.unwrap();
    assert_eq!(obj.spec, created.spec);
    assert_eq!(obj.metadata.generation, created.metadata.generation);
    assert_eq!(obj.status.conditions.len(), 2);
}

/// Secrets are resolved on every pass, so a rotated password is used
/// without restarting.
#[tokio::test]
async fn test_rotated_credentials_are_picked_up() {
    let env = TestEnv::new().await;
    env.create_file("a", "/tmp/a").await;
    let reconciler = env.reconciler();
    reconciler.reconcile("a").await.unwrap();

    env.host.require_password("rotated");
    assert!(reconciler.reconcile("a").await.is_err());

    env.put_config("default", "rotated").await;
    reconciler.reconcile("a").await.unwrap();
    assert_eq!(
        env.reason("a", ConditionType::Synced).await,
        Some(Reason::ReconcileSuccess)
    );
}

#[tokio::test]
async fn test_slow_host_still_converges() {
    let env = TestEnv::new().await;
    env.host.set_exec_delay(Duration::from_millis(20));
    env.create_file("a", "/tmp/a").await;
    let reconciler = env.reconciler();

    reconciler.reconcile("a").await.unwrap();
    reconciler.reconcile("a").await.unwrap();
    assert_eq!(
        env.reason("a", ConditionType::Ready).await,
        Some(Reason::Available)
    );
}
