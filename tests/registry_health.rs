//! Registry lifecycle and health monitoring across backends.

use std::sync::Arc;

use loomstore::backends::{MemoryBackend, MemoryOptions};
use loomstore::checkpoint::{LifecycleState, MetadataDraft};
use loomstore::errors::StoreError;
use loomstore::metrics::HealthStatus;
use loomstore::{BackendRegistry, CheckpointStore};

mod common;
use common::*;

fn mem() -> Arc<MemoryBackend> {
    Arc::new(MemoryBackend::new(MemoryOptions::default()))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn first_registered_backend_is_default() {
    let registry = BackendRegistry::new();
    registry.register("a", mem(), false);
    registry.register("b", mem(), false);
    assert_eq!(registry.default_name().as_deref(), Some("a"));

    registry.register("c", mem(), true);
    assert_eq!(registry.default_name().as_deref(), Some("c"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn initializing_backends_reject_dispatch_until_ready() {
    let registry = Arc::new(BackendRegistry::new());
    registry.register_initializing("warming", mem());
    let store = CheckpointStore::new(Arc::clone(&registry));

    assert_eq!(
        registry.state_of("warming"),
        Some(LifecycleState::Initializing)
    );
    let err = store
        .load("t1", None, Some("warming"))
        .await
        .expect_err("not ready");
    assert!(matches!(
        err,
        StoreError::NotReady {
            state: LifecycleState::Initializing,
            ..
        }
    ));

    registry.mark_ready("warming", true);
    assert!(store.load("t1", None, Some("warming")).await.expect("ready").is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn closed_store_rejects_further_dispatch() {
    let store = memory_store();
    store
        .save("t1", checkpoint("cp-1"), MetadataDraft::default(), None)
        .await
        .expect("save");

    store.close().await;

    let err = store.load("t1", None, None).await.expect_err("closed");
    assert!(matches!(
        err,
        StoreError::NotReady {
            state: LifecycleState::Closed,
            ..
        }
    ));
    assert!(!err.is_retryable());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn descriptors_report_kind_default_and_state() {
    let registry = Arc::new(BackendRegistry::new());
    registry.register("a", mem(), false);
    registry.register_initializing("b", mem());

    let descriptors = registry.descriptors();
    assert_eq!(descriptors.len(), 2);
    assert!(descriptors[0].is_default);
    assert_eq!(descriptors[0].status, LifecycleState::Ready);
    assert_eq!(descriptors[1].status, LifecycleState::Initializing);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn health_check_failures_are_false_never_errors() {
    let registry = Arc::new(BackendRegistry::new());
    registry.register("ok", mem(), true);
    registry.register("flaky", Arc::new(FailingBackend), false);
    let store = CheckpointStore::new(registry);

    assert!(store.health_check(Some("ok")).await);
    assert!(!store.health_check(Some("flaky")).await);
    assert!(!store.health_check(Some("ghost")).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn health_summary_classification() {
    // All healthy.
    let registry = Arc::new(BackendRegistry::new());
    registry.register("a", mem(), true);
    registry.register("b", mem(), false);
    let store = CheckpointStore::new(registry);
    let summary = store.health_summary().await;
    assert_eq!(summary.status, HealthStatus::Healthy);
    assert_eq!(summary.backends.get("a"), Some(&true));

    // Default healthy, secondary down: degraded.
    let registry = Arc::new(BackendRegistry::new());
    registry.register("a", mem(), true);
    registry.register("flaky", Arc::new(FailingBackend), false);
    let store = CheckpointStore::new(registry);
    let summary = store.health_summary().await;
    assert_eq!(summary.status, HealthStatus::Degraded);
    assert_eq!(summary.backends.get("flaky"), Some(&false));

    // Default down: unhealthy even with healthy secondaries.
    let registry = Arc::new(BackendRegistry::new());
    registry.register("flaky", Arc::new(FailingBackend), true);
    registry.register("b", mem(), false);
    let store = CheckpointStore::new(registry);
    assert_eq!(store.health_summary().await.status, HealthStatus::Unhealthy);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn operations_route_to_named_backends_independently() {
    let registry = Arc::new(BackendRegistry::new());
    registry.register("a", mem(), true);
    registry.register("b", mem(), false);
    let store = CheckpointStore::new(registry);

    store
        .save("t1", checkpoint("cp-a"), MetadataDraft::default(), Some("a"))
        .await
        .expect("save a");
    store
        .save("t1", checkpoint("cp-b"), MetadataDraft::default(), Some("b"))
        .await
        .expect("save b");

    let from_a = store
        .load("t1", None, Some("a"))
        .await
        .expect("load")
        .expect("present");
    assert_eq!(from_a.checkpoint.id, "cp-a");
    let from_b = store
        .load("t1", None, Some("b"))
        .await
        .expect("load")
        .expect("present");
    assert_eq!(from_b.checkpoint.id, "cp-b");
}
