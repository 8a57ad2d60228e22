//! SQLite backend integration tests against a temp-file database.

#![cfg(feature = "sqlite")]

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use loomstore::backend::CheckpointBackend;
use loomstore::backends::SqliteBackend;
use loomstore::checkpoint::{
    BackendKind, CleanupOptions, DateRange, ListOptions, MetadataDraft,
};
use loomstore::enrich::MetadataEnricher;
use loomstore::{BackendRegistry, CheckpointStore};
use tempfile::TempDir;

mod common;
use common::*;

/// Fresh file-backed database; the temp dir guard keeps it alive.
async fn sqlite_backend() -> (SqliteBackend, TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("checkpoints.db");
    let url = format!("sqlite://{}?mode=rwc", path.display());
    let backend = SqliteBackend::connect(&url).await.expect("connect sqlite");
    (backend, dir)
}

async fn put_aged(backend: &SqliteBackend, thread_id: &str, id: &str, age: Duration) {
    let enricher = MetadataEnricher::new();
    let stamp = Utc::now() - TimeDelta::from_std(age).expect("age fits");
    let metadata = enricher.enrich_at(thread_id, MetadataDraft::default(), stamp);
    let enhanced = enricher.enhance(checkpoint(id), metadata);
    backend.put(thread_id, &enhanced).await.expect("put");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn roundtrip_preserves_record_exactly() {
    let (backend, _dir) = sqlite_backend().await;
    let registry = Arc::new(BackendRegistry::new());
    registry.register("sqlite", Arc::new(backend), true);
    let store = CheckpointStore::new(registry);

    let saved = store
        .save("t1", checkpoint("cp-1"), draft("wf", Some("s1")), None)
        .await
        .expect("save");
    let loaded = store
        .load("t1", Some("cp-1"), None)
        .await
        .expect("load")
        .expect("present");

    assert_eq!(loaded.checkpoint, saved.checkpoint);
    assert_eq!(loaded.checksum, saved.checksum);
    assert_eq!(loaded.size_bytes, saved.size_bytes);
    assert_eq!(loaded.metadata.workflow_name.as_deref(), Some("wf"));
    assert_eq!(loaded.metadata.timestamp, saved.metadata.timestamp);

    // The payload that came back must hash to the checksum that was stored.
    let recomputed = MetadataEnricher::new().compute_checksum(&loaded.checkpoint);
    assert_eq!(recomputed, loaded.checksum);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn latest_follows_creation_order() {
    let (backend, _dir) = sqlite_backend().await;
    put_aged(&backend, "t1", "older", Duration::from_secs(120)).await;
    put_aged(&backend, "t1", "newer", Duration::from_secs(10)).await;

    let latest = backend
        .get("t1", None)
        .await
        .expect("get")
        .expect("present");
    assert_eq!(latest.checkpoint.id, "newer");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn resave_overwrites_in_place() {
    let (backend, _dir) = sqlite_backend().await;
    put_aged(&backend, "t1", "cp-1", Duration::from_secs(60)).await;
    put_aged(&backend, "t1", "cp-1", Duration::from_secs(1)).await;

    let entries = backend
        .list("t1", &ListOptions::default())
        .await
        .expect("list");
    assert_eq!(entries.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn date_range_pushdown_matches_inclusive_window() {
    let (backend, _dir) = sqlite_backend().await;
    put_aged(&backend, "t1", "old", Duration::from_secs(3_600)).await;
    put_aged(&backend, "t1", "recent", Duration::from_secs(60)).await;

    let windowed = backend
        .list(
            "t1",
            &ListOptions {
                date_range: Some(DateRange {
                    from: Some(Utc::now() - TimeDelta::seconds(600)),
                    to: None,
                }),
                ..Default::default()
            },
        )
        .await
        .expect("list");
    assert_eq!(windowed.len(), 1);
    assert_eq!(windowed[0].checkpoint.id, "recent");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cleanup_applies_both_passes_transactionally() {
    let (backend, _dir) = sqlite_backend().await;
    put_aged(&backend, "t1", "ancient", Duration::from_secs(10 * 86_400)).await;
    for i in 0u64..5 {
        put_aged(&backend, "t1", &format!("cp-{i}"), Duration::from_secs(500 - i * 100)).await;
    }

    let report = backend
        .cleanup(&CleanupOptions {
            max_age: Some(Duration::from_secs(86_400)),
            max_per_thread: Some(2),
            ..Default::default()
        })
        .await
        .expect("cleanup");

    // "ancient" from the age pass, cp-0..cp-2 from the cap pass.
    assert_eq!(report.removed, 4);
    let survivors = backend
        .list("t1", &ListOptions::default())
        .await
        .expect("list");
    let ids: Vec<&str> = survivors.iter().map(|e| e.checkpoint.id.as_str()).collect();
    assert_eq!(ids, ["cp-3", "cp-4"]);

    let stats = backend.storage_stats().await.expect("stats");
    assert!(stats.last_cleanup.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn access_bookkeeping_persists_across_loads() {
    let (backend, _dir) = sqlite_backend().await;
    let registry = Arc::new(BackendRegistry::new());
    registry.register("sqlite", Arc::new(backend), true);
    let store = CheckpointStore::new(registry);

    store
        .save("t1", checkpoint("cp-1"), MetadataDraft::default(), None)
        .await
        .expect("save");
    store.load("t1", Some("cp-1"), None).await.expect("load");
    let second = store
        .load("t1", Some("cp-1"), None)
        .await
        .expect("load")
        .expect("present");
    assert_eq!(second.metadata.access_count, 1);
    assert!(second.metadata.last_accessed_at.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stats_and_info_report_the_file_store() {
    let (backend, _dir) = sqlite_backend().await;
    put_aged(&backend, "t1", "a", Duration::from_secs(30)).await;
    put_aged(&backend, "t2", "b", Duration::from_secs(2 * 3_600)).await;

    let info = backend.storage_info().await.expect("info");
    assert_eq!(info.kind, BackendKind::Sqlite);
    assert!(info.persistent);

    let stats = backend.storage_stats().await.expect("stats");
    assert_eq!(stats.total_checkpoints, 2);
    assert_eq!(stats.active_threads, 2);
    assert_eq!(stats.recent_checkpoints, 1);
    assert!(stats.total_storage_used_bytes > 0);
}
