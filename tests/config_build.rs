//! Declarative store assembly.

use loomstore::checkpoint::MetadataDraft;
use loomstore::config::{StoreConfig, build_store};

mod common;
use common::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn empty_config_yields_usable_memory_default() {
    let store = build_store(StoreConfig::default()).await.expect("build");
    assert_eq!(store.registry().default_name().as_deref(), Some("memory"));

    store
        .save("t1", checkpoint("cp-1"), MetadataDraft::default(), None)
        .await
        .expect("save");
    assert!(store.load("t1", None, None).await.expect("load").is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn configured_backends_register_in_order_with_default_flag() {
    let config = StoreConfig::from_json(
        r#"{
            "backends": [
                {"name": "scratch", "type": "memory"},
                {"name": "capped", "type": "memory", "max_per_thread": 5, "default": true}
            ]
        }"#,
    )
    .expect("parse");

    let store = build_store(config).await.expect("build");
    assert_eq!(store.registry().default_name().as_deref(), Some("capped"));
    assert!(store.registry().contains("scratch"));

    store
        .save("t1", checkpoint("cp-1"), MetadataDraft::default(), Some("scratch"))
        .await
        .expect("save to named backend");
    assert!(
        store
            .load("t1", None, Some("capped"))
            .await
            .expect("load")
            .is_none(),
        "backends are isolated"
    );
}

#[cfg(feature = "sqlite")]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sqlite_backend_builds_from_config() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("c.db").display());
    let config = StoreConfig::from_json(&format!(
        r#"{{"backends": [{{"name": "local", "type": "embedded-relational", "database_url": "{url}"}}]}}"#
    ))
    .expect("parse");

    let store = build_store(config).await.expect("build");
    store
        .save("t1", checkpoint("cp-1"), MetadataDraft::default(), None)
        .await
        .expect("save");
    let loaded = store
        .load("t1", Some("cp-1"), None)
        .await
        .expect("load")
        .expect("present");
    assert_eq!(loaded.checkpoint.id, "cp-1");
}
