//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use loomstore::backend::CheckpointBackend;
use loomstore::backends::{MemoryBackend, MemoryOptions};
use loomstore::checkpoint::{
    BackendKind, Checkpoint, CleanupOptions, CleanupReport, EnhancedCheckpoint, ListOptions,
    MetadataDraft, StorageInfo, StorageStats,
};
use loomstore::errors::{BackendError, BackendResult};
use loomstore::{BackendRegistry, CheckpointStore};
use rustc_hash::FxHashMap;

pub fn checkpoint(id: &str) -> Checkpoint {
    let mut payload = FxHashMap::default();
    payload.insert("counter".to_string(), serde_json::json!(1));
    payload.insert("node".to_string(), serde_json::json!(id));
    Checkpoint::new(id, payload)
}

pub fn draft(workflow: &str, step_name: Option<&str>) -> MetadataDraft {
    MetadataDraft {
        source: Some("loop".into()),
        step: Some(1),
        workflow_name: Some(workflow.to_string()),
        step_name: step_name.map(str::to_string),
        ..Default::default()
    }
}

/// Store with a single in-memory default backend named "memory".
pub fn memory_store() -> CheckpointStore {
    memory_store_with(MemoryOptions::default())
}

pub fn memory_store_with(options: MemoryOptions) -> CheckpointStore {
    let registry = Arc::new(BackendRegistry::new());
    registry.register("memory", Arc::new(MemoryBackend::new(options)), true);
    CheckpointStore::new(registry)
}

/// Test double whose every operation fails with a connection error, for
/// exercising error normalization and health classification.
pub struct FailingBackend;

#[async_trait]
impl CheckpointBackend for FailingBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn put(&self, _: &str, _: &EnhancedCheckpoint) -> BackendResult<()> {
        Err(BackendError::backend("connection refused"))
    }

    async fn get(&self, _: &str, _: Option<&str>) -> BackendResult<Option<EnhancedCheckpoint>> {
        Err(BackendError::backend("connection refused"))
    }

    async fn list(&self, _: &str, _: &ListOptions) -> BackendResult<Vec<EnhancedCheckpoint>> {
        Err(BackendError::backend("connection refused"))
    }

    async fn delete(&self, _: &str, _: &str) -> BackendResult<bool> {
        Err(BackendError::backend("connection refused"))
    }

    async fn delete_thread(&self, _: &str) -> BackendResult<u64> {
        Err(BackendError::backend("connection refused"))
    }

    async fn threads(&self) -> BackendResult<Vec<String>> {
        Err(BackendError::backend("connection refused"))
    }

    async fn cleanup(&self, _: &CleanupOptions) -> BackendResult<CleanupReport> {
        Err(BackendError::backend("connection refused"))
    }

    async fn storage_info(&self) -> BackendResult<StorageInfo> {
        Err(BackendError::backend("connection refused"))
    }

    async fn storage_stats(&self) -> BackendResult<StorageStats> {
        Err(BackendError::backend("connection refused"))
    }
}

/// Test double delegating to an in-memory backend but delaying every scan,
/// for exercising listing deadlines.
pub struct SlowBackend {
    pub inner: MemoryBackend,
    pub delay: std::time::Duration,
}

impl SlowBackend {
    pub fn new(delay: std::time::Duration) -> Self {
        Self {
            inner: MemoryBackend::new(MemoryOptions::default()),
            delay,
        }
    }
}

#[async_trait]
impl CheckpointBackend for SlowBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn put(&self, thread_id: &str, checkpoint: &EnhancedCheckpoint) -> BackendResult<()> {
        self.inner.put(thread_id, checkpoint).await
    }

    async fn get(
        &self,
        thread_id: &str,
        checkpoint_id: Option<&str>,
    ) -> BackendResult<Option<EnhancedCheckpoint>> {
        self.inner.get(thread_id, checkpoint_id).await
    }

    async fn list(
        &self,
        thread_id: &str,
        options: &ListOptions,
    ) -> BackendResult<Vec<EnhancedCheckpoint>> {
        tokio::time::sleep(self.delay).await;
        self.inner.list(thread_id, options).await
    }

    async fn delete(&self, thread_id: &str, checkpoint_id: &str) -> BackendResult<bool> {
        self.inner.delete(thread_id, checkpoint_id).await
    }

    async fn delete_thread(&self, thread_id: &str) -> BackendResult<u64> {
        self.inner.delete_thread(thread_id).await
    }

    async fn threads(&self) -> BackendResult<Vec<String>> {
        self.inner.threads().await
    }

    async fn cleanup(&self, options: &CleanupOptions) -> BackendResult<CleanupReport> {
        self.inner.cleanup(options).await
    }

    async fn storage_info(&self) -> BackendResult<StorageInfo> {
        self.inner.storage_info().await
    }

    async fn storage_stats(&self) -> BackendResult<StorageStats> {
        self.inner.storage_stats().await
    }
}

/// Test double delegating to an in-memory backend but delaying every
/// cleanup, for exercising scheduled-sweep pacing. Records how many sweeps
/// completed and whether any two ever ran concurrently.
pub struct SlowSweepBackend {
    inner: MemoryBackend,
    delay: std::time::Duration,
    running: AtomicU64,
    pub sweeps: AtomicU64,
    pub overlapped: AtomicBool,
}

impl SlowSweepBackend {
    pub fn new(delay: std::time::Duration) -> Self {
        Self {
            inner: MemoryBackend::new(MemoryOptions::default()),
            delay,
            running: AtomicU64::new(0),
            sweeps: AtomicU64::new(0),
            overlapped: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl CheckpointBackend for SlowSweepBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn put(&self, thread_id: &str, checkpoint: &EnhancedCheckpoint) -> BackendResult<()> {
        self.inner.put(thread_id, checkpoint).await
    }

    async fn get(
        &self,
        thread_id: &str,
        checkpoint_id: Option<&str>,
    ) -> BackendResult<Option<EnhancedCheckpoint>> {
        self.inner.get(thread_id, checkpoint_id).await
    }

    async fn list(
        &self,
        thread_id: &str,
        options: &ListOptions,
    ) -> BackendResult<Vec<EnhancedCheckpoint>> {
        self.inner.list(thread_id, options).await
    }

    async fn delete(&self, thread_id: &str, checkpoint_id: &str) -> BackendResult<bool> {
        self.inner.delete(thread_id, checkpoint_id).await
    }

    async fn delete_thread(&self, thread_id: &str) -> BackendResult<u64> {
        self.inner.delete_thread(thread_id).await
    }

    async fn threads(&self) -> BackendResult<Vec<String>> {
        self.inner.threads().await
    }

    async fn cleanup(&self, options: &CleanupOptions) -> BackendResult<CleanupReport> {
        if self.running.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        tokio::time::sleep(self.delay).await;
        let report = self.inner.cleanup(options).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.sweeps.fetch_add(1, Ordering::SeqCst);
        report
    }

    async fn storage_info(&self) -> BackendResult<StorageInfo> {
        self.inner.storage_info().await
    }

    async fn storage_stats(&self) -> BackendResult<StorageStats> {
        self.inner.storage_stats().await
    }
}
