/*!
The storage contract every backend adapter implements.

One required capability set (`put`/`get`/`list`) plus queryable optional
capabilities for stats, cleanup, health and storage info — a flat trait with
defaultable methods instead of the inheritance chain a base-saver design
would produce. Correctness never depends on a backend pushing `ListOptions`
down; the facade re-applies filtering, sorting, and pagination uniformly.
*/

use async_trait::async_trait;

use crate::checkpoint::{
    BackendKind, CleanupOptions, CleanupReport, EnhancedCheckpoint, HEALTH_PROBE_THREAD,
    ListOptions, StorageInfo, StorageStats,
};
use crate::errors::BackendResult;

/// Which optional operations a backend supports natively.
///
/// Callers can branch on this instead of probing with calls that may return
/// [`crate::errors::BackendError::Unsupported`].
#[derive(Debug, Clone, Copy)]
pub struct BackendCapabilities {
    pub stats: bool,
    pub cleanup: bool,
    pub health_check: bool,
    pub storage_info: bool,
}

impl Default for BackendCapabilities {
    fn default() -> Self {
        Self {
            stats: true,
            cleanup: true,
            health_check: true,
            storage_info: true,
        }
    }
}

/// Storage adapter over one medium.
///
/// Implementations must be `Send + Sync`; every method is an asynchronous
/// boundary — there is no synchronous fast path, even for the in-memory
/// backend. `(thread_id, checkpoint_id)` is unique per backend and `put` is
/// idempotent by id (re-put overwrites, last-write-wins).
#[async_trait]
pub trait CheckpointBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::default()
    }

    /// Persist one enriched checkpoint. Overwrites any existing record with
    /// the same `(thread_id, checkpoint.id)`.
    async fn put(&self, thread_id: &str, checkpoint: &EnhancedCheckpoint) -> BackendResult<()>;

    /// Fetch by id, or the most recently created checkpoint for the thread
    /// when `checkpoint_id` is `None` (ties broken by insertion order).
    /// Absence is `Ok(None)`, never an error.
    async fn get(
        &self,
        thread_id: &str,
        checkpoint_id: Option<&str>,
    ) -> BackendResult<Option<EnhancedCheckpoint>>;

    /// Scan all checkpoints of one thread. Backends may use `options` to
    /// push filters down; the facade re-applies them regardless. The scan is
    /// finite and fully drained by the caller before post-processing.
    async fn list(
        &self,
        thread_id: &str,
        options: &ListOptions,
    ) -> BackendResult<Vec<EnhancedCheckpoint>>;

    /// Remove a single checkpoint. Returns whether a record existed.
    async fn delete(&self, thread_id: &str, checkpoint_id: &str) -> BackendResult<bool>;

    /// Bulk-delete every checkpoint of one thread, returning the count.
    async fn delete_thread(&self, thread_id: &str) -> BackendResult<u64>;

    /// Enumerate thread ids currently holding checkpoints. The health probe
    /// thread is never reported.
    async fn threads(&self) -> BackendResult<Vec<String>>;

    /// Apply the retention policy (age pass + per-thread cap pass, results
    /// de-duplicated by id before counting).
    async fn cleanup(&self, options: &CleanupOptions) -> BackendResult<CleanupReport>;

    /// Record access bookkeeping (access count, last-accessed time) for a
    /// loaded checkpoint. Best-effort; the default is a no-op.
    async fn record_access(&self, _thread_id: &str, _checkpoint_id: &str) -> BackendResult<()> {
        Ok(())
    }

    /// Connectivity probe. The default performs a lightweight `list` against
    /// a reserved probe thread and treats the absence of a failure as
    /// healthy.
    async fn health_check(&self) -> BackendResult<()> {
        self.list(HEALTH_PROBE_THREAD, &ListOptions::default())
            .await
            .map(|_| ())
    }

    async fn storage_info(&self) -> BackendResult<StorageInfo>;

    async fn storage_stats(&self) -> BackendResult<StorageStats>;

    /// Release connections and background tasks. Idempotent.
    async fn close(&self) -> BackendResult<()> {
        Ok(())
    }
}
