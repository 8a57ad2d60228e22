/*!
Core data model for checkpoint persistence.

Design Goals:
- Serde-friendly shapes decoupled from any particular storage medium, so the
  same record round-trips through an in-memory map, a Redis value, or a
  relational row without per-backend variants.
- Caller-owned opaque payloads: the store never interprets checkpoint
  contents, only the metadata envelope around them.
- Conversion and enrichment logic live elsewhere (see `enrich`); this module
  is pure data.
*/

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Current schema version stamped into enriched metadata.
pub const SCHEMA_VERSION: u32 = 1;

/// Reserved thread id used by the default health probe. Never returned by
/// listings of real threads and excluded from retention sweeps.
pub const HEALTH_PROBE_THREAD: &str = "__loomstore_health_probe__";

/// An immutable snapshot of one execution thread's state at one step.
///
/// The payload is an opaque, serializable key-value map owned by the caller.
/// Saving again under the same id overwrites (last-write-wins).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    pub id: String,
    #[serde(default)]
    pub payload: FxHashMap<String, Value>,
}

impl Checkpoint {
    pub fn new(id: impl Into<String>, payload: FxHashMap<String, Value>) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }
}

/// Caller-supplied partial metadata, completed by the metadata enricher.
///
/// Every field is optional; unknown extension fields ride along in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataDraft {
    pub source: Option<String>,
    pub step: Option<i64>,
    pub parents: Option<Vec<String>>,
    pub workflow_name: Option<String>,
    pub step_name: Option<String>,
    pub node_type: Option<String>,
    pub execution_duration_ms: Option<u64>,
    pub error: Option<String>,
    pub branch_name: Option<String>,
    pub parent_thread_id: Option<String>,
    pub parent_checkpoint_id: Option<String>,
    pub branch_created_at: Option<DateTime<Utc>>,
    pub branch_description: Option<String>,
    #[serde(flatten, default)]
    pub extra: FxHashMap<String, Value>,
}

/// Fully enriched checkpoint metadata as persisted alongside the payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointMetadata {
    pub thread_id: String,
    pub timestamp: DateTime<Utc>,
    pub schema_version: u32,
    pub source: String,
    pub step: i64,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_checkpoint_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_description: Option<String>,
    /// Access bookkeeping. These are the only fields mutated after save.
    #[serde(default)]
    pub access_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_accessed_at: Option<DateTime<Utc>>,
    #[serde(flatten, default)]
    pub extra: FxHashMap<String, Value>,
}

/// Marker for the payload encoding applied before persistence.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CompressionTag {
    #[default]
    None,
}

/// The unit actually persisted: payload plus metadata plus integrity fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnhancedCheckpoint {
    pub checkpoint: Checkpoint,
    pub metadata: CheckpointMetadata,
    pub size_bytes: u64,
    pub checksum: String,
    #[serde(default)]
    pub compression: CompressionTag,
}

/// The unit returned by listing: which backend held the record, the record
/// itself, and the (possibly projected) metadata view.
#[derive(Debug, Clone, Serialize)]
pub struct CheckpointTuple {
    /// Name of the backend configuration the record came from.
    pub backend: String,
    pub checkpoint: EnhancedCheckpoint,
    /// Metadata as a JSON view; `include_fields`/`exclude_fields` projection
    /// is applied here, never to the stored record.
    pub metadata: serde_json::Map<String, Value>,
}

/// Storage medium behind a backend adapter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    Memory,
    Redis,
    Sqlite,
    Postgres,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackendKind::Memory => "memory",
            BackendKind::Redis => "redis",
            BackendKind::Sqlite => "sqlite",
            BackendKind::Postgres => "postgres",
        };
        f.write_str(s)
    }
}

/// Lifecycle state of a registered backend.
///
/// Only `Ready` backends accept `put`/`get`/`list`/`cleanup`; calls against
/// `Closed` backends fail with a non-retryable error.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleState {
    Uninitialized,
    Initializing,
    Ready,
    Closed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Initializing => "initializing",
            LifecycleState::Ready => "ready",
            LifecycleState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Summary of one registered backend as reported by the registry.
#[derive(Debug, Clone, Serialize)]
pub struct BackendDescriptor {
    pub name: String,
    pub kind: BackendKind,
    pub is_default: bool,
    pub status: LifecycleState,
}

/// Inclusive creation-time window for listing.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DateRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// Sort key for listing. Checkpoints missing the key sort last.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SortBy {
    #[default]
    Timestamp,
    StepName,
    ExecutionDuration,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Filtering, ordering, pagination and projection options for `list`.
///
/// Backends may push parts of this down to their native query layer, but the
/// facade re-applies everything uniformly, so semantics are identical across
/// backends.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub workflow_name: Option<String>,
    pub branch_name: Option<String>,
    pub date_range: Option<DateRange>,
    /// When non-empty, the tuple's metadata view keeps only these fields.
    pub include_fields: Vec<String>,
    /// Fields removed from the tuple's metadata view.
    pub exclude_fields: Vec<String>,
    pub sort_by: SortBy,
    pub sort_order: SortOrder,
    /// Maximum results, validated to `[1, 1000]`.
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    /// Deadline for the whole list operation. The underlying scan is
    /// abandoned when it elapses.
    pub timeout: Option<Duration>,
}

/// Synchronous per-deletion observer: `(checkpoint_id, thread_id)`.
pub type DeleteHook = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Retention policy knobs for a cleanup pass.
#[derive(Clone, Default)]
pub struct CleanupOptions {
    /// Delete checkpoints older than this.
    pub max_age: Option<Duration>,
    /// Keep at most this many checkpoints per thread, oldest deleted first.
    pub max_per_thread: Option<usize>,
    /// Threads never pruned by either pass.
    pub exclude_threads: Vec<String>,
    /// Estimate without deleting.
    pub dry_run: bool,
    pub on_delete: Option<DeleteHook>,
}

impl fmt::Debug for CleanupOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CleanupOptions")
            .field("max_age", &self.max_age)
            .field("max_per_thread", &self.max_per_thread)
            .field("exclude_threads", &self.exclude_threads)
            .field("dry_run", &self.dry_run)
            .field("on_delete", &self.on_delete.as_ref().map(|_| "<hook>"))
            .finish()
    }
}

/// Outcome of a cleanup pass. For dry runs `removed` is the number of
/// checkpoints that *would* be deleted.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    pub removed: u64,
    pub affected_threads: Vec<String>,
    pub estimated_space_saved_bytes: u64,
    pub dry_run: bool,
}

/// Static description of a backend's storage medium.
#[derive(Debug, Clone, Serialize)]
pub struct StorageInfo {
    pub kind: BackendKind,
    /// Human-readable location (url, path, or "process memory").
    pub location: String,
    pub persistent: bool,
    pub supports_native_ttl: bool,
}

/// Storage-derived statistics reported by a backend. Operation timing and
/// error rates are tracked by the metrics collector, not the backend.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StorageStats {
    pub total_checkpoints: u64,
    pub active_threads: u64,
    pub average_size_bytes: f64,
    pub total_storage_used_bytes: u64,
    /// Checkpoints created within the last hour.
    pub recent_checkpoints: u64,
    pub last_cleanup: Option<DateTime<Utc>>,
}

/// Combined per-backend statistics exposed by the facade.
#[derive(Debug, Clone, Serialize)]
pub struct BackendStats {
    pub total_checkpoints: u64,
    pub active_threads: u64,
    pub average_size_bytes: f64,
    pub total_storage_used_bytes: u64,
    pub recent_checkpoints: u64,
    pub average_save_time_ms: f64,
    pub average_load_time_ms: f64,
    pub error_rate: f64,
    pub backend_kind: BackendKind,
    pub last_cleanup: Option<DateTime<Utc>>,
}

/// RFC3339 UTC with fixed microsecond precision, so stored strings order
/// lexicographically in chronological order.
pub(crate) fn fmt_rfc3339(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}
