/*!
The checkpoint store facade.

Single entry point over the backend registry: validates input, enriches
metadata, dispatches to the resolved backend, and normalizes failures into
the caller-facing error taxonomy. Filtering, sorting, pagination and field
projection for listings are applied here, uniformly, regardless of what the
backend pushed down — so `list` semantics are identical across media.
*/

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Instant;

use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::checkpoint::{
    BackendStats, Checkpoint, CheckpointMetadata, CheckpointTuple, CleanupOptions, CleanupReport,
    EnhancedCheckpoint, ListOptions, MetadataDraft, SortBy, SortOrder,
};
use crate::enrich::MetadataEnricher;
use crate::errors::{StoreError, StoreResult, is_transient};
use crate::metrics::{HealthSummary, MetricsCollector, Operation};
use crate::registry::BackendRegistry;
use crate::retention;

/// Listing limits accepted by [`CheckpointStore::list`].
const MAX_LIST_LIMIT: u32 = 1000;

/// Facade over all registered checkpoint backends.
///
/// Cheap to clone; clones share the registry and metrics.
#[derive(Clone)]
pub struct CheckpointStore {
    registry: Arc<BackendRegistry>,
    enricher: MetadataEnricher,
    metrics: Arc<MetricsCollector>,
}

impl CheckpointStore {
    pub fn new(registry: Arc<BackendRegistry>) -> Self {
        Self {
            registry,
            enricher: MetadataEnricher::new(),
            metrics: Arc::new(MetricsCollector::new()),
        }
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// Enrich and persist one checkpoint, returning the stored record.
    ///
    /// `backend` selects a registered backend by name; `None` uses the
    /// default. Backend failures surface as `Persistence` with a
    /// `retryable` flag derived from the failure text.
    #[instrument(skip(self, checkpoint, draft), fields(checkpoint_id = %checkpoint.id), err)]
    pub async fn save(
        &self,
        thread_id: &str,
        checkpoint: Checkpoint,
        draft: MetadataDraft,
        backend: Option<&str>,
    ) -> StoreResult<EnhancedCheckpoint> {
        if thread_id.trim().is_empty() {
            return Err(StoreError::validation("thread_id must not be empty"));
        }
        if checkpoint.id.trim().is_empty() {
            return Err(StoreError::validation("checkpoint id must not be empty"));
        }
        let (name, backend) = self.registry.resolve(backend)?;

        let metadata = self.enricher.enrich(thread_id, draft);
        let enhanced = self.enricher.enhance(checkpoint, metadata);

        let started = Instant::now();
        let result = backend.put(thread_id, &enhanced).await;
        let ok = result.is_ok();
        self.metrics
            .record(&name, Operation::Save, started.elapsed(), ok);

        match result {
            Ok(()) => {
                debug!(backend = %name, thread_id, size_bytes = enhanced.size_bytes, "checkpoint saved");
                Ok(enhanced)
            }
            Err(e) => {
                let message = e.to_string();
                Err(StoreError::Persistence {
                    thread_id: thread_id.to_string(),
                    checkpoint_id: enhanced.checkpoint.id.clone(),
                    retryable: is_transient(&message),
                    message,
                })
            }
        }
    }

    /// Load by id, or the latest checkpoint of the thread when
    /// `checkpoint_id` is `None`. Absence is `Ok(None)`.
    ///
    /// A checksum mismatch on the loaded record is logged, never raised; the
    /// record is returned as stored. Access bookkeeping is best-effort.
    #[instrument(skip(self), err)]
    pub async fn load(
        &self,
        thread_id: &str,
        checkpoint_id: Option<&str>,
        backend: Option<&str>,
    ) -> StoreResult<Option<EnhancedCheckpoint>> {
        if thread_id.trim().is_empty() {
            return Err(StoreError::validation("thread_id must not be empty"));
        }
        let (name, backend) = self.registry.resolve(backend)?;

        let started = Instant::now();
        let result = backend.get(thread_id, checkpoint_id).await;
        let ok = result.is_ok();
        self.metrics
            .record(&name, Operation::Load, started.elapsed(), ok);

        let found = result.map_err(|e| StoreError::Load {
            thread_id: thread_id.to_string(),
            message: e.to_string(),
        })?;

        if let Some(cp) = &found {
            if !cp.checksum.is_empty() {
                let recomputed = self.enricher.compute_checksum(&cp.checkpoint);
                if recomputed != cp.checksum {
                    warn!(
                        backend = %name,
                        thread_id,
                        checkpoint_id = %cp.checkpoint.id,
                        "checksum mismatch on load; returning record as stored"
                    );
                }
            }
            if let Err(e) = backend.record_access(thread_id, &cp.checkpoint.id).await {
                warn!(backend = %name, error = %e, "access bookkeeping failed");
            }
        }
        Ok(found)
    }

    /// List one thread's checkpoints with uniform filtering, sorting,
    /// pagination and metadata projection.
    ///
    /// The backend scan is fully drained before post-processing; when
    /// `options.timeout` elapses first, the scan is abandoned and
    /// `DeadlineExceeded` is returned.
    #[instrument(skip(self, options), err)]
    pub async fn list(
        &self,
        thread_id: &str,
        options: &ListOptions,
        backend: Option<&str>,
    ) -> StoreResult<Vec<CheckpointTuple>> {
        if thread_id.trim().is_empty() {
            return Err(StoreError::validation("thread_id must not be empty"));
        }
        if let Some(limit) = options.limit {
            if limit == 0 || limit > MAX_LIST_LIMIT {
                return Err(StoreError::validation(format!(
                    "limit must be within [1, {MAX_LIST_LIMIT}], got {limit}"
                )));
            }
        }
        let (name, backend) = self.registry.resolve(backend)?;

        let scan = backend.list(thread_id, options);
        let mut entries = match options.timeout {
            Some(deadline) => tokio::time::timeout(deadline, scan)
                .await
                .map_err(|_| StoreError::DeadlineExceeded {
                    deadline_ms: deadline.as_millis() as u64,
                })??,
            None => scan.await?,
        };

        entries.retain(|cp| matches_filters(cp, options));
        sort_entries(&mut entries, options.sort_by, options.sort_order);

        let offset = options.offset.unwrap_or(0) as usize;
        let limit = options.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        let page = entries.into_iter().skip(offset).take(limit);

        Ok(page
            .map(|cp| {
                let metadata =
                    project_metadata(&cp.metadata, &options.include_fields, &options.exclude_fields);
                CheckpointTuple {
                    backend: name.clone(),
                    checkpoint: cp,
                    metadata,
                }
            })
            .collect())
    }

    /// Remove one checkpoint. Returns whether a record existed.
    pub async fn delete(
        &self,
        thread_id: &str,
        checkpoint_id: &str,
        backend: Option<&str>,
    ) -> StoreResult<bool> {
        if thread_id.trim().is_empty() || checkpoint_id.trim().is_empty() {
            return Err(StoreError::validation(
                "thread_id and checkpoint_id must not be empty",
            ));
        }
        let (_, backend) = self.registry.resolve(backend)?;
        Ok(backend.delete(thread_id, checkpoint_id).await?)
    }

    /// Remove every checkpoint of one thread, returning the count.
    pub async fn delete_thread(
        &self,
        thread_id: &str,
        backend: Option<&str>,
    ) -> StoreResult<u64> {
        if thread_id.trim().is_empty() {
            return Err(StoreError::validation("thread_id must not be empty"));
        }
        let (_, backend) = self.registry.resolve(backend)?;
        Ok(backend.delete_thread(thread_id).await?)
    }

    /// Thread ids currently holding checkpoints on one backend.
    pub async fn threads(&self, backend: Option<&str>) -> StoreResult<Vec<String>> {
        let (_, backend) = self.registry.resolve(backend)?;
        Ok(backend.threads().await?)
    }

    /// Run the retention policy against one backend.
    #[instrument(skip(self, options), fields(dry_run = options.dry_run), err)]
    pub async fn cleanup(
        &self,
        options: &CleanupOptions,
        backend: Option<&str>,
    ) -> StoreResult<CleanupReport> {
        let (_, backend) = self.registry.resolve(backend)?;
        Ok(backend.cleanup(options).await?)
    }

    /// Run the retention policy against every ready backend. Per-backend
    /// failures are logged and skipped; returns the total removed.
    pub async fn cleanup_all(&self, options: &CleanupOptions) -> u64 {
        retention::sweep_all(&self.registry, options).await
    }

    /// Probe one backend. Failures of any kind — unknown name, not ready,
    /// probe error — surface as `false`, never as an error.
    pub async fn health_check(&self, backend: Option<&str>) -> bool {
        match self.registry.resolve(backend) {
            Ok((_, backend)) => backend.health_check().await.is_ok(),
            Err(_) => false,
        }
    }

    /// Probe every registered backend. Backends not in the `Ready` state
    /// count as unhealthy; probe failures are `false`, never errors.
    pub async fn health_check_all(&self) -> FxHashMap<String, bool> {
        let mut probes: FxHashMap<String, bool> = FxHashMap::default();
        for descriptor in self.registry.descriptors() {
            probes.insert(descriptor.name, false);
        }
        for (name, backend) in self.registry.ready_backends() {
            probes.insert(name, backend.health_check().await.is_ok());
        }
        probes
    }

    /// Probe every registered backend and classify overall health.
    pub async fn health_summary(&self) -> HealthSummary {
        let probes = self.health_check_all().await;
        HealthSummary::classify(probes, self.registry.default_name())
    }

    /// Storage statistics for one backend, merged with operation timing and
    /// error rate from the metrics collector.
    pub async fn stats(&self, backend: Option<&str>) -> StoreResult<BackendStats> {
        let (name, backend) = self.registry.resolve(backend)?;
        let storage = backend.storage_stats().await?;
        let timing = self.metrics.averages(&name);
        Ok(BackendStats {
            total_checkpoints: storage.total_checkpoints,
            active_threads: storage.active_threads,
            average_size_bytes: storage.average_size_bytes,
            total_storage_used_bytes: storage.total_storage_used_bytes,
            recent_checkpoints: storage.recent_checkpoints,
            average_save_time_ms: timing.average_save_time_ms,
            average_load_time_ms: timing.average_load_time_ms,
            error_rate: timing.error_rate,
            backend_kind: backend.kind(),
            last_cleanup: storage.last_cleanup,
        })
    }

    /// Statistics for every ready backend; backends whose stats call fails
    /// are logged and omitted.
    pub async fn stats_all(&self) -> FxHashMap<String, BackendStats> {
        let mut out = FxHashMap::default();
        for (name, _) in self.registry.ready_backends() {
            match self.stats(Some(&name)).await {
                Ok(stats) => {
                    out.insert(name, stats);
                }
                Err(e) => warn!(backend = %name, error = %e, "stats unavailable"),
            }
        }
        out
    }

    /// Close every registered backend. Further dispatch fails with
    /// `NotReady`.
    pub async fn close(&self) {
        self.registry.close_all().await;
    }
}

fn matches_filters(cp: &EnhancedCheckpoint, options: &ListOptions) -> bool {
    if let Some(wf) = &options.workflow_name {
        if cp.metadata.workflow_name.as_deref() != Some(wf.as_str()) {
            return false;
        }
    }
    if let Some(branch) = &options.branch_name {
        if cp.metadata.branch_name.as_deref() != Some(branch.as_str()) {
            return false;
        }
    }
    if let Some(range) = &options.date_range {
        if let Some(from) = range.from {
            if cp.metadata.timestamp < from {
                return false;
            }
        }
        if let Some(to) = range.to {
            if cp.metadata.timestamp > to {
                return false;
            }
        }
    }
    true
}

/// Sort with records missing the key placed last regardless of direction.
fn sort_entries(entries: &mut [EnhancedCheckpoint], sort_by: SortBy, order: SortOrder) {
    let directed = |ord: Ordering| match order {
        SortOrder::Asc => ord,
        SortOrder::Desc => ord.reverse(),
    };
    entries.sort_by(|a, b| match sort_by {
        SortBy::Timestamp => directed(a.metadata.timestamp.cmp(&b.metadata.timestamp)),
        SortBy::StepName => cmp_optional(
            a.metadata.step_name.as_deref(),
            b.metadata.step_name.as_deref(),
            directed,
        ),
        SortBy::ExecutionDuration => cmp_optional(
            a.metadata.execution_duration_ms,
            b.metadata.execution_duration_ms,
            directed,
        ),
    });
}

fn cmp_optional<T: Ord>(a: Option<T>, b: Option<T>, directed: impl Fn(Ordering) -> Ordering) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => directed(a.cmp(&b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Build the tuple's metadata view with include/exclude projection applied.
/// The stored record is never modified by projection.
fn project_metadata(
    metadata: &CheckpointMetadata,
    include: &[String],
    exclude: &[String],
) -> serde_json::Map<String, Value> {
    let mut view = serde_json::to_value(metadata)
        .ok()
        .and_then(|v| match v {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .unwrap_or_default();
    if !include.is_empty() {
        view.retain(|k, _| include.iter().any(|f| f == k));
    }
    for field in exclude {
        view.remove(field);
    }
    view
}
