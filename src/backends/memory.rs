/*!
In-memory backend: per-thread ordered collections with an optional TTL sweep
and a write-time per-thread cap.

Volatile by design — suited to tests, development, and short-lived workflows.
The TTL sweeper runs on its own timer and evicts expired entries; the
per-thread cap evicts oldest-first at write time, independently of the
retention engine's own sweeps.
*/

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use rustc_hash::FxHashMap;
use tokio::sync::{RwLock, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::backend::CheckpointBackend;
use crate::checkpoint::{
    BackendKind, CleanupOptions, CleanupReport, EnhancedCheckpoint, HEALTH_PROBE_THREAD,
    ListOptions, StorageInfo, StorageStats,
};
use crate::errors::BackendResult;
use crate::retention;

/// Tuning knobs for the in-memory backend.
#[derive(Debug, Clone)]
pub struct MemoryOptions {
    /// Entries older than this are evicted by the background sweep.
    pub ttl: Option<Duration>,
    /// Hard cap per thread enforced at write time, oldest evicted first.
    pub max_per_thread: Option<usize>,
    /// Sweep cadence when a TTL is configured.
    pub sweep_interval: Duration,
}

impl Default for MemoryOptions {
    fn default() -> Self {
        Self {
            ttl: None,
            max_per_thread: None,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

type ThreadMap = FxHashMap<String, Vec<EnhancedCheckpoint>>;

struct Sweeper {
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct MemoryBackend {
    threads: Arc<RwLock<ThreadMap>>,
    options: MemoryOptions,
    sweeper: parking_lot::Mutex<Option<Sweeper>>,
    last_cleanup: parking_lot::Mutex<Option<DateTime<Utc>>>,
}

impl MemoryBackend {
    pub fn new(options: MemoryOptions) -> Self {
        let threads: Arc<RwLock<ThreadMap>> = Arc::new(RwLock::new(FxHashMap::default()));
        let sweeper = options.ttl.map(|ttl| {
            let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
            let map = Arc::clone(&threads);
            let every = options.sweep_interval;
            let handle = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(every);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = &mut shutdown_rx => break,
                        _ = ticker.tick() => {
                            let evicted = sweep_expired(&map, ttl).await;
                            if evicted > 0 {
                                debug!(evicted, "ttl sweep evicted expired checkpoints");
                            }
                        }
                    }
                }
            });
            Sweeper {
                shutdown_tx,
                handle,
            }
        });
        Self {
            threads,
            options,
            sweeper: parking_lot::Mutex::new(sweeper),
            last_cleanup: parking_lot::Mutex::new(None),
        }
    }

    /// Evict entries whose creation time has passed the TTL. Exposed so
    /// tests can trigger a sweep without waiting on the timer.
    pub async fn sweep_expired_now(&self) -> u64 {
        match self.options.ttl {
            Some(ttl) => sweep_expired(&self.threads, ttl).await,
            None => 0,
        }
    }
}

async fn sweep_expired(map: &RwLock<ThreadMap>, ttl: Duration) -> u64 {
    let Some(cutoff) = retention::age_cutoff(ttl) else {
        return 0;
    };
    let mut guard = map.write().await;
    let mut evicted = 0u64;
    guard.retain(|_, entries| {
        let before = entries.len();
        entries.retain(|cp| cp.metadata.timestamp >= cutoff);
        evicted += (before - entries.len()) as u64;
        !entries.is_empty()
    });
    evicted
}

#[async_trait]
impl CheckpointBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn put(&self, thread_id: &str, checkpoint: &EnhancedCheckpoint) -> BackendResult<()> {
        let mut guard = self.threads.write().await;
        let entries = guard.entry(thread_id.to_string()).or_default();
        match entries
            .iter_mut()
            .find(|e| e.checkpoint.id == checkpoint.checkpoint.id)
        {
            // Last-write-wins: replace in place, keeping insertion position.
            Some(existing) => *existing = checkpoint.clone(),
            None => entries.push(checkpoint.clone()),
        }
        if let Some(cap) = self.options.max_per_thread {
            while entries.len() > cap {
                let oldest = entries
                    .iter()
                    .enumerate()
                    .min_by_key(|(i, e)| (e.metadata.timestamp, *i))
                    .map(|(i, _)| i);
                match oldest {
                    Some(i) => {
                        entries.remove(i);
                    }
                    None => break,
                }
            }
        }
        Ok(())
    }

    async fn get(
        &self,
        thread_id: &str,
        checkpoint_id: Option<&str>,
    ) -> BackendResult<Option<EnhancedCheckpoint>> {
        let guard = self.threads.read().await;
        let Some(entries) = guard.get(thread_id) else {
            return Ok(None);
        };
        let found = match checkpoint_id {
            Some(id) => entries.iter().find(|e| e.checkpoint.id == id),
            // Latest by creation time, insertion order breaking ties.
            None => entries
                .iter()
                .enumerate()
                .max_by_key(|(i, e)| (e.metadata.timestamp, *i))
                .map(|(_, e)| e),
        };
        Ok(found.cloned())
    }

    async fn list(
        &self,
        thread_id: &str,
        _options: &ListOptions,
    ) -> BackendResult<Vec<EnhancedCheckpoint>> {
        let guard = self.threads.read().await;
        Ok(guard.get(thread_id).cloned().unwrap_or_default())
    }

    async fn delete(&self, thread_id: &str, checkpoint_id: &str) -> BackendResult<bool> {
        let mut guard = self.threads.write().await;
        let Some(entries) = guard.get_mut(thread_id) else {
            return Ok(false);
        };
        let before = entries.len();
        entries.retain(|e| e.checkpoint.id != checkpoint_id);
        let existed = entries.len() != before;
        if entries.is_empty() {
            guard.remove(thread_id);
        }
        Ok(existed)
    }

    async fn delete_thread(&self, thread_id: &str) -> BackendResult<u64> {
        let mut guard = self.threads.write().await;
        Ok(guard.remove(thread_id).map(|v| v.len() as u64).unwrap_or(0))
    }

    async fn threads(&self) -> BackendResult<Vec<String>> {
        let guard = self.threads.read().await;
        Ok(guard
            .keys()
            .filter(|k| k.as_str() != HEALTH_PROBE_THREAD)
            .cloned()
            .collect())
    }

    async fn cleanup(&self, options: &CleanupOptions) -> BackendResult<CleanupReport> {
        let report = retention::run_cleanup(self, options).await?;
        if !options.dry_run {
            *self.last_cleanup.lock() = Some(Utc::now());
        }
        Ok(report)
    }

    async fn record_access(&self, thread_id: &str, checkpoint_id: &str) -> BackendResult<()> {
        let mut guard = self.threads.write().await;
        if let Some(entry) = guard
            .get_mut(thread_id)
            .and_then(|v| v.iter_mut().find(|e| e.checkpoint.id == checkpoint_id))
        {
            entry.metadata.access_count += 1;
            entry.metadata.last_accessed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn storage_info(&self) -> BackendResult<StorageInfo> {
        Ok(StorageInfo {
            kind: BackendKind::Memory,
            location: "process memory".to_string(),
            persistent: false,
            supports_native_ttl: self.options.ttl.is_some(),
        })
    }

    async fn storage_stats(&self) -> BackendResult<StorageStats> {
        let guard = self.threads.read().await;
        let mut total = 0u64;
        let mut total_bytes = 0u64;
        let mut recent = 0u64;
        let recent_cutoff = Utc::now() - TimeDelta::hours(1);
        for entries in guard.values() {
            for cp in entries {
                total += 1;
                total_bytes += cp.size_bytes;
                if cp.metadata.timestamp >= recent_cutoff {
                    recent += 1;
                }
            }
        }
        Ok(StorageStats {
            total_checkpoints: total,
            active_threads: guard.len() as u64,
            average_size_bytes: if total > 0 {
                total_bytes as f64 / total as f64
            } else {
                0.0
            },
            total_storage_used_bytes: total_bytes,
            recent_checkpoints: recent,
            last_cleanup: *self.last_cleanup.lock(),
        })
    }

    async fn close(&self) -> BackendResult<()> {
        let sweeper = self.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            let _ = sweeper.shutdown_tx.send(());
            let _ = sweeper.handle.await;
        }
        Ok(())
    }
}
