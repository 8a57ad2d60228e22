/*!
Retention policy enforcement and the scheduled cleanup sweep.

Every cleanup runs two independent passes whose victim sets are merged with
id-based de-duplication before counting:

1. **Age pass** — checkpoints older than `max_age`, skipping excluded threads.
2. **Cap pass** — for threads exceeding `max_per_thread`, the oldest excess
   checkpoints, oldest-first by creation time.

`dry_run` estimates without deleting. `on_delete` fires synchronously per
deletion. The scheduled sweep walks all registered backends on a fixed
interval; a failure sweeping one backend is isolated and logged so the others
still run, and an in-flight guard skips a tick while a previous sweep is
still executing.
*/

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rustc_hash::FxHashSet;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::backend::CheckpointBackend;
use crate::checkpoint::{CleanupOptions, CleanupReport, ListOptions};
use crate::errors::BackendResult;
use crate::registry::BackendRegistry;

struct Victim {
    thread_id: String,
    checkpoint_id: String,
    size_bytes: u64,
}

/// Cutoff instant for an age-based pass. `None` when the age cannot be
/// represented as a timestamp offset, in which case nothing is old enough.
pub(crate) fn age_cutoff(age: Duration) -> Option<DateTime<Utc>> {
    TimeDelta::from_std(age)
        .ok()
        .and_then(|delta| Utc::now().checked_sub_signed(delta))
}

/// Generic two-pass retention sweep over any backend.
///
/// Backends without a native bulk-delete path (memory, redis) delegate their
/// `cleanup` here; relational backends implement the same semantics with
/// transactional SQL.
#[instrument(skip(backend, options), fields(dry_run = options.dry_run))]
pub async fn run_cleanup(
    backend: &dyn CheckpointBackend,
    options: &CleanupOptions,
) -> BackendResult<CleanupReport> {
    let cutoff = options.max_age.and_then(age_cutoff);

    let mut victims: Vec<Victim> = Vec::new();
    let mut seen: FxHashSet<(String, String)> = FxHashSet::default();
    let mut affected: Vec<String> = Vec::new();

    for thread_id in backend.threads().await? {
        if options.exclude_threads.iter().any(|t| t == &thread_id) {
            continue;
        }
        let mut entries = backend.list(&thread_id, &ListOptions::default()).await?;
        // Oldest first; stable sort keeps insertion order among equal stamps.
        entries.sort_by_key(|e| e.metadata.timestamp);

        let mut thread_hit = false;
        let mut mark = |cp: &crate::checkpoint::EnhancedCheckpoint, hit: &mut bool| {
            let key = (thread_id.clone(), cp.checkpoint.id.clone());
            if seen.insert(key) {
                victims.push(Victim {
                    thread_id: thread_id.clone(),
                    checkpoint_id: cp.checkpoint.id.clone(),
                    size_bytes: cp.size_bytes,
                });
                *hit = true;
            }
        };

        if let Some(cutoff) = cutoff {
            for cp in entries.iter().filter(|c| c.metadata.timestamp < cutoff) {
                mark(cp, &mut thread_hit);
            }
        }

        if let Some(cap) = options.max_per_thread {
            if entries.len() > cap {
                for cp in &entries[..entries.len() - cap] {
                    mark(cp, &mut thread_hit);
                }
            }
        }

        if thread_hit {
            affected.push(thread_id.clone());
        }
    }

    let estimated_space_saved_bytes = victims.iter().map(|v| v.size_bytes).sum();
    let removed = victims.len() as u64;

    if !options.dry_run {
        for victim in &victims {
            backend.delete(&victim.thread_id, &victim.checkpoint_id).await?;
            if let Some(hook) = &options.on_delete {
                hook(&victim.checkpoint_id, &victim.thread_id);
            }
        }
    }

    Ok(CleanupReport {
        removed,
        affected_threads: affected,
        estimated_space_saved_bytes,
        dry_run: options.dry_run,
    })
}

/// Background sweeper running retention on a fixed interval across all
/// registered backends.
///
/// Owns its task; [`stop`](CleanupScheduler::stop) (or drop) shuts it down.
pub struct CleanupScheduler {
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl CleanupScheduler {
    /// Spawn the sweep loop. Each sweep runs on its own task so the loop
    /// keeps observing ticks; a tick that arrives while a sweep is still
    /// running is skipped, never queued or overlapped.
    pub fn start(
        registry: Arc<BackendRegistry>,
        options: CleanupOptions,
        every: Duration,
    ) -> Self {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let in_flight = Arc::new(AtomicBool::new(false));
        let options = Arc::new(options);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // Consume the immediate first tick so the first sweep happens
            // one full interval after startup.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        if in_flight
                            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                            .is_err()
                        {
                            debug!("previous cleanup sweep still running; skipping tick");
                            continue;
                        }
                        let registry = Arc::clone(&registry);
                        let options = Arc::clone(&options);
                        let guard = Arc::clone(&in_flight);
                        tokio::spawn(async move {
                            sweep_all(&registry, &options).await;
                            guard.store(false, Ordering::Release);
                        });
                    }
                }
            }
        });
        Self {
            shutdown_tx: Some(shutdown_tx),
            handle,
        }
    }

    /// Signal shutdown and wait for the tick loop to finish. A sweep
    /// already in flight completes on its own task.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.handle).await;
    }
}

impl Drop for CleanupScheduler {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// One sweep across every ready backend; failures are isolated per backend.
pub(crate) async fn sweep_all(registry: &BackendRegistry, options: &CleanupOptions) -> u64 {
    let mut total = 0u64;
    for (name, backend) in registry.ready_backends() {
        match backend.cleanup(options).await {
            Ok(report) => {
                if report.removed > 0 {
                    debug!(backend = %name, removed = report.removed, "cleanup sweep removed checkpoints");
                }
                total += report.removed;
            }
            Err(e) => {
                warn!(backend = %name, error = %e, "cleanup sweep failed for backend; continuing");
            }
        }
    }
    total
}
