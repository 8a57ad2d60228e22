/*!
SQLite backend: one row per `(thread_id, checkpoint_id)` in an embedded
database file.

## Behavior

- When the `sqlite-migrations` feature is enabled (default), embedded
  migrations (`sqlx::migrate!("./migrations")`) are executed on connect;
  disabling the feature assumes external migration orchestration.
- `created_at` is stored as an RFC3339 UTC string with fixed fractional
  precision, so `ORDER BY created_at` is chronological; `rowid` breaks ties
  between rows written in the same microsecond.
- Retention deletes run inside a single transaction, so a failed sweep never
  leaves a partially pruned thread.
*/

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use rustc_hash::FxHashSet;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use tracing::{debug, instrument};

use crate::backend::CheckpointBackend;
use crate::checkpoint::{
    BackendKind, Checkpoint, CheckpointMetadata, CleanupOptions, CleanupReport, CompressionTag,
    EnhancedCheckpoint, HEALTH_PROBE_THREAD, ListOptions, StorageInfo, StorageStats, fmt_rfc3339,
};
use crate::errors::{BackendError, BackendResult};

/// SQLite-backed checkpoint storage.
///
/// Durable single-file storage suited to local development and single-node
/// deployments. Writes go through a shared connection pool.
pub struct SqliteBackend {
    pool: Arc<SqlitePool>,
    database_url: String,
    last_cleanup: parking_lot::Mutex<Option<DateTime<Utc>>>,
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("database_url", &self.database_url)
            .finish()
    }
}

impl SqliteBackend {
    /// Connect (or create) a SQLite database at `database_url`.
    /// Example URL: "sqlite://checkpoints.db?mode=rwc"
    #[instrument(skip(database_url), err)]
    pub async fn connect(database_url: &str) -> BackendResult<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .map_err(|e| BackendError::backend(format!("connect error: {e}")))?;
        // Run embedded migrations only if the feature is enabled (idempotent).
        #[cfg(feature = "sqlite-migrations")]
        {
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .map_err(|e| BackendError::backend(format!("migration failure: {e}")))?;
        }
        debug!(database_url, "sqlite backend connected");
        Ok(Self {
            pool: Arc::new(pool),
            database_url: database_url.to_string(),
            last_cleanup: parking_lot::Mutex::new(None),
        })
    }
}

fn row_to_checkpoint(row: &SqliteRow) -> BackendResult<EnhancedCheckpoint> {
    let checkpoint_data: String = row.get("checkpoint_data");
    let metadata_json: String = row.get("metadata");
    let size_bytes: i64 = row.get("size_bytes");
    let checksum: String = row.get("checksum");

    let checkpoint: Checkpoint = serde_json::from_str(&checkpoint_data)?;
    let metadata: CheckpointMetadata = serde_json::from_str(&metadata_json)?;
    Ok(EnhancedCheckpoint {
        checkpoint,
        metadata,
        size_bytes: size_bytes.max(0) as u64,
        checksum,
        compression: CompressionTag::None,
    })
}

#[async_trait::async_trait]
impl CheckpointBackend for SqliteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    #[instrument(skip(self, checkpoint), fields(thread_id, checkpoint_id = %checkpoint.checkpoint.id), err)]
    async fn put(&self, thread_id: &str, checkpoint: &EnhancedCheckpoint) -> BackendResult<()> {
        let checkpoint_data = serde_json::to_string(&checkpoint.checkpoint)?;
        let metadata_json = serde_json::to_string(&checkpoint.metadata)?;
        let created_at = fmt_rfc3339(checkpoint.metadata.timestamp);
        let updated_at = fmt_rfc3339(Utc::now());

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO checkpoints (
                thread_id,
                checkpoint_id,
                checkpoint_data,
                metadata,
                created_at,
                updated_at,
                size_bytes,
                checksum
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(thread_id)
        .bind(&checkpoint.checkpoint.id)
        .bind(&checkpoint_data)
        .bind(&metadata_json)
        .bind(&created_at)
        .bind(&updated_at)
        .bind(checkpoint.size_bytes as i64)
        .bind(&checkpoint.checksum)
        .execute(&*self.pool)
        .await
        .map_err(|e| BackendError::backend(format!("insert checkpoint: {e}")))?;

        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn get(
        &self,
        thread_id: &str,
        checkpoint_id: Option<&str>,
    ) -> BackendResult<Option<EnhancedCheckpoint>> {
        let row_opt: Option<SqliteRow> = match checkpoint_id {
            Some(id) => {
                sqlx::query(
                    r#"
                    SELECT checkpoint_data, metadata, size_bytes, checksum
                    FROM checkpoints
                    WHERE thread_id = ?1 AND checkpoint_id = ?2
                    "#,
                )
                .bind(thread_id)
                .bind(id)
                .fetch_optional(&*self.pool)
                .await
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT checkpoint_data, metadata, size_bytes, checksum
                    FROM checkpoints
                    WHERE thread_id = ?1
                    ORDER BY created_at DESC, rowid DESC
                    LIMIT 1
                    "#,
                )
                .bind(thread_id)
                .fetch_optional(&*self.pool)
                .await
            }
        }
        .map_err(|e| BackendError::backend(format!("select checkpoint: {e}")))?;

        row_opt.as_ref().map(row_to_checkpoint).transpose()
    }

    async fn list(
        &self,
        thread_id: &str,
        options: &ListOptions,
    ) -> BackendResult<Vec<EnhancedCheckpoint>> {
        // Date range is pushed down; lexicographic order on the stored
        // strings matches chronological order.
        let from = options
            .date_range
            .and_then(|r| r.from)
            .map(fmt_rfc3339);
        let to = options.date_range.and_then(|r| r.to).map(fmt_rfc3339);
        let rows = sqlx::query(
            r#"
            SELECT checkpoint_data, metadata, size_bytes, checksum
            FROM checkpoints
            WHERE thread_id = ?1
              AND (?2 IS NULL OR created_at >= ?2)
              AND (?3 IS NULL OR created_at <= ?3)
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(thread_id)
        .bind(&from)
        .bind(&to)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| BackendError::backend(format!("select thread: {e}")))?;

        rows.iter().map(row_to_checkpoint).collect()
    }

    async fn delete(&self, thread_id: &str, checkpoint_id: &str) -> BackendResult<bool> {
        let result =
            sqlx::query("DELETE FROM checkpoints WHERE thread_id = ?1 AND checkpoint_id = ?2")
                .bind(thread_id)
                .bind(checkpoint_id)
                .execute(&*self.pool)
                .await
                .map_err(|e| BackendError::backend(format!("delete checkpoint: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_thread(&self, thread_id: &str) -> BackendResult<u64> {
        let result = sqlx::query("DELETE FROM checkpoints WHERE thread_id = ?1")
            .bind(thread_id)
            .execute(&*self.pool)
            .await
            .map_err(|e| BackendError::backend(format!("delete thread: {e}")))?;
        Ok(result.rows_affected())
    }

    async fn threads(&self) -> BackendResult<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT thread_id FROM checkpoints WHERE thread_id != ?1")
            .bind(HEALTH_PROBE_THREAD)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| BackendError::backend(format!("select threads: {e}")))?;
        Ok(rows.iter().map(|r| r.get("thread_id")).collect())
    }

    #[instrument(skip(self, options), fields(dry_run = options.dry_run), err)]
    async fn cleanup(&self, options: &CleanupOptions) -> BackendResult<CleanupReport> {
        let cutoff = options
            .max_age
            .and_then(crate::retention::age_cutoff)
            .map(fmt_rfc3339);

        let mut victims: Vec<(String, String, u64)> = Vec::new();
        let mut seen: FxHashSet<(String, String)> = FxHashSet::default();
        let mut affected: FxHashSet<String> = FxHashSet::default();

        // Age pass.
        if let Some(cutoff) = &cutoff {
            let rows = sqlx::query(
                "SELECT thread_id, checkpoint_id, size_bytes FROM checkpoints WHERE created_at < ?1",
            )
            .bind(cutoff)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| BackendError::backend(format!("select expired: {e}")))?;
            for row in rows {
                let thread_id: String = row.get("thread_id");
                if options.exclude_threads.iter().any(|t| t == &thread_id) {
                    continue;
                }
                let checkpoint_id: String = row.get("checkpoint_id");
                let size: i64 = row.get("size_bytes");
                if seen.insert((thread_id.clone(), checkpoint_id.clone())) {
                    affected.insert(thread_id.clone());
                    victims.push((thread_id, checkpoint_id, size.max(0) as u64));
                }
            }
        }

        // Cap pass: oldest excess rows per over-cap thread.
        if let Some(cap) = options.max_per_thread {
            for thread_id in self.threads().await? {
                if options.exclude_threads.iter().any(|t| t == &thread_id) {
                    continue;
                }
                let rows = sqlx::query(
                    r#"
                    SELECT checkpoint_id, size_bytes
                    FROM checkpoints
                    WHERE thread_id = ?1
                    ORDER BY created_at ASC, rowid ASC
                    "#,
                )
                .bind(&thread_id)
                .fetch_all(&*self.pool)
                .await
                .map_err(|e| BackendError::backend(format!("select over-cap: {e}")))?;
                if rows.len() <= cap {
                    continue;
                }
                for row in &rows[..rows.len() - cap] {
                    let checkpoint_id: String = row.get("checkpoint_id");
                    let size: i64 = row.get("size_bytes");
                    if seen.insert((thread_id.clone(), checkpoint_id.clone())) {
                        affected.insert(thread_id.clone());
                        victims.push((thread_id.clone(), checkpoint_id, size.max(0) as u64));
                    }
                }
            }
        }

        let estimated_space_saved_bytes = victims.iter().map(|(_, _, s)| s).sum();
        let removed = victims.len() as u64;

        if !options.dry_run && !victims.is_empty() {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| BackendError::backend(format!("tx begin: {e}")))?;
            for (thread_id, checkpoint_id, _) in &victims {
                sqlx::query(
                    "DELETE FROM checkpoints WHERE thread_id = ?1 AND checkpoint_id = ?2",
                )
                .bind(thread_id)
                .bind(checkpoint_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| BackendError::backend(format!("delete victim: {e}")))?;
            }
            tx.commit()
                .await
                .map_err(|e| BackendError::backend(format!("tx commit: {e}")))?;
            // Hooks fire only for deletions that actually committed.
            if let Some(hook) = &options.on_delete {
                for (thread_id, checkpoint_id, _) in &victims {
                    hook(checkpoint_id, thread_id);
                }
            }
            *self.last_cleanup.lock() = Some(Utc::now());
        }

        Ok(CleanupReport {
            removed,
            affected_threads: affected.into_iter().collect(),
            estimated_space_saved_bytes,
            dry_run: options.dry_run,
        })
    }

    async fn record_access(&self, thread_id: &str, checkpoint_id: &str) -> BackendResult<()> {
        // Best-effort in-place JSON update; the stored record is authoritative
        // for everything except these two bookkeeping fields.
        sqlx::query(
            r#"
            UPDATE checkpoints
            SET metadata = json_set(
                metadata,
                '$.access_count', COALESCE(json_extract(metadata, '$.access_count'), 0) + 1,
                '$.last_accessed_at', ?3
            )
            WHERE thread_id = ?1 AND checkpoint_id = ?2
            "#,
        )
        .bind(thread_id)
        .bind(checkpoint_id)
        .bind(fmt_rfc3339(Utc::now()))
        .execute(&*self.pool)
        .await
        .map_err(|e| BackendError::backend(format!("record access: {e}")))?;
        Ok(())
    }

    async fn storage_info(&self) -> BackendResult<StorageInfo> {
        Ok(StorageInfo {
            kind: BackendKind::Sqlite,
            location: self.database_url.clone(),
            persistent: !self.database_url.contains(":memory:"),
            supports_native_ttl: false,
        })
    }

    async fn storage_stats(&self) -> BackendResult<StorageStats> {
        let recent_cutoff = fmt_rfc3339(Utc::now() - TimeDelta::hours(1));
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(DISTINCT thread_id) AS threads,
                COALESCE(SUM(size_bytes), 0) AS total_bytes,
                COALESCE(AVG(size_bytes), 0.0) AS avg_bytes,
                COALESCE(SUM(CASE WHEN created_at >= ?1 THEN 1 ELSE 0 END), 0) AS recent
            FROM checkpoints
            "#,
        )
        .bind(&recent_cutoff)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| BackendError::backend(format!("select stats: {e}")))?;

        let total: i64 = row.get("total");
        let threads: i64 = row.get("threads");
        let total_bytes: i64 = row.get("total_bytes");
        let avg_bytes: f64 = row.get("avg_bytes");
        let recent: i64 = row.get("recent");
        Ok(StorageStats {
            total_checkpoints: total.max(0) as u64,
            active_threads: threads.max(0) as u64,
            average_size_bytes: avg_bytes,
            total_storage_used_bytes: total_bytes.max(0) as u64,
            recent_checkpoints: recent.max(0) as u64,
            last_cleanup: *self.last_cleanup.lock(),
        })
    }

    async fn close(&self) -> BackendResult<()> {
        self.pool.close().await;
        Ok(())
    }
}
