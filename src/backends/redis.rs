/*!
Redis backend: records as JSON string values with a per-thread sorted-set
index scored by creation time.

Key layout under a configurable prefix:
- `{prefix}{thread_id}:{checkpoint_id}` — the serialized record.
- `{prefix}thread:{thread_id}:checkpoints` — ZSET of checkpoint ids, score
  is the creation timestamp in epoch milliseconds.

Record and index are written in one atomic pipeline. Records may expire
natively (TTL) while their index entry lingers; reads treat a missing record
as expired and opportunistically drop the stale index member.
*/

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tracing::{debug, instrument};

use crate::backend::CheckpointBackend;
use crate::checkpoint::{
    BackendKind, CleanupOptions, CleanupReport, EnhancedCheckpoint, HEALTH_PROBE_THREAD,
    ListOptions, StorageInfo, StorageStats,
};
use crate::errors::BackendResult;
use crate::retention;

/// Connection and key-layout options for the Redis backend.
#[derive(Debug, Clone)]
pub struct RedisOptions {
    pub url: String,
    /// Prepended to every key this backend touches.
    pub prefix: String,
    /// Native expiry applied to record values on write.
    pub ttl: Option<Duration>,
}

impl Default for RedisOptions {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            prefix: "loomstore:".to_string(),
            ttl: None,
        }
    }
}

pub struct RedisBackend {
    conn: MultiplexedConnection,
    options: RedisOptions,
    last_cleanup: parking_lot::Mutex<Option<DateTime<Utc>>>,
}

impl RedisBackend {
    /// Open a multiplexed connection; fails fast on an unreachable server.
    #[instrument(skip(options), fields(url = %options.url), err)]
    pub async fn connect(options: RedisOptions) -> BackendResult<Self> {
        let client = redis::Client::open(options.url.as_str())?;
        let conn = client.get_multiplexed_async_connection().await?;
        debug!(prefix = %options.prefix, "redis backend connected");
        Ok(Self {
            conn,
            options,
            last_cleanup: parking_lot::Mutex::new(None),
        })
    }

    fn record_key(&self, thread_id: &str, checkpoint_id: &str) -> String {
        format!("{}{}:{}", self.options.prefix, thread_id, checkpoint_id)
    }

    fn index_key(&self, thread_id: &str) -> String {
        format!("{}thread:{}:checkpoints", self.options.prefix, thread_id)
    }

    /// Ids for one thread in ascending creation order.
    async fn thread_ids(&self, thread_id: &str) -> BackendResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.zrange(self.index_key(thread_id), 0, -1).await?;
        Ok(ids)
    }

    /// Fetch one record; a missing value means the record expired, so the
    /// stale index member is dropped before reporting absence.
    async fn fetch(
        &self,
        thread_id: &str,
        checkpoint_id: &str,
    ) -> BackendResult<Option<EnhancedCheckpoint>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(self.record_key(thread_id, checkpoint_id)).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => {
                let _: i64 = conn
                    .zrem(self.index_key(thread_id), checkpoint_id)
                    .await?;
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl CheckpointBackend for RedisBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Redis
    }

    async fn put(&self, thread_id: &str, checkpoint: &EnhancedCheckpoint) -> BackendResult<()> {
        let json = serde_json::to_string(checkpoint)?;
        let record_key = self.record_key(thread_id, &checkpoint.checkpoint.id);
        let index_key = self.index_key(thread_id);
        let score = checkpoint.metadata.timestamp.timestamp_millis() as f64;

        let mut pipe = redis::pipe();
        pipe.atomic();
        match self.options.ttl {
            Some(ttl) => {
                pipe.set_ex(&record_key, &json, ttl.as_secs().max(1)).ignore();
            }
            None => {
                pipe.set(&record_key, &json).ignore();
            }
        }
        pipe.zadd(&index_key, &checkpoint.checkpoint.id, score)
            .ignore();

        let mut conn = self.conn.clone();
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn get(
        &self,
        thread_id: &str,
        checkpoint_id: Option<&str>,
    ) -> BackendResult<Option<EnhancedCheckpoint>> {
        if let Some(id) = checkpoint_id {
            return self.fetch(thread_id, id).await;
        }
        // Newest id whose record still exists; expired ones are skipped.
        let mut ids = self.thread_ids(thread_id).await?;
        while let Some(id) = ids.pop() {
            if let Some(found) = self.fetch(thread_id, &id).await? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    /// Index first, then all records in one `MGET`. Ids whose record
    /// expired come back nil and are dropped from the index.
    async fn list(
        &self,
        thread_id: &str,
        _options: &ListOptions,
    ) -> BackendResult<Vec<EnhancedCheckpoint>> {
        let ids = self.thread_ids(thread_id).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = ids
            .iter()
            .map(|id| self.record_key(thread_id, id))
            .collect();
        let mut conn = self.conn.clone();
        let raws: Vec<Option<String>> = conn.mget(&keys).await?;

        let mut out = Vec::with_capacity(ids.len());
        let mut stale: Vec<&String> = Vec::new();
        for (id, raw) in ids.iter().zip(raws) {
            match raw {
                Some(json) => out.push(serde_json::from_str(&json)?),
                None => stale.push(id),
            }
        }
        if !stale.is_empty() {
            let _: i64 = conn.zrem(self.index_key(thread_id), &stale).await?;
        }
        Ok(out)
    }

    async fn delete(&self, thread_id: &str, checkpoint_id: &str) -> BackendResult<bool> {
        let mut pipe = redis::pipe();
        pipe.atomic()
            .del(self.record_key(thread_id, checkpoint_id))
            .zrem(self.index_key(thread_id), checkpoint_id)
            .ignore();
        let mut conn = self.conn.clone();
        let (deleted,): (i64,) = pipe.query_async(&mut conn).await?;
        Ok(deleted > 0)
    }

    async fn delete_thread(&self, thread_id: &str) -> BackendResult<u64> {
        let ids = self.thread_ids(thread_id).await?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        for id in &ids {
            pipe.del(self.record_key(thread_id, id));
        }
        pipe.del(self.index_key(thread_id)).ignore();
        let mut conn = self.conn.clone();
        let counts: Vec<i64> = pipe.query_async(&mut conn).await?;
        Ok(counts.iter().map(|c| *c as u64).sum())
    }

    async fn threads(&self) -> BackendResult<Vec<String>> {
        let pattern = format!("{}thread:*:checkpoints", self.options.prefix);
        let mut conn = self.conn.clone();
        let keys: Vec<String> = {
            let mut iter = conn.scan_match::<_, String>(&pattern).await?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };
        let head = format!("{}thread:", self.options.prefix);
        Ok(keys
            .iter()
            .filter_map(|k| {
                k.strip_prefix(&head)
                    .and_then(|rest| rest.strip_suffix(":checkpoints"))
            })
            .filter(|t| *t != HEALTH_PROBE_THREAD)
            .map(str::to_string)
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
        // Best-effort read-modify-write; a concurrent writer may win.
        let Some(mut cp) = self.fetch(thread_id, checkpoint_id).await? else {
            return Ok(());
        };
        cp.metadata.access_count += 1;
        cp.metadata.last_accessed_at = Some(Utc::now());
        self.put(thread_id, &cp).await
    }

    async fn storage_info(&self) -> BackendResult<StorageInfo> {
        Ok(StorageInfo {
            kind: BackendKind::Redis,
            location: self.options.url.clone(),
            persistent: true,
            supports_native_ttl: true,
        })
    }

    async fn storage_stats(&self) -> BackendResult<StorageStats> {
        let mut total = 0u64;
        let mut total_bytes = 0u64;
        let mut recent = 0u64;
        let recent_cutoff = Utc::now() - TimeDelta::hours(1);
        let threads = self.threads().await?;
        let active_threads = threads.len() as u64;
        for thread_id in threads {
            for cp in self.list(&thread_id, &ListOptions::default()).await? {
                total += 1;
                total_bytes += cp.size_bytes;
                if cp.metadata.timestamp >= recent_cutoff {
                    recent += 1;
                }
            }
        }
        Ok(StorageStats {
            total_checkpoints: total,
            active_threads,
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
}
