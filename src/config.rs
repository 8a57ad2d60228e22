/*!
Declarative store configuration.

A store is described as a list of named backend configurations; the first
entry (or the one flagged `default`) becomes the default backend. An empty
list yields a single in-memory default, so a store is always usable without
configuration. Backend types carry aliases for their storage-class names
(`key-value`, `embedded-relational`, `networked-relational`).
*/

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::CheckpointBackend;
use crate::backends::{MemoryBackend, MemoryOptions};
use crate::errors::StoreResult;
use crate::registry::BackendRegistry;
use crate::store::CheckpointStore;

/// One backend's connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BackendConfig {
    Memory {
        #[serde(default)]
        ttl_seconds: Option<u64>,
        #[serde(default)]
        max_per_thread: Option<usize>,
    },
    #[serde(alias = "key-value")]
    Redis {
        url: String,
        #[serde(default = "default_redis_prefix")]
        prefix: String,
        #[serde(default)]
        ttl_seconds: Option<u64>,
    },
    #[serde(alias = "embedded-relational")]
    Sqlite { database_url: String },
    #[serde(alias = "networked-relational")]
    Postgres { database_url: String },
}

fn default_redis_prefix() -> String {
    "loomstore:".to_string()
}

/// A backend configuration bound to a registry name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedBackendConfig {
    pub name: String,
    /// Marks this backend as the default. When no entry is flagged, the
    /// first one wins.
    #[serde(default)]
    pub default: bool,
    #[serde(flatten)]
    pub config: BackendConfig,
}

/// Top-level store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backends: Vec<NamedBackendConfig>,
}

impl StoreConfig {
    pub fn from_json(json: &str) -> StoreResult<Self> {
        let config = serde_json::from_str(json).map_err(crate::errors::BackendError::from)?;
        Ok(config)
    }
}

/// Connect every configured backend and assemble a store.
///
/// Fails fast: the first backend that cannot connect aborts construction.
/// An empty configuration produces a store with one in-memory default.
pub async fn build_store(config: StoreConfig) -> StoreResult<CheckpointStore> {
    let registry = Arc::new(BackendRegistry::new());
    if config.backends.is_empty() {
        registry.register(
            "memory",
            Arc::new(MemoryBackend::new(MemoryOptions::default())),
            true,
        );
        debug!("no backends configured; registered in-memory default");
        return Ok(CheckpointStore::new(registry));
    }

    for entry in config.backends {
        let backend: Arc<dyn CheckpointBackend> = connect_backend(&entry).await?;
        registry.register(entry.name, backend, entry.default);
    }
    Ok(CheckpointStore::new(registry))
}

async fn connect_backend(entry: &NamedBackendConfig) -> StoreResult<Arc<dyn CheckpointBackend>> {
    match &entry.config {
        BackendConfig::Memory {
            ttl_seconds,
            max_per_thread,
        } => Ok(Arc::new(MemoryBackend::new(MemoryOptions {
            ttl: ttl_seconds.map(Duration::from_secs),
            max_per_thread: *max_per_thread,
            ..MemoryOptions::default()
        }))),

        #[cfg(feature = "redis-backend")]
        BackendConfig::Redis {
            url,
            prefix,
            ttl_seconds,
        } => {
            let backend = crate::backends::RedisBackend::connect(crate::backends::RedisOptions {
                url: url.clone(),
                prefix: prefix.clone(),
                ttl: ttl_seconds.map(Duration::from_secs),
            })
            .await?;
            Ok(Arc::new(backend))
        }
        #[cfg(not(feature = "redis-backend"))]
        BackendConfig::Redis { .. } => Err(crate::errors::StoreError::validation(format!(
            "backend {}: redis support is not compiled in (enable the `redis-backend` feature)",
            entry.name
        ))),

        #[cfg(feature = "sqlite")]
        BackendConfig::Sqlite { database_url } => {
            let backend = crate::backends::SqliteBackend::connect(database_url).await?;
            Ok(Arc::new(backend))
        }
        #[cfg(not(feature = "sqlite"))]
        BackendConfig::Sqlite { .. } => Err(crate::errors::StoreError::validation(format!(
            "backend {}: sqlite support is not compiled in (enable the `sqlite` feature)",
            entry.name
        ))),

        #[cfg(feature = "postgres")]
        BackendConfig::Postgres { database_url } => {
            let backend = crate::backends::PostgresBackend::connect(database_url).await?;
            Ok(Arc::new(backend))
        }
        #[cfg(not(feature = "postgres"))]
        BackendConfig::Postgres { .. } => Err(crate::errors::StoreError::validation(format!(
            "backend {}: postgres support is not compiled in (enable the `postgres` feature)",
            entry.name
        ))),
    }
}

/// Programmatic store assembly for backends constructed by the caller.
#[derive(Default)]
pub struct StoreBuilder {
    registry: Arc<BackendRegistry>,
}

impl StoreBuilder {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(BackendRegistry::new()),
        }
    }

    #[must_use]
    pub fn with_backend(
        self,
        name: impl Into<String>,
        backend: Arc<dyn CheckpointBackend>,
    ) -> Self {
        self.registry.register(name, backend, false);
        self
    }

    #[must_use]
    pub fn with_default_backend(
        self,
        name: impl Into<String>,
        backend: Arc<dyn CheckpointBackend>,
    ) -> Self {
        self.registry.register(name, backend, true);
        self
    }

    /// Finish assembly. An empty builder gets an in-memory default so the
    /// resulting store is always usable.
    pub fn build(self) -> CheckpointStore {
        if self.registry.default_name().is_none() {
            self.registry.register(
                "memory",
                Arc::new(MemoryBackend::new(MemoryOptions::default())),
                true,
            );
        }
        CheckpointStore::new(self.registry)
    }
}
