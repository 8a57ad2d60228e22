/*!
# Loomstore

Pluggable checkpoint persistence for graph workflow runtimes.

A checkpoint is an immutable snapshot of one execution thread's state at one
step. Loomstore persists these snapshots through interchangeable storage
backends — in-memory, Redis, SQLite, PostgreSQL — behind a single facade
with uniform listing, retention, and health semantics.

## Architecture

- [`store`] — the [`CheckpointStore`](store::CheckpointStore) facade:
  validation, metadata enrichment, dispatch, error normalization, and
  uniform filter/sort/paginate/project for listings.
- [`backend`] — the [`CheckpointBackend`](backend::CheckpointBackend)
  contract every adapter implements.
- [`backends`] — the adapters themselves, feature-gated per medium.
- [`registry`] — named backend instances, default selection, lifecycle.
- [`enrich`] — metadata completion plus size/checksum integrity fields.
- [`retention`] — age- and cap-based cleanup, plus the scheduled sweeper.
- [`metrics`] — per-backend operation timing and health classification.
- [`config`] — declarative store assembly from serde-friendly settings.

## Quick start

```no_run
use loomstore::checkpoint::{Checkpoint, MetadataDraft};
use loomstore::config::StoreBuilder;

# async fn demo() -> Result<(), loomstore::errors::StoreError> {
let store = StoreBuilder::new().build(); // in-memory default

let checkpoint = Checkpoint::new("cp-1", Default::default());
store
    .save("thread-1", checkpoint, MetadataDraft::default(), None)
    .await?;

let latest = store.load("thread-1", None, None).await?;
assert!(latest.is_some());
# Ok(())
# }
```

## Feature flags

- `sqlite` / `sqlite-migrations` (default) — SQLite backend, with embedded
  migrations run on connect.
- `postgres` / `postgres-migrations` — PostgreSQL backend.
- `redis-backend` — Redis backend.
*/

pub mod backend;
pub mod backends;
pub mod checkpoint;
pub mod config;
pub mod enrich;
pub mod errors;
pub mod metrics;
pub mod registry;
pub mod retention;
pub mod store;
pub mod telemetry;

pub use backend::{BackendCapabilities, CheckpointBackend};
pub use checkpoint::{
    BackendKind, Checkpoint, CheckpointMetadata, CheckpointTuple, CleanupOptions, CleanupReport,
    EnhancedCheckpoint, ListOptions, MetadataDraft, SortBy, SortOrder,
};
pub use config::{BackendConfig, StoreBuilder, StoreConfig, build_store};
pub use errors::{BackendError, BackendResult, StoreError, StoreResult};
pub use registry::BackendRegistry;
pub use retention::CleanupScheduler;
pub use store::CheckpointStore;
