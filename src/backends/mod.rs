/*!
Backend adapters.

Each adapter maps the storage contract onto one medium:
- [`memory`] — volatile per-process map, always available.
- [`redis`] — timed key-value store with native TTL and a sorted-set index
  per thread (feature `redis-backend`).
- [`sqlite`] — embedded relational store (feature `sqlite`).
- [`postgres`] — networked relational store (feature `postgres`).
*/

pub mod memory;

#[cfg(feature = "redis-backend")]
pub mod redis;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::{MemoryBackend, MemoryOptions};

#[cfg(feature = "redis-backend")]
pub use redis::{RedisBackend, RedisOptions};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteBackend;

#[cfg(feature = "postgres")]
pub use postgres::PostgresBackend;
