/*!
Error taxonomy for the checkpoint store.

Two layers:
- [`BackendError`] — raised by backend adapters doing actual I/O.
- [`StoreError`] — the facade's caller-facing taxonomy; backend failures are
  normalized into `Persistence` (save path) or `Load` (load path) with a
  `retryable` flag derived from known transient failure text.

Checksum mismatches are never errors (advisory integrity only), and health
check failures surface as `false`, never as an `Err`.
*/

use miette::Diagnostic;
use thiserror::Error;

use crate::checkpoint::LifecycleState;

/// Failure text fragments that mark a backend failure as transient.
const TRANSIENT_PATTERNS: [&str; 5] = ["timeout", "connection", "network", "temporary", "busy"];

/// Whether a backend failure message looks transient (safe to retry).
pub fn is_transient(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    TRANSIENT_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Errors raised inside backend adapters.
#[derive(Debug, Error, Diagnostic)]
pub enum BackendError {
    #[error("backend failure: {message}")]
    #[diagnostic(
        code(loomstore::backend::io),
        help("Check connectivity and credentials for the storage medium.")
    )]
    Backend { message: String },

    #[error("serialization failed: {source}")]
    #[diagnostic(
        code(loomstore::backend::serde),
        help("Ensure checkpoint payloads and metadata are JSON-serializable.")
    )]
    Serde {
        #[from]
        source: serde_json::Error,
    },

    #[error("operation not supported by this backend: {operation}")]
    #[diagnostic(code(loomstore::backend::unsupported))]
    Unsupported { operation: &'static str },
}

impl BackendError {
    pub fn backend(message: impl Into<String>) -> Self {
        BackendError::Backend {
            message: message.into(),
        }
    }
}

#[cfg(any(feature = "sqlite", feature = "postgres"))]
impl From<sqlx::Error> for BackendError {
    fn from(e: sqlx::Error) -> Self {
        BackendError::Backend {
            message: e.to_string(),
        }
    }
}

#[cfg(feature = "redis-backend")]
impl From<redis::RedisError> for BackendError {
    fn from(e: redis::RedisError) -> Self {
        BackendError::Backend {
            message: e.to_string(),
        }
    }
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Caller-facing errors raised by the checkpoint store facade.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    /// Bad input: missing ids, limit outside `[1, 1000]`. Never retryable.
    #[error("validation failed: {message}")]
    #[diagnostic(
        code(loomstore::store::validation),
        help("Supply a non-empty thread id and checkpoint id, and keep limit within [1, 1000].")
    )]
    Validation { message: String },

    #[error("backend not registered: {name}")]
    #[diagnostic(
        code(loomstore::store::backend_not_found),
        help("Register the backend or omit the name to use the default.")
    )]
    BackendNotFound { name: String },

    /// Save-path failure wrapping the backend error.
    #[error("failed to persist checkpoint {checkpoint_id} for thread {thread_id}: {message}")]
    #[diagnostic(
        code(loomstore::store::persistence),
        help("Inspect `retryable`; transient failures (timeouts, connection drops) can be retried.")
    )]
    Persistence {
        thread_id: String,
        checkpoint_id: String,
        message: String,
        retryable: bool,
    },

    /// Load-path failure wrapping the backend error.
    #[error("failed to load checkpoint for thread {thread_id}: {message}")]
    #[diagnostic(code(loomstore::store::load))]
    Load { thread_id: String, message: String },

    /// The named backend exists but is not in the `Ready` lifecycle state.
    /// Closed backends never become ready again, so this is not retryable.
    #[error("backend {name} is {state}, not ready")]
    #[diagnostic(
        code(loomstore::store::not_ready),
        help("Closed backends must be re-registered; initializing backends become ready shortly.")
    )]
    NotReady {
        name: String,
        state: LifecycleState,
    },

    #[error("list deadline of {deadline_ms} ms exceeded")]
    #[diagnostic(code(loomstore::store::deadline))]
    DeadlineExceeded { deadline_ms: u64 },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Backend(#[from] BackendError),
}

impl StoreError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        StoreError::Validation {
            message: message.into(),
        }
    }

    /// Whether retrying the failed operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Persistence { retryable, .. } => *retryable,
            _ => false,
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_patterns_match_case_insensitively() {
        assert!(is_transient("Connection refused"));
        assert!(is_transient("operation TIMEOUT after 5s"));
        assert!(is_transient("database is busy"));
        assert!(is_transient("temporary failure in name resolution"));
        assert!(is_transient("network unreachable"));
        assert!(!is_transient("constraint violation: duplicate key"));
    }

    #[test]
    fn only_persistence_errors_carry_retryability() {
        let err = StoreError::Persistence {
            thread_id: "t".into(),
            checkpoint_id: "c".into(),
            message: "timeout".into(),
            retryable: true,
        };
        assert!(err.is_retryable());
        assert!(!StoreError::validation("nope").is_retryable());
    }
}
