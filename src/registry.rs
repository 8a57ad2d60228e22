/*!
Explicit registry of named backend instances.

Constructed once and passed by reference to all callers — there is no
process-wide ambient singleton. The registry is also where backend lifecycle
(`Uninitialized → Initializing → Ready → Closed`) is tracked, in one place
instead of duplicated inside every adapter; only `Ready` backends are handed
out for dispatch.
*/

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::backend::CheckpointBackend;
use crate::checkpoint::{BackendDescriptor, LifecycleState};
use crate::errors::{StoreError, StoreResult};

struct Entry {
    backend: Arc<dyn CheckpointBackend>,
    state: LifecycleState,
}

#[derive(Default)]
struct Inner {
    backends: FxHashMap<String, Entry>,
    /// Preserves registration order for deterministic sweeps and summaries.
    order: Vec<String>,
    default_name: Option<String>,
}

/// Holds named backend instances and tracks which one is the default.
pub struct BackendRegistry {
    inner: RwLock<Inner>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Register a connected backend under `name`. The first registered
    /// backend becomes the default unless a later one claims it explicitly.
    /// Re-registering a name replaces the previous instance.
    pub fn register(
        &self,
        name: impl Into<String>,
        backend: Arc<dyn CheckpointBackend>,
        is_default: bool,
    ) {
        let name = name.into();
        let mut inner = self.inner.write();
        if !inner.backends.contains_key(&name) {
            inner.order.push(name.clone());
        }
        inner.backends.insert(
            name.clone(),
            Entry {
                backend,
                state: LifecycleState::Ready,
            },
        );
        if is_default || inner.default_name.is_none() {
            inner.default_name = Some(name.clone());
        }
        debug!(backend = %name, is_default, "backend registered");
    }

    /// Mark a backend as still connecting. Dispatch against it fails with
    /// `NotReady` until [`mark_ready`](Self::mark_ready) is called.
    pub fn register_initializing(&self, name: impl Into<String>, backend: Arc<dyn CheckpointBackend>) {
        let name = name.into();
        let mut inner = self.inner.write();
        if !inner.backends.contains_key(&name) {
            inner.order.push(name.clone());
        }
        inner.backends.insert(
            name,
            Entry {
                backend,
                state: LifecycleState::Initializing,
            },
        );
    }

    pub fn mark_ready(&self, name: &str, is_default: bool) {
        let mut inner = self.inner.write();
        if let Some(entry) = inner.backends.get_mut(name) {
            entry.state = LifecycleState::Ready;
        }
        if is_default || inner.default_name.is_none() {
            inner.default_name = Some(name.to_string());
        }
    }

    pub fn default_name(&self) -> Option<String> {
        self.inner.read().default_name.clone()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().backends.contains_key(name)
    }

    pub fn state_of(&self, name: &str) -> Option<LifecycleState> {
        self.inner.read().backends.get(name).map(|e| e.state)
    }

    /// Resolve an explicit backend name, or the default when `None`.
    ///
    /// Fails with `BackendNotFound` for unknown explicit names and with
    /// `NotReady` (non-retryable for `Closed`) when the backend cannot
    /// accept calls.
    pub fn resolve(
        &self,
        name: Option<&str>,
    ) -> StoreResult<(String, Arc<dyn CheckpointBackend>)> {
        let inner = self.inner.read();
        let resolved = match name {
            Some(n) => n.to_string(),
            None => inner
                .default_name
                .clone()
                .ok_or_else(|| StoreError::BackendNotFound {
                    name: "<default>".to_string(),
                })?,
        };
        let entry = inner
            .backends
            .get(&resolved)
            .ok_or_else(|| StoreError::BackendNotFound {
                name: resolved.clone(),
            })?;
        if entry.state != LifecycleState::Ready {
            return Err(StoreError::NotReady {
                name: resolved,
                state: entry.state,
            });
        }
        Ok((resolved, Arc::clone(&entry.backend)))
    }

    /// All `Ready` backends in registration order, for sweeps and summaries.
    pub fn ready_backends(&self) -> Vec<(String, Arc<dyn CheckpointBackend>)> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|name| {
                inner.backends.get(name).and_then(|entry| {
                    (entry.state == LifecycleState::Ready)
                        .then(|| (name.clone(), Arc::clone(&entry.backend)))
                })
            })
            .collect()
    }

    /// Per-backend descriptors in registration order.
    pub fn descriptors(&self) -> Vec<BackendDescriptor> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|name| {
                inner.backends.get(name).map(|entry| BackendDescriptor {
                    name: name.clone(),
                    kind: entry.backend.kind(),
                    is_default: inner.default_name.as_deref() == Some(name),
                    status: entry.state,
                })
            })
            .collect()
    }

    /// Close every registered backend, tolerating and logging individual
    /// failures so one stuck backend cannot block shutdown of the others.
    pub async fn close_all(&self) {
        let targets: Vec<(String, Arc<dyn CheckpointBackend>)> = {
            let mut inner = self.inner.write();
            let mut targets = Vec::new();
            let order = inner.order.clone();
            for name in order {
                if let Some(entry) = inner.backends.get_mut(&name) {
                    if entry.state != LifecycleState::Closed {
                        entry.state = LifecycleState::Closed;
                        targets.push((name.clone(), Arc::clone(&entry.backend)));
                    }
                }
            }
            targets
        };
        for (name, backend) in targets {
            if let Err(e) = backend.close().await {
                warn!(backend = %name, error = %e, "backend close failed; continuing shutdown");
            }
        }
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
