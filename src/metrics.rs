/*!
Per-backend operation metrics and health aggregation.

The collector tracks save/load counts and cumulative durations (exposed as
running averages) plus success/error totals for an error rate. The health
summary classifies the whole store from individual backend probes:

- *healthy* — every backend is healthy
- *degraded* — some non-default backend is unhealthy, default still healthy
- *unhealthy* — the default backend is unhealthy, or all backends are
*/

use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;

/// Operation classes the collector distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Save,
    Load,
}

#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    save_count: u64,
    save_total_ms: f64,
    load_count: u64,
    load_total_ms: f64,
    successes: u64,
    errors: u64,
}

/// Timing and error-rate view for one backend.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct OperationAverages {
    pub average_save_time_ms: f64,
    pub average_load_time_ms: f64,
    pub error_rate: f64,
}

/// Thread-safe per-backend metrics collector.
#[derive(Default)]
pub struct MetricsCollector {
    inner: Mutex<FxHashMap<String, Counters>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, backend: &str, op: Operation, elapsed: Duration, ok: bool) {
        let ms = elapsed.as_secs_f64() * 1_000.0;
        let mut inner = self.inner.lock();
        let counters = inner.entry(backend.to_string()).or_default();
        match op {
            Operation::Save => {
                counters.save_count += 1;
                counters.save_total_ms += ms;
            }
            Operation::Load => {
                counters.load_count += 1;
                counters.load_total_ms += ms;
            }
        }
        if ok {
            counters.successes += 1;
        } else {
            counters.errors += 1;
        }
    }

    pub fn averages(&self, backend: &str) -> OperationAverages {
        let inner = self.inner.lock();
        let Some(c) = inner.get(backend) else {
            return OperationAverages::default();
        };
        let total_ops = c.successes + c.errors;
        OperationAverages {
            average_save_time_ms: if c.save_count > 0 {
                c.save_total_ms / c.save_count as f64
            } else {
                0.0
            },
            average_load_time_ms: if c.load_count > 0 {
                c.load_total_ms / c.load_count as f64
            } else {
                0.0
            },
            error_rate: if total_ops > 0 {
                c.errors as f64 / total_ops as f64
            } else {
                0.0
            },
        }
    }
}

/// Overall store health classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Aggregated health report across all registered backends.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSummary {
    pub status: HealthStatus,
    /// Per-backend probe outcome; failures are captured as `false`, never
    /// raised.
    pub backends: FxHashMap<String, bool>,
    pub default_backend: Option<String>,
}

impl HealthSummary {
    /// Classify from per-backend probe results.
    pub fn classify(
        backends: FxHashMap<String, bool>,
        default_backend: Option<String>,
    ) -> Self {
        let status = if backends.is_empty() {
            HealthStatus::Unhealthy
        } else {
            let default_healthy = default_backend
                .as_deref()
                .and_then(|d| backends.get(d).copied())
                .unwrap_or(false);
            let all_healthy = backends.values().all(|h| *h);
            let any_healthy = backends.values().any(|h| *h);
            if all_healthy {
                HealthStatus::Healthy
            } else if default_healthy && any_healthy {
                HealthStatus::Degraded
            } else {
                HealthStatus::Unhealthy
            }
        };
        Self {
            status,
            backends,
            default_backend,
        }
    }
}
