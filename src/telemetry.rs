/*!
Tracing setup for binaries and tests.

Library code only emits `tracing` events; installing a subscriber is the
embedding application's call. This helper covers the common case: a fmt
layer filtered by `RUST_LOG`, defaulting to warnings plus loomstore info.
*/

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Install a global fmt subscriber honoring `RUST_LOG`.
///
/// Idempotent: a second call (or a subscriber installed elsewhere) is
/// silently ignored, so tests can call this freely.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("warn,loomstore=info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let fmt_layer = fmt::layer().with_target(true);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}
