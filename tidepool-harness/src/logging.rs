//! Tracing subscriber setup.
//!
//! The harness only emits `tracing` events; installing a subscriber is up
//! to the caller. These helpers install the usual `fmt` subscriber filtered
//! by `RUST_LOG`.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info,tidepool_harness=debug";

/// Install a global subscriber honouring `RUST_LOG`.
///
/// Returns an error if a global subscriber is already set.
pub fn init() -> Result<(), tracing_subscriber::util::TryInitError> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()
}

/// Install a test-writer subscriber, ignoring the error when one is
/// already installed by another test.
pub fn try_init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_test_writer()
        .try_init();
}
