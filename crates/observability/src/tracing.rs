//! Tracing/logging initialization.
//!
//! Both entry points honour `RUST_LOG`; the process-wide default is `info`,
//! the test default is `debug` so transaction retries are visible.

use tracing_subscriber::EnvFilter;

fn filter_or(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    // JSON logs + timestamps, configurable via RUST_LOG.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter_or("info"))
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}

/// Compact human-readable logs written through the test harness.
///
/// Safe to call from every test; only the first call installs a subscriber.
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter_or("debug"))
        .with_test_writer()
        .compact()
        .try_init();
}
