//! Logging setup shared by binaries, tests and benches.

/// Initialize process-wide structured logging.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Route logs to the libtest capture so they show up only for failing tests.
pub fn init_for_tests() {
    tracing::init_for_tests();
}

/// Tracing configuration (filters, layers).
pub mod tracing;
