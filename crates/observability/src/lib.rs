//! Tracing and logging setup shared by the loyalty binaries and tests.

/// Initialize process-wide observability (tracing/logging).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Initialize human-readable logging for tests and local runs.
pub fn init_pretty() {
    tracing::init_pretty();
}

/// Tracing configuration (filters, layers).
pub mod tracing;
