//! Process-wide structured logging setup.

/// Initialize tracing with the default filter (`info`) and format from the
/// environment.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init(tracing::LogFormat::from_env(), "info");
}

/// Tracing configuration (filters, formats).
pub mod tracing;
