//! Process-wide tracing setup shared by the binaries.

/// Initialize tracing with the defaults: JSON lines, `info` unless `RUST_LOG`
/// says otherwise.
///
/// Safe to call multiple times; later calls are no-ops.
pub fn init() {
    tracing::init(&tracing::LogConfig::default());
}

pub mod tracing;
