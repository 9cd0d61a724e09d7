//! Tracing/logging setup shared by binaries and tests.

/// Tracing configuration (filters, layers).
pub mod tracing;

/// Initialize process-wide tracing with `RUST_LOG`, falling back to `info`.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Like [`init`], with a caller-chosen fallback filter directive.
pub fn init_with_default(default_filter: &str) {
    tracing::init_with_default(default_filter);
}
