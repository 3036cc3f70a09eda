//! Tracing/logging setup shared by binaries, benches and tests.

/// Initialize process-wide tracing with `RUST_LOG` (default `info`).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Initialize tracing with explicit filter directives (e.g. `"jobtags_infra=debug"`).
///
/// `RUST_LOG` still wins when it is set.
pub fn init_with_filter(directives: &str) {
    tracing::init_with_default(directives);
}

/// Tracing configuration (filters, layers).
pub mod tracing;
