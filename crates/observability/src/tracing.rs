//! Tracing/logging initialization.
//!
//! JSON lines on stdout, filtered through `EnvFilter`. Span fields from
//! `#[instrument]` (warehouse ids, request ids) land as structured fields,
//! so a log pipeline can slice by warehouse without parsing messages.

use tracing_subscriber::EnvFilter;

/// Initialize tracing/logging for the process.
///
/// Filter directives come from `RUST_LOG`, falling back to `info`. Safe to
/// call multiple times (subsequent calls are no-ops).
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    install(filter);
}

/// Initialize with explicit directives, e.g. `"granary_warehouse=debug"`.
///
/// For tests and tools that want a fixed filter regardless of the
/// environment.
pub fn init_with(directives: &str) {
    install(EnvFilter::new(directives));
}

fn install(filter: EnvFilter) {
    // JSON logs + timestamps, no target noise.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    #[test]
    fn repeated_initialization_is_a_no_op() {
        super::init_with("granary_store=debug");
        super::init_with("warn");
        super::init();
        ::tracing::info!("subscriber installed");
    }
}
