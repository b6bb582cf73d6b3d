//! Tracing setup shared by every process that embeds the granary crates.
//!
//! The library crates only emit spans and events; installing a subscriber is
//! the composition root's job, done once at startup through [`init`] or
//! [`init_with`].

/// Initialize process-wide observability (tracing/logging).
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Initialize with explicit filter directives instead of `RUST_LOG`.
pub fn init_with(directives: &str) {
    tracing::init_with(directives);
}

/// Tracing configuration (filters, layers).
pub mod tracing;
