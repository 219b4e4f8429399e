//! Tracing setup for binaries embedding the pipeline.
//!
//! The library itself only emits `tracing` events; installing a subscriber is
//! the host application's call. These helpers cover the common case.

use tracing_subscriber::EnvFilter;

/// Install a formatted stderr subscriber filtered by `RUST_LOG`
/// (default `info`). Safe to call more than once; later calls are no-ops.
pub fn init() {
    init_with_filter("info");
}

/// Like [`init`] but with an explicit default directive used when `RUST_LOG`
/// is unset.
pub fn init_with_filter(default_directive: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init();
        init();
        init_with_filter("debug");
    }
}
