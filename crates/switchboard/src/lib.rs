//! Public SDK surface for Switchboard.
//!
//! This crate re-exports the sync core, its HTTP adapters and the config
//! loader, and provides a logging helper so embedders start up the same way
//! the CLI does.

/// Re-export for convenience.
pub use switchboard_backend as backend;
pub use switchboard_config as config;
pub use switchboard_core as core;
/// Re-export for convenience.
pub use switchboard_protocol as protocol;

#[inline]
/// Initialize `env_logger` with millisecond timestamps, honoring `RUST_LOG`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_logging() {
    let _ = env_logger::builder()
        .format_timestamp_millis()
        .parse_default_env()
        .try_init();
}
