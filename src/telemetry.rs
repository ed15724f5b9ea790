//! Tracing initialization helpers.
//!
//! The library itself only emits `tracing` events; installing a subscriber is
//! the host's decision. Binaries and integration tests call
//! [`init_tracing`] once at startup.

use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt};

/// Install a fmt subscriber honoring `RUST_LOG`, defaulting to `INFO`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(Level::INFO.into()));
    let _ = fmt().with_env_filter(filter).try_init();
}
