//! Tracing bootstrap
//!
//! All modules log through `tracing` with structured fields. Hosts call
//! `init_tracing()` once at startup; library consumers that install their
//! own subscriber can skip it entirely.

use std::sync::Once;

static INIT: Once = Once::new();

/// Install the global fmt subscriber, honoring `RUST_LOG`.
///
/// Defaults to `info` when `RUST_LOG` is unset. Safe to call more than once;
/// only the first call installs a subscriber.
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    });
}
