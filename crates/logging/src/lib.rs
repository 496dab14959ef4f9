//! PeerBridge Logging
//!
//! Shared `tracing` subscriber setup for the relay binaries.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const PEERBRIDGE_CRATES: [&str; 4] = [
    "peerbridge",
    "peerbridge_core",
    "peerbridge_relay",
    "peerbridge_settings",
];

/// Filter used when `RUST_LOG` is not set
pub fn default_directives(verbose: bool) -> String {
    let level = if verbose { "debug" } else { "info" };
    let mut directives = vec!["info".to_string()];
    directives.extend(PEERBRIDGE_CRATES.iter().map(|c| format!("{c}={level}")));
    directives.join(",")
}

/// Install the global subscriber. `RUST_LOG` takes precedence over `verbose`.
pub fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)));

    // A subscriber may already be installed (tests, embedding)
    let _ = tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .try_init();
}
