//! Logging and tracing initialization for Etude.
//!
//! The engine logs through `tracing`; nothing is printed until a subscriber
//! is installed. Call one of these once at startup, before binding the server.
//!
//! The level is controlled by the `RUST_LOG` environment variable:
//!
//! ```bash
//! # Per-connection events (accept, close, re-arm failures)
//! RUST_LOG=etude_core=debug etude 8080
//!
//! # Every parsed request
//! RUST_LOG=etude_core=trace etude 8080
//! ```

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize logging with `info` as the default level.
///
/// # Panics
///
/// Panics if a global subscriber is already installed.
pub fn init_logging() {
    init_logging_with_level("info");
}

/// Initialize logging with a specific default level.
///
/// `RUST_LOG`, when set, still takes precedence over `level`.
///
/// # Panics
///
/// Panics if a global subscriber is already installed.
pub fn init_logging_with_level(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_thread_names(true))
        .init();
}
