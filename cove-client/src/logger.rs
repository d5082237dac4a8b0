//! Optional global logger setup for applications embedding the client.
//!
//! Entirely opt-in: the library itself only emits `tracing` events and
//! never installs a subscriber behind the embedder's back.

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::{
    filter::Targets,
    layer::{Layer, SubscriberExt},
    util::{SubscriberInitExt, TryInitError},
};

/// Initialize a global `tracing` logger printing to stdout.
///
/// The target filter is taken from `COVE_LOG`, falling back to `RUST_LOG`,
/// falling back to INFO-and-up. Filter syntax:
/// <https://docs.rs/tracing-subscriber/latest/tracing_subscriber/filter/struct.Targets.html>
///
/// Panics if a logger is already initialized.
pub fn init() {
    try_init().expect("Failed to setup logger");
}

/// Use this to initialize the global logger in tests.
///
/// Does nothing unless a filter env var is set, and never panics: multiple
/// test threads may race to install the global subscriber.
pub fn init_for_testing() {
    if std::env::var_os("COVE_LOG").is_none()
        && std::env::var_os("RUST_LOG").is_none()
    {
        return;
    }

    let _ = try_init();
}

/// Try to initialize a global logger. Returns an `Err` if another global
/// logger is already set.
pub fn try_init() -> Result<(), TryInitError> {
    let filter = env_filter().unwrap_or_else(|| {
        Targets::new().with_default(Level::INFO)
    });

    let stdout_log = tracing_subscriber::fmt::layer()
        .compact()
        .with_level(true)
        .with_target(true)
        .with_ansi(true)
        .with_filter(filter);

    tracing_subscriber::registry().with(stdout_log).try_init()
}

fn env_filter() -> Option<Targets> {
    ["COVE_LOG", "RUST_LOG"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find_map(|value| Targets::from_str(&value).ok())
}
