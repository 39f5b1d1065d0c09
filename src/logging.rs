//! Logging setup
//!
//! Installs a `tracing` fmt subscriber filtered by the configured level.
//! `RUST_LOG`, when set, takes precedence over the configuration.

use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

/// Install the global subscriber. Returns false if one was already installed.
pub fn init(config: &LogConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .try_init()
        .is_ok()
}
