//! Tracing bootstrap for binaries and tests that embed the engine.

use tracing_subscriber::EnvFilter;

use crate::config::KgraphConfig;

/// Install a global fmt subscriber.
///
/// `RUST_LOG` takes precedence; otherwise `default_level` (e.g. the
/// configured `general.log_level`) is used. Returns `false` if a global
/// subscriber was already installed, which is not treated as an error.
pub fn init_logging(default_level: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_ok()
}

/// [`init_logging`] with `general.log_level` as the default filter.
pub fn init_logging_from_config(config: &KgraphConfig) -> bool {
    init_logging(&config.general.log_level)
}
