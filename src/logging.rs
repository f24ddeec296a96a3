//! Logging setup for serve mode.
//!
//! Level comes from the WBRIDGE_LOG environment variable (tracing env-filter
//! syntax), default `info`. Client subcommands stay silent; their output is
//! the response itself.

use tracing_subscriber::EnvFilter;

pub const LOG_ENV_VAR: &str = "WBRIDGE_LOG";

pub fn init() {
    let filter =
        EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
