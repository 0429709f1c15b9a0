//! Logging setup
//!
//! The runtime only emits `tracing` events; installing a subscriber is left to
//! the application. These helpers install the usual fmt subscriber filtered by
//! an `EnvFilter` directive such as `info` or `nodeflow=debug`.

use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::FlowConfig;
use crate::error::ConfigError;

/// Build a fmt subscriber writing to `writer`, without installing it
pub fn subscriber<W>(filter: &str, writer: W) -> Result<impl Subscriber + Send + Sync, ConfigError>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let filter = EnvFilter::try_new(filter)
        .map_err(|e| ConfigError::Subscriber(format!("invalid log filter '{}': {}", filter, e)))?;

    Ok(FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(true) // Show the module that logged
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .finish())
}

/// Install a global fmt subscriber logging to stderr.
///
/// Fails instead of panicking when a global subscriber is already set.
pub fn init_tracing(filter: &str) -> Result<(), ConfigError> {
    let subscriber = subscriber(filter, std::io::stderr)?;
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| ConfigError::Subscriber(format!("failed to set logging subscriber: {}", e)))
}

/// Install the global subscriber using `config.log_filter`
pub fn init_from_config(config: &FlowConfig) -> Result<(), ConfigError> {
    init_tracing(&config.log_filter)
}
