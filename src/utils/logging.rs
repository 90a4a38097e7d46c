//! Structured logging setup.
//!
//! Installs a `tracing-subscriber` registry with one fmt layer (plain or JSON)
//! writing to stderr. The configured level is the default directive; `RUST_LOG`
//! narrows or widens it per target.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

use crate::config::LoggingConfig;
use crate::error::{ProtocolError, Result};

/// Install the global subscriber described by `config`
///
/// # Errors
/// Returns `ProtocolError::ConfigError` if a global subscriber is already set
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(config.log_level).into())
        .from_env_lossy();

    Registry::default()
        .with(build_layer(config).with_filter(filter))
        .try_init()
        .map_err(|e| ProtocolError::ConfigError(format!("Logging already initialised: {e}")))?;

    tracing::info!(app = %config.app_name, level = %config.log_level, "Logging initialised");
    Ok(())
}

fn build_layer(config: &LoggingConfig) -> Box<dyn Layer<Registry> + Send + Sync> {
    if config.json_format {
        Box::new(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_target(config.show_target)
                .with_current_span(true),
        )
    } else {
        Box::new(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_target(config.show_target),
        )
    }
}
