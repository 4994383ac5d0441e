//! Observability
//!
//! Process-wide `tracing` subscriber setup. Library code only emits events;
//! binaries call `init_tracing` once.

mod config;

pub use config::{LogConfig, DEFAULT_FILTER};

use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
pub enum ObservabilityError {
    #[error("invalid log filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },
    #[error("a global tracing subscriber is already installed")]
    AlreadyInitialized,
}

/// Build the filter for a config
pub fn env_filter(config: &LogConfig) -> Result<EnvFilter, ObservabilityError> {
    EnvFilter::try_new(&config.filter).map_err(|e| ObservabilityError::InvalidFilter {
        filter: config.filter.clone(),
        reason: e.to_string(),
    })
}

/// Install the global subscriber
pub fn init_tracing(config: &LogConfig) -> Result<(), ObservabilityError> {
    let filter = env_filter(config)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_target);

    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|_| ObservabilityError::AlreadyInitialized)
}
