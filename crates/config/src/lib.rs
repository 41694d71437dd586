//! Configuration management for the voice agent.
//!
//! Loads configuration from, in priority order:
//! 1. Environment variables (`VOICE_AGENT__` prefix, `__` separator)
//! 2. `config/{env}.yaml` (when an environment name is given)
//! 3. `config/default.yaml`

pub mod constants;
pub mod settings;

pub use settings::{
    load_settings, CacheConfig, ObservabilityConfig, ProvidersConfig, RuntimeEnvironment,
    ServerConfig, Settings,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("environment error: {0}")]
    Environment(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
