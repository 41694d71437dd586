//! Main settings module.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::constants::cache;
use crate::ConfigError;

/// Runtime environment: governs how strictly [`Settings::validate`] enforces
/// required fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    #[default]
    Development,
    Staging,
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    pub fn is_strict(&self) -> bool {
        matches!(self, Self::Production | Self::Staging)
    }
}

/// Main application settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub providers: ProvidersConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_server()?;
        self.validate_providers()?;
        Ok(())
    }

    fn validate_server(&self) -> Result<(), ConfigError> {
        let server = &self.server;

        if server.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.port".to_string(),
                message: "port cannot be 0".to_string(),
            });
        }

        if server.max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.max_connections".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if server.timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.timeout_seconds".to_string(),
                message: "must be at least 1 second".to_string(),
            });
        }

        if self.environment.is_production() && server.cors_enabled && server.cors_origins.is_empty()
        {
            tracing::warn!(
                "CORS is enabled in production but no origins are configured, \
                 this may block legitimate clients"
            );
        }

        Ok(())
    }

    /// In production/staging, missing provider credentials are fatal. In
    /// development they're a warning — lets the server boot for local
    /// iteration against a subset of providers.
    fn validate_providers(&self) -> Result<(), ConfigError> {
        let required = [
            ("providers.stt_api_key", &self.providers.stt_api_key),
            ("providers.llm_api_key", &self.providers.llm_api_key),
            ("providers.tts_api_key", &self.providers.tts_api_key),
        ];

        let mut missing = Vec::new();
        for (field, value) in required {
            if value.is_none() {
                if self.environment.is_strict() {
                    missing.push(field.to_string());
                } else {
                    tracing::warn!("{field} is not configured");
                }
            }
        }

        if !missing.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "providers".to_string(),
                message: format!("missing required credentials: {}", missing.join(", ")),
            });
        }

        Ok(())
    }
}

/// HTTP/WebSocket server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_ws_path")]
    pub ws_path: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_ws_path() -> String {
    "/ws/chat".to_string()
}
fn default_max_connections() -> usize {
    1000
}
fn default_timeout() -> u64 {
    30
}
fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            ws_path: default_ws_path(),
            max_connections: default_max_connections(),
            timeout_seconds: default_timeout(),
            cors_enabled: default_true(),
            cors_origins: Vec::new(),
        }
    }
}

/// External provider credentials and endpoints.
///
/// Field names describe the provider's role in the pipeline rather than a
/// vendor name — swapping providers means changing the backend that reads
/// these, not the settings shape.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    /// Streaming STT provider API key.
    #[serde(default)]
    pub stt_api_key: Option<String>,

    /// Primary streaming LLM provider API key.
    #[serde(default)]
    pub llm_api_key: Option<String>,

    /// Secondary LLM provider API key, used only if the primary fails.
    /// Optional: when absent, failures surface to the caller instead of
    /// falling back.
    #[serde(default)]
    pub llm_fallback_api_key: Option<String>,

    /// Primary streaming TTS provider API key.
    #[serde(default)]
    pub tts_api_key: Option<String>,

    /// Fallback TTS provider API key, used only if the primary fails.
    #[serde(default)]
    pub tts_fallback_api_key: Option<String>,

    /// Web search provider API key, used by the LLM router's pre-search
    /// classification path. Absent means search-augmented responses are
    /// skipped even when the router would otherwise want them.
    #[serde(default)]
    pub search_api_key: Option<String>,
}

/// Content cache configuration for the LLM router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,
}

fn default_cache_ttl() -> u64 {
    cache::TTL_SECONDS
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_cache_ttl(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_json: bool,

    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            metrics_enabled: true,
        }
    }
}

/// Load settings from files and environment.
///
/// Priority (highest to lowest):
/// 1. Environment variables (`VOICE_AGENT__` prefix)
/// 2. `config/{env}.yaml` (if `env` is given)
/// 3. `config/default.yaml`
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("VOICE_AGENT")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 8000);
        assert_eq!(settings.server.ws_path, "/ws/chat");
    }

    #[test]
    fn test_server_validation() {
        let mut settings = Settings::default();

        settings.server.port = 0;
        assert!(settings.validate_server().is_err());
        settings.server.port = 8000;

        settings.server.max_connections = 0;
        assert!(settings.validate_server().is_err());
        settings.server.max_connections = 1000;

        settings.server.timeout_seconds = 0;
        assert!(settings.validate_server().is_err());
        settings.server.timeout_seconds = 30;

        assert!(settings.validate_server().is_ok());
    }

    #[test]
    fn test_development_allows_missing_providers() {
        let settings = Settings::default();
        assert!(settings.validate_providers().is_ok());
    }

    #[test]
    fn test_production_requires_providers() {
        let mut settings = Settings::default();
        settings.environment = RuntimeEnvironment::Production;
        assert!(settings.validate_providers().is_err());

        settings.providers.stt_api_key = Some("key".to_string());
        settings.providers.llm_api_key = Some("key".to_string());
        settings.providers.tts_api_key = Some("key".to_string());
        assert!(settings.validate_providers().is_ok());
    }

    #[test]
    fn test_cache_default_ttl_is_24h() {
        let settings = Settings::default();
        assert_eq!(settings.cache.ttl_seconds, 86_400);
    }
}
