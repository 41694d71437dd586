//! Application State
//!
//! Shared state across all handlers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use voice_agent_config::{load_settings, Settings};
use voice_agent_llm::{
    ChatBackendConfig, ContentCache, FallbackChatBackend, HttpSearchProvider, LlmRouter,
    PrimaryChatBackend,
};
use voice_agent_pipeline::{SttAdapter, SttConfig, TtsAdapter};

use crate::providers::{HttpOfflineRecognizer, HttpTtsProvider, WebSocketSttProvider};
use crate::session::{InMemorySessionStore, SessionStore};
use crate::ServerError;

/// One entry per connected device, used to evict a superseded connection
/// (single-connection-per-device invariant).
pub type DeviceConnections = Arc<RwLock<HashMap<String, tokio::sync::mpsc::Sender<()>>>>;

/// Application state shared by every HTTP/WebSocket handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RwLock<Settings>>,
    pub sessions: Arc<dyn SessionStore>,
    pub llm_router: Arc<LlmRouter>,
    pub stt_provider: Arc<WebSocketSttProvider>,
    pub offline_recognizer: Arc<HttpOfflineRecognizer>,
    pub tts_primary: Arc<HttpTtsProvider>,
    pub tts_fallback: Option<Arc<HttpTtsProvider>>,
    pub active_connections_by_device: DeviceConnections,
    /// Base URL of the primary LLM backend, probed by `/ready`.
    pub llm_primary_endpoint: String,
    env: Option<String>,
}

impl AppState {
    pub fn new(config: Settings) -> Self {
        Self::with_env(config, None)
    }

    pub fn with_env(config: Settings, env: Option<String>) -> Self {
        let providers = config.providers.clone();

        let llm_primary_endpoint = "https://api.openai.com/v1".to_string();

        // `model`/`max_tokens` here are just the pre-connect defaults; the
        // router overrides both per call with the active response mode's
        // `ModeConfig` (see `LlmRouter::stream`).
        let primary_backend = Arc::new(
            PrimaryChatBackend::new(ChatBackendConfig {
                model: "llama-3.1-8b-instant".to_string(),
                endpoint: llm_primary_endpoint.clone(),
                api_key: providers.llm_api_key.clone().unwrap_or_default(),
                ..ChatBackendConfig::default()
            })
            .expect("primary chat backend client builds"),
        );

        let fallback_backend = providers.llm_fallback_api_key.as_ref().map(|key| {
            Arc::new(
                FallbackChatBackend::new(ChatBackendConfig {
                    model: "gemini-1.5-flash".to_string(),
                    endpoint: "https://generativelanguage.googleapis.com".to_string(),
                    api_key: key.clone(),
                    ..ChatBackendConfig::default()
                })
                .expect("fallback chat backend client builds"),
            ) as Arc<dyn voice_agent_llm::ChatBackend>
        });

        let search_provider = providers
            .search_api_key
            .as_ref()
            .map(|key| Arc::new(HttpSearchProvider::new(key.clone())) as Arc<dyn voice_agent_llm::SearchProvider>);

        let cache = Arc::new(ContentCache::new(Duration::from_secs(config.cache.ttl_seconds)));

        let llm_router = Arc::new(LlmRouter::new(
            primary_backend,
            fallback_backend,
            search_provider,
            cache,
        ));

        let stt_provider = Arc::new(WebSocketSttProvider::new(
            "wss://stt.example.invalid/v1/listen".to_string(),
            providers.stt_api_key.clone().unwrap_or_default(),
        ));
        let offline_recognizer = Arc::new(HttpOfflineRecognizer::new(
            "https://stt.example.invalid/v1/recognize".to_string(),
            providers.stt_api_key.clone().unwrap_or_default(),
        ));

        let tts_primary = Arc::new(HttpTtsProvider::new(
            "https://tts.example.invalid/v1/speak".to_string(),
            providers.tts_api_key.clone().unwrap_or_default(),
            "default".to_string(),
        ));
        let tts_fallback = providers.tts_fallback_api_key.as_ref().map(|key| {
            Arc::new(HttpTtsProvider::new(
                "https://tts-fallback.example.invalid/v1/speak".to_string(),
                key.clone(),
                "default".to_string(),
            ))
        });

        Self {
            config: Arc::new(RwLock::new(config)),
            sessions: Arc::new(InMemorySessionStore::new()),
            llm_router,
            stt_provider,
            offline_recognizer,
            tts_primary,
            tts_fallback,
            active_connections_by_device: Arc::new(RwLock::new(HashMap::new())),
            llm_primary_endpoint,
            env,
        }
    }

    pub fn with_session_store(config: Settings, store: Arc<dyn SessionStore>) -> Self {
        let mut state = Self::with_env(config, None);
        state.sessions = store;
        state
    }

    /// Builds a fresh [`SttAdapter`] for one connection, wired to this
    /// state's streaming provider, offline fallback, and transcript
    /// callback.
    pub fn build_stt_adapter(&self, callback: voice_agent_pipeline::TranscriptCallback) -> SttAdapter {
        SttAdapter::new(
            self.stt_provider.clone(),
            Some(self.offline_recognizer.clone()),
            SttConfig::default(),
            callback,
        )
    }

    /// Builds a fresh [`TtsAdapter`] for one connection.
    pub fn build_tts_adapter(&self) -> TtsAdapter {
        TtsAdapter::new(
            self.tts_primary.clone(),
            self.tts_fallback
                .clone()
                .map(|p| p as Arc<dyn voice_agent_pipeline::TtsProvider>),
        )
    }

    /// Reloads configuration from disk.
    pub fn reload_config(&self) -> Result<(), ServerError> {
        let new_config =
            load_settings(self.env.as_deref()).map_err(|e| ServerError::Internal(e.to_string()))?;
        *self.config.write() = new_config;
        tracing::info!("configuration reloaded successfully");
        Ok(())
    }

    pub fn get_config(&self) -> parking_lot::RwLockReadGuard<'_, Settings> {
        self.config.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_state_builds_without_credentials() {
        let state = AppState::new(Settings::default());
        assert!(state.sessions.list().is_empty());
    }
}
