//! LLM dispatch: streaming chat backends, the mode/search router, content
//! caching, and web search augmentation.

pub mod backend;
pub mod cache;
pub mod router;
pub mod search;

pub use backend::{
    ChatBackend, ChatBackendConfig, FallbackChatBackend, FinishReason, Message,
    PrimaryChatBackend, Role,
};
pub use cache::ContentCache;
pub use router::{mode_config, needs_web_search, LlmRouter, ModeConfig, ResponseMode};
pub use search::{HttpSearchProvider, SearchProvider};

use thiserror::Error;

/// LLM errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("generation error: {0}")]
    Generation(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("timeout")]
    Timeout,

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<LlmError> for voice_agent_core::Error {
    fn from(err: LlmError) -> Self {
        voice_agent_core::Error::Llm(err.to_string())
    }
}
