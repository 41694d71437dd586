//! Voice Agent Server
//!
//! Provides WebSocket and HTTP endpoints for the voice agent.

pub mod http;
pub mod metrics;
pub mod providers;
pub mod session;
pub mod state;
pub mod websocket;

pub use http::create_router;
pub use metrics::init_metrics;
pub use session::{InMemorySessionStore, Session, SessionStore};
pub use state::AppState;

use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("session error: {0}")]
    Session(String),

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ServerError> for axum::http::StatusCode {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::Session(_) => axum::http::StatusCode::NOT_FOUND,
            ServerError::WebSocket(_) => axum::http::StatusCode::BAD_REQUEST,
            ServerError::InvalidRequest(_) => axum::http::StatusCode::BAD_REQUEST,
            ServerError::Internal(_) => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<voice_agent_pipeline::PipelineError> for ServerError {
    fn from(err: voice_agent_pipeline::PipelineError) -> Self {
        ServerError::Internal(err.to_string())
    }
}
