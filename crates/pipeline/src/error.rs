//! Pipeline-crate error type.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("stt error: {0}")]
    Stt(String),

    #[error("tts error: {0}")]
    Tts(String),

    #[error("segmenter error: {0}")]
    Segmenter(String),

    #[error("orchestrator error: {0}")]
    Orchestrator(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Llm(#[from] voice_agent_llm::LlmError),

    #[error(transparent)]
    Core(#[from] voice_agent_core::Error),
}
