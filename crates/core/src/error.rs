//! Workspace-wide error type.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("audio error: {0}")]
    Audio(String),

    #[error("llm error: {0}")]
    Llm(String),

    #[error("stt error: {0}")]
    Stt(String),

    #[error("tts error: {0}")]
    Tts(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}
