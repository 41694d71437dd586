//! Core types shared across the voice agent workspace.
//!
//! This crate provides voice activity detection and signal preprocessing
//! used by the pipeline and server crates, plus the workspace-wide error
//! type.

pub mod error;
pub mod preprocessor;
pub mod vad;

pub use error::{Error, Result};
pub use preprocessor::process_audio_chunk;
pub use vad::{VadDecision, VadGate};
