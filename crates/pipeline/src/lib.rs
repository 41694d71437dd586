//! Real-time audio/text pipeline: sentence segmentation, STT/TTS adapter
//! traits, input validation, per-turn metrics, and the conversation
//! orchestrator that ties them together.

pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod segmenter;
pub mod stt;
pub mod tts;
pub mod validation;

pub use error::PipelineError;
pub use metrics::{MetricsTracker, TurnMetrics};
pub use orchestrator::{
    ConversationOrchestrator, InboundControl, InboundEvent, OutboundFrame, OutboundMessage,
    OutboundSink, TurnPersistence,
};
pub use segmenter::{clean_for_speech, SentenceSegmenter};
pub use stt::{OfflineRecognizer, SttAdapter, SttConfig, SttConnection, SttProvider, TranscriptCallback};
pub use tts::{TtsAdapter, TtsProvider};
pub use validation::{sanitize_system_prompt, sanitize_transcript, validate_session_id};
