//! Conversation Orchestrator: the per-connection turn state machine that
//! ties VAD, STT, the LLM router, TTS, and the outbound socket together.
//!
//! Transport (the actual WebSocket) is owned by the caller. This module
//! only knows about an inbound event stream and an outbound sink, so it
//! can be driven by any socket implementation.

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio::sync::Mutex;

use voice_agent_core::{process_audio_chunk, VadDecision, VadGate};
use voice_agent_llm::{LlmRouter, Message, ResponseMode};

use crate::metrics::MetricsTracker;
use crate::segmenter::{clean_for_speech, SentenceSegmenter};
use crate::stt::SttAdapter;
use crate::tts::TtsAdapter;
use crate::validation::{sanitize_system_prompt, sanitize_transcript};
use crate::PipelineError;

const BARGE_IN_HOLD: Duration = Duration::from_millis(50);
const TURN_START_INTERRUPT_GAP: Duration = Duration::from_millis(100);
const AUTO_TITLE_MAX_CHARS: usize = 50;

#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "type")]
pub enum OutboundFrame {
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "system_log")]
    SystemLog { text: String },
    #[serde(rename = "error")]
    Error { text: String },
    #[serde(rename = "status")]
    Status { text: String },
    #[serde(rename = "session_reset")]
    SessionReset { session_id: String, text: String },
    #[serde(rename = "transcript_interim")]
    TranscriptInterim { text: String },
    #[serde(rename = "transcript")]
    Transcript { text: String, is_user: bool },
    #[serde(rename = "assistant_transcript_start")]
    AssistantTranscriptStart { is_user: bool },
    #[serde(rename = "transcript_chunk")]
    TranscriptChunk { text: String },
    #[serde(rename = "assistant_transcript")]
    AssistantTranscript { text: String, is_user: bool },
    #[serde(rename = "metrics")]
    Metrics { data: crate::metrics::TurnMetrics },
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "type")]
pub enum InboundControl {
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "barge-in")]
    BargeIn,
    #[serde(rename = "speech_end")]
    SpeechEnd,
    #[serde(rename = "update_context")]
    UpdateContext { text: String },
    #[serde(rename = "set_response_mode")]
    SetResponseMode { mode: String },
    #[serde(rename = "text_input")]
    TextInput { text: String },
    #[serde(other)]
    Unknown,
}

/// One inbound item the orchestrator can react to. The caller is
/// responsible for demultiplexing the socket's binary/text frames and the
/// STT adapter's transcript callback into this single stream.
pub enum InboundEvent {
    Binary(Vec<u8>),
    Control(InboundControl),
    Transcript { text: String, is_final: bool },
}

/// Outbound message: either a JSON control/status frame or raw PCM.
pub enum OutboundMessage {
    Frame(OutboundFrame),
    Pcm(Vec<u8>),
}

#[async_trait]
pub trait OutboundSink: Send + Sync {
    async fn send(&self, message: OutboundMessage) -> Result<(), PipelineError>;
}

/// Cross-turn persistence the orchestrator delegates to (the server's
/// session store). Called synchronously from the turn task; implementors
/// should be cheap (in-memory) or internally async-friendly.
pub trait TurnPersistence: Send + Sync {
    fn append_user_message(&self, session_id: &str, text: &str);
    fn append_assistant_message(&self, session_id: &str, text: &str);
    fn message_count(&self, session_id: &str) -> usize;
    fn set_auto_title(&self, session_id: &str, title: &str);
}

pub struct ConversationOrchestrator {
    session_id: String,
    stt: Arc<SttAdapter>,
    llm: Arc<LlmRouter>,
    tts: Arc<TtsAdapter>,
    sink: Arc<dyn OutboundSink>,
    persistence: Arc<dyn TurnPersistence>,
    generation_counter: Arc<AtomicU64>,
    interrupt_signal: Arc<AtomicBool>,
    history: Arc<Mutex<Vec<Message>>>,
    system_prompt: Arc<Mutex<String>>,
    connection_metrics: Arc<Mutex<MetricsTracker>>,
    stt_started_at: Arc<Mutex<Option<Instant>>>,
}

impl ConversationOrchestrator {
    pub fn new(
        session_id: String,
        stt: Arc<SttAdapter>,
        llm: Arc<LlmRouter>,
        tts: Arc<TtsAdapter>,
        sink: Arc<dyn OutboundSink>,
        persistence: Arc<dyn TurnPersistence>,
        system_prompt: String,
    ) -> Self {
        Self {
            session_id,
            stt,
            llm,
            tts,
            sink,
            persistence,
            generation_counter: Arc::new(AtomicU64::new(0)),
            interrupt_signal: Arc::new(AtomicBool::new(false)),
            history: Arc::new(Mutex::new(Vec::new())),
            system_prompt: Arc::new(Mutex::new(system_prompt)),
            connection_metrics: Arc::new(Mutex::new(MetricsTracker::new())),
            stt_started_at: Arc::new(Mutex::new(None)),
        }
    }

    async fn send_frame(&self, frame: OutboundFrame) {
        if let Err(e) = self.sink.send(OutboundMessage::Frame(frame)).await {
            tracing::warn!("failed to send outbound frame: {e}");
            metrics::counter!("errors_total", "kind" => "outbound_frame").increment(1);
        }
    }

    /// Runs until `inbound` ends (the socket closed). Performs the startup
    /// handshake, then dispatches every inbound event.
    pub async fn run(&self, mut inbound: Pin<Box<dyn Stream<Item = InboundEvent> + Send>>) {
        self.send_frame(OutboundFrame::SystemLog { text: "Connection secure".to_string() }).await;
        self.send_frame(OutboundFrame::SystemLog { text: "Buffer synchronized".to_string() }).await;
        self.send_frame(OutboundFrame::SystemLog { text: "Neural weights loaded".to_string() }).await;

        self.stt.start().await;
        self.send_frame(OutboundFrame::SystemLog { text: "Engine ready".to_string() }).await;

        let mut vad = VadGate::new();
        let mut was_speech = false;

        while let Some(event) = inbound.next().await {
            match event {
                InboundEvent::Binary(bytes) => {
                    let decision = vad.classify(&bytes);
                    let is_speech = matches!(decision, VadDecision::Speech);
                    if is_speech && !was_speech {
                        *self.stt_started_at.lock().await = Some(Instant::now());
                    }
                    was_speech = is_speech;

                    let processed = process_audio_chunk(&bytes);
                    self.stt.send_audio(&processed).await;
                }
                InboundEvent::Control(ctrl) => self.handle_control(ctrl).await,
                InboundEvent::Transcript { text, is_final } => {
                    self.handle_transcript(text, is_final).await;
                }
            }
        }

        self.stt.stop().await;
    }

    async fn handle_control(&self, ctrl: InboundControl) {
        match ctrl {
            InboundControl::Ping => self.send_frame(OutboundFrame::Pong).await,
            InboundControl::BargeIn => {
                self.interrupt_signal.store(true, Ordering::SeqCst);
                tokio::time::sleep(BARGE_IN_HOLD).await;
                self.interrupt_signal.store(false, Ordering::SeqCst);
            }
            InboundControl::SpeechEnd => {}
            InboundControl::UpdateContext { text } => {
                let sanitized = sanitize_system_prompt(&text);
                *self.system_prompt.lock().await = sanitized;
            }
            InboundControl::SetResponseMode { mode } => {
                if let Some(parsed) = ResponseMode::parse(&mode) {
                    self.llm.set_mode(parsed);
                    let snapshot = {
                        let mut metrics = self.connection_metrics.lock().await;
                        metrics.set_model(self.llm.mode_model_name());
                        metrics.get_all()
                    };
                    self.send_frame(OutboundFrame::Metrics { data: snapshot }).await;
                    self.send_frame(OutboundFrame::Status { text: format!("Response mode set to {mode}") }).await;
                } else {
                    self.send_frame(OutboundFrame::Error { text: "Invalid response mode".to_string() }).await;
                }
            }
            InboundControl::TextInput { text } => {
                let sanitized = sanitize_transcript(&text);
                self.handle_transcript(sanitized, true).await;
            }
            InboundControl::Unknown => {}
        }
    }

    async fn handle_transcript(&self, text: String, is_final: bool) {
        if !is_final {
            self.send_frame(OutboundFrame::TranscriptInterim { text }).await;
            return;
        }

        let sanitized = sanitize_transcript(&text);
        if sanitized.is_empty() {
            return;
        }

        let gen_id = self.generation_counter.fetch_add(1, Ordering::SeqCst) + 1;

        self.interrupt_signal.store(true, Ordering::SeqCst);
        tokio::time::sleep(TURN_START_INTERRUPT_GAP).await;
        self.interrupt_signal.store(false, Ordering::SeqCst);

        let turn = Turn {
            gen_id,
            generation_counter: self.generation_counter.clone(),
            interrupt_signal: self.interrupt_signal.clone(),
            session_id: self.session_id.clone(),
            stt_started_at: self.stt_started_at.clone(),
            llm: self.llm.clone(),
            tts: self.tts.clone(),
            sink: self.sink.clone(),
            persistence: self.persistence.clone(),
            history: self.history.clone(),
            system_prompt: self.system_prompt.clone(),
        };

        tokio::spawn(turn.run(sanitized));
    }
}

struct Turn {
    gen_id: u64,
    generation_counter: Arc<AtomicU64>,
    interrupt_signal: Arc<AtomicBool>,
    session_id: String,
    stt_started_at: Arc<Mutex<Option<Instant>>>,
    llm: Arc<LlmRouter>,
    tts: Arc<TtsAdapter>,
    sink: Arc<dyn OutboundSink>,
    persistence: Arc<dyn TurnPersistence>,
    history: Arc<Mutex<Vec<Message>>>,
    system_prompt: Arc<Mutex<String>>,
}

impl Turn {
    fn is_stale(&self) -> bool {
        self.interrupt_signal.load(Ordering::SeqCst)
            || self.generation_counter.load(Ordering::SeqCst) != self.gen_id
    }

    async fn send(&self, frame: OutboundFrame) -> bool {
        if self.is_stale() {
            return false;
        }
        if let Err(e) = self.sink.send(OutboundMessage::Frame(frame)).await {
            tracing::warn!("turn {} failed to send frame: {e}", self.gen_id);
            metrics::counter!("errors_total", "kind" => "outbound_frame").increment(1);
        }
        true
    }

    async fn send_pcm(&self, bytes: Vec<u8>) -> bool {
        if self.is_stale() {
            return false;
        }
        if let Err(e) = self.sink.send(OutboundMessage::Pcm(bytes)).await {
            tracing::warn!("turn {} failed to send pcm: {e}", self.gen_id);
            metrics::counter!("errors_total", "kind" => "outbound_pcm").increment(1);
        }
        true
    }

    async fn run(self, user_text: String) {
        let mut metrics = MetricsTracker::new();

        if let Some(started_at) = self.stt_started_at.lock().await.take() {
            let elapsed = started_at.elapsed();
            metrics.stop_with_elapsed("stt_latency", elapsed);
            metrics::histogram!("stt_latency_ms").record(elapsed.as_millis() as f64);
        }
        metrics.start("llm_generation");
        metrics.start("tts_latency");
        metrics.start("total_turnaround");

        self.persistence.append_user_message(&self.session_id, &user_text);

        let history_snapshot = self.history.lock().await.clone();
        {
            let mut history = self.history.lock().await;
            history.push(Message::user(user_text.clone()));
        }

        if !self.send(OutboundFrame::Transcript { text: user_text.clone(), is_user: true }).await {
            return;
        }
        if !self.send(OutboundFrame::AssistantTranscriptStart { is_user: false }).await {
            return;
        }

        let system_prompt = self.system_prompt.lock().await.clone();
        let search_latency: Arc<Mutex<Option<Duration>>> = Arc::new(Mutex::new(None));
        let mut llm_stream =
            self.llm
                .stream(user_text.clone(), history_snapshot, system_prompt, search_latency.clone());

        let mut segmenter = SentenceSegmenter::new();
        let mut processed_sentences: HashSet<String> = HashSet::new();
        let mut partial_assistant_text = String::new();
        let mut tts_started = false;
        let mut aborted = false;

        while let Some(piece) = llm_stream.next().await {
            if self.is_stale() {
                aborted = true;
                break;
            }

            if let Some(status) = piece.strip_prefix("[STATUS: ").and_then(|s| s.strip_suffix(']')) {
                if !self.send(OutboundFrame::Status { text: status.to_string() }).await {
                    aborted = true;
                    break;
                }
                continue;
            }

            metrics.add_tokens(1);
            partial_assistant_text.push_str(&piece);
            if !self.send(OutboundFrame::TranscriptChunk { text: piece.clone() }).await {
                aborted = true;
                break;
            }

            for sentence in segmenter.add_chunk(&piece) {
                if !self
                    .emit_sentence(&sentence, false, &mut processed_sentences, &mut tts_started, &mut metrics)
                    .await
                {
                    aborted = true;
                    break;
                }
            }
            if aborted {
                break;
            }
        }

        if !aborted {
            if let Some(residual) = segmenter.flush() {
                if !self
                    .emit_sentence(&residual, true, &mut processed_sentences, &mut tts_started, &mut metrics)
                    .await
                {
                    aborted = true;
                }
            }
        }

        if aborted || self.is_stale() {
            return;
        }

        if !self
            .send(OutboundFrame::AssistantTranscript { text: partial_assistant_text.clone(), is_user: false })
            .await
        {
            return;
        }

        self.persistence.append_assistant_message(&self.session_id, &partial_assistant_text);
        self.history.lock().await.push(Message::assistant(partial_assistant_text));

        if self.persistence.message_count(&self.session_id) == 2 {
            let title = auto_title(&user_text);
            self.persistence.set_auto_title(&self.session_id, &title);
        }

        metrics.stop("llm_generation");
        metrics.stop("total_turnaround");
        metrics.set_model(self.llm.mode_model_name());
        if let Some(ms) = metrics.duration_ms("llm_generation") {
            metrics::histogram!("llm_latency_ms").record(ms as f64);
        }
        if let Some(elapsed) = *search_latency.lock().await {
            metrics.stop_with_elapsed("search_latency", elapsed);
        }

        self.send(OutboundFrame::Metrics { data: metrics.get_all() }).await;
    }

    async fn emit_sentence(
        &self,
        sentence: &str,
        flush_path: bool,
        processed: &mut HashSet<String>,
        tts_started: &mut bool,
        metrics: &mut MetricsTracker,
    ) -> bool {
        let Some(cleaned) = clean_for_speech(sentence, flush_path) else {
            return true;
        };
        if !processed.insert(cleaned.clone()) {
            return true;
        }

        let mut pcm_stream = self.tts.stream_audio(cleaned);
        while let Some(chunk) = pcm_stream.next().await {
            if self.is_stale() {
                return false;
            }
            if !*tts_started {
                metrics.stop("tts_latency");
                if let Some(ms) = metrics.duration_ms("tts_latency") {
                    metrics::histogram!("tts_latency_ms").record(ms as f64);
                }
                *tts_started = true;
            }
            if !self.send_pcm(chunk).await {
                return false;
            }
        }
        true
    }
}

fn auto_title(first_user_message: &str) -> String {
    if first_user_message.chars().count() > AUTO_TITLE_MAX_CHARS {
        let truncated: String = first_user_message.chars().take(AUTO_TITLE_MAX_CHARS).collect();
        format!("{truncated}…")
    } else {
        first_user_message.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_title_truncates_long_input() {
        let long = "a".repeat(80);
        let title = auto_title(&long);
        assert!(title.ends_with('…'));
        assert_eq!(title.chars().count(), AUTO_TITLE_MAX_CHARS + 1);
    }

    #[test]
    fn auto_title_keeps_short_input() {
        assert_eq!(auto_title("hello"), "hello");
    }
}
