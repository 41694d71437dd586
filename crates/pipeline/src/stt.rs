//! Streaming speech-to-text adapter.
//!
//! Wraps a provider-specific streaming connection behind a small trait so
//! the orchestrator never depends on a particular vendor SDK. On repeated
//! connect failures, falls back to batching audio for an offline
//! recognizer rather than losing the turn entirely.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::PipelineError;

const CONNECT_BACKOFFS_MS: [u64; 3] = [1_000, 2_000, 4_000];
const FALLBACK_BUFFER_CHUNKS: usize = 60;

#[derive(Debug, Clone)]
pub struct SttConfig {
    pub encoding: &'static str,
    pub sample_rate_hz: u32,
    pub channels: u8,
    pub model: String,
    pub language: String,
    pub smart_format: bool,
    pub interim_results: bool,
    pub endpointing_ms: u32,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            encoding: "linear16",
            sample_rate_hz: 16_000,
            channels: 1,
            model: "nova-2-general".to_string(),
            language: "en-US".to_string(),
            smart_format: true,
            interim_results: true,
            endpointing_ms: 500,
        }
    }
}

/// Callback invoked with transcript text and whether it is final.
pub type TranscriptCallback = Arc<dyn Fn(String, bool) + Send + Sync>;

/// A live streaming connection to an STT provider.
#[async_trait]
pub trait SttConnection: Send {
    async fn send_audio(&mut self, chunk: &[u8]) -> Result<(), PipelineError>;
    async fn stop(&mut self) -> Result<(), PipelineError>;
}

/// Establishes streaming STT connections for a given config and callback.
#[async_trait]
pub trait SttProvider: Send + Sync {
    async fn connect(
        &self,
        config: &SttConfig,
        callback: TranscriptCallback,
    ) -> Result<Box<dyn SttConnection>, PipelineError>;
}

/// Recognizes a complete, buffered audio clip without streaming. Used only
/// when the primary provider can't be reached at all.
#[async_trait]
pub trait OfflineRecognizer: Send + Sync {
    async fn recognize(&self, pcm: &[u8]) -> Result<String, PipelineError>;
}

enum Mode {
    Streaming(Box<dyn SttConnection>),
    Fallback { buffered: Vec<u8>, chunk_count: usize },
    Stopped,
}

/// Manages a single Turn's worth of speech recognition: connect with
/// backoff, forward audio, and degrade to offline batching if the
/// provider is unreachable.
pub struct SttAdapter {
    provider: Arc<dyn SttProvider>,
    offline: Option<Arc<dyn OfflineRecognizer>>,
    config: SttConfig,
    callback: TranscriptCallback,
    mode: Mutex<Mode>,
}

impl SttAdapter {
    pub fn new(
        provider: Arc<dyn SttProvider>,
        offline: Option<Arc<dyn OfflineRecognizer>>,
        config: SttConfig,
        callback: TranscriptCallback,
    ) -> Self {
        Self {
            provider,
            offline,
            config,
            callback,
            mode: Mutex::new(Mode::Stopped),
        }
    }

    /// Connects with exponential backoff (1s, 2s, 4s). On exhaustion,
    /// switches to fallback buffering rather than erroring the Turn.
    pub async fn start(&self) {
        let mut last_err = None;

        for attempt in 0..=CONNECT_BACKOFFS_MS.len() {
            if attempt > 0 {
                let backoff_ms = CONNECT_BACKOFFS_MS[attempt - 1];
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            }
            match self.provider.connect(&self.config, self.callback.clone()).await {
                Ok(conn) => {
                    *self.mode.lock().await = Mode::Streaming(conn);
                    return;
                }
                Err(e) => {
                    tracing::warn!("stt connect attempt {} failed: {e}", attempt + 1);
                    last_err = Some(e);
                }
            }
        }

        tracing::warn!("stt provider unreachable after retries, falling back: {last_err:?}");
        metrics::counter!("errors_total", "kind" => "stt_connect").increment(1);
        *self.mode.lock().await = Mode::Fallback {
            buffered: Vec::new(),
            chunk_count: 0,
        };
    }

    /// Forwards a PCM chunk. Non-blocking from the caller's perspective:
    /// streaming sends never await past the connection's own write.
    pub async fn send_audio(&self, chunk: &[u8]) {
        let mut mode = self.mode.lock().await;
        match &mut *mode {
            Mode::Streaming(conn) => {
                if let Err(e) = conn.send_audio(chunk).await {
                    tracing::warn!("stt stream write failed: {e}");
                }
            }
            Mode::Fallback { buffered, chunk_count } => {
                buffered.extend_from_slice(chunk);
                *chunk_count += 1;
                if *chunk_count >= FALLBACK_BUFFER_CHUNKS {
                    let pcm = std::mem::take(buffered);
                    *chunk_count = 0;
                    if let Some(offline) = self.offline.clone() {
                        let callback = self.callback.clone();
                        tokio::spawn(async move {
                            match offline.recognize(&pcm).await {
                                Ok(text) if !text.is_empty() => callback(text, true),
                                Ok(_) => {}
                                Err(e) => tracing::warn!("offline recognition failed: {e}"),
                            }
                        });
                    }
                }
            }
            Mode::Stopped => {}
        }
    }

    pub async fn stop(&self) {
        let mut mode = self.mode.lock().await;
        if let Mode::Streaming(conn) = &mut *mode {
            if let Err(e) = conn.stop().await {
                tracing::warn!("stt stop failed: {e}");
            }
        }
        *mode = Mode::Stopped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingProvider;

    #[async_trait]
    impl SttProvider for FailingProvider {
        async fn connect(
            &self,
            _config: &SttConfig,
            _callback: TranscriptCallback,
        ) -> Result<Box<dyn SttConnection>, PipelineError> {
            Err(PipelineError::Stt("unreachable".to_string()))
        }
    }

    struct EchoOffline {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl OfflineRecognizer for EchoOffline {
        async fn recognize(&self, _pcm: &[u8]) -> Result<String, PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("fallback transcript".to_string())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn falls_back_after_exhausting_retries() {
        let calls = Arc::new(AtomicUsize::new(0));
        let received = Arc::new(Mutex::new(None));
        let received_clone = received.clone();

        let adapter = SttAdapter::new(
            Arc::new(FailingProvider),
            Some(Arc::new(EchoOffline { calls: calls.clone() })),
            SttConfig::default(),
            Arc::new(move |text, is_final| {
                let received_clone = received_clone.clone();
                tokio::spawn(async move {
                    *received_clone.lock().await = Some((text, is_final));
                });
            }),
        );

        adapter.start().await;

        for _ in 0..FALLBACK_BUFFER_CHUNKS {
            adapter.send_audio(&[0u8; 960]).await;
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
