//! Concrete STT/TTS provider implementations wired into `AppState`.
//!
//! These satisfy the trait seams the pipeline crate defines
//! (`SttProvider`/`SttConnection`/`OfflineRecognizer`, `TtsProvider`) against
//! plain HTTP/WebSocket transports, so the pipeline itself never depends on
//! a vendor SDK.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use voice_agent_pipeline::{
    OfflineRecognizer, PipelineError, SttConfig, SttConnection, SttProvider, TranscriptCallback,
    TtsProvider,
};

/// Streaming STT over a WebSocket, speaking the interim/final transcript
/// shape common to streaming recognizer APIs (nested `channel.alternatives`
/// plus a top-level `is_final`).
pub struct WebSocketSttProvider {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl WebSocketSttProvider {
    pub fn new(endpoint: String, api_key: String) -> Self {
        Self {
            client: Client::new(),
            endpoint,
            api_key,
        }
    }

    fn connect_url(&self, config: &SttConfig) -> String {
        format!(
            "{}?encoding={}&sample_rate={}&channels={}&model={}&language={}&smart_format={}&interim_results={}&endpointing={}",
            self.endpoint.trim_end_matches('/'),
            config.encoding,
            config.sample_rate_hz,
            config.channels,
            config.model,
            config.language,
            config.smart_format,
            config.interim_results,
            config.endpointing_ms,
        )
    }
}

#[async_trait]
impl SttProvider for WebSocketSttProvider {
    async fn connect(
        &self,
        config: &SttConfig,
        callback: TranscriptCallback,
    ) -> Result<Box<dyn SttConnection>, PipelineError> {
        let mut request = self
            .connect_url(config)
            .into_client_request()
            .map_err(|e| PipelineError::Stt(format!("invalid stt endpoint: {e}")))?;
        request.headers_mut().insert(
            "Authorization",
            format!("Bearer {}", self.api_key)
                .parse()
                .map_err(|e| PipelineError::Stt(format!("invalid api key header: {e}")))?,
        );

        let (stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| PipelineError::Stt(format!("stt connect failed: {e}")))?;

        let (mut sink, mut source) = stream.split();
        let (close_tx, mut close_rx) = mpsc::channel::<()>(1);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = close_rx.recv() => break,
                    msg = source.next() => {
                        match msg {
                            Some(Ok(WsMessage::Text(text))) => {
                                if let Ok(parsed) = serde_json::from_str::<TranscriptEvent>(&text) {
                                    if let Some(alt) = parsed.channel.alternatives.first() {
                                        if !alt.transcript.is_empty() {
                                            callback(alt.transcript.clone(), parsed.is_final);
                                        }
                                    }
                                }
                            }
                            Some(Ok(WsMessage::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                tracing::warn!("stt socket read error: {e}");
                                break;
                            }
                        }
                    }
                }
            }
        });

        let _ = sink.send(WsMessage::Text(
            serde_json::to_string(&KeepAlive { keep_alive: true }).unwrap_or_default(),
        ));

        Ok(Box::new(WebSocketSttConnection {
            sink: Some(sink),
            close_tx,
        }))
    }
}

struct WebSocketSttConnection {
    sink: Option<futures::stream::SplitSink<
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
        WsMessage,
    >>,
    close_tx: mpsc::Sender<()>,
}

#[async_trait]
impl SttConnection for WebSocketSttConnection {
    async fn send_audio(&mut self, chunk: &[u8]) -> Result<(), PipelineError> {
        let Some(sink) = self.sink.as_mut() else {
            return Err(PipelineError::Stt("connection already closed".to_string()));
        };
        sink.send(WsMessage::Binary(chunk.to_vec()))
            .await
            .map_err(|e| PipelineError::Stt(format!("stt send failed: {e}")))
    }

    async fn stop(&mut self) -> Result<(), PipelineError> {
        if let Some(mut sink) = self.sink.take() {
            let _ = sink.send(WsMessage::Close(None)).await;
        }
        let _ = self.close_tx.send(()).await;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct KeepAlive {
    #[serde(rename = "type")]
    keep_alive: bool,
}

#[derive(Debug, Deserialize)]
struct TranscriptEvent {
    channel: TranscriptChannel,
    #[serde(default)]
    is_final: bool,
}

#[derive(Debug, Deserialize)]
struct TranscriptChannel {
    #[serde(default)]
    alternatives: Vec<TranscriptAlternative>,
}

#[derive(Debug, Deserialize)]
struct TranscriptAlternative {
    #[serde(default)]
    transcript: String,
}

/// Batch recognition used only once the streaming connection is
/// unreachable after retries; posts the buffered clip in one request.
pub struct HttpOfflineRecognizer {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl HttpOfflineRecognizer {
    pub fn new(endpoint: String, api_key: String) -> Self {
        Self {
            client: Client::new(),
            endpoint,
            api_key,
        }
    }
}

#[async_trait]
impl OfflineRecognizer for HttpOfflineRecognizer {
    async fn recognize(&self, pcm: &[u8]) -> Result<String, PipelineError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header("Content-Type", "audio/raw")
            .timeout(Duration::from_secs(10))
            .body(pcm.to_vec())
            .send()
            .await
            .map_err(|e| PipelineError::Stt(format!("offline recognize request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(PipelineError::Stt(format!(
                "offline recognize HTTP {}",
                response.status()
            )));
        }

        let parsed: OfflineTranscript = response
            .json()
            .await
            .map_err(|e| PipelineError::Stt(format!("offline recognize response parse failed: {e}")))?;

        Ok(parsed.transcript)
    }
}

#[derive(Debug, Deserialize)]
struct OfflineTranscript {
    #[serde(default)]
    transcript: String,
}

/// Speech synthesis over a plain HTTP endpoint that streams raw PCM bytes
/// for a single request body.
pub struct HttpTtsProvider {
    client: Client,
    endpoint: String,
    api_key: String,
    voice: String,
}

impl HttpTtsProvider {
    pub fn new(endpoint: String, api_key: String, voice: String) -> Self {
        Self {
            client: Client::new(),
            endpoint,
            api_key,
            voice,
        }
    }
}

#[async_trait]
impl TtsProvider for HttpTtsProvider {
    async fn stream_audio(
        &self,
        text: &str,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<Vec<u8>, PipelineError>> + Send>>, PipelineError> {
        let request = SpeakRequest {
            text: text.to_string(),
            voice: self.voice.clone(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(15))
            .json(&request)
            .send()
            .await
            .map_err(|e| PipelineError::Tts(format!("tts request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(PipelineError::Tts(format!("tts HTTP {}", response.status())));
        }

        let byte_stream = response.bytes_stream();
        Ok(Box::pin(byte_stream.map(|chunk| {
            chunk
                .map(|b| b.to_vec())
                .map_err(|e| PipelineError::Tts(format!("tts stream chunk failed: {e}")))
        })))
    }
}

#[derive(Debug, Serialize)]
struct SpeakRequest {
    text: String,
    voice: String,
}
