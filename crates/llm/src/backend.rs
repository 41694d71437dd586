//! Streaming chat backends.
//!
//! Two backends exist: a primary one the router uses by default, and a
//! fallback used only when the primary errors out for a whole request.
//! Both speak a plain chat-completion shape (system/user/assistant turns
//! in, a token stream out) so the router never has to know which one is
//! actually serving a given turn.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::LlmError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    Cancelled,
    Error,
}

/// A backend's configuration: model, endpoint, credentials, generation
/// parameters, and retry policy.
#[derive(Debug, Clone)]
pub struct ChatBackendConfig {
    pub model: String,
    pub endpoint: String,
    pub api_key: String,
    pub max_tokens: usize,
    pub temperature: f32,
    pub timeout: Duration,
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl Default for ChatBackendConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            endpoint: String::new(),
            api_key: String::new(),
            max_tokens: 250,
            temperature: 0.7,
            timeout: Duration::from_secs(30),
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
        }
    }
}

/// A streaming chat backend. Implementors yield response text on `tx` as
/// it arrives and return the assembled result once the stream ends.
///
/// `model`/`max_tokens` are passed per call rather than fixed at
/// construction so the router's response mode can change what's actually
/// requested without rebuilding the backend.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn generate_stream(
        &self,
        messages: &[Message],
        model: &str,
        max_tokens: usize,
        tx: mpsc::Sender<String>,
    ) -> Result<String, LlmError>;

    fn model_name(&self) -> &str;
}

/// OpenAI-compatible chat-completions backend (SSE streaming), used as the
/// router's primary provider.
pub struct PrimaryChatBackend {
    client: Client,
    config: ChatBackendConfig,
}

impl PrimaryChatBackend {
    pub fn new(config: ChatBackendConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.config.endpoint.trim_end_matches('/'))
    }

    async fn connect(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<reqwest::Response, LlmError> {
        let mut backoff = self.config.initial_backoff;
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tracing::warn!(
                    "primary LLM connect failed, retrying in {:?} (attempt {}/{})",
                    backoff,
                    attempt,
                    self.config.max_retries
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }

            let result = self
                .client
                .post(self.chat_url())
                .bearer_auth(&self.config.api_key)
                .json(request)
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) if resp.status().is_server_error() => {
                    last_error = Some(LlmError::Network(format!("server error {}", resp.status())));
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    return Err(LlmError::Api(format!("HTTP {status}: {body}")));
                }
                Err(e) => last_error = Some(LlmError::from(e)),
            }
        }

        Err(last_error.unwrap_or(LlmError::Network("max retries exceeded".to_string())))
    }
}

#[async_trait]
impl ChatBackend for PrimaryChatBackend {
    async fn generate_stream(
        &self,
        messages: &[Message],
        model: &str,
        max_tokens: usize,
        tx: mpsc::Sender<String>,
    ) -> Result<String, LlmError> {
        let request = ChatCompletionRequest {
            model: model.to_string(),
            messages: messages
                .iter()
                .map(|m| ChatMessage {
                    role: m.role.as_str().to_string(),
                    content: m.content.clone(),
                })
                .collect(),
            max_tokens,
            temperature: self.config.temperature,
            stream: true,
        };

        let response = self.connect(&request).await?;

        use futures::StreamExt;
        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut full_text = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| LlmError::Network(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(line_end) = buffer.find('\n') {
                let line = buffer[..line_end].trim().to_string();
                buffer = buffer[line_end + 1..].to_string();

                if line.is_empty() || line == "data: [DONE]" {
                    continue;
                }

                let Some(json_str) = line.strip_prefix("data: ") else {
                    continue;
                };

                if let Ok(parsed) = serde_json::from_str::<ChatCompletionChunk>(json_str) {
                    if let Some(choice) = parsed.choices.first() {
                        if let Some(content) = choice.delta.content.as_ref() {
                            full_text.push_str(content);
                            if tx.send(content.clone()).await.is_err() {
                                return Ok(full_text);
                            }
                        }
                    }
                }
            }
        }

        Ok(full_text)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

/// A non-streaming chat API wrapped to look streaming, used only when the
/// primary backend fails for an entire request.
pub struct FallbackChatBackend {
    client: Client,
    config: ChatBackendConfig,
}

impl FallbackChatBackend {
    pub fn new(config: ChatBackendConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl ChatBackend for FallbackChatBackend {
    async fn generate_stream(
        &self,
        messages: &[Message],
        // The fallback is not mode-driven: it always speaks through its own
        // fixed model, regardless of what the primary would have used.
        _model: &str,
        _max_tokens: usize,
        tx: mpsc::Sender<String>,
    ) -> Result<String, LlmError> {
        let prompt = messages
            .iter()
            .map(|m| m.content.clone())
            .collect::<Vec<_>>()
            .join("\n\n");

        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.model,
            self.config.api_key
        );

        let request = GenerateContentRequest {
            contents: vec![GenerateContentPart {
                parts: vec![TextPart { text: prompt }],
            }],
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(LlmError::from)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("HTTP {status}: {body}")));
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .unwrap_or_default();

        // Emit in word-sized chunks so callers downstream of the router
        // (sentence segmenter, transcript_chunk frames) see the same shape
        // of traffic regardless of which backend served the turn.
        for word in text.split_inclusive(' ') {
            if tx.send(word.to_string()).await.is_err() {
                break;
            }
        }

        Ok(text)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: usize,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    choices: Vec<ChatCompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChoice {
    delta: ChatCompletionDelta,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionDelta {
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<GenerateContentPart>,
}

#[derive(Debug, Serialize)]
struct GenerateContentPart {
    parts: Vec<TextPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TextPart {
    text: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<GenerateContentCandidate>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentCandidate {
    content: GenerateContentContent,
}

#[derive(Debug, Deserialize)]
struct GenerateContentContent {
    parts: Vec<TextPart>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors_set_role() {
        assert_eq!(Message::system("hi").role, Role::System);
        assert_eq!(Message::user("hi").role, Role::User);
        assert_eq!(Message::assistant("hi").role, Role::Assistant);
    }
}
