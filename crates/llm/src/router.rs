//! LLM Router: mode selection, search pre-classification, the
//! planning-mode search race, and primary/fallback provider dispatch.

use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::Stream;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::{mpsc, Mutex};

use crate::backend::{ChatBackend, Message};
use crate::cache::ContentCache;
use crate::search::SearchProvider;

const SEARCH_RACE_BUDGET: Duration = Duration::from_millis(800);
const MAX_SEARCH_CONTEXT_CHARS: usize = 2000;
const NO_RESPONSE_APOLOGY: &str = "I'm sorry, I wasn't able to generate a response right now.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResponseMode {
    Faster = 0,
    Planning = 1,
    Detailed = 2,
}

impl ResponseMode {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ResponseMode::Faster,
            2 => ResponseMode::Detailed,
            _ => ResponseMode::Planning,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "faster" => Some(ResponseMode::Faster),
            "planning" => Some(ResponseMode::Planning),
            "detailed" => Some(ResponseMode::Detailed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModeConfig {
    pub max_tokens: usize,
    pub search_results: usize,
    pub model: &'static str,
}

pub fn mode_config(mode: ResponseMode) -> ModeConfig {
    match mode {
        ResponseMode::Faster => ModeConfig {
            max_tokens: 150,
            search_results: 0,
            model: "llama-3.1-8b-instant",
        },
        ResponseMode::Planning => ModeConfig {
            max_tokens: 250,
            search_results: 2,
            model: "llama-3.3-70b-versatile",
        },
        ResponseMode::Detailed => ModeConfig {
            max_tokens: 250,
            search_results: 2,
            model: "llama-3.3-70b-versatile",
        },
    }
}

const SEARCH_KEYWORDS: &[&str] = &[
    "weather", "temperature", "forecast", "rain", "snow", "sunny", "cloudy", "today", "yesterday",
    "tonight", "tomorrow", "latest", "recent", "current", "now", "news", "happened", "breaking",
    "update", "announcement", "score", "game", "match", "won", "lost", "championship",
    "tournament", "price", "stock", "market", "trading", "crypto", "bitcoin", "ethereum",
];

const SEARCH_PHRASES: &[&str] = &[
    "who is",
    "what is happening",
    "tell me about recent",
    "this week",
];

static SEARCH_REGEXES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"what.*happening",
        r"who.*won",
        r"what.*score",
        r"how.*weather",
        r"what.*price",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static pattern is valid"))
    .collect()
});

pub fn needs_web_search(user_input: &str) -> bool {
    let lower = user_input.to_lowercase();

    let words: std::collections::HashSet<&str> = lower.split_whitespace().collect();
    if SEARCH_KEYWORDS.iter().any(|k| words.contains(k)) {
        return true;
    }

    if SEARCH_PHRASES.iter().any(|p| lower.contains(p)) {
        return true;
    }

    SEARCH_REGEXES.iter().any(|re| re.is_match(&lower))
}

/// Drives a single-backend stream into an mpsc channel, returning whatever
/// the backend ultimately produced (or its error).
async fn drive_backend(
    backend: Arc<dyn ChatBackend>,
    messages: Vec<Message>,
    model: &'static str,
    max_tokens: usize,
    tx: mpsc::Sender<String>,
) -> Result<String, crate::LlmError> {
    backend.generate_stream(&messages, model, max_tokens, tx).await
}

pub struct LlmRouter {
    primary: Arc<dyn ChatBackend>,
    fallback: Option<Arc<dyn ChatBackend>>,
    search: Option<Arc<dyn SearchProvider>>,
    cache: Arc<ContentCache>,
    mode: AtomicU8,
}

impl LlmRouter {
    pub fn new(
        primary: Arc<dyn ChatBackend>,
        fallback: Option<Arc<dyn ChatBackend>>,
        search: Option<Arc<dyn SearchProvider>>,
        cache: Arc<ContentCache>,
    ) -> Self {
        Self {
            primary,
            fallback,
            search,
            cache,
            mode: AtomicU8::new(ResponseMode::Planning as u8),
        }
    }

    pub fn mode(&self) -> ResponseMode {
        ResponseMode::from_u8(self.mode.load(Ordering::Relaxed))
    }

    pub fn set_mode(&self, mode: ResponseMode) {
        self.mode.store(mode as u8, Ordering::Relaxed);
    }

    /// Name of the model the current mode would dispatch to, for metrics.
    pub fn mode_model_name(&self) -> &'static str {
        mode_config(self.mode()).model
    }

    /// Streams the assistant's reply to `user_input`, given prior turns and
    /// the current system prompt. Strings beginning with `[STATUS: ` and
    /// ending with `]` are status sentinels, not response text.
    ///
    /// If a web search is attempted (planning or detailed mode, query
    /// classified as needing one), its wall-clock duration is written to
    /// `search_latency` regardless of whether it found anything. In
    /// planning mode the search runs concurrently with the LLM call: the
    /// backend starts generating immediately, and results are spliced in
    /// only if they land before the first token is yielded.
    pub fn stream(
        &self,
        user_input: String,
        history: Vec<Message>,
        system_prompt: String,
        search_latency: Arc<Mutex<Option<Duration>>>,
    ) -> Pin<Box<dyn Stream<Item = String> + Send>> {
        let primary = self.primary.clone();
        let fallback = self.fallback.clone();
        let search = self.search.clone();
        let cache = self.cache.clone();
        let mode = self.mode();

        Box::pin(async_stream::stream! {
            if user_input.trim().is_empty() {
                yield NO_RESPONSE_APOLOGY.to_string();
                return;
            }

            let history_empty = history.is_empty();
            if history_empty {
                if let Some(cached) = cache.get(&user_input, &system_prompt) {
                    yield cached;
                    return;
                }
            }

            let cfg = mode_config(mode);
            let model = cfg.model;
            let max_tokens = cfg.max_tokens;
            let search_results = cfg.search_results;
            let needs_search = mode != ResponseMode::Faster
                && search.is_some()
                && needs_web_search(&user_input);

            let mut messages = Vec::with_capacity(history.len() + 3);
            messages.push(Message::system(system_prompt.clone()));
            messages.extend(history);
            messages.push(Message::user(user_input.clone()));
            // If a search lands in time, its results are spliced in as a
            // system message right before the user's turn.
            let search_insert_at = messages.len() - 1;

            if needs_search && mode == ResponseMode::Detailed {
                let search = search.clone().expect("checked is_some above");
                let search_started_at = Instant::now();
                let mut context = search.search(&user_input, search_results).await;
                *search_latency.lock().await = Some(search_started_at.elapsed());
                if !context.is_empty() {
                    context.truncate(MAX_SEARCH_CONTEXT_CHARS);
                    messages.insert(search_insert_at, Message::system(format!(
                        "Answer using these search results:\n{context}"
                    )));
                }
            }

            let mut full_response = String::new();
            let mut primary_failed = false;

            let (task, mut rx) = if needs_search && mode == ResponseMode::Planning {
                yield "[STATUS: Searching...]".to_string();

                let search = search.clone().expect("checked is_some above");
                let query = user_input.clone();
                let search_started_at = Instant::now();
                let search_task = tokio::spawn(async move { search.search(&query, search_results).await });
                tokio::pin!(search_task);

                let (tx, mut rx) = mpsc::channel::<String>(64);
                let mut backend_task =
                    tokio::spawn(drive_backend(primary.clone(), messages.clone(), model, max_tokens, tx));

                let sleep = tokio::time::sleep(SEARCH_RACE_BUDGET);
                tokio::pin!(sleep);
                let mut search_settled = false;

                let first_chunk = loop {
                    tokio::select! {
                        chunk = rx.recv() => break chunk,
                        result = &mut search_task, if !search_settled => {
                            search_settled = true;
                            *search_latency.lock().await = Some(search_started_at.elapsed());
                            if let Ok(mut raw) = result {
                                if !raw.is_empty() {
                                    // No token has been read off `rx` yet, so
                                    // it's still safe to restart the backend
                                    // with the results spliced in.
                                    backend_task.abort();
                                    raw.truncate(MAX_SEARCH_CONTEXT_CHARS);
                                    messages.insert(search_insert_at, Message::system(format!(
                                        "Answer using these search results:\n{raw}"
                                    )));
                                    let (tx2, rx2) = mpsc::channel::<String>(64);
                                    rx = rx2;
                                    backend_task = tokio::spawn(drive_backend(
                                        primary.clone(), messages.clone(), model, max_tokens, tx2,
                                    ));
                                }
                            }
                        }
                        _ = &mut sleep, if !search_settled => {
                            search_settled = true;
                            *search_latency.lock().await = Some(search_started_at.elapsed());
                        }
                    }
                };

                if let Some(chunk) = first_chunk {
                    full_response.push_str(&chunk);
                    yield chunk;
                }

                (backend_task, rx)
            } else {
                let (tx, rx) = mpsc::channel::<String>(64);
                let task = tokio::spawn(drive_backend(primary.clone(), messages.clone(), model, max_tokens, tx));
                (task, rx)
            };

            while let Some(chunk) = rx.recv().await {
                full_response.push_str(&chunk);
                yield chunk;
            }

            match task.await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    tracing::warn!("primary LLM backend failed: {e}");
                    primary_failed = true;
                }
                Err(e) => {
                    tracing::warn!("primary LLM backend task panicked: {e}");
                    primary_failed = true;
                }
            }

            if primary_failed && full_response.is_empty() {
                if let Some(fallback) = fallback {
                    let (tx, mut rx) = mpsc::channel::<String>(64);
                    let task = tokio::spawn(drive_backend(fallback, messages, model, max_tokens, tx));
                    while let Some(chunk) = rx.recv().await {
                        full_response.push_str(&chunk);
                        yield chunk;
                    }
                    if task.await.is_err() {
                        tracing::warn!("fallback LLM backend also failed");
                    }
                }
            }

            if full_response.is_empty() {
                metrics::counter!("errors_total", "kind" => "llm").increment(1);
                yield NO_RESPONSE_APOLOGY.to_string();
                return;
            }

            if history_empty {
                cache.set(&user_input, &system_prompt, full_response);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_triggers_search() {
        assert!(needs_web_search("what's the weather today"));
        assert!(needs_web_search("tell me the latest news"));
    }

    #[test]
    fn phrase_triggers_search() {
        assert!(needs_web_search("who is the president of France"));
        assert!(needs_web_search("what happened this week"));
    }

    #[test]
    fn regex_triggers_search() {
        assert!(needs_web_search("what is happening in the market"));
        assert!(needs_web_search("who won the match"));
    }

    #[test]
    fn plain_query_does_not_trigger_search() {
        assert!(!needs_web_search("can you explain how photosynthesis works"));
    }

    #[test]
    fn mode_config_matches_spec() {
        let faster = mode_config(ResponseMode::Faster);
        assert_eq!(faster.max_tokens, 150);
        assert_eq!(faster.search_results, 0);

        let planning = mode_config(ResponseMode::Planning);
        assert_eq!(planning.max_tokens, 250);
        assert_eq!(planning.search_results, 2);

        let detailed = mode_config(ResponseMode::Detailed);
        assert_eq!(detailed.max_tokens, planning.max_tokens);
        assert_eq!(detailed.model, planning.model);
    }

    #[test]
    fn mode_parse_round_trips() {
        assert_eq!(ResponseMode::parse("faster"), Some(ResponseMode::Faster));
        assert_eq!(ResponseMode::parse("planning"), Some(ResponseMode::Planning));
        assert_eq!(ResponseMode::parse("detailed"), Some(ResponseMode::Detailed));
        assert_eq!(ResponseMode::parse("bogus"), None);
    }
}
