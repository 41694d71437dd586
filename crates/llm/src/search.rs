//! Web search provider for the LLM router's search-augmented path.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::LlmError;

const MAX_RESULT_CHARS: usize = 2000;

#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Returns a context string built from up to `max_results` search
    /// results, truncated to [`MAX_RESULT_CHARS`]. Never propagates
    /// provider errors to the caller — a failed search degrades to an
    /// empty context rather than aborting the turn.
    async fn search(&self, query: &str, max_results: usize) -> String;
}

/// A search provider backed by a Tavily-compatible search API.
pub struct HttpSearchProvider {
    client: Client,
    api_key: String,
    endpoint: String,
}

impl HttpSearchProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            endpoint: "https://api.tavily.com/search".to_string(),
        }
    }
}

#[async_trait]
impl SearchProvider for HttpSearchProvider {
    async fn search(&self, query: &str, max_results: usize) -> String {
        let request = TavilyRequest {
            api_key: self.api_key.clone(),
            query: query.to_string(),
            search_depth: "basic".to_string(),
            max_results,
        };

        let response = match self.client.post(&self.endpoint).json(&request).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("search request failed: {e}");
                return String::new();
            }
        };

        let parsed: Result<TavilyResponse, _> = response.json().await;
        let results = match parsed {
            Ok(r) => r.results,
            Err(e) => {
                tracing::warn!("search response parse failed: {e}");
                return String::new();
            }
        };

        if results.is_empty() {
            return String::new();
        }

        let mut context = String::new();
        for result in results {
            context.push_str(&format!("Source: {}\nContent: {}\n\n", result.url, result.content));
        }
        context.truncate(MAX_RESULT_CHARS);
        context
    }
}

#[derive(Debug, thiserror::Error)]
#[error("search error: {0}")]
pub struct SearchError(pub String);

impl From<SearchError> for LlmError {
    fn from(err: SearchError) -> Self {
        LlmError::Api(err.0)
    }
}

#[derive(Debug, Serialize)]
struct TavilyRequest {
    api_key: String,
    query: String,
    search_depth: String,
    max_results: usize,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    url: String,
    content: String,
}
