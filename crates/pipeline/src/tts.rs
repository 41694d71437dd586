//! Streaming text-to-speech adapter: primary provider with a secondary
//! fallback, chunked into blocks the orchestrator can forward as-is.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{Stream, StreamExt};

use crate::PipelineError;

const MIN_BLOCK_BYTES: usize = 16 * 1024;

/// A provider capable of synthesizing speech for a line of text.
#[async_trait]
pub trait TtsProvider: Send + Sync {
    /// Streams raw PCM bytes for `text`. Should error rather than yield
    /// partial output on a provider-side failure so the adapter can
    /// fall through to the secondary provider.
    async fn stream_audio(
        &self,
        text: &str,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<Vec<u8>, PipelineError>> + Send>>, PipelineError>;
}

/// Synthesizes speech via a primary provider, falling back to a secondary
/// on any failure, and re-chunks output into blocks of at least
/// [`MIN_BLOCK_BYTES`] (the final block may be smaller).
pub struct TtsAdapter {
    primary: Arc<dyn TtsProvider>,
    secondary: Option<Arc<dyn TtsProvider>>,
}

impl TtsAdapter {
    pub fn new(primary: Arc<dyn TtsProvider>, secondary: Option<Arc<dyn TtsProvider>>) -> Self {
        Self { primary, secondary }
    }

    /// Streams PCM for `text`. Empty/whitespace input yields nothing;
    /// total provider failure yields nothing (the caller continues
    /// silently rather than aborting the Turn).
    pub fn stream_audio(&self, text: String) -> Pin<Box<dyn Stream<Item = Vec<u8>> + Send>> {
        let primary = self.primary.clone();
        let secondary = self.secondary.clone();

        Box::pin(async_stream::stream! {
            if text.trim().is_empty() {
                return;
            }

            let raw = match primary.stream_audio(&text).await {
                Ok(stream) => collect_or_none(stream).await,
                Err(e) => {
                    tracing::warn!("primary tts failed: {e}");
                    None
                }
            };

            let raw = match raw {
                Some(bytes) => Some(bytes),
                None => {
                    if let Some(secondary) = secondary {
                        match secondary.stream_audio(&text).await {
                            Ok(stream) => collect_or_none(stream).await,
                            Err(e) => {
                                tracing::warn!("secondary tts failed: {e}");
                                None
                            }
                        }
                    } else {
                        None
                    }
                }
            };

            let Some(bytes) = raw else {
                metrics::counter!("errors_total", "kind" => "tts").increment(1);
                return;
            };

            for block in rechunk(&bytes, MIN_BLOCK_BYTES) {
                yield block;
            }
        })
    }
}

async fn collect_or_none(
    mut stream: Pin<Box<dyn Stream<Item = Result<Vec<u8>, PipelineError>> + Send>>,
) -> Option<Vec<u8>> {
    let mut collected = Vec::new();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => collected.extend_from_slice(&bytes),
            Err(e) => {
                tracing::warn!("tts stream chunk failed: {e}");
                return None;
            }
        }
    }
    if collected.is_empty() {
        None
    } else {
        Some(collected)
    }
}

fn rechunk(bytes: &[u8], min_block: usize) -> Vec<Vec<u8>> {
    if bytes.is_empty() {
        return Vec::new();
    }
    bytes.chunks(min_block).map(|c| c.to_vec()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticProvider {
        bytes: Vec<u8>,
        fails: bool,
    }

    #[async_trait]
    impl TtsProvider for StaticProvider {
        async fn stream_audio(
            &self,
            _text: &str,
        ) -> Result<Pin<Box<dyn Stream<Item = Result<Vec<u8>, PipelineError>> + Send>>, PipelineError>
        {
            if self.fails {
                return Err(PipelineError::Tts("boom".to_string()));
            }
            let bytes = self.bytes.clone();
            Ok(Box::pin(futures::stream::once(async move { Ok(bytes) })))
        }
    }

    #[tokio::test]
    async fn empty_text_yields_nothing() {
        let adapter = TtsAdapter::new(
            Arc::new(StaticProvider { bytes: vec![1, 2, 3], fails: false }),
            None,
        );
        let blocks: Vec<_> = adapter.stream_audio("   ".to_string()).collect().await;
        assert!(blocks.is_empty());
    }

    #[tokio::test]
    async fn falls_back_to_secondary_on_primary_failure() {
        let adapter = TtsAdapter::new(
            Arc::new(StaticProvider { bytes: vec![], fails: true }),
            Some(Arc::new(StaticProvider { bytes: vec![9; 100], fails: false })),
        );
        let blocks: Vec<_> = adapter.stream_audio("hello".to_string()).collect().await;
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].len(), 100);
    }

    #[tokio::test]
    async fn both_failing_yields_nothing() {
        let adapter = TtsAdapter::new(
            Arc::new(StaticProvider { bytes: vec![], fails: true }),
            Some(Arc::new(StaticProvider { bytes: vec![], fails: true })),
        );
        let blocks: Vec<_> = adapter.stream_audio("hello".to_string()).collect().await;
        assert!(blocks.is_empty());
    }

    #[tokio::test]
    async fn large_output_is_rechunked_into_min_size_blocks() {
        let big = vec![7u8; MIN_BLOCK_BYTES * 2 + 10];
        let adapter = TtsAdapter::new(Arc::new(StaticProvider { bytes: big, fails: false }), None);
        let blocks: Vec<_> = adapter.stream_audio("hello".to_string()).collect().await;
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].len(), MIN_BLOCK_BYTES);
        assert_eq!(blocks[1].len(), MIN_BLOCK_BYTES);
        assert_eq!(blocks[2].len(), 10);
    }
}
