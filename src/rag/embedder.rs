//! Per-chunk embedding that tolerates provider outages.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::integrations::{EmbeddingProvider, RetryPolicy};
use crate::metrics::{self, DegradedStep};
use crate::models::DocumentChunk;

/// Embeds chunk and query text with the configured model.
///
/// A missing provider, a failed call or an unusable vector all yield `None`;
/// callers keep going without the embedding.
#[derive(Clone)]
pub struct ChunkEmbedder {
    provider: Option<Arc<dyn EmbeddingProvider>>,
    model: String,
    retry: RetryPolicy,
    concurrency: usize,
    dimensions: Option<usize>,
}

impl ChunkEmbedder {
    pub fn new(provider: Option<Arc<dyn EmbeddingProvider>>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            retry: RetryPolicy::default(),
            concurrency: 1,
            dimensions: None,
        }
    }

    /// Embedder that never produces vectors.
    pub fn disabled() -> Self {
        Self::new(None, "")
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Maximum number of in-flight chunk embeddings.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Reject vectors whose length differs from `dimensions`.
    pub fn with_dimensions(mut self, dimensions: Option<usize>) -> Self {
        self.dimensions = dimensions;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.provider.is_some()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Embed one text. `None` when there is no provider or the call failed.
    pub async fn embed_text(&self, text: &str) -> Option<Vec<f32>> {
        let provider = self.provider.as_ref()?;
        if text.trim().is_empty() {
            return None;
        }

        let texts = vec![text.to_string()];
        let model = self.model.as_str();
        let result = self
            .retry
            .run("embed", || provider.embed(model, &texts))
            .await;

        let vector = match result {
            Ok(vectors) => vectors.into_iter().next(),
            Err(err) => {
                warn!(model, "Embedding call failed: {}", err);
                metrics::record_degraded(DegradedStep::Embedding);
                return None;
            }
        };

        match vector {
            Some(v) if v.is_empty() => {
                warn!(model, "Embedding provider returned an empty vector");
                metrics::record_degraded(DegradedStep::Embedding);
                None
            }
            Some(v) => match self.dimensions {
                Some(dim) if v.len() != dim => {
                    warn!(
                        model,
                        expected = dim,
                        actual = v.len(),
                        "Embedding has unexpected dimension, dropping it"
                    );
                    metrics::record_degraded(DegradedStep::Embedding);
                    None
                }
                _ => Some(v),
            },
            None => {
                warn!(model, "Embedding provider returned no vectors");
                metrics::record_degraded(DegradedStep::Embedding);
                None
            }
        }
    }

    /// Embed chunks concurrently and return them ordered by chunk index.
    pub async fn embed_chunks(&self, chunks: Vec<DocumentChunk>) -> Vec<DocumentChunk> {
        if !self.is_enabled() {
            debug!(chunks = chunks.len(), "No embedding provider, storing chunks without vectors");
            return chunks;
        }

        let mut embedded: Vec<DocumentChunk> = stream::iter(chunks)
            .map(|mut chunk| async move {
                chunk.embedding = self.embed_text(&chunk.content).await;
                if chunk.embedding.is_none() {
                    warn!(
                        chunk_id = %chunk.id,
                        document_id = %chunk.document_id,
                        "Chunk stored without embedding"
                    );
                }
                chunk
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        embedded.sort_by_key(|chunk| chunk.chunk_index);
        embedded
    }
}
