use async_trait::async_trait;
use codesearch_common::{CodeSearchError, Result};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;

/// A fixed-length embedding vector
pub type Embedding = Vec<f32>;

/// Common trait for embedding backends
///
/// Implementations must be deterministic for a fixed model: the same text
/// yields the same vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier
    fn model(&self) -> &str;

    /// Dimension of every vector this embedder returns
    fn dimension(&self) -> usize;

    /// How many `embed` calls `embed_many` may run at once
    fn max_concurrency(&self) -> usize {
        1
    }

    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Embedding>;

    /// Embed a batch of texts.
    ///
    /// Returns one result per input, in input order. A failed item does not
    /// affect the others.
    async fn embed_many(&self, texts: &[String]) -> Vec<Result<Embedding>> {
        let pending: Vec<_> = texts.iter().map(|text| self.embed(text)).collect();
        stream::iter(pending)
            .buffered(self.max_concurrency().max(1))
            .collect()
            .await
    }

    /// Test connection/availability
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

/// Reject vectors a model should never produce
pub fn validate_embedding(embedding: &[f32], expected_dim: usize) -> Result<()> {
    if embedding.is_empty() {
        return Err(CodeSearchError::embedding_unavailable(
            "model returned an empty embedding",
        ));
    }
    if embedding.len() != expected_dim {
        return Err(CodeSearchError::embedding_unavailable(format!(
            "model returned {} dimensions, expected {}",
            embedding.len(),
            expected_dim
        )));
    }
    if let Some(pos) = embedding.iter().position(|v| !v.is_finite()) {
        return Err(CodeSearchError::embedding_unavailable(format!(
            "model returned a non-finite value at position {}",
            pos
        )));
    }
    Ok(())
}

/// Bounds every call of the wrapped embedder by a timeout.
///
/// A call that does not finish in time fails with the retryable
/// `EmbeddingUnavailable` kind.
pub struct TimedEmbedder {
    inner: Arc<dyn Embedder>,
    timeout: Duration,
}

impl TimedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl Embedder for TimedEmbedder {
    fn model(&self) -> &str {
        self.inner.model()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn max_concurrency(&self) -> usize {
        self.inner.max_concurrency()
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        let embedding = tokio::time::timeout(self.timeout, self.inner.embed(text))
            .await
            .map_err(|_| {
                CodeSearchError::embedding_unavailable(format!(
                    "embedding timed out after {:?}",
                    self.timeout
                ))
            })??;
        validate_embedding(&embedding, self.inner.dimension())?;
        Ok(embedding)
    }

    async fn health_check(&self) -> Result<bool> {
        tokio::time::timeout(self.timeout, self.inner.health_check())
            .await
            .map_err(|_| CodeSearchError::embedding_unavailable("health check timed out"))?
    }
}
