use async_trait::async_trait;
use codesearch_common::{CodeSearchError, Result};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::embedder::{validate_embedding, Embedder, Embedding};
use crate::types::{EmbedRequest, EmbedResponse};

/// Embedder backed by an Ollama-compatible `/api/embeddings` endpoint
#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    base_url: String,
    model: String,
    dimension: usize,
    max_retries: u32,
    retry_base_delay: Duration,
    concurrency: usize,
    client: Client,
}

impl OllamaEmbedder {
    /// Create new Ollama embedder
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        dimension: usize,
    ) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| CodeSearchError::config(format!("Failed to create HTTP client: {}", e)))?;

        let model = model.into();
        info!("Ollama embedder initialized: {} (model={}, dim={})", base_url, model, dimension);

        Ok(Self {
            base_url,
            model,
            dimension,
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
            concurrency: 4,
            client,
        })
    }

    /// Override retry count and base backoff delay
    pub fn with_retries(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries.max(1);
        self.retry_base_delay = base_delay;
        self
    }

    /// Override how many requests a batch may keep in flight
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Generate embedding with retry and exponential backoff
    async fn embed_with_retry(&self, text: &str) -> Result<Embedding> {
        let url = format!("{}/api/embeddings", self.base_url);

        debug!("Generating embedding - Model: {}, Text length: {}", self.model, text.len());

        let request = EmbedRequest {
            model: self.model.clone(),
            prompt: text.to_string(),
        };

        let mut last_error = None;

        for attempt in 1..=self.max_retries {
            match self.try_embed(&url, &request).await {
                Ok(embedding) => {
                    debug!("Received embedding - Dimension: {}", embedding.len());
                    return Ok(embedding);
                }
                Err(e) => {
                    if attempt < self.max_retries {
                        let delay = self.retry_base_delay * 2u32.pow(attempt - 1);
                        warn!(
                            "Embedding request failed (attempt {}/{}): {}. Retrying in {:?}...",
                            attempt, self.max_retries, e, delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| CodeSearchError::embedding_unavailable("All retries failed")))
    }

    /// Single attempt to generate embedding
    async fn try_embed(&self, url: &str, request: &EmbedRequest) -> Result<Embedding> {
        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                CodeSearchError::embedding_unavailable(format!(
                    "Failed to send embedding request: {}",
                    e
                ))
            })?
            .error_for_status()
            .map_err(|e| {
                CodeSearchError::embedding_unavailable(format!("Ollama embedding API error: {}", e))
            })?;

        let result: EmbedResponse = response.json().await.map_err(|e| {
            CodeSearchError::embedding_unavailable(format!(
                "Failed to parse embedding response: {}",
                e
            ))
        })?;

        validate_embedding(&result.embedding, self.dimension)?;

        Ok(result.embedding)
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn max_concurrency(&self) -> usize {
        self.concurrency
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        self.embed_with_retry(text).await
    }

    /// Test connection to Ollama
    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self.client.get(&url).send().await.map_err(|e| {
            CodeSearchError::embedding_unavailable(format!("Failed to connect to Ollama: {}", e))
        })?;
        Ok(response.status().is_success())
    }
}
