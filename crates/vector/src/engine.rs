use codesearch_common::{AppConfig, CodeSearchError, EmbeddingProvider, Result};
use codesearch_embed::{Embedder, HashingEmbedder, OllamaEmbedder, TimedEmbedder};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::builder::IndexBuilder;
use crate::index::SimilarityIndex;
use crate::query::{Query, QueryEngine, QueryResponse};
use crate::similarity::DistanceMetric;
use crate::store::{with_timeout, FileVectorStore, VectorStore};
use crate::types::{Document, EngineStats, IngestOutcome, StoredRecord};

/// Everything needed to open a search engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub storage_path: PathBuf,
    pub provider: EmbeddingProvider,
    pub model_endpoint: String,
    pub model: String,
    pub dimension: usize,
    pub default_metric: DistanceMetric,
    pub max_k: usize,
    pub embed_timeout: Duration,
    pub storage_timeout: Duration,
    pub embed_concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let app = AppConfig::default();
        Self {
            storage_path: app.storage_path.clone(),
            provider: app.embedding_provider,
            model_endpoint: app.model_endpoint.clone(),
            model: app.embedding_model.clone(),
            dimension: app.embedding_dim,
            default_metric: DistanceMetric::default(),
            max_k: app.max_k,
            embed_timeout: app.embed_timeout(),
            storage_timeout: app.storage_timeout(),
            embed_concurrency: app.embed_concurrency,
        }
    }
}

impl EngineConfig {
    pub fn from_app_config(config: &AppConfig) -> Result<Self> {
        let default_metric = config
            .default_metric
            .parse::<DistanceMetric>()
            .map_err(|e| CodeSearchError::config(format!("DEFAULT_METRIC: {}", e)))?;

        Ok(Self {
            storage_path: config.storage_path.clone(),
            provider: config.embedding_provider,
            model_endpoint: config.model_endpoint.clone(),
            model: config.embedding_model.clone(),
            dimension: config.embedding_dim,
            default_metric,
            max_k: config.max_k,
            embed_timeout: config.embed_timeout(),
            storage_timeout: config.storage_timeout(),
            embed_concurrency: config.embed_concurrency,
        })
    }
}

/// The search engine context.
///
/// Owns the store, the in-memory similarity index, and the embedder, and
/// exposes the ingestion and query operations over them. Cheap to share
/// behind an `Arc`; every operation takes `&self`.
pub struct SearchEngine {
    config: EngineConfig,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    index: Arc<RwLock<SimilarityIndex>>,
    builder: IndexBuilder,
    queries: QueryEngine,
    ready: AtomicBool,
}

impl SearchEngine {
    /// Open the durable store and the configured embedder.
    ///
    /// The engine is not ready until [`start`](Self::start) has rebuilt
    /// the index from the store.
    pub async fn open(config: EngineConfig) -> Result<Self> {
        let store = FileVectorStore::open(&config.storage_path).await?;

        let embedder: Arc<dyn Embedder> = match config.provider {
            EmbeddingProvider::Ollama => Arc::new(
                OllamaEmbedder::new(
                    config.model_endpoint.as_str(),
                    config.model.as_str(),
                    config.dimension,
                )?
                .with_concurrency(config.embed_concurrency),
            ),
            EmbeddingProvider::Hash => Arc::new(HashingEmbedder::new(config.dimension)),
        };

        Self::new(config, Arc::new(store), embedder)
    }

    /// Assemble an engine from explicit parts
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        if config.dimension == 0 {
            return Err(CodeSearchError::config("embedding dimension must be greater than 0"));
        }
        if config.max_k == 0 {
            return Err(CodeSearchError::config("max_k must be greater than 0"));
        }
        if embedder.dimension() != config.dimension {
            return Err(CodeSearchError::dimension_mismatch(
                config.dimension,
                embedder.dimension(),
            ));
        }

        let embedder: Arc<dyn Embedder> =
            Arc::new(TimedEmbedder::new(embedder, config.embed_timeout));
        let index = Arc::new(RwLock::new(SimilarityIndex::new(config.dimension)));
        let builder = IndexBuilder::new(
            store.clone(),
            index.clone(),
            embedder.clone(),
            config.storage_timeout,
        );
        let queries = QueryEngine::new(
            index.clone(),
            embedder.clone(),
            config.default_metric,
            config.max_k,
        );

        info!(
            "Search engine created (model: {}, dim: {}, metric: {}, max_k: {})",
            embedder.model(),
            config.dimension,
            config.default_metric,
            config.max_k
        );

        Ok(Self {
            config,
            store,
            embedder,
            index,
            builder,
            queries,
            ready: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Rebuild the index from the store and mark the engine ready.
    ///
    /// Safe to call again; each call re-derives the index from scratch.
    pub async fn start(&self) -> Result<usize> {
        let count = self.builder.rebuild().await?;
        self.ready.store(true, Ordering::SeqCst);
        info!("Search engine ready with {} indexed documents", count);
        Ok(count)
    }

    /// True once the startup rebuild has finished
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(CodeSearchError::storage_unavailable("index rebuild in progress"))
        }
    }

    pub async fn ingest(&self, doc: Document) -> Result<IngestOutcome> {
        self.ensure_ready()?;
        self.builder.ingest(doc).await
    }

    pub async fn ingest_with_cancel(
        &self,
        doc: Document,
        cancel: &CancellationToken,
    ) -> Result<IngestOutcome> {
        self.ensure_ready()?;
        self.builder.ingest_with_cancel(doc, cancel).await
    }

    pub async fn ingest_many(&self, docs: Vec<Document>) -> Result<Vec<Result<IngestOutcome>>> {
        self.ensure_ready()?;
        Ok(self.builder.ingest_many(docs).await)
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        self.ensure_ready()?;
        self.builder.delete(id).await
    }

    /// Fetch the stored record for an id
    pub async fn get(&self, id: &str) -> Result<StoredRecord> {
        with_timeout(self.config.storage_timeout, self.store.get(id))
            .await?
            .ok_or_else(|| CodeSearchError::not_found(format!("document '{}'", id)))
    }

    pub async fn query(&self, query: Query) -> Result<QueryResponse> {
        self.ensure_ready()?;
        self.queries.search(query).await
    }

    pub async fn stats(&self) -> EngineStats {
        EngineStats {
            entries: self.index.read().await.len(),
            dimension: self.config.dimension,
            embedding_model: self.embedder.model().to_string(),
            default_metric: self.config.default_metric,
            max_k: self.config.max_k,
            ready: self.is_ready(),
        }
    }

    /// Probe the embedding backend, bounded by the embed timeout
    pub async fn embedder_healthy(&self) -> bool {
        match self.embedder.health_check().await {
            Ok(healthy) => healthy,
            Err(e) => {
                warn!("Embedder health check failed: {}", e);
                false
            }
        }
    }
}
