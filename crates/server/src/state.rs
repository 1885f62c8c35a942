use codesearch_common::{AppConfig, Result};
use codesearch_vector::{EngineConfig, SearchEngine};
use std::sync::Arc;

/// Shared application state
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,

    /// Search engine (store, index, embedder)
    pub engine: Arc<SearchEngine>,
}

impl AppState {
    /// Open the engine described by `config`. The index is still empty
    /// until `engine.start()` runs.
    pub async fn new(config: AppConfig) -> Result<Self> {
        let engine = SearchEngine::open(EngineConfig::from_app_config(&config)?).await?;

        Ok(Self {
            config,
            engine: Arc::new(engine),
        })
    }

    pub fn with_engine(config: AppConfig, engine: Arc<SearchEngine>) -> Self {
        Self { config, engine }
    }
}
