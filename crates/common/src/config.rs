use crate::error::CodeSearchError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Which embedding backend the engine talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Ollama-compatible HTTP endpoint
    Ollama,
    /// Deterministic local feature hashing (no model required)
    Hash,
}

impl FromStr for EmbeddingProvider {
    type Err = CodeSearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "hash" | "hashing" => Ok(Self::Hash),
            other => Err(CodeSearchError::config(format!(
                "Unknown embedding provider '{}' (expected 'ollama' or 'hash')",
                other
            ))),
        }
    }
}

/// code-search application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Vector store directory
    pub storage_path: PathBuf,

    /// Embedding backend
    pub embedding_provider: EmbeddingProvider,

    /// Embedding model endpoint (Ollama API base URL)
    pub model_endpoint: String,

    /// Embedding model name
    pub embedding_model: String,

    /// Embedding dimension produced by the model
    pub embedding_dim: usize,

    /// Default distance metric ("cosine" or "euclidean")
    pub default_metric: String,

    /// Upper bound on results per query
    pub max_k: usize,

    /// Timeout for a single embedding call, seconds
    pub embed_timeout_secs: u64,

    /// Timeout for a single storage call, seconds
    pub storage_timeout_secs: u64,

    /// Parallel embedding requests per batch
    pub embed_concurrency: usize,

    /// Server bind address
    pub server_host: String,

    /// Server port
    pub server_port: u16,

    /// Log directory
    pub log_dir: PathBuf,

    /// Log level
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::from("./db/vectors"),
            embedding_provider: EmbeddingProvider::Ollama,
            model_endpoint: "http://localhost:11434".to_string(),
            embedding_model: "all-minilm".to_string(),
            embedding_dim: 384,
            default_metric: "cosine".to_string(),
            max_k: 100,
            embed_timeout_secs: 30,
            storage_timeout_secs: 10,
            embed_concurrency: 4,
            server_host: "0.0.0.0".to_string(),
            server_port: 3003,
            log_dir: PathBuf::from("./db/log"),
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables and .env file
    pub fn from_env() -> Result<Self, CodeSearchError> {
        // Load .env file (ignore if not exists)
        let _ = dotenv::dotenv();

        let defaults = Self::default();

        let embedding_provider = match std::env::var("EMBEDDING_PROVIDER") {
            Ok(value) => value.parse()?,
            Err(_) => defaults.embedding_provider,
        };

        let config = Self {
            storage_path: Self::get_env_path("STORAGE_PATH").unwrap_or(defaults.storage_path),
            embedding_provider,
            model_endpoint: std::env::var("MODEL_ENDPOINT").unwrap_or(defaults.model_endpoint),
            embedding_model: std::env::var("EMBEDDING_MODEL").unwrap_or(defaults.embedding_model),
            embedding_dim: Self::get_env_parsed("EMBEDDING_DIM").unwrap_or(defaults.embedding_dim),
            default_metric: std::env::var("DEFAULT_METRIC").unwrap_or(defaults.default_metric),
            max_k: Self::get_env_parsed("MAX_K").unwrap_or(defaults.max_k),
            embed_timeout_secs: Self::get_env_parsed("EMBED_TIMEOUT_SECS")
                .unwrap_or(defaults.embed_timeout_secs),
            storage_timeout_secs: Self::get_env_parsed("STORAGE_TIMEOUT_SECS")
                .unwrap_or(defaults.storage_timeout_secs),
            embed_concurrency: Self::get_env_parsed("EMBED_CONCURRENCY")
                .unwrap_or(defaults.embed_concurrency),
            server_host: std::env::var("SERVER_HOST").unwrap_or(defaults.server_host),
            server_port: Self::get_env_parsed("SERVER_PORT").unwrap_or(defaults.server_port),
            log_dir: Self::get_env_path("LOG_DIR").unwrap_or(defaults.log_dir),
            log_level: std::env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
        };

        config.validate()?;

        // Ensure required directories exist
        config.ensure_directories()?;

        Ok(config)
    }

    /// Get PathBuf from environment variable
    fn get_env_path(key: &str) -> Option<PathBuf> {
        std::env::var(key).ok().map(PathBuf::from)
    }

    /// Get a parsed value from environment variable, ignoring unparsable input
    fn get_env_parsed<T: FromStr>(key: &str) -> Option<T> {
        std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
    }

    /// Ensure required directories exist, create if not
    pub fn ensure_directories(&self) -> Result<(), CodeSearchError> {
        let dirs = vec![&self.storage_path, &self.log_dir];

        for dir in dirs {
            if !dir.exists() {
                std::fs::create_dir_all(dir).map_err(|e| {
                    CodeSearchError::config(format!(
                        "Failed to create directory {}: {}",
                        dir.display(),
                        e
                    ))
                })?;
            }
        }

        Ok(())
    }

    /// Get log file path
    pub fn get_log_path(&self, filename: &str) -> PathBuf {
        self.log_dir.join(filename)
    }

    /// Get server bind address (host:port)
    pub fn server_bind_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    pub fn embed_timeout(&self) -> Duration {
        Duration::from_secs(self.embed_timeout_secs)
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_secs(self.storage_timeout_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), CodeSearchError> {
        if self.embedding_model.is_empty() {
            return Err(CodeSearchError::config("Embedding model name cannot be empty"));
        }

        if self.embedding_provider == EmbeddingProvider::Ollama
            && !self.model_endpoint.starts_with("http://")
            && !self.model_endpoint.starts_with("https://")
        {
            return Err(CodeSearchError::config(
                "Model endpoint must start with http:// or https://",
            ));
        }

        if self.embedding_dim == 0 {
            return Err(CodeSearchError::config("Embedding dimension cannot be 0"));
        }

        match self.default_metric.to_lowercase().as_str() {
            "cosine" | "euclidean" => {}
            other => {
                return Err(CodeSearchError::config(format!(
                    "Unknown distance metric '{}' (expected 'cosine' or 'euclidean')",
                    other
                )))
            }
        }

        if self.max_k == 0 {
            return Err(CodeSearchError::config("MAX_K must be at least 1"));
        }

        if self.embed_concurrency == 0 {
            return Err(CodeSearchError::config("EMBED_CONCURRENCY must be at least 1"));
        }

        if self.embed_timeout_secs == 0 || self.storage_timeout_secs == 0 {
            return Err(CodeSearchError::config("Timeouts must be at least 1 second"));
        }

        // Validate port range
        if self.server_port == 0 {
            return Err(CodeSearchError::config("Server port cannot be 0"));
        }

        Ok(())
    }
}
