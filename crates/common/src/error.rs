/// code-search error types
///
/// The kinds mirror how callers are expected to react: embedding and storage
/// failures are retryable, everything else is fatal to the operation that
/// produced it. Mapping kinds to transport responses is the caller's job.
#[derive(Debug, thiserror::Error)]
pub enum CodeSearchError {
    /// External embedding model unreachable or returned malformed output
    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// Vector store I/O failure
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Vector length differs from the configured dimension
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Unknown document id
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad query (k < 1, malformed filter, empty text)
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Query aborted by a downstream failure
    #[error("Query failed: {0}")]
    QueryFailed(#[source] Box<CodeSearchError>),

    /// Operation abandoned by its caller before it changed any state
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// General error (anyhow integration)
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CodeSearchError {
    /// Create embedding unavailable error
    pub fn embedding_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::EmbeddingUnavailable(msg.into())
    }

    /// Create storage unavailable error
    pub fn storage_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::StorageUnavailable(msg.into())
    }

    /// Create dimension mismatch error
    pub fn dimension_mismatch(expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch { expected, actual }
    }

    /// Create not found error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create invalid query error
    pub fn invalid_query<S: Into<String>>(msg: S) -> Self {
        Self::InvalidQuery(msg.into())
    }

    /// Create invalid input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Wrap a failure that aborted a query
    pub fn query_failed(source: CodeSearchError) -> Self {
        Self::QueryFailed(Box::new(source))
    }

    /// Create cancelled error
    pub fn cancelled<S: Into<String>>(msg: S) -> Self {
        Self::Cancelled(msg.into())
    }

    /// Create config error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether retrying the same operation may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::EmbeddingUnavailable(_) | Self::StorageUnavailable(_) => true,
            Self::QueryFailed(inner) => inner.is_retryable(),
            _ => false,
        }
    }
}
