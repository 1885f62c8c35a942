use codesearch_common::{CodeSearchError, Result};
use codesearch_vector::{
    DistanceMetric, Document, EngineStats, IngestOutcome, Metadata, MetadataFilter, Query,
    QueryInput,
};
use serde::{Deserialize, Serialize};

/// Document submitted for ingestion
#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    /// Caller-chosen id; a UUID v4 is assigned when absent
    pub id: Option<String>,

    /// Snippet text
    pub text: String,

    #[serde(default)]
    pub metadata: Metadata,
}

impl IngestRequest {
    pub fn into_document(self) -> Document {
        let id = self
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        Document {
            id,
            text: self.text,
            metadata: self.metadata,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BatchIngestRequest {
    pub documents: Vec<IngestRequest>,
}

/// Per-document entry of a batch response
#[derive(Debug, Serialize)]
pub struct BatchItem {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<IngestOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Serialize)]
pub struct BatchIngestResponse {
    pub succeeded: usize,
    pub failed: usize,
    pub items: Vec<BatchItem>,
}

/// Search request body
#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    /// Query text (mutually exclusive with `vector`)
    pub query: Option<String>,

    /// Precomputed query embedding
    pub vector: Option<Vec<f32>>,

    #[serde(default = "default_top_k")]
    pub k: usize,

    pub filter: Option<MetadataFilter>,

    /// Overrides the configured default metric
    pub metric: Option<DistanceMetric>,

    /// MMR lambda in [0, 1]
    pub diversity: Option<f32>,
}

impl SearchRequest {
    pub fn into_query(self) -> Result<Query> {
        let input = match (self.query, self.vector) {
            (Some(text), None) => QueryInput::Text(text),
            (None, Some(vector)) => QueryInput::Vector(vector),
            (Some(_), Some(_)) => {
                return Err(CodeSearchError::invalid_query(
                    "provide either 'query' or 'vector', not both",
                ))
            }
            (None, None) => {
                return Err(CodeSearchError::invalid_query(
                    "one of 'query' or 'vector' is required",
                ))
            }
        };

        Ok(Query {
            input,
            k: self.k,
            filter: self.filter,
            metric: self.metric,
            diversity: self.diversity,
        })
    }
}

/// Search query string
#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    /// Search query text
    pub q: String,

    /// Top K results
    #[serde(default = "default_top_k")]
    pub k: usize,
}

fn default_top_k() -> usize {
    10
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub id: String,
    pub deleted: bool,
}

/// JSON error payload
/// `/stats` body: engine statistics with the embedder probe result
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub stats: EngineStats,
    pub embedder_healthy: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: &'static str,
    pub retryable: bool,
}

impl From<&CodeSearchError> for ErrorBody {
    fn from(e: &CodeSearchError) -> Self {
        Self {
            error: e.to_string(),
            kind: error_kind(e),
            retryable: e.is_retryable(),
        }
    }
}

pub fn error_kind(e: &CodeSearchError) -> &'static str {
    match e {
        CodeSearchError::EmbeddingUnavailable(_) => "embedding_unavailable",
        CodeSearchError::StorageUnavailable(_) => "storage_unavailable",
        CodeSearchError::DimensionMismatch { .. } => "dimension_mismatch",
        CodeSearchError::NotFound(_) => "not_found",
        CodeSearchError::InvalidQuery(_) => "invalid_query",
        CodeSearchError::InvalidInput(_) => "invalid_input",
        CodeSearchError::QueryFailed(_) => "query_failed",
        CodeSearchError::Cancelled(_) => "cancelled",
        CodeSearchError::Config(_) => "config",
        _ => "internal",
    }
}
