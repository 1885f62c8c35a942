use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::similarity::DistanceMetric;

/// Opaque document metadata (e.g. `path`, `lang`, `start_line`)
pub type Metadata = BTreeMap<String, String>;

/// A unit of searchable content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Stable identifier, immutable once assigned
    pub id: String,

    /// Source snippet
    pub text: String,

    /// Document metadata
    #[serde(default)]
    pub metadata: Metadata,
}

impl Document {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata: Metadata::new(),
        }
    }

    /// Add one metadata key
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// SHA-256 of the text, hex encoded
    pub fn content_hash(&self) -> String {
        hex::encode(Sha256::digest(self.text.as_bytes()))
    }
}

/// Vector store value: one document's current embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Document ID
    pub id: String,

    /// Embedding of the current version
    pub embedding: Vec<f32>,

    /// Document metadata
    #[serde(default)]
    pub metadata: Metadata,

    /// Incremented each time the text changes and is re-embedded
    pub version: u64,

    /// Hash of the embedded text
    pub content_hash: String,

    /// Timestamp when indexed
    pub indexed_at: DateTime<Utc>,
}

/// Search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Document ID
    pub id: String,

    /// Cosine similarity or Euclidean distance, depending on the metric
    pub score: f32,

    /// Metadata
    pub metadata: Metadata,
}

/// What an ingestion did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    /// New document
    Created,
    /// Text changed, re-embedded under a new version
    Updated,
    /// Same text, metadata replaced, embedding reused
    MetadataUpdated,
    /// Nothing changed
    Unchanged,
}

/// Result of ingesting a single document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestOutcome {
    pub id: String,
    pub version: u64,
    pub status: IngestStatus,
}

/// Engine statistics
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub entries: usize,
    pub dimension: usize,
    pub embedding_model: String,
    pub default_metric: DistanceMetric,
    pub max_k: usize,
    pub ready: bool,
}
