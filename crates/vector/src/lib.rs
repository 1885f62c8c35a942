//! code-search vector engine
//!
//! Durable vector store, exact similarity index, ingestion and query paths.

pub mod builder;
pub mod engine;
pub mod filter;
pub mod index;
pub mod mmr;
pub mod query;
pub mod similarity;
pub mod store;
pub mod types;

pub use builder::IndexBuilder;
pub use engine::{EngineConfig, SearchEngine};
pub use filter::{Condition, MetadataFilter};
pub use index::SimilarityIndex;
pub use query::{Query, QueryEngine, QueryInput, QueryResponse};
pub use similarity::DistanceMetric;
pub use store::{FileVectorStore, InMemoryVectorStore, VectorStore};
pub use types::{
    Document, EngineStats, IngestOutcome, IngestStatus, Metadata, SearchResult, StoredRecord,
};
