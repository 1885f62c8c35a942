//! Durable `id -> (embedding, metadata, version)` storage.
//!
//! The store is the single source of truth; the similarity index is rebuilt
//! from [`VectorStore::scan`] on startup.

mod file;
mod memory;

pub use file::FileVectorStore;
pub use memory::InMemoryVectorStore;

use async_trait::async_trait;
use codesearch_common::{CodeSearchError, Result};
use std::future::Future;
use std::time::Duration;

use crate::types::StoredRecord;

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace the record for `record.id`
    async fn put(&self, record: &StoredRecord) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<StoredRecord>>;

    /// Remove the record; `Ok(false)` when there was none
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Snapshot of every record, ordered by id
    async fn scan(&self) -> Result<Vec<StoredRecord>>;

    async fn len(&self) -> Result<usize>;
}

/// Run a storage call under a deadline.
///
/// Timeouts become `StorageUnavailable` so callers retry instead of hanging.
pub async fn with_timeout<T, F>(timeout: Duration, op: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(timeout, op).await.map_err(|_| {
        CodeSearchError::storage_unavailable(format!("storage call timed out after {:?}", timeout))
    })?
}
