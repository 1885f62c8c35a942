use async_trait::async_trait;
use codesearch_common::Result;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::VectorStore;
use crate::types::StoredRecord;

/// Non-durable store, for tests and throwaway engines
#[derive(Default)]
pub struct InMemoryVectorStore {
    records: RwLock<HashMap<String, StoredRecord>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn put(&self, record: &StoredRecord) -> Result<()> {
        let mut records = self.records.write().await;
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<StoredRecord>> {
        let records = self.records.read().await;
        Ok(records.get(id).cloned())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut records = self.records.write().await;
        Ok(records.remove(id).is_some())
    }

    async fn scan(&self) -> Result<Vec<StoredRecord>> {
        let records = self.records.read().await;
        let mut all: Vec<StoredRecord> = records.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.records.read().await.len())
    }
}
