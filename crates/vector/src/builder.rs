use chrono::Utc;
use codesearch_common::{CodeSearchError, Result};
use codesearch_embed::{Embedder, Embedding};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::index::SimilarityIndex;
use crate::store::{with_timeout, VectorStore};
use crate::types::{Document, IngestOutcome, IngestStatus, StoredRecord};

/// A durable change, applied store-first then index
enum Mutation {
    Put(StoredRecord),
    Delete(String),
}

/// Where embeddings for an ingestion come from
enum EmbedSource<'a> {
    /// Call the embedder now
    Live,
    /// Precomputed by a batch, keyed by content hash
    Batch(&'a HashMap<String, Result<Embedding>>),
}

/// Keeps the vector store and the similarity index in step.
///
/// All writes go through one mutex (single logical writer). Each document
/// is written to the store first and registered in the index second; the
/// index can always be rebuilt from the store with [`rebuild`](Self::rebuild).
pub struct IndexBuilder {
    store: Arc<dyn VectorStore>,
    index: Arc<RwLock<SimilarityIndex>>,
    embedder: Arc<dyn Embedder>,
    storage_timeout: Duration,
    write_lock: Arc<Mutex<()>>,
}

impl IndexBuilder {
    pub fn new(
        store: Arc<dyn VectorStore>,
        index: Arc<RwLock<SimilarityIndex>>,
        embedder: Arc<dyn Embedder>,
        storage_timeout: Duration,
    ) -> Self {
        Self {
            store,
            index,
            embedder,
            storage_timeout,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    fn validate(doc: &Document) -> Result<()> {
        if doc.id.trim().is_empty() {
            return Err(CodeSearchError::invalid_input("document id cannot be empty"));
        }
        if doc.text.trim().is_empty() {
            return Err(CodeSearchError::invalid_input(format!(
                "document '{}' has empty text",
                doc.id
            )));
        }
        Ok(())
    }

    /// Ingest one document
    pub async fn ingest(&self, doc: Document) -> Result<IngestOutcome> {
        self.ingest_with_cancel(doc, &CancellationToken::new()).await
    }

    /// Ingest one document, abandoning it if `cancel` fires before the
    /// store write. Once the write has started the index update always
    /// completes, even if this future is dropped.
    pub async fn ingest_with_cancel(
        &self,
        doc: Document,
        cancel: &CancellationToken,
    ) -> Result<IngestOutcome> {
        Self::validate(&doc)?;
        let guard = self.write_lock.clone().lock_owned().await;
        let (result, _guard) = self.ingest_locked(doc, EmbedSource::Live, cancel, guard).await;
        result
    }

    /// Ingest a batch.
    ///
    /// New and changed texts are embedded together (concurrently, order
    /// preserved); each document is then stored and indexed on its own.
    /// Returns one result per input document, in order.
    pub async fn ingest_many(&self, docs: Vec<Document>) -> Vec<Result<IngestOutcome>> {
        let cancel = CancellationToken::new();
        let mut guard = self.write_lock.clone().lock_owned().await;

        // Collect distinct texts that actually need an embedding
        let mut seen = HashSet::new();
        let mut pending: Vec<(String, String)> = Vec::new();
        for doc in &docs {
            if Self::validate(doc).is_err() {
                continue;
            }
            let hash = doc.content_hash();
            if seen.contains(&hash) {
                continue;
            }
            if let Ok(Some(existing)) = self.storage_get(&doc.id).await {
                if existing.content_hash == hash {
                    continue;
                }
            }
            seen.insert(hash.clone());
            pending.push((hash, doc.text.clone()));
        }

        let texts: Vec<String> = pending.iter().map(|(_, text)| text.clone()).collect();
        debug!("Batch of {} documents needs {} embeddings", docs.len(), texts.len());
        let embedded = self.embedder.embed_many(&texts).await;
        let cache: HashMap<String, Result<Embedding>> = pending
            .into_iter()
            .map(|(hash, _)| hash)
            .zip(embedded)
            .collect();

        let mut results = Vec::with_capacity(docs.len());
        for doc in docs {
            if let Err(e) = Self::validate(&doc) {
                results.push(Err(e));
                continue;
            }
            let (result, next_guard) = self
                .ingest_locked(doc, EmbedSource::Batch(&cache), &cancel, guard)
                .await;
            guard = next_guard;
            results.push(result);
        }

        let ok = results.iter().filter(|r| r.is_ok()).count();
        info!("Batch ingestion finished: {}/{} documents succeeded", ok, results.len());
        results
    }

    async fn ingest_locked(
        &self,
        doc: Document,
        source: EmbedSource<'_>,
        cancel: &CancellationToken,
        guard: OwnedMutexGuard<()>,
    ) -> (Result<IngestOutcome>, OwnedMutexGuard<()>) {
        let (record, status) = match self.prepare(&doc, source, cancel).await {
            Ok(Prepared::Unchanged(outcome)) => return (Ok(outcome), guard),
            Ok(Prepared::Write(record, status)) => (record, status),
            Err(e) => {
                warn!("Ingestion of '{}' aborted before any write: {}", doc.id, e);
                return (Err(e), guard);
            }
        };

        if cancel.is_cancelled() {
            return (
                Err(CodeSearchError::cancelled(format!("ingestion of '{}'", doc.id))),
                guard,
            );
        }

        let outcome = IngestOutcome {
            id: record.id.clone(),
            version: record.version,
            status,
        };
        let (result, guard) = self.apply(Mutation::Put(record), guard).await;
        match result {
            Ok(_) => {
                info!(
                    "Indexed '{}' (version {}, {:?})",
                    outcome.id, outcome.version, outcome.status
                );
                (Ok(outcome), guard)
            }
            Err(e) => (Err(e), guard),
        }
    }

    /// Decide what an ingestion has to write, embedding if the text changed
    async fn prepare(
        &self,
        doc: &Document,
        source: EmbedSource<'_>,
        cancel: &CancellationToken,
    ) -> Result<Prepared> {
        let hash = doc.content_hash();
        let existing = self.storage_get(&doc.id).await?;

        let (embedding, version, status) = match existing {
            Some(existing) if existing.content_hash == hash => {
                if existing.metadata == doc.metadata {
                    // The store is authoritative: heal an entry that is missing
                    // or stale after a crash or an unacknowledged store write
                    let mut index = self.index.write().await;
                    let in_sync = index.vector(&doc.id) == Some(existing.embedding.as_slice())
                        && index.metadata(&doc.id) == Some(&existing.metadata);
                    if !in_sync {
                        debug!("Resyncing index entry for '{}' from store", doc.id);
                        index.upsert(&existing.id, &existing.embedding, existing.metadata.clone())?;
                    }
                    return Ok(Prepared::Unchanged(IngestOutcome {
                        id: existing.id,
                        version: existing.version,
                        status: IngestStatus::Unchanged,
                    }));
                }
                (existing.embedding, existing.version, IngestStatus::MetadataUpdated)
            }
            Some(existing) => {
                let embedding = self.embedding_for(doc, &hash, source, cancel).await?;
                (embedding, existing.version + 1, IngestStatus::Updated)
            }
            None => {
                let embedding = self.embedding_for(doc, &hash, source, cancel).await?;
                (embedding, 1, IngestStatus::Created)
            }
        };

        let dimension = self.index.read().await.dimension();
        if embedding.len() != dimension {
            return Err(CodeSearchError::dimension_mismatch(dimension, embedding.len()));
        }

        Ok(Prepared::Write(
            StoredRecord {
                id: doc.id.clone(),
                embedding,
                metadata: doc.metadata.clone(),
                version,
                content_hash: hash,
                indexed_at: Utc::now(),
            },
            status,
        ))
    }

    async fn embedding_for(
        &self,
        doc: &Document,
        hash: &str,
        source: EmbedSource<'_>,
        cancel: &CancellationToken,
    ) -> Result<Embedding> {
        if let EmbedSource::Batch(cache) = source {
            match cache.get(hash) {
                Some(Ok(embedding)) => return Ok(embedding.clone()),
                Some(Err(e)) => return Err(replay(e)),
                None => {}
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                Err(CodeSearchError::cancelled(format!("ingestion of '{}'", doc.id)))
            }
            embedding = self.embedder.embed(&doc.text) => embedding,
        }
    }

    /// Delete a document. Deleting an unknown id is a no-op.
    ///
    /// Returns whether anything was removed.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let guard = self.write_lock.clone().lock_owned().await;
        let (result, _guard) = self.apply(Mutation::Delete(id.to_string()), guard).await;
        let removed = result?;
        if removed {
            info!("Deleted '{}' from store and index", id);
        } else {
            debug!("Delete of unknown id '{}' ignored", id);
        }
        Ok(removed)
    }

    /// Run a mutation to completion on its own task.
    ///
    /// The task owns the writer guard and finishes the index step even if
    /// the caller stops waiting, so store and index never diverge.
    async fn apply(
        &self,
        mutation: Mutation,
        guard: OwnedMutexGuard<()>,
    ) -> (Result<bool>, OwnedMutexGuard<()>) {
        let store = self.store.clone();
        let index = self.index.clone();
        let timeout = self.storage_timeout;

        let task = tokio::spawn(async move {
            let result = match mutation {
                Mutation::Put(record) => {
                    match with_timeout(timeout, store.put(&record)).await {
                        Ok(()) => index
                            .write()
                            .await
                            .upsert(&record.id, &record.embedding, record.metadata)
                            .map(|replaced| !replaced),
                        Err(e) => {
                            reconcile(store.as_ref(), &index, &record.id, timeout).await;
                            Err(e)
                        }
                    }
                }
                Mutation::Delete(id) => match with_timeout(timeout, store.delete(&id)).await {
                    Ok(stored) => {
                        let indexed = index.write().await.remove(&id);
                        Ok(stored || indexed)
                    }
                    Err(e) => {
                        reconcile(store.as_ref(), &index, &id, timeout).await;
                        Err(e)
                    }
                },
            };
            (result, guard)
        });

        match task.await {
            Ok(done) => done,
            Err(e) => (
                Err(CodeSearchError::internal(format!("index mutation task failed: {}", e))),
                self.write_lock.clone().lock_owned().await,
            ),
        }
    }

    /// Recovery pass: rebuild the index purely from the store.
    ///
    /// The new index is built aside and swapped in, so searches never see a
    /// half-built one.
    pub async fn rebuild(&self) -> Result<usize> {
        let _guard = self.write_lock.lock().await;

        let records = with_timeout(self.storage_timeout, self.store.scan()).await?;
        let dimension = self.index.read().await.dimension();
        let fresh = SimilarityIndex::from_records(dimension, &records)?;
        let count = fresh.len();

        *self.index.write().await = fresh;
        info!("Similarity index rebuilt from store: {} entries", count);
        Ok(count)
    }

    async fn storage_get(&self, id: &str) -> Result<Option<StoredRecord>> {
        with_timeout(self.storage_timeout, self.store.get(id)).await
    }
}

enum Prepared {
    Unchanged(IngestOutcome),
    Write(StoredRecord, IngestStatus),
}

/// Re-read one id after a failed store call and make the index match it.
///
/// A timed-out write may still have landed, so the index follows whatever
/// the store now holds. If the store cannot be read either, the entry is
/// left for the next unchanged ingest or rebuild to repair.
async fn reconcile(
    store: &dyn VectorStore,
    index: &RwLock<SimilarityIndex>,
    id: &str,
    timeout: Duration,
) {
    let outcome = match with_timeout(timeout, store.get(id)).await {
        Ok(Some(record)) => index
            .write()
            .await
            .upsert(&record.id, &record.embedding, record.metadata)
            .map(|_| ()),
        Ok(None) => {
            index.write().await.remove(id);
            Ok(())
        }
        Err(e) => Err(e),
    };
    if let Err(e) = outcome {
        warn!("Could not reconcile index entry '{}' with store: {}", id, e);
    }
}

/// Reproduce a cached batch error for every document sharing the text
fn replay(e: &CodeSearchError) -> CodeSearchError {
    match e {
        CodeSearchError::EmbeddingUnavailable(msg) => CodeSearchError::embedding_unavailable(msg.clone()),
        CodeSearchError::DimensionMismatch { expected, actual } => {
            CodeSearchError::dimension_mismatch(*expected, *actual)
        }
        other => CodeSearchError::embedding_unavailable(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::DistanceMetric;
    use crate::store::InMemoryVectorStore;
    use async_trait::async_trait;
    use codesearch_embed::HashingEmbedder;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const DIM: usize = 16;

    /// Hashing embedder that counts calls and fails on texts containing "FAIL"
    struct CountingEmbedder {
        inner: HashingEmbedder,
        calls: AtomicUsize,
    }

    impl CountingEmbedder {
        fn new() -> Self {
            Self {
                inner: HashingEmbedder::new(DIM),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        fn model(&self) -> &str {
            "counting"
        }

        fn dimension(&self) -> usize {
            DIM
        }

        async fn embed(&self, text: &str) -> Result<Embedding> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if text.contains("FAIL") {
                return Err(CodeSearchError::embedding_unavailable("model down"));
            }
            if text.contains("HANG") {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            self.inner.embed(text).await
        }
    }

    /// Store whose writes can be switched off
    struct FlakyStore {
        inner: InMemoryVectorStore,
        fail_writes: AtomicBool,
    }

    #[async_trait]
    impl VectorStore for FlakyStore {
        async fn put(&self, record: &StoredRecord) -> Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(CodeSearchError::storage_unavailable("disk full"));
            }
            self.inner.put(record).await
        }

        async fn get(&self, id: &str) -> Result<Option<StoredRecord>> {
            self.inner.get(id).await
        }

        async fn delete(&self, id: &str) -> Result<bool> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(CodeSearchError::storage_unavailable("disk full"));
            }
            self.inner.delete(id).await
        }

        async fn scan(&self) -> Result<Vec<StoredRecord>> {
            self.inner.scan().await
        }

        async fn len(&self) -> Result<usize> {
            self.inner.len().await
        }
    }

    /// Store whose writes land, then stall before acknowledging
    struct SlowAckStore {
        inner: InMemoryVectorStore,
        stall: Duration,
        slow: AtomicBool,
    }

    impl SlowAckStore {
        fn new(stall: Duration) -> Self {
            Self {
                inner: InMemoryVectorStore::new(),
                stall,
                slow: AtomicBool::new(false),
            }
        }

        async fn ack(&self) {
            if self.slow.load(Ordering::SeqCst) {
                tokio::time::sleep(self.stall).await;
            }
        }
    }

    #[async_trait]
    impl VectorStore for SlowAckStore {
        async fn put(&self, record: &StoredRecord) -> Result<()> {
            self.inner.put(record).await?;
            self.ack().await;
            Ok(())
        }

        async fn get(&self, id: &str) -> Result<Option<StoredRecord>> {
            self.inner.get(id).await
        }

        async fn delete(&self, id: &str) -> Result<bool> {
            let removed = self.inner.delete(id).await?;
            self.ack().await;
            Ok(removed)
        }

        async fn scan(&self) -> Result<Vec<StoredRecord>> {
            self.inner.scan().await
        }

        async fn len(&self) -> Result<usize> {
            self.inner.len().await
        }
    }

    fn builder_over(
        store: Arc<dyn VectorStore>,
        storage_timeout: Duration,
    ) -> (IndexBuilder, Arc<RwLock<SimilarityIndex>>) {
        let index = Arc::new(RwLock::new(SimilarityIndex::new(DIM)));
        let builder = IndexBuilder::new(
            store,
            index.clone(),
            Arc::new(HashingEmbedder::new(DIM)),
            storage_timeout,
        );
        (builder, index)
    }

    struct Fixture {
        builder: IndexBuilder,
        store: Arc<FlakyStore>,
        index: Arc<RwLock<SimilarityIndex>>,
        embedder: Arc<CountingEmbedder>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(FlakyStore {
            inner: InMemoryVectorStore::new(),
            fail_writes: AtomicBool::new(false),
        });
        let index = Arc::new(RwLock::new(SimilarityIndex::new(DIM)));
        let embedder = Arc::new(CountingEmbedder::new());
        let builder = IndexBuilder::new(
            store.clone(),
            index.clone(),
            embedder.clone(),
            Duration::from_secs(5),
        );
        Fixture {
            builder,
            store,
            index,
            embedder,
        }
    }

    fn doc(id: &str, text: &str) -> Document {
        Document::new(id, text).with_metadata("path", format!("src/{}.rs", id))
    }

    #[tokio::test]
    async fn test_ingest_creates_then_updates() {
        let f = fixture();

        let outcome = f.builder.ingest(doc("a", "fn alpha() {}")).await.unwrap();
        assert_eq!(outcome.status, IngestStatus::Created);
        assert_eq!(outcome.version, 1);

        let outcome = f.builder.ingest(doc("a", "fn alpha_v2() {}")).await.unwrap();
        assert_eq!(outcome.status, IngestStatus::Updated);
        assert_eq!(outcome.version, 2);

        let stored = f.store.get("a").await.unwrap().unwrap();
        let index = f.index.read().await;
        assert_eq!(index.len(), 1);
        assert_eq!(index.vector("a").unwrap(), stored.embedding.as_slice());
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn test_reingest_same_text_is_idempotent() {
        let f = fixture();
        f.builder.ingest(doc("a", "fn alpha() {}")).await.unwrap();
        f.builder.ingest(doc("b", "fn beta() {}")).await.unwrap();
        let query = HashingEmbedder::new(DIM).embed("fn alpha() {}").await.unwrap();
        let before = f.index.read().await.search(&query, 2, None, DistanceMetric::Cosine).unwrap();
        let embedding_before = f.store.get("a").await.unwrap().unwrap().embedding;

        let outcome = f.builder.ingest(doc("a", "fn alpha() {}")).await.unwrap();

        assert_eq!(outcome.status, IngestStatus::Unchanged);
        assert_eq!(outcome.version, 1);
        assert_eq!(f.embedder.calls.load(Ordering::SeqCst), 2);
        assert_eq!(f.store.get("a").await.unwrap().unwrap().embedding, embedding_before);
        let after = f.index.read().await.search(&query, 2, None, DistanceMetric::Cosine).unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_metadata_only_change_reuses_embedding() {
        let f = fixture();
        f.builder.ingest(doc("a", "fn alpha() {}")).await.unwrap();

        let moved = Document::new("a", "fn alpha() {}").with_metadata("path", "src/moved.rs");
        let outcome = f.builder.ingest(moved).await.unwrap();

        assert_eq!(outcome.status, IngestStatus::MetadataUpdated);
        assert_eq!(outcome.version, 1);
        assert_eq!(f.embedder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.index.read().await.metadata("a").unwrap()["path"], "src/moved.rs");
    }

    #[tokio::test]
    async fn test_empty_text_rejected() {
        let f = fixture();
        assert!(matches!(
            f.builder.ingest(Document::new("a", "   ")).await,
            Err(CodeSearchError::InvalidInput(_))
        ));
        assert!(matches!(
            f.builder.ingest(Document::new("", "fn x() {}")).await,
            Err(CodeSearchError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_embedding_failure_leaves_prior_state() {
        let f = fixture();
        f.builder.ingest(doc("a", "fn alpha() {}")).await.unwrap();
        let before = f.store.get("a").await.unwrap().unwrap();

        let err = f.builder.ingest(doc("a", "FAIL fn alpha() {}")).await.unwrap_err();
        assert!(matches!(err, CodeSearchError::EmbeddingUnavailable(_)));

        assert_eq!(f.store.get("a").await.unwrap().unwrap(), before);
        assert_eq!(f.index.read().await.vector("a").unwrap(), before.embedding.as_slice());
    }

    #[tokio::test]
    async fn test_storage_failure_leaves_index_untouched() {
        let f = fixture();
        f.store.fail_writes.store(true, Ordering::SeqCst);

        let err = f.builder.ingest(doc("a", "fn alpha() {}")).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(f.index.read().await.is_empty());

        f.store.fail_writes.store(false, Ordering::SeqCst);
        f.builder.ingest(doc("a", "fn alpha() {}")).await.unwrap();
        assert!(f.index.read().await.contains("a"));
    }

    #[tokio::test]
    async fn test_delete_removes_both_and_is_idempotent() {
        let f = fixture();
        f.builder.ingest(doc("a", "fn alpha() {}")).await.unwrap();

        assert!(f.builder.delete("a").await.unwrap());
        assert!(!f.builder.delete("a").await.unwrap());
        assert!(!f.builder.delete("never-existed").await.unwrap());

        assert!(f.store.get("a").await.unwrap().is_none());
        assert!(!f.index.read().await.contains("a"));
    }

    #[tokio::test]
    async fn test_delete_storage_failure_keeps_entry() {
        let f = fixture();
        f.builder.ingest(doc("a", "fn alpha() {}")).await.unwrap();
        f.store.fail_writes.store(true, Ordering::SeqCst);

        assert!(f.builder.delete("a").await.is_err());
        assert!(f.index.read().await.contains("a"));
        assert!(f.store.get("a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_uniqueness_after_mixed_operations() {
        let f = fixture();
        for round in 0..3 {
            for id in ["a", "b", "c", "d"] {
                f.builder
                    .ingest(doc(id, &format!("fn {}_{}() {{}}", id, round)))
                    .await
                    .unwrap();
            }
            f.builder.delete("b").await.unwrap();
        }

        let records = f.store.scan().await.unwrap();
        let index = f.index.read().await;
        assert_eq!(index.len(), records.len());
        assert_eq!(records.len(), 3);
        for record in records {
            assert_eq!(record.version, 3);
            assert_eq!(index.vector(&record.id).unwrap(), record.embedding.as_slice());
        }
    }

    #[tokio::test]
    async fn test_ingest_many_reports_per_item() {
        let f = fixture();
        f.builder.ingest(doc("keep", "fn keep() {}")).await.unwrap();

        let results = f
            .builder
            .ingest_many(vec![
                doc("a", "fn alpha() {}"),
                doc("bad", "FAIL fn broken() {}"),
                Document::new("empty", ""),
                doc("keep", "fn keep() {}"),
                doc("b", "fn beta() {}"),
            ])
            .await;

        assert_eq!(results.len(), 5);
        assert_eq!(results[0].as_ref().unwrap().status, IngestStatus::Created);
        assert!(matches!(results[1], Err(CodeSearchError::EmbeddingUnavailable(_))));
        assert!(matches!(results[2], Err(CodeSearchError::InvalidInput(_))));
        assert_eq!(results[3].as_ref().unwrap().status, IngestStatus::Unchanged);
        assert_eq!(results[4].as_ref().unwrap().status, IngestStatus::Created);

        let index = f.index.read().await;
        assert!(index.contains("a") && index.contains("b") && index.contains("keep"));
        assert!(!index.contains("bad"));
        // keep + a + bad + b
        assert_eq!(f.embedder.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_ingest_many_duplicate_ids_last_wins() {
        let f = fixture();
        let results = f
            .builder
            .ingest_many(vec![doc("a", "fn first() {}"), doc("a", "fn second() {}")])
            .await;

        assert_eq!(results[0].as_ref().unwrap().version, 1);
        assert_eq!(results[1].as_ref().unwrap().version, 2);
        let expected = HashingEmbedder::new(DIM).embed("fn second() {}").await.unwrap();
        assert_eq!(f.index.read().await.vector("a").unwrap(), expected.as_slice());
    }

    #[tokio::test]
    async fn test_cancel_before_write_changes_nothing() {
        let f = fixture();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = f
            .builder
            .ingest_with_cancel(doc("a", "HANG fn slow() {}"), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, CodeSearchError::Cancelled(_)));
        assert!(f.store.get("a").await.unwrap().is_none());
        assert!(f.index.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_rebuild_matches_live_index() {
        let f = fixture();
        for (id, text) in [("a", "fn parse() {}"), ("b", "fn render() {}"), ("c", "struct Parser;")] {
            f.builder.ingest(doc(id, text)).await.unwrap();
        }
        let query = HashingEmbedder::new(DIM).embed("parse").await.unwrap();
        let before = f.index.read().await.search(&query, 3, None, DistanceMetric::Cosine).unwrap();

        // simulate restart: the index is lost, the store survives
        *f.index.write().await = SimilarityIndex::new(DIM);
        assert_eq!(f.builder.rebuild().await.unwrap(), 3);

        let after = f.index.read().await.search(&query, 3, None, DistanceMetric::Cosine).unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_rebuild_rejects_dimension_drift() {
        let f = fixture();
        f.store
            .put(&StoredRecord {
                id: "old".to_string(),
                embedding: vec![0.5; DIM + 1],
                metadata: Default::default(),
                version: 1,
                content_hash: "x".to_string(),
                indexed_at: Utc::now(),
            })
            .await
            .unwrap();

        assert!(matches!(
            f.builder.rebuild().await,
            Err(CodeSearchError::DimensionMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_unchanged_ingest_heals_missing_index_entry() {
        let f = fixture();
        f.builder.ingest(doc("a", "fn alpha() {}")).await.unwrap();
        f.index.write().await.remove("a");

        let outcome = f.builder.ingest(doc("a", "fn alpha() {}")).await.unwrap();
        assert_eq!(outcome.status, IngestStatus::Unchanged);
        assert!(f.index.read().await.contains("a"));
    }

    #[tokio::test]
    async fn test_unchanged_ingest_replaces_stale_index_entry() {
        let f = fixture();
        f.builder.ingest(doc("a", "fn alpha() {}")).await.unwrap();
        let stale = HashingEmbedder::new(DIM).embed("fn other() {}").await.unwrap();
        f.index
            .write()
            .await
            .upsert("a", &stale, Default::default())
            .unwrap();

        let outcome = f.builder.ingest(doc("a", "fn alpha() {}")).await.unwrap();
        assert_eq!(outcome.status, IngestStatus::Unchanged);

        let stored = f.store.get("a").await.unwrap().unwrap();
        let index = f.index.read().await;
        assert_eq!(index.vector("a").unwrap(), stored.embedding.as_slice());
        assert_eq!(index.metadata("a").unwrap(), &stored.metadata);
    }

    #[tokio::test]
    async fn test_timed_out_write_keeps_index_on_stored_record() {
        let store = Arc::new(SlowAckStore::new(Duration::from_millis(500)));
        let (builder, index) = builder_over(store.clone(), Duration::from_millis(50));
        builder.ingest(doc("a", "fn alpha() {}")).await.unwrap();

        // the write lands but is never acknowledged in time
        store.slow.store(true, Ordering::SeqCst);
        let err = builder.ingest(doc("a", "fn beta() {}")).await.unwrap_err();
        assert!(matches!(err, CodeSearchError::StorageUnavailable(_)));

        let stored = store.get("a").await.unwrap().unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(index.read().await.vector("a").unwrap(), stored.embedding.as_slice());

        store.slow.store(false, Ordering::SeqCst);
        let outcome = builder.ingest(doc("a", "fn beta() {}")).await.unwrap();
        assert_eq!(outcome.status, IngestStatus::Unchanged);
        assert_eq!(outcome.version, 2);
        assert_eq!(index.read().await.vector("a").unwrap(), stored.embedding.as_slice());
    }

    #[tokio::test]
    async fn test_timed_out_delete_removes_index_entry() {
        let store = Arc::new(SlowAckStore::new(Duration::from_millis(500)));
        let (builder, index) = builder_over(store.clone(), Duration::from_millis(50));
        builder.ingest(doc("a", "fn alpha() {}")).await.unwrap();

        store.slow.store(true, Ordering::SeqCst);
        assert!(builder.delete("a").await.unwrap_err().is_retryable());

        assert!(store.get("a").await.unwrap().is_none());
        assert!(!index.read().await.contains("a"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dropped_caller_still_commits_index() {
        let store = Arc::new(SlowAckStore::new(Duration::from_millis(300)));
        store.slow.store(true, Ordering::SeqCst);
        let (builder, index) = builder_over(store.clone(), Duration::from_secs(5));

        let attempt =
            tokio::time::timeout(Duration::from_millis(100), builder.ingest(doc("a", "fn alpha() {}")))
                .await;
        assert!(attempt.is_err());

        // the detached mutation holds the writer lock until the index step is done
        let _guard = builder.write_lock.lock().await;
        let stored = store.get("a").await.unwrap().unwrap();
        let index = index.read().await;
        assert_eq!(index.len(), 1);
        assert_eq!(index.vector("a").unwrap(), stored.embedding.as_slice());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_queries_during_writes_see_only_stored_documents() {
        use crate::query::{Query, QueryEngine};

        let store = Arc::new(InMemoryVectorStore::new());
        let (builder, index) = builder_over(store.clone(), Duration::from_secs(5));
        let builder = Arc::new(builder);
        let engine = Arc::new(QueryEngine::new(
            index.clone(),
            Arc::new(HashingEmbedder::new(DIM)),
            DistanceMetric::Cosine,
            10,
        ));
        let ids: Vec<String> = (0..40).map(|i| format!("d{}", i)).collect();
        let deleted: HashSet<String> = ids.iter().step_by(3).cloned().collect();
        let done = Arc::new(AtomicBool::new(false));

        let writer = {
            let builder = builder.clone();
            let ids = ids.clone();
            let deleted = deleted.clone();
            tokio::spawn(async move {
                for id in &ids {
                    builder.ingest(doc(id, &format!("fn {}() {{}}", id))).await.unwrap();
                }
                for id in &deleted {
                    builder.delete(id).await.unwrap();
                }
                for id in ids.iter().filter(|id| !deleted.contains(*id)) {
                    builder.ingest(doc(id, &format!("fn {}_v2() {{}}", id))).await.unwrap();
                }
            })
        };

        let readers: Vec<_> = (0..3)
            .map(|_| {
                let engine = engine.clone();
                let store = store.clone();
                let ids = ids.clone();
                let deleted = deleted.clone();
                let done = done.clone();
                tokio::spawn(async move {
                    let mut rounds = 0;
                    while !done.load(Ordering::SeqCst) || rounds == 0 {
                        let response = engine.search(Query::text("fn d1()", 10)).await.unwrap();
                        assert!(response.results.len() <= 10);
                        let unique: HashSet<&str> =
                            response.results.iter().map(|r| r.id.as_str()).collect();
                        assert_eq!(unique.len(), response.results.len());
                        for result in &response.results {
                            assert!(ids.contains(&result.id));
                            // indexed entries are always stored first; deletions
                            // leave the store before the index
                            if !deleted.contains(&result.id) {
                                assert!(store.get(&result.id).await.unwrap().is_some());
                            }
                        }
                        rounds += 1;
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        writer.await.unwrap();
        done.store(true, Ordering::SeqCst);
        for reader in readers {
            reader.await.unwrap();
        }

        let records = store.scan().await.unwrap();
        let index = index.read().await;
        assert_eq!(records.len(), ids.len() - deleted.len());
        assert_eq!(index.len(), records.len());
        for record in records {
            assert_eq!(record.version, 2);
            assert_eq!(index.vector(&record.id).unwrap(), record.embedding.as_slice());
        }
    }
}
