use codesearch_common::{CodeSearchError, Result};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use crate::filter::MetadataFilter;
use crate::similarity::{l2_norm, DistanceMetric};
use crate::types::{Metadata, SearchResult, StoredRecord};

/// Exact in-memory similarity index.
///
/// Vectors live in one flat buffer (`slot * dimension ..`), with ids,
/// norms and metadata in parallel vectors. Insert, replace and remove are
/// O(dimension); removal swaps the last slot into the hole.
///
/// The index itself is not synchronised. Callers share it behind a
/// reader-writer lock so searches see either all of a mutation or none.
#[derive(Debug, Clone)]
pub struct SimilarityIndex {
    dimension: usize,
    ids: Vec<String>,
    vectors: Vec<f32>,
    norms: Vec<f32>,
    metadata: Vec<Metadata>,
    slots: HashMap<String, usize>,
}

/// Heap element ordered so that the *worst* candidate is the maximum
#[derive(Debug)]
struct Ranked<'a> {
    key: f32,
    score: f32,
    id: &'a str,
    slot: usize,
}

impl Ord for Ranked<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .key
            .total_cmp(&self.key)
            .then_with(|| self.id.cmp(other.id))
    }
}

impl PartialOrd for Ranked<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Ranked<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked<'_> {}

impl SimilarityIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            ids: Vec::new(),
            vectors: Vec::new(),
            norms: Vec::new(),
            metadata: Vec::new(),
            slots: HashMap::new(),
        }
    }

    /// Build an index from a store scan
    pub fn from_records(dimension: usize, records: &[StoredRecord]) -> Result<Self> {
        let mut index = Self::new(dimension);
        index.ids.reserve(records.len());
        index.vectors.reserve(records.len() * dimension);
        for record in records {
            index.upsert(&record.id, &record.embedding, record.metadata.clone())?;
        }
        Ok(index)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.slots.contains_key(id)
    }

    pub fn vector(&self, id: &str) -> Option<&[f32]> {
        self.slots.get(id).map(|&slot| self.vector_at(slot))
    }

    pub fn metadata(&self, id: &str) -> Option<&Metadata> {
        self.slots.get(id).map(|&slot| &self.metadata[slot])
    }

    fn vector_at(&self, slot: usize) -> &[f32] {
        &self.vectors[slot * self.dimension..(slot + 1) * self.dimension]
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(CodeSearchError::dimension_mismatch(self.dimension, vector.len()));
        }
        Ok(())
    }

    /// Insert or replace the entry for `id`. Returns true if it replaced one.
    pub fn upsert(&mut self, id: &str, embedding: &[f32], metadata: Metadata) -> Result<bool> {
        self.check_dimension(embedding)?;
        let norm = l2_norm(embedding);

        if let Some(&slot) = self.slots.get(id) {
            let start = slot * self.dimension;
            self.vectors[start..start + self.dimension].copy_from_slice(embedding);
            self.norms[slot] = norm;
            self.metadata[slot] = metadata;
            return Ok(true);
        }

        let slot = self.ids.len();
        self.ids.push(id.to_string());
        self.vectors.extend_from_slice(embedding);
        self.norms.push(norm);
        self.metadata.push(metadata);
        self.slots.insert(id.to_string(), slot);
        Ok(false)
    }

    /// Remove the entry for `id`. Returns false if there was none.
    pub fn remove(&mut self, id: &str) -> bool {
        let Some(slot) = self.slots.remove(id) else {
            return false;
        };

        let last = self.ids.len() - 1;
        if slot != last {
            let dim = self.dimension;
            self.vectors.copy_within(last * dim..(last + 1) * dim, slot * dim);
        }
        self.vectors.truncate(last * self.dimension);
        self.ids.swap_remove(slot);
        self.norms.swap_remove(slot);
        self.metadata.swap_remove(slot);

        if slot != last {
            self.slots.insert(self.ids[slot].clone(), slot);
        }
        true
    }

    fn top_k(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
        metric: DistanceMetric,
    ) -> Result<Vec<Ranked<'_>>> {
        self.check_dimension(query)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let query_norm = l2_norm(query);
        let filter = filter.filter(|f| !f.is_empty());
        let mut heap: BinaryHeap<Ranked<'_>> = BinaryHeap::with_capacity(k + 1);

        for slot in 0..self.ids.len() {
            if let Some(filter) = filter {
                if !filter.matches(&self.metadata[slot]) {
                    continue;
                }
            }

            let score = metric.score(query, query_norm, self.vector_at(slot), self.norms[slot]);
            let candidate = Ranked {
                key: metric.rank_key(score),
                score,
                id: &self.ids[slot],
                slot,
            };

            if heap.len() < k {
                heap.push(candidate);
            } else if let Some(worst) = heap.peek() {
                if candidate < *worst {
                    heap.pop();
                    heap.push(candidate);
                }
            }
        }

        // ascending under the "worst is greatest" order = best first
        Ok(heap.into_sorted_vec())
    }

    /// Exact top-k search.
    ///
    /// The filter is applied before ranking, so up to `k` matching entries
    /// come back whenever that many exist. Equal scores are ordered by
    /// ascending id.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
        metric: DistanceMetric,
    ) -> Result<Vec<SearchResult>> {
        Ok(self
            .top_k(query, k, filter, metric)?
            .into_iter()
            .map(|r| SearchResult {
                id: r.id.to_string(),
                score: r.score,
                metadata: self.metadata[r.slot].clone(),
            })
            .collect())
    }

    /// Same as [`search`](Self::search), also returning each hit's embedding
    pub fn search_with_vectors(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
        metric: DistanceMetric,
    ) -> Result<Vec<(SearchResult, Vec<f32>)>> {
        Ok(self
            .top_k(query, k, filter, metric)?
            .into_iter()
            .map(|r| {
                (
                    SearchResult {
                        id: r.id.to_string(),
                        score: r.score,
                        metadata: self.metadata[r.slot].clone(),
                    },
                    self.vector_at(r.slot).to_vec(),
                )
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::{cosine_similarity, euclidean_distance};

    fn meta(path: &str) -> Metadata {
        [("path".to_string(), path.to_string())].into_iter().collect()
    }

    fn ids(results: &[SearchResult]) -> Vec<&str> {
        results.iter().map(|r| r.id.as_str()).collect()
    }

    /// Small deterministic pseudo-random generator for reference checks
    fn lcg_vectors(n: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
        let mut state = seed;
        (0..n)
            .map(|_| {
                (0..dim)
                    .map(|_| {
                        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                        ((state >> 33) as f32 / (1u64 << 31) as f32) - 0.5
                    })
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_euclidean_scenario() {
        let mut index = SimilarityIndex::new(2);
        index.upsert("near", &[0.1, 0.0], meta("a")).unwrap();
        index.upsert("mid", &[0.5, 0.0], meta("b")).unwrap();
        index.upsert("far", &[0.9, 0.0], meta("c")).unwrap();

        let results = index
            .search(&[0.0, 0.0], 2, None, DistanceMetric::Euclidean)
            .unwrap();

        assert_eq!(ids(&results), vec!["near", "mid"]);
        assert!((results[0].score - 0.1).abs() < 1e-6);
        assert!((results[1].score - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_matches_brute_force_reference() {
        let vectors = lcg_vectors(200, 8, 7);
        let mut index = SimilarityIndex::new(8);
        for (i, v) in vectors.iter().enumerate() {
            index.upsert(&format!("doc-{:03}", i), v, Metadata::new()).unwrap();
        }
        let query = &lcg_vectors(1, 8, 99)[0];

        for metric in [DistanceMetric::Cosine, DistanceMetric::Euclidean] {
            let mut reference: Vec<(String, f32)> = vectors
                .iter()
                .enumerate()
                .map(|(i, v)| {
                    let score = match metric {
                        DistanceMetric::Cosine => cosine_similarity(query, v),
                        DistanceMetric::Euclidean => euclidean_distance(query, v),
                    };
                    (format!("doc-{:03}", i), score)
                })
                .collect();
            reference.sort_by(|a, b| {
                metric
                    .rank_key(b.1)
                    .total_cmp(&metric.rank_key(a.1))
                    .then_with(|| a.0.cmp(&b.0))
            });

            let results = index.search(query, 10, None, metric).unwrap();
            let expected: Vec<&str> = reference.iter().take(10).map(|(id, _)| id.as_str()).collect();
            assert_eq!(ids(&results), expected, "metric {}", metric);
        }
    }

    #[test]
    fn test_ties_break_by_ascending_id() {
        let mut index = SimilarityIndex::new(2);
        for id in ["d", "b", "a", "c"] {
            index.upsert(id, &[1.0, 0.0], Metadata::new()).unwrap();
        }
        let results = index.search(&[1.0, 0.0], 3, None, DistanceMetric::Cosine).unwrap();
        assert_eq!(ids(&results), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_filter_applied_before_ranking() {
        let mut index = SimilarityIndex::new(2);
        // the closest entries all fail the filter
        for i in 0..10 {
            index
                .upsert(&format!("x{}", i), &[1.0, 0.01 * i as f32], meta("vendor/lib.rs"))
                .unwrap();
        }
        for i in 0..5 {
            index
                .upsert(&format!("s{}", i), &[0.0, 1.0 + i as f32], meta("src/lib.rs"))
                .unwrap();
        }

        let filter = MetadataFilter::new().prefix("path", "src/");
        let results = index
            .search(&[1.0, 0.0], 3, Some(&filter), DistanceMetric::Cosine)
            .unwrap();

        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.metadata["path"].starts_with("src/")));
    }

    #[test]
    fn test_fewer_entries_than_k() {
        let mut index = SimilarityIndex::new(2);
        index.upsert("a", &[1.0, 0.0], Metadata::new()).unwrap();
        let results = index.search(&[1.0, 0.0], 5, None, DistanceMetric::Cosine).unwrap();
        assert_eq!(results.len(), 1);
        assert!(index.search(&[1.0, 0.0], 0, None, DistanceMetric::Cosine).unwrap().is_empty());
    }

    #[test]
    fn test_upsert_replaces_single_entry() {
        let mut index = SimilarityIndex::new(2);
        assert!(!index.upsert("a", &[1.0, 0.0], meta("old")).unwrap());
        assert!(index.upsert("a", &[0.0, 1.0], meta("new")).unwrap());

        assert_eq!(index.len(), 1);
        assert_eq!(index.vector("a").unwrap(), &[0.0, 1.0]);
        assert_eq!(index.metadata("a").unwrap()["path"], "new");

        let results = index.search(&[0.0, 1.0], 5, None, DistanceMetric::Cosine).unwrap();
        assert_eq!(results.len(), 1);
        assert!((results[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_remove_swaps_last_into_hole() {
        let mut index = SimilarityIndex::new(2);
        index.upsert("a", &[1.0, 0.0], meta("a")).unwrap();
        index.upsert("b", &[0.0, 1.0], meta("b")).unwrap();
        index.upsert("c", &[1.0, 1.0], meta("c")).unwrap();

        assert!(index.remove("a"));
        assert!(!index.remove("a"));

        assert_eq!(index.len(), 2);
        assert!(!index.contains("a"));
        assert_eq!(index.vector("c").unwrap(), &[1.0, 1.0]);
        assert_eq!(index.metadata("c").unwrap()["path"], "c");
        assert_eq!(index.vector("b").unwrap(), &[0.0, 1.0]);

        let results = index.search(&[1.0, 0.0], 10, None, DistanceMetric::Cosine).unwrap();
        assert_eq!(ids(&results), vec!["c", "b"]);

        assert!(index.remove("b"));
        assert!(index.remove("c"));
        assert!(index.is_empty());
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut index = SimilarityIndex::new(3);
        assert!(matches!(
            index.upsert("a", &[1.0, 0.0], Metadata::new()),
            Err(CodeSearchError::DimensionMismatch { expected: 3, actual: 2 })
        ));
        assert!(matches!(
            index.search(&[1.0], 1, None, DistanceMetric::Cosine),
            Err(CodeSearchError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_search_with_vectors() {
        let mut index = SimilarityIndex::new(2);
        index.upsert("a", &[1.0, 0.0], Metadata::new()).unwrap();
        index.upsert("b", &[0.6, 0.8], Metadata::new()).unwrap();

        let hits = index
            .search_with_vectors(&[1.0, 0.0], 2, None, DistanceMetric::Cosine)
            .unwrap();
        assert_eq!(hits[0].0.id, "a");
        assert_eq!(hits[0].1, vec![1.0, 0.0]);
        assert_eq!(hits[1].1, vec![0.6, 0.8]);
    }
}
