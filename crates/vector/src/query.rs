use codesearch_common::{CodeSearchError, Result};
use codesearch_embed::Embedder;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::filter::MetadataFilter;
use crate::index::SimilarityIndex;
use crate::mmr::{self, MmrCandidate, Span, END_LINE_KEY, LANG_KEY, PATH_KEY, START_LINE_KEY};
use crate::similarity::DistanceMetric;
use crate::types::SearchResult;

/// Candidate pool size per requested result when diversifying
const MMR_POOL_FACTOR: usize = 4;

/// What to search with
#[derive(Debug, Clone, PartialEq)]
pub enum QueryInput {
    /// Natural-language or code text, embedded with the engine's embedder
    Text(String),
    /// A precomputed embedding
    Vector(Vec<f32>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub input: QueryInput,
    pub k: usize,
    pub filter: Option<MetadataFilter>,
    /// Overrides the engine's default metric
    pub metric: Option<DistanceMetric>,
    /// MMR trade-off in [0, 1]; `None` returns plain top-k
    pub diversity: Option<f32>,
}

impl Query {
    pub fn text(text: impl Into<String>, k: usize) -> Self {
        Self::new(QueryInput::Text(text.into()), k)
    }

    pub fn vector(vector: Vec<f32>, k: usize) -> Self {
        Self::new(QueryInput::Vector(vector), k)
    }

    fn new(input: QueryInput, k: usize) -> Self {
        Self {
            input,
            k,
            filter: None,
            metric: None,
            diversity: None,
        }
    }

    pub fn with_filter(mut self, filter: MetadataFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = Some(metric);
        self
    }

    pub fn with_diversity(mut self, lambda: f32) -> Self {
        self.diversity = Some(lambda);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub results: Vec<SearchResult>,
    pub requested_k: usize,
    /// k after clamping to the configured maximum
    pub effective_k: usize,
    pub clamped: bool,
    pub metric: DistanceMetric,
}

/// Answers similarity queries against the shared index
pub struct QueryEngine {
    index: Arc<RwLock<SimilarityIndex>>,
    embedder: Arc<dyn Embedder>,
    default_metric: DistanceMetric,
    max_k: usize,
}

impl QueryEngine {
    pub fn new(
        index: Arc<RwLock<SimilarityIndex>>,
        embedder: Arc<dyn Embedder>,
        default_metric: DistanceMetric,
        max_k: usize,
    ) -> Self {
        Self {
            index,
            embedder,
            default_metric,
            max_k,
        }
    }

    pub fn max_k(&self) -> usize {
        self.max_k
    }

    pub fn default_metric(&self) -> DistanceMetric {
        self.default_metric
    }

    fn validate(&self, query: &Query) -> Result<()> {
        if query.k == 0 {
            return Err(CodeSearchError::invalid_query("k must be at least 1"));
        }
        if let Some(lambda) = query.diversity {
            if !(0.0..=1.0).contains(&lambda) {
                return Err(CodeSearchError::invalid_query(format!(
                    "diversity must be within [0, 1], got {}",
                    lambda
                )));
            }
        }
        if let Some(filter) = &query.filter {
            filter.validate()?;
        }
        match &query.input {
            QueryInput::Text(text) if text.trim().is_empty() => {
                Err(CodeSearchError::invalid_query("query text cannot be empty"))
            }
            QueryInput::Vector(vector) if vector.iter().any(|v| !v.is_finite()) => Err(
                CodeSearchError::invalid_query("query vector contains non-finite values"),
            ),
            _ => Ok(()),
        }
    }

    async fn query_vector(&self, input: QueryInput) -> Result<Vec<f32>> {
        match input {
            QueryInput::Vector(vector) => Ok(vector),
            QueryInput::Text(text) => self.embedder.embed(&text).await.map_err(|e| {
                warn!("Query embedding failed: {}", e);
                CodeSearchError::query_failed(e)
            }),
        }
    }

    /// Run a query. Read-only: never touches the store or the index contents.
    pub async fn search(&self, query: Query) -> Result<QueryResponse> {
        self.validate(&query)?;

        let requested_k = query.k;
        let effective_k = requested_k.min(self.max_k);
        let clamped = effective_k < requested_k;
        if clamped {
            debug!("Clamping k from {} to {}", requested_k, effective_k);
        }
        let metric = query.metric.unwrap_or(self.default_metric);

        let vector = self.query_vector(query.input).await?;
        let filter = query.filter.as_ref().filter(|f| !f.is_empty());

        let index = self.index.read().await;
        if vector.len() != index.dimension() {
            return Err(CodeSearchError::dimension_mismatch(index.dimension(), vector.len()));
        }

        let results = match query.diversity {
            None => index.search(&vector, effective_k, filter, metric)?,
            Some(lambda) => {
                let pool_size = (effective_k * MMR_POOL_FACTOR).min(self.max_k * MMR_POOL_FACTOR);
                let pool = index.search_with_vectors(&vector, pool_size, filter, metric)?;
                drop(index);
                diversify(&vector, pool, lambda, effective_k)
            }
        };

        debug!(
            "Query returned {} results (k={}, metric={})",
            results.len(),
            effective_k,
            metric
        );

        Ok(QueryResponse {
            results,
            requested_k,
            effective_k,
            clamped,
            metric,
        })
    }
}

fn diversify(
    query: &[f32],
    pool: Vec<(SearchResult, Vec<f32>)>,
    lambda: f32,
    k: usize,
) -> Vec<SearchResult> {
    let spans: Vec<Option<Span<'_>>> = pool.iter().map(|(result, _)| span_of(result)).collect();
    let distinct: Vec<&(SearchResult, Vec<f32>)> = mmr::non_overlapping(&spans)
        .into_iter()
        .map(|i| &pool[i])
        .collect();

    let candidates: Vec<MmrCandidate<'_>> = distinct
        .iter()
        .map(|(result, embedding)| MmrCandidate {
            embedding,
            path: result.metadata.get(PATH_KEY).map(String::as_str),
            lang: result.metadata.get(LANG_KEY).map(String::as_str),
        })
        .collect();

    let order = mmr::select(query, &candidates, lambda, k);
    order.into_iter().map(|i| distinct[i].0.clone()).collect()
}

fn span_of(result: &SearchResult) -> Option<Span<'_>> {
    let line = |key: &str| result.metadata.get(key)?.trim().parse::<u64>().ok();
    Some(Span {
        path: result.metadata.get(PATH_KEY)?,
        start_line: line(START_LINE_KEY)?,
        end_line: line(END_LINE_KEY)?,
    })
}
