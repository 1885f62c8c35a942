//! Maximal Marginal Relevance re-ranking.
//!
//! Greedily picks results that are relevant to the query but not redundant
//! with what has already been picked. Snippets from a file or language that
//! is already represented get a smaller bonus, spreading results across the
//! corpus.

use std::collections::HashMap;
use tracing::debug;

use crate::similarity::cosine_similarity;

/// Metadata key used for the per-path diversity bonus
pub const PATH_KEY: &str = "path";
/// Metadata key used for the per-language diversity bonus
pub const LANG_KEY: &str = "lang";
/// Metadata keys for a snippet's first and last line in its file
pub const START_LINE_KEY: &str = "start_line";
pub const END_LINE_KEY: &str = "end_line";

const PATH_DECAY: f32 = 0.75;
const LANG_DECAY: f32 = 0.5;

pub struct MmrCandidate<'a> {
    pub embedding: &'a [f32],
    pub path: Option<&'a str>,
    pub lang: Option<&'a str>,
}

/// Line range of a snippet within a file
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Span<'a> {
    pub path: &'a str,
    pub start_line: u64,
    pub end_line: u64,
}

impl Span<'_> {
    fn overlaps(&self, other: &Span<'_>) -> bool {
        self.path == other.path
            && self.start_line <= other.end_line
            && other.start_line <= self.end_line
    }
}

/// Indices of candidates to keep after dropping overlapping snippets.
///
/// `spans` is in rank order; a snippet is dropped when a better ranked,
/// already kept snippet covers any of its lines in the same file. Snippets
/// without a span are always kept.
pub fn non_overlapping(spans: &[Option<Span<'_>>]) -> Vec<usize> {
    let mut kept: Vec<Span<'_>> = Vec::new();
    let mut indices = Vec::with_capacity(spans.len());

    for (i, span) in spans.iter().enumerate() {
        match span {
            Some(span) if kept.iter().any(|k| k.overlaps(span)) => {
                debug!(
                    "Dropping overlapping snippet {}:{}-{}",
                    span.path, span.start_line, span.end_line
                );
            }
            Some(span) => {
                kept.push(*span);
                indices.push(i);
            }
            None => indices.push(i),
        }
    }
    indices
}

/// Indices of up to `k` candidates, in selection order.
///
/// `lambda` = 1 ranks purely by relevance, 0 purely by novelty.
pub fn select(query: &[f32], candidates: &[MmrCandidate<'_>], lambda: f32, k: usize) -> Vec<usize> {
    let k = k.min(candidates.len());
    let relevance: Vec<f32> = candidates
        .iter()
        .map(|c| cosine_similarity(query, c.embedding))
        .collect();

    let mut selected: Vec<usize> = Vec::with_capacity(k);
    let mut path_counts: HashMap<&str, i32> = HashMap::new();
    let mut lang_counts: HashMap<&str, i32> = HashMap::new();

    while selected.len() < k {
        let mut best: Option<(usize, f32)> = None;

        for (i, candidate) in candidates.iter().enumerate() {
            if selected.contains(&i) {
                continue;
            }

            let redundancy = selected
                .iter()
                .map(|&j| cosine_similarity(candidate.embedding, candidates[j].embedding))
                .fold(0.0f32, f32::max);

            let mut score = lambda * relevance[i] - (1.0 - lambda) * redundancy;
            if let Some(path) = candidate.path {
                score += PATH_DECAY.powi(*path_counts.get(path).unwrap_or(&0));
            }
            if let Some(lang) = candidate.lang {
                score += LANG_DECAY.powi(*lang_counts.get(lang).unwrap_or(&0));
            }

            // strict comparison keeps the earlier (better-ranked) candidate on ties
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((i, score));
            }
        }

        let Some((i, _)) = best else { break };
        selected.push(i);
        if let Some(path) = candidates[i].path {
            *path_counts.entry(path).or_insert(0) += 1;
        }
        if let Some(lang) = candidates[i].lang {
            *lang_counts.entry(lang).or_insert(0) += 1;
        }
    }

    selected
}
