use codesearch_common::CodeSearchError;
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How two embeddings are compared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// Cosine similarity, higher is closer
    #[default]
    Cosine,
    /// Euclidean distance, lower is closer
    Euclidean,
}

impl DistanceMetric {
    /// Raw score reported in results.
    ///
    /// `query_norm` and `vector_norm` are the precomputed L2 norms; only
    /// cosine uses them.
    pub fn score(&self, query: &[f32], query_norm: f32, vector: &[f32], vector_norm: f32) -> f32 {
        match self {
            Self::Cosine => {
                if query_norm == 0.0 || vector_norm == 0.0 {
                    0.0
                } else {
                    dot(query, vector) / (query_norm * vector_norm)
                }
            }
            Self::Euclidean => euclidean_distance(query, vector),
        }
    }

    /// Ranking key where larger always means closer
    pub fn rank_key(&self, score: f32) -> f32 {
        match self {
            Self::Cosine => score,
            Self::Euclidean => -score,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::Euclidean => "euclidean",
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceMetric {
    type Err = CodeSearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cosine" => Ok(Self::Cosine),
            "euclidean" | "l2" => Ok(Self::Euclidean),
            other => Err(CodeSearchError::invalid_query(format!(
                "unknown distance metric '{}'",
                other
            ))),
        }
    }
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    ArrayView1::from(a).dot(&ArrayView1::from(b))
}

pub fn l2_norm(a: &[f32]) -> f32 {
    dot(a, a).sqrt()
}

/// Cosine similarity; 0 when either vector has zero length
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    DistanceMetric::Cosine.score(a, l2_norm(a), b, l2_norm(b))
}

pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-2.0, 0.0]) + 1.0).abs() < 1e-6);
        // magnitude does not matter
        assert!((cosine_similarity(&[3.0, 4.0], &[6.0, 8.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_vector() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_euclidean_distance() {
        assert!((euclidean_distance(&[0.0, 0.0], &[3.0, 4.0]) - 5.0).abs() < 1e-6);
        assert_eq!(euclidean_distance(&[1.0, 1.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_rank_key_orders_closer_first() {
        let near = DistanceMetric::Euclidean.rank_key(0.1);
        let far = DistanceMetric::Euclidean.rank_key(0.9);
        assert!(near > far);

        let near = DistanceMetric::Cosine.rank_key(0.9);
        let far = DistanceMetric::Cosine.rank_key(0.1);
        assert!(near > far);
    }

    #[test]
    fn test_parse_metric() {
        assert_eq!("Cosine".parse::<DistanceMetric>().unwrap(), DistanceMetric::Cosine);
        assert_eq!("l2".parse::<DistanceMetric>().unwrap(), DistanceMetric::Euclidean);
        assert!("hamming".parse::<DistanceMetric>().is_err());
        assert_eq!(DistanceMetric::default().to_string(), "cosine");
    }
}
