//! Embedding cache for one dataset snapshot.
//!
//! Vectors are stored in the same order as the record table they were built
//! from. The index is never patched: a reload builds a new one.

use rayon::prelude::*;

use super::{cosine_similarity, EmbeddingError, VectorProvider};

#[derive(Debug, Clone, Default)]
pub struct EmbeddingIndex {
    vectors: Vec<Vec<f32>>,
}

impl EmbeddingIndex {
    /// Embed every keyword in one batch call.
    pub fn build(
        keywords: &[String],
        provider: &dyn VectorProvider,
    ) -> Result<Self, EmbeddingError> {
        let vectors = provider.embed_batch(keywords)?;
        if vectors.len() != keywords.len() {
            return Err(EmbeddingError::EmbeddingFailed(format!(
                "expected {} vectors, provider returned {}",
                keywords.len(),
                vectors.len()
            )));
        }

        Ok(Self { vectors })
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        self.vectors.get(position).map(|v| v.as_slice())
    }

    /// Score the rows at `positions` against `query`, keeping the order of
    /// `positions`.
    pub fn score(&self, query: &[f32], positions: &[usize]) -> Vec<f32> {
        positions
            .par_iter()
            .map(|&pos| {
                self.vector(pos)
                    .map(|v| cosine_similarity(query, v))
                    .unwrap_or(0.0)
            })
            .collect()
    }
}

/// Score freshly embedded candidate vectors against `query`.
pub fn score_vectors(query: &[f32], vectors: &[Vec<f32>]) -> Vec<f32> {
    vectors
        .par_iter()
        .map(|v| cosine_similarity(query, v))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Axis;

    impl VectorProvider for Axis {
        fn name(&self) -> &str {
            "axis"
        }

        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts
                .iter()
                .map(|t| match t.as_str() {
                    "x" => vec![1.0, 0.0],
                    "y" => vec![0.0, 1.0],
                    _ => vec![0.70710677, 0.70710677],
                })
                .collect())
        }
    }

    #[test]
    fn test_build_keeps_table_order() {
        let keywords = vec!["y".to_string(), "x".to_string(), "xy".to_string()];
        let index = EmbeddingIndex::build(&keywords, &Axis).unwrap();

        assert_eq!(index.len(), 3);
        assert_eq!(index.vector(0), Some(&[0.0, 1.0][..]));
        assert_eq!(index.vector(1), Some(&[1.0, 0.0][..]));
        assert!(index.vector(3).is_none());
    }

    #[test]
    fn test_score_subset_in_position_order() {
        let keywords = vec!["x".to_string(), "y".to_string(), "xy".to_string()];
        let index = EmbeddingIndex::build(&keywords, &Axis).unwrap();

        let scores = index.score(&[1.0, 0.0], &[2, 0]);
        assert_eq!(scores.len(), 2);
        assert!((scores[0] - 0.70710677).abs() < 1e-5);
        assert!((scores[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_empty_build() {
        let index = EmbeddingIndex::build(&[], &Axis).unwrap();
        assert_eq!(index.len(), 0);
    }
}
