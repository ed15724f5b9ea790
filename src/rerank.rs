//! Optional cross-encoder re-scoring of retrieval candidates.
//!
//! A cross-encoder reads the full `(query, text)` pair instead of comparing
//! embeddings, so it can reorder the candidate pool more precisely than the
//! vector store. The encoder itself is external; this module owns the seam,
//! the score normalization, and the pass-through behavior when re-scoring
//! is off or broken.

use async_trait::async_trait;
use std::sync::Arc;

use crate::retrieval::SearchResult;

/// Scores `(query, text)` pairs. Higher is more relevant; any real-valued
/// range is accepted and normalized by the reranker.
#[async_trait]
pub trait CrossEncoder: Send + Sync {
    /// Return one score per text, in input order.
    async fn score_pairs(&self, query: &str, texts: &[String]) -> Result<Vec<f32>, String>;
}

/// Re-scores the top of the candidate pool with a cross-encoder.
pub struct Reranker {
    encoder: Option<Arc<dyn CrossEncoder>>,
    enabled: bool,
}

impl Reranker {
    /// A reranker that re-scores through `encoder` when enabled.
    #[must_use]
    pub fn new(encoder: Arc<dyn CrossEncoder>, enabled: bool) -> Self {
        Self {
            encoder: Some(encoder),
            enabled,
        }
    }

    /// A reranker that always passes candidates through unchanged.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            encoder: None,
            enabled: false,
        }
    }

    /// Whether re-scoring will actually run.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.enabled && self.encoder.is_some()
    }

    /// Rerank `candidates` and return the best `k`.
    ///
    /// Every field except `score` is preserved; the new score is the encoder
    /// output min-max normalized to [0, 1]. Disabled or failing encoders
    /// leave the input order and scores untouched (truncated to `k`).
    pub async fn rerank(
        &self,
        query: &str,
        candidates: Vec<SearchResult>,
        k: usize,
    ) -> Vec<SearchResult> {
        let Some(encoder) = self.encoder.as_ref().filter(|_| self.enabled) else {
            return truncate(candidates, k);
        };
        if candidates.len() <= 1 {
            return truncate(candidates, k);
        }

        let texts: Vec<String> = candidates
            .iter()
            .map(|c| format!("{} {}", c.title, c.snippet))
            .collect();
        let scores = match encoder.score_pairs(query, &texts).await {
            Ok(scores) if scores.len() == candidates.len() => scores,
            Ok(_) => {
                tracing::warn!("cross-encoder returned wrong score count, passing through");
                return truncate(candidates, k);
            }
            Err(err) => {
                tracing::warn!(error = %err, "cross-encoder failed, passing through");
                return truncate(candidates, k);
            }
        };

        let normalized = normalize_min_max(&scores);
        let mut reranked: Vec<SearchResult> = candidates
            .into_iter()
            .zip(normalized)
            .map(|(mut candidate, score)| {
                candidate.score = score;
                candidate
            })
            .collect();
        reranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        truncate(reranked, k)
    }
}

fn truncate(mut results: Vec<SearchResult>, k: usize) -> Vec<SearchResult> {
    results.truncate(k);
    results
}

/// Min-max normalize into [0, 1]. A constant input maps to all-0.5.
fn normalize_min_max(scores: &[f32]) -> Vec<f32> {
    let min = scores.iter().copied().fold(f32::INFINITY, f32::min);
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let spread = max - min;
    if spread <= f32::EPSILON {
        return vec![0.5; scores.len()];
    }
    scores.iter().map(|s| (s - min) / spread).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, score: f32) -> SearchResult {
        SearchResult {
            id: id.to_string(),
            title: id.to_string(),
            snippet: "text".to_string(),
            score,
            source: "test".to_string(),
            doc_type: Some("sfs".to_string()),
            date: None,
            retriever: "test".to_string(),
        }
    }

    struct Reversing;

    #[async_trait]
    impl CrossEncoder for Reversing {
        async fn score_pairs(&self, _query: &str, texts: &[String]) -> Result<Vec<f32>, String> {
            // Scores increase with input position, reversing the order.
            Ok((0..texts.len()).map(|i| i as f32).collect())
        }
    }

    struct Broken;

    #[async_trait]
    impl CrossEncoder for Broken {
        async fn score_pairs(&self, _query: &str, _texts: &[String]) -> Result<Vec<f32>, String> {
            Err("model crashed".to_string())
        }
    }

    #[tokio::test]
    async fn disabled_reranker_passes_through() {
        let reranker = Reranker::disabled();
        let results = reranker
            .rerank("q", vec![candidate("a", 0.9), candidate("b", 0.8)], 2)
            .await;
        assert_eq!(results[0].id, "a");
        assert!((results[0].score - 0.9).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn reranker_reorders_and_normalizes() {
        let reranker = Reranker::new(Arc::new(Reversing), true);
        let results = reranker
            .rerank("q", vec![candidate("a", 0.9), candidate("b", 0.1)], 2)
            .await;
        assert_eq!(results[0].id, "b");
        assert!((results[0].score - 1.0).abs() < f32::EPSILON);
        assert!((results[1].score - 0.0).abs() < f32::EPSILON);
        // Non-score fields survive.
        assert_eq!(results[0].doc_type.as_deref(), Some("sfs"));
    }

    #[tokio::test]
    async fn failing_encoder_passes_through() {
        let reranker = Reranker::new(Arc::new(Broken), true);
        let results = reranker
            .rerank("q", vec![candidate("a", 0.9), candidate("b", 0.8)], 1)
            .await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "a");
    }
}
