//! Single-query retrieval with a widened fetch.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

use super::{RetrievalMetrics, RetrievalOutcome, RetrievalStrategy, Retriever, top_score};
use crate::error::RetrievalError;
use crate::types::StrategyKind;

/// Fetch multiplier: a request for `k` results pulls `3k` candidates so the
/// grader and reranker have a pool to work with.
const FETCH_MULTIPLIER: usize = 3;

/// `parallel_v1`: embed once, fetch `3k` nearest, no fusion.
pub struct ParallelStrategy {
    retriever: Arc<Retriever>,
}

impl ParallelStrategy {
    /// Build the strategy over a shared [`Retriever`].
    #[must_use]
    pub fn new(retriever: Arc<Retriever>) -> Self {
        Self { retriever }
    }
}

#[async_trait]
impl RetrievalStrategy for ParallelStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ParallelV1
    }

    async fn search(
        &self,
        query: &str,
        k: usize,
        _must_include: &[String],
    ) -> Result<RetrievalOutcome, RetrievalError> {
        let started = Instant::now();
        let hits = self.retriever.fetch(query, k * FETCH_MULTIPLIER).await?;
        let results = Retriever::to_results(hits, "vector_search");

        let metrics = RetrievalMetrics {
            strategy: StrategyKind::ParallelV1.as_str().to_string(),
            top_score: top_score(&results),
            latency_ms: started.elapsed().as_millis() as u64,
            num_results: results.len(),
            ..Default::default()
        };
        tracing::debug!(
            strategy = %StrategyKind::ParallelV1,
            results = results.len(),
            top_score = metrics.top_score,
            "retrieval complete"
        );
        Ok(RetrievalOutcome { results, metrics })
    }
}
