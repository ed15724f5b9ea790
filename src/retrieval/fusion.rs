//! Multi-query retrieval with reciprocal rank fusion.
//!
//! Paraphrased sub-queries each produce a ranked list; documents are then
//! ordered by the RRF sum `Σ_q 1/(c + rank_q(d))` with `c = 60`. The
//! similarity carried on each result stays the maximum across sub-queries so
//! downstream score thresholds keep their meaning; RRF only decides order.

use async_trait::async_trait;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;
use std::time::Instant;

use super::rewrite::{NUM_PARAPHRASES, RewriteStrategy};
use super::{RetrievalMetrics, RetrievalOutcome, RetrievalStrategy, SearchResult, top_score};
use crate::error::RetrievalError;
use crate::types::StrategyKind;

/// RRF dampening constant.
pub(crate) const RRF_C: f32 = 60.0;

/// `rag_fusion`: paraphrase fan-out fused with reciprocal rank fusion.
pub struct FusionStrategy {
    inner: RewriteStrategy,
}

/// Intermediate fusion output, shared with the adaptive ladder.
pub(crate) struct FusedRetrieval {
    pub results: Vec<SearchResult>,
    pub fusion_gain: f32,
    pub overlap_ratio: f32,
    pub rewrite_failed: bool,
}

impl FusionStrategy {
    /// Build the strategy over a configured [`RewriteStrategy`] (which owns
    /// the paraphrase call and the bounded fan-out).
    #[must_use]
    pub fn new(inner: RewriteStrategy) -> Self {
        Self { inner }
    }

    /// Run one fused retrieval with an explicit paraphrase count. The
    /// adaptive ladder calls this directly with its per-step parameters.
    pub(crate) async fn fused_search(
        &self,
        query: &str,
        k: usize,
        num_queries: usize,
    ) -> Result<FusedRetrieval, RetrievalError> {
        let (queries, rewrite_failed) = match self.inner.paraphrase(query, num_queries).await {
            Ok(queries) => (queries, false),
            Err(err) => {
                tracing::warn!(error = %err, "paraphrase failed, fusing original query only");
                (vec![query.to_string()], true)
            }
        };

        let lists = self.inner.fan_out(&queries, k, "rag_fusion").await?;

        // The first list always belongs to the original query; its best
        // similarity is the naive baseline for the fusion gain.
        let top_naive = top_score(lists.first().map_or(&[][..], Vec::as_slice));

        let results = fuse(&lists, k);
        let fusion_gain = top_score(&results) - top_naive;
        let overlap_ratio = overlap_ratio(&lists, k);

        Ok(FusedRetrieval {
            results,
            fusion_gain,
            overlap_ratio,
            rewrite_failed,
        })
    }
}

/// Rank documents by the RRF sum across the given ranked lists, carrying the
/// maximum similarity per document, and return the best `k`.
pub(crate) fn fuse(lists: &[Vec<SearchResult>], k: usize) -> Vec<SearchResult> {
    let mut fused_scores: FxHashMap<String, f32> = FxHashMap::default();
    let mut best: FxHashMap<String, SearchResult> = FxHashMap::default();

    for list in lists {
        for (rank, result) in list.iter().enumerate() {
            *fused_scores.entry(result.id.clone()).or_insert(0.0) +=
                1.0 / (RRF_C + rank as f32 + 1.0);
            match best.get_mut(&result.id) {
                Some(existing) if existing.score >= result.score => {}
                Some(existing) => *existing = result.clone(),
                None => {
                    best.insert(result.id.clone(), result.clone());
                }
            }
        }
    }

    let mut ordered: Vec<(f32, SearchResult)> = best
        .into_iter()
        .map(|(id, result)| (fused_scores[&id], result))
        .collect();
    ordered.sort_by(|a, b| b.0.total_cmp(&a.0));
    ordered.truncate(k);
    ordered.into_iter().map(|(_, result)| result).collect()
}

/// Fraction of the top-`k` sets shared by *all* sub-queries.
pub(crate) fn overlap_ratio(lists: &[Vec<SearchResult>], k: usize) -> f32 {
    if lists.len() < 2 || k == 0 {
        return 1.0;
    }
    let mut intersection: FxHashSet<&str> = lists[0]
        .iter()
        .take(k)
        .map(|r| r.id.as_str())
        .collect();
    for list in &lists[1..] {
        let ids: FxHashSet<&str> = list.iter().take(k).map(|r| r.id.as_str()).collect();
        intersection.retain(|id| ids.contains(id));
    }
    intersection.len() as f32 / k as f32
}

#[async_trait]
impl RetrievalStrategy for FusionStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::RagFusion
    }

    async fn search(
        &self,
        query: &str,
        k: usize,
        _must_include: &[String],
    ) -> Result<RetrievalOutcome, RetrievalError> {
        let started = Instant::now();
        let fused = self.fused_search(query, k, NUM_PARAPHRASES).await?;

        let metrics = RetrievalMetrics {
            strategy: StrategyKind::RagFusion.as_str().to_string(),
            top_score: top_score(&fused.results),
            latency_ms: started.elapsed().as_millis() as u64,
            num_results: fused.results.len(),
            fusion_gain: Some(fused.fusion_gain),
            overlap_ratio: Some(fused.overlap_ratio),
            rewrite_failed: fused.rewrite_failed.then_some(true),
            ..Default::default()
        };
        Ok(RetrievalOutcome {
            results: fused.results,
            metrics,
        })
    }
}
