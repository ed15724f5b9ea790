//! Retrieval strategies over the vector store.
//!
//! Every strategy implements the same contract: given a query, a result
//! budget `k`, and optional `must_include` tokens, produce a ranked list of
//! [`SearchResult`]s plus [`RetrievalMetrics`]. The orchestrator holds a
//! map from [`StrategyKind`] to implementation and never cares which one
//! runs:
//!
//! - [`parallel::ParallelStrategy`] — one widened vector search, no fusion
//! - [`rewrite::RewriteStrategy`] — LLM paraphrases, merge by max score
//! - [`fusion::FusionStrategy`] — reciprocal rank fusion across paraphrases
//! - [`adaptive::AdaptiveStrategy`] — confidence-driven escalation ladder
//!
//! Sub-queries share [`Retriever`], which owns the embed→search round trip,
//! its timeout, and the single retry the store contract allows.

pub mod adaptive;
pub mod confidence;
pub mod fusion;
pub mod parallel;
pub mod rewrite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::embedding::EmbeddingProvider;
use crate::error::RetrievalError;
use crate::types::StrategyKind;
use crate::vector_store::{VectorHit, VectorStore};

pub use adaptive::AdaptiveStrategy;
pub use confidence::{ConfidenceCalculator, ConfidenceSignals};
pub use fusion::FusionStrategy;
pub use parallel::ParallelStrategy;
pub use rewrite::RewriteStrategy;

/// Maximum snippet length carried in a search result.
const SNIPPET_MAX_CHARS: usize = 280;

/// One retrieved chunk, ready for the prompt builder and the caller.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchResult {
    /// Chunk id in the corpus store.
    pub id: String,
    /// Document title.
    pub title: String,
    /// Short excerpt of the chunk text.
    pub snippet: String,
    /// Similarity in [0, 1].
    pub score: f32,
    /// Origin system or site (e.g. `scb.se`, `riksdagen`).
    pub source: String,
    /// Document category (e.g. `sfs`, `prop`, `sou`).
    pub doc_type: Option<String>,
    /// Publication date when known.
    pub date: Option<String>,
    /// Which retriever produced the hit.
    pub retriever: String,
}

/// Per-retrieval telemetry. Diagnostic only; never exposed to callers.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RetrievalMetrics {
    /// Strategy that produced the results.
    pub strategy: String,
    /// Best similarity in the returned list.
    pub top_score: f32,
    /// Wall-clock of the whole retrieval phase.
    pub latency_ms: u64,
    /// Number of results returned.
    pub num_results: usize,
    /// Fusion top-score improvement over the naive original query.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fusion_gain: Option<f32>,
    /// Overlap of top-k sets across sub-queries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlap_ratio: Option<f32>,
    /// Set when the paraphrase call failed and the strategy fell back.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rewrite_failed: Option<bool>,
    /// Adaptive ladder steps taken, in order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalation_path: Option<Vec<String>>,
    /// Ladder step whose results were kept.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_step: Option<String>,
    /// True when the ladder exhausted and the refusal path fired.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_triggered: Option<bool>,
}

/// Ranked results plus telemetry.
#[derive(Clone, Debug, Default)]
pub struct RetrievalOutcome {
    /// Ranked results, best first.
    pub results: Vec<SearchResult>,
    /// Telemetry for this retrieval.
    pub metrics: RetrievalMetrics,
}

/// Common contract for retrieval strategies.
#[async_trait]
pub trait RetrievalStrategy: Send + Sync {
    /// The tag this implementation answers to.
    fn kind(&self) -> StrategyKind;

    /// Retrieve up to `k` ranked results for `query`.
    ///
    /// `must_include` carries tokens (often SFS numbers) the retrieval is
    /// expected to surface; adaptive escalation keys off their hit rate.
    async fn search(
        &self,
        query: &str,
        k: usize,
        must_include: &[String],
    ) -> Result<RetrievalOutcome, RetrievalError>;
}

/// Shared embed→search round trip used by all strategies.
///
/// Owns the per-sub-query timeout and the single retry that the idempotent
/// store contract allows.
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    subquery_budget: Duration,
}

impl Retriever {
    /// Build a retriever over the injected providers.
    #[must_use]
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        subquery_budget: Duration,
    ) -> Self {
        Self {
            embedder,
            store,
            subquery_budget,
        }
    }

    /// Embed `query` and fetch its `k` nearest hits.
    pub async fn fetch(&self, query: &str, k: usize) -> Result<Vec<VectorHit>, RetrievalError> {
        let budget_ms = self.subquery_budget.as_millis() as u64;
        let vector = timeout(self.subquery_budget, self.embedder.embed(query))
            .await
            .map_err(|_| RetrievalError::Timeout { budget_ms })??;

        let first = timeout(self.subquery_budget, self.store.search(&vector, k)).await;
        match first {
            Ok(Ok(hits)) => Ok(hits),
            Err(_) => Err(RetrievalError::Timeout { budget_ms }),
            Ok(Err(err)) => {
                tracing::debug!(error = %err, "vector search failed, retrying once");
                let hits = timeout(self.subquery_budget, self.store.search(&vector, k))
                    .await
                    .map_err(|_| RetrievalError::Timeout { budget_ms })??;
                Ok(hits)
            }
        }
    }

    /// Map raw hits to [`SearchResult`]s tagged with `retriever`.
    #[must_use]
    pub fn to_results(hits: Vec<VectorHit>, retriever: &str) -> Vec<SearchResult> {
        hits.into_iter()
            .map(|hit| {
                let title = hit.payload_str("title");
                let snippet = hit
                    .payload_opt("snippet")
                    .unwrap_or_else(|| truncate_chars(&hit.payload_str("text"), SNIPPET_MAX_CHARS));
                SearchResult {
                    title,
                    snippet,
                    score: hit.score.clamp(0.0, 1.0),
                    source: hit.payload_str("source"),
                    doc_type: hit.payload_opt("doc_type"),
                    date: hit.payload_opt("date"),
                    retriever: retriever.to_string(),
                    id: hit.id,
                }
            })
            .collect()
    }
}

/// Truncate to at most `max` characters on a char boundary.
fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Best score of a ranked list, 0 when empty.
pub(crate) fn top_score(results: &[SearchResult]) -> f32 {
    results.first().map_or(0.0, |r| r.score)
}
