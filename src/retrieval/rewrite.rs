//! Paraphrase fan-out retrieval.
//!
//! The LLM produces `N` standalone paraphrases of the query; each one
//! retrieves independently and the lists merge by document id, keeping the
//! maximum score per document. A failed or slow rewrite call falls back to
//! the plain single-query strategy with `rewrite_failed` marked in the
//! metrics.

use async_trait::async_trait;
use futures_util::future::join_all;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::time::timeout;

use super::{
    RetrievalMetrics, RetrievalOutcome, RetrievalStrategy, Retriever, parallel::ParallelStrategy,
    top_score,
};
use crate::error::RetrievalError;
use crate::llm::{ChatParams, LlmGateway};
use crate::message::ChatMessage;
use crate::types::StrategyKind;

/// Number of paraphrases requested from the LLM.
pub(crate) const NUM_PARAPHRASES: usize = 3;

const REWRITE_SYSTEM: &str = "Du skriver om sökfrågor. Svara med exakt en omskrivning per rad, \
     utan numrering, utan kommentarer. Behåll alla SFS-nummer och egennamn oförändrade.";

/// `rewrite_v1`: paraphrase, retrieve per paraphrase, merge by max score.
pub struct RewriteStrategy {
    retriever: Arc<Retriever>,
    llm: Arc<dyn LlmGateway>,
    rewrite_budget: Duration,
    fanout_cap: usize,
}

impl RewriteStrategy {
    /// Build the strategy over shared providers.
    #[must_use]
    pub fn new(
        retriever: Arc<Retriever>,
        llm: Arc<dyn LlmGateway>,
        rewrite_budget: Duration,
        fanout_cap: usize,
    ) -> Self {
        Self {
            retriever,
            llm,
            rewrite_budget,
            fanout_cap,
        }
    }

    /// Ask the LLM for paraphrases. Returns the original query plus up to
    /// `n` rewrites, deduplicated.
    pub(crate) async fn paraphrase(
        &self,
        query: &str,
        n: usize,
    ) -> Result<Vec<String>, crate::error::LlmError> {
        let prompt = format!("Skriv {n} omformuleringar av följande sökfråga:\n{query}");
        let budget_ms = self.rewrite_budget.as_millis() as u64;
        let raw = timeout(
            self.rewrite_budget,
            self.llm
                .chat(REWRITE_SYSTEM, &[ChatMessage::user(&prompt)], &ChatParams::utility()),
        )
        .await
        .map_err(|_| crate::error::LlmError::Timeout { budget_ms })??;

        let mut queries = vec![query.to_string()];
        for line in raw.lines() {
            let line = line.trim().trim_start_matches(['-', '*', ' ']);
            let line = line
                .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ')')
                .trim();
            if line.is_empty() {
                continue;
            }
            if !queries.iter().any(|q| q.eq_ignore_ascii_case(line)) {
                queries.push(line.to_string());
            }
            if queries.len() > n {
                break;
            }
        }
        Ok(queries)
    }

    /// Retrieve top-`k` for each query concurrently, bounded by the fan-out
    /// cap. Failed sub-queries are dropped; all failing is a retrieval error.
    pub(crate) async fn fan_out(
        &self,
        queries: &[String],
        k: usize,
        retriever_tag: &str,
    ) -> Result<Vec<Vec<super::SearchResult>>, RetrievalError> {
        let semaphore = Arc::new(Semaphore::new(self.fanout_cap));
        let tasks = queries.iter().map(|query| {
            let semaphore = Arc::clone(&semaphore);
            let retriever = Arc::clone(&self.retriever);
            let query = query.clone();
            let tag = retriever_tag.to_string();
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore never closed");
                retriever
                    .fetch(&query, k)
                    .await
                    .map(|hits| Retriever::to_results(hits, &tag))
            }
        });

        let mut lists = Vec::with_capacity(queries.len());
        let mut last_error = None;
        for outcome in join_all(tasks).await {
            match outcome {
                Ok(list) => lists.push(list),
                Err(err) => {
                    tracing::warn!(error = %err, "retrieval sub-query failed");
                    last_error = Some(err);
                }
            }
        }
        if lists.is_empty() {
            return Err(last_error.unwrap_or(RetrievalError::Timeout {
                budget_ms: self.rewrite_budget.as_millis() as u64,
            }));
        }
        Ok(lists)
    }

    async fn fallback(
        &self,
        query: &str,
        k: usize,
        must_include: &[String],
    ) -> Result<RetrievalOutcome, RetrievalError> {
        let mut outcome = ParallelStrategy::new(Arc::clone(&self.retriever))
            .search(query, k, must_include)
            .await?;
        outcome.metrics.strategy = StrategyKind::RewriteV1.as_str().to_string();
        outcome.metrics.rewrite_failed = Some(true);
        Ok(outcome)
    }
}

/// Merge ranked lists by document id, keeping the maximum score, and return
/// the best `k` by merged score.
pub(crate) fn merge_by_max(lists: Vec<Vec<super::SearchResult>>, k: usize) -> Vec<super::SearchResult> {
    let mut merged: FxHashMap<String, super::SearchResult> = FxHashMap::default();
    for list in lists {
        for result in list {
            match merged.get_mut(&result.id) {
                Some(existing) if existing.score >= result.score => {}
                Some(existing) => *existing = result,
                None => {
                    merged.insert(result.id.clone(), result);
                }
            }
        }
    }
    let mut results: Vec<_> = merged.into_values().collect();
    results.sort_by(|a, b| b.score.total_cmp(&a.score));
    results.truncate(k);
    results
}

#[async_trait]
impl RetrievalStrategy for RewriteStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::RewriteV1
    }

    async fn search(
        &self,
        query: &str,
        k: usize,
        must_include: &[String],
    ) -> Result<RetrievalOutcome, RetrievalError> {
        let started = Instant::now();
        let queries = match self.paraphrase(query, NUM_PARAPHRASES).await {
            Ok(queries) => queries,
            Err(err) => {
                tracing::warn!(error = %err, "paraphrase failed, falling back to parallel_v1");
                return self.fallback(query, k, must_include).await;
            }
        };

        let lists = self.fan_out(&queries, k, "rewrite").await?;
        let results = merge_by_max(lists, k);

        let metrics = RetrievalMetrics {
            strategy: StrategyKind::RewriteV1.as_str().to_string(),
            top_score: top_score(&results),
            latency_ms: started.elapsed().as_millis() as u64,
            num_results: results.len(),
            ..Default::default()
        };
        Ok(RetrievalOutcome { results, metrics })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::SearchResult;

    fn result(id: &str, score: f32) -> SearchResult {
        SearchResult {
            id: id.to_string(),
            title: id.to_string(),
            snippet: String::new(),
            score,
            source: "test".to_string(),
            doc_type: None,
            date: None,
            retriever: "rewrite".to_string(),
        }
    }

    #[test]
    fn merge_keeps_max_score_per_id() {
        let merged = merge_by_max(
            vec![
                vec![result("a", 0.4), result("b", 0.9)],
                vec![result("a", 0.7), result("c", 0.5)],
            ],
            10,
        );
        let a = merged.iter().find(|r| r.id == "a").unwrap();
        assert!((a.score - 0.7).abs() < f32::EPSILON);
        assert_eq!(merged[0].id, "b");
    }

    #[test]
    fn merge_truncates_to_k() {
        let merged = merge_by_max(
            vec![vec![result("a", 0.9), result("b", 0.8), result("c", 0.7)]],
            2,
        );
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[1].id, "b");
    }
}
