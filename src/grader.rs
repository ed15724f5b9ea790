//! Per-document relevance grading (the corrective-RAG filter).
//!
//! Between retrieval and generation, an LLM judge scores every retrieved
//! document against the question. Documents below the grade threshold are
//! dropped; an empty survivor set short-circuits to the refusal path. An
//! optional self-reflection gate then asks whether the survivors suffice to
//! answer at all.
//!
//! Grading is best-effort: a judge call that fails or returns garbage leaves
//! its document in place (fail-open), so a flaky LLM can never silently
//! empty the context.

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::time::timeout;

use crate::llm::{ChatParams, LlmGateway};
use crate::message::ChatMessage;
use crate::retrieval::SearchResult;
use crate::structured::extract_json_object;

const GRADER_SYSTEM: &str = "Du bedömer om ett dokument är relevant för en fråga. Svara ENDAST med JSON: \
     {\"relevant\": bool, \"score\": tal 0-1, \"reason\": \"kort motivering\"}";

const REFLECTION_SYSTEM: &str = "Du bedömer om ett urval av dokument räcker för att besvara en fråga med \
     källhänvisningar. Svara ENDAST med JSON: {\"thought_process\": \"...\", \
     \"has_sufficient_evidence\": bool, \"missing_evidence\": [\"...\"], \
     \"citation_plan\": [\"...\"], \"constitutional_compliance\": bool, \
     \"confidence\": tal 0-1}";

/// Judgement for one document.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GradeResult {
    /// Id of the graded document.
    pub doc_id: String,
    /// Whether the judge considered it relevant.
    pub relevant: bool,
    /// Relevance score in [0, 1].
    pub score: f32,
    /// Judge's confidence in its own verdict.
    pub confidence: f32,
    /// Short motivation.
    pub reason: String,
    /// Wall-clock of the judge call.
    pub latency_ms: u64,
}

/// Self-reflection over the retained document set.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CriticReflection {
    /// Free-form reasoning from the judge.
    #[serde(default)]
    pub thought_process: String,
    /// Whether the retained set can support an answer.
    #[serde(default)]
    pub has_sufficient_evidence: bool,
    /// What is missing, when insufficient.
    #[serde(default)]
    pub missing_evidence: Vec<String>,
    /// Which documents would back which claims.
    #[serde(default)]
    pub citation_plan: Vec<String>,
    /// Whether answering would stay within the citation rules.
    #[serde(default)]
    pub constitutional_compliance: bool,
    /// Judge confidence in [0, 1].
    #[serde(default)]
    pub confidence: f32,
}

#[derive(Deserialize)]
struct GradeWire {
    #[serde(default)]
    relevant: bool,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    reason: String,
}

/// LLM-judge grading service.
pub struct GraderService {
    llm: Arc<dyn LlmGateway>,
    threshold: f32,
    concurrency: usize,
    total_budget: Duration,
}

impl GraderService {
    /// Build the service over the shared gateway.
    #[must_use]
    pub fn new(
        llm: Arc<dyn LlmGateway>,
        threshold: f32,
        concurrency: usize,
        total_budget: Duration,
    ) -> Self {
        Self {
            llm,
            threshold,
            concurrency,
            total_budget,
        }
    }

    /// Grade every document concurrently (bounded) and return one verdict
    /// per input, in input order.
    pub async fn grade_documents(
        &self,
        question: &str,
        results: &[SearchResult],
    ) -> Vec<GradeResult> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let tasks = results.iter().map(|result| {
            let semaphore = Arc::clone(&semaphore);
            let llm = Arc::clone(&self.llm);
            let question = question.to_string();
            let result = result.clone();
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore never closed");
                grade_one(llm.as_ref(), &question, &result).await
            }
        });

        match timeout(self.total_budget, join_all(tasks)).await {
            Ok(grades) => grades,
            Err(_) => {
                // Budget elapsed: pass everything through ungraded.
                tracing::warn!(
                    budget_ms = self.total_budget.as_millis() as u64,
                    "grading budget elapsed, passing documents through"
                );
                results.iter().map(pass_through).collect()
            }
        }
    }

    /// Retain documents whose grade meets the threshold.
    #[must_use]
    pub fn filter_results(
        &self,
        results: &[SearchResult],
        grades: &[GradeResult],
    ) -> Vec<SearchResult> {
        results
            .iter()
            .zip(grades)
            .filter(|(_, grade)| grade.score >= self.threshold)
            .map(|(result, _)| result.clone())
            .collect()
    }

    /// Ask whether the retained set suffices to answer the question.
    ///
    /// Fails open: an unusable judge response reports sufficient evidence so
    /// the pipeline proceeds to generation.
    pub async fn self_reflect(
        &self,
        question: &str,
        retained: &[SearchResult],
    ) -> CriticReflection {
        let mut context = String::new();
        for (index, result) in retained.iter().enumerate() {
            context.push_str(&format!(
                "[{}] {} — {}\n",
                index + 1,
                result.title,
                result.snippet
            ));
        }
        let prompt = format!("Fråga: {question}\n\nDokument:\n{context}");

        let reply = timeout(
            self.total_budget,
            self.llm.chat(
                REFLECTION_SYSTEM,
                &[ChatMessage::user(&prompt)],
                &ChatParams::utility(),
            ),
        )
        .await;

        match reply {
            Ok(Ok(raw)) => extract_json_object(&raw)
                .ok()
                .and_then(|value| serde_json::from_value::<CriticReflection>(value).ok())
                .unwrap_or_else(sufficient_by_default),
            _ => sufficient_by_default(),
        }
    }
}

fn sufficient_by_default() -> CriticReflection {
    CriticReflection {
        has_sufficient_evidence: true,
        constitutional_compliance: true,
        ..Default::default()
    }
}

/// A verdict that always survives filtering, used when the judge is
/// unavailable.
fn pass_through(result: &SearchResult) -> GradeResult {
    GradeResult {
        doc_id: result.id.clone(),
        relevant: true,
        score: 1.0,
        confidence: 0.0,
        reason: "grader unavailable".to_string(),
        latency_ms: 0,
    }
}

async fn grade_one(llm: &dyn LlmGateway, question: &str, result: &SearchResult) -> GradeResult {
    let started = Instant::now();
    let prompt = format!(
        "Fråga: {question}\n\nDokument ({title}):\n{snippet}",
        title = result.title,
        snippet = result.snippet
    );
    let reply = llm
        .chat(GRADER_SYSTEM, &[ChatMessage::user(&prompt)], &ChatParams::utility())
        .await;

    let latency_ms = started.elapsed().as_millis() as u64;
    match reply {
        Ok(raw) => match extract_json_object(&raw)
            .ok()
            .and_then(|value| serde_json::from_value::<GradeWire>(value).ok())
        {
            Some(wire) => GradeResult {
                doc_id: result.id.clone(),
                relevant: wire.relevant,
                score: wire.score.clamp(0.0, 1.0),
                confidence: if wire.reason.is_empty() { 0.5 } else { 0.8 },
                reason: wire.reason,
                latency_ms,
            },
            None => {
                tracing::debug!(doc = %result.id, "grader reply unparseable, passing through");
                let mut grade = pass_through(result);
                grade.latency_ms = latency_ms;
                grade
            }
        },
        Err(err) => {
            tracing::debug!(doc = %result.id, error = %err, "grader call failed, passing through");
            let mut grade = pass_through(result);
            grade.latency_ms = latency_ms;
            grade
        }
    }
}
