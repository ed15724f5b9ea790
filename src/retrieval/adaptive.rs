//! Confidence-driven escalation ladder.
//!
//! Runs fused retrievals with progressively wider nets until the confidence
//! signals clear every escalation trigger, or the ladder exhausts and the
//! request falls through to the refusal path. Steps are strictly sequential;
//! the path walked is always a prefix of `A → B → C → D`.

use async_trait::async_trait;
use std::time::Instant;

use super::confidence::{ConfidenceCalculator, ConfidenceSignals, FusionMetrics};
use super::fusion::{FusedRetrieval, FusionStrategy};
use super::{RetrievalMetrics, RetrievalOutcome, RetrievalStrategy, top_score};
use crate::error::RetrievalError;
use crate::types::StrategyKind;

/// One rung of the ladder.
struct LadderStep {
    label: &'static str,
    num_queries: usize,
    k_multiplier: f32,
}

/// Steps A through C; D is the refusal fallback.
const LADDER: [LadderStep; 3] = [
    LadderStep {
        label: "A",
        num_queries: 2,
        k_multiplier: 1.0,
    },
    LadderStep {
        label: "B",
        num_queries: 2,
        k_multiplier: 2.0,
    },
    LadderStep {
        label: "C",
        num_queries: 3,
        k_multiplier: 2.0,
    },
];

/// Label of the refusal fallback step.
pub(crate) const FALLBACK_STEP: &str = "D";

/// `adaptive`: fused retrieval with confidence-based escalation.
pub struct AdaptiveStrategy {
    fusion: FusionStrategy,
    calculator: ConfidenceCalculator,
}

struct StepAttempt {
    label: &'static str,
    retrieval: FusedRetrieval,
    signals: ConfidenceSignals,
}

impl AdaptiveStrategy {
    /// Build the ladder over a fusion strategy and a configured calculator.
    #[must_use]
    pub fn new(fusion: FusionStrategy, calculator: ConfidenceCalculator) -> Self {
        Self { fusion, calculator }
    }

    fn outcome_for(
        attempt: StepAttempt,
        path: Vec<String>,
        started: Instant,
    ) -> RetrievalOutcome {
        let metrics = RetrievalMetrics {
            strategy: StrategyKind::Adaptive.as_str().to_string(),
            top_score: top_score(&attempt.retrieval.results),
            latency_ms: started.elapsed().as_millis() as u64,
            num_results: attempt.retrieval.results.len(),
            fusion_gain: Some(attempt.retrieval.fusion_gain),
            overlap_ratio: Some(attempt.retrieval.overlap_ratio),
            rewrite_failed: attempt.retrieval.rewrite_failed.then_some(true),
            escalation_path: Some(path),
            final_step: Some(attempt.label.to_string()),
            fallback_triggered: Some(false),
        };
        RetrievalOutcome {
            results: attempt.retrieval.results,
            metrics,
        }
    }
}

#[async_trait]
impl RetrievalStrategy for AdaptiveStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Adaptive
    }

    async fn search(
        &self,
        query: &str,
        k: usize,
        must_include: &[String],
    ) -> Result<RetrievalOutcome, RetrievalError> {
        let started = Instant::now();
        let mut path: Vec<String> = Vec::new();
        let mut best: Option<StepAttempt> = None;

        for step in &LADDER {
            path.push(step.label.to_string());
            let k_eff = ((k as f32) * step.k_multiplier).round() as usize;

            let retrieval = match self.fusion.fused_search(query, k_eff, step.num_queries).await {
                Ok(retrieval) => retrieval,
                Err(err) => {
                    // A failed step is skipped, not fatal; the next rung may
                    // still succeed.
                    tracing::warn!(step = step.label, error = %err, "adaptive step failed");
                    continue;
                }
            };

            let signals = self.calculator.compute(
                &retrieval.results,
                must_include,
                FusionMetrics {
                    fusion_gain: retrieval.fusion_gain,
                    overlap_ratio: retrieval.overlap_ratio,
                },
                k,
            );
            tracing::debug!(
                step = step.label,
                top_score = signals.top_score,
                overall = signals.overall_confidence,
                tier = %signals.confidence_tier,
                "adaptive step evaluated"
            );

            let acceptable = !self.calculator.should_escalate(&signals);
            let attempt = StepAttempt {
                label: step.label,
                retrieval,
                signals,
            };

            // A later step only displaces an earlier one when its overall
            // confidence strictly exceeds it.
            let improved = best
                .as_ref()
                .is_none_or(|prior| attempt.signals.overall_confidence > prior.signals.overall_confidence);
            if improved {
                best = Some(attempt);
            }

            if acceptable {
                let chosen = best.take().expect("best set on this or a prior step");
                return Ok(Self::outcome_for(chosen, path, started));
            }
        }

        // Ladder exhausted: step D hands the request to the refusal path.
        path.push(FALLBACK_STEP.to_string());
        tracing::info!(?path, "adaptive ladder exhausted, refusal fallback");
        let metrics = RetrievalMetrics {
            strategy: StrategyKind::Adaptive.as_str().to_string(),
            top_score: 0.0,
            latency_ms: started.elapsed().as_millis() as u64,
            num_results: 0,
            escalation_path: Some(path),
            final_step: Some(FALLBACK_STEP.to_string()),
            fallback_triggered: Some(true),
            ..Default::default()
        };
        Ok(RetrievalOutcome {
            results: Vec::new(),
            metrics,
        })
    }
}
