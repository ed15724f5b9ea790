//! Confidence signals for adaptive retrieval.
//!
//! A pure computation over a ranked result list: no I/O, no LLM. The
//! adaptive ladder escalates when any individual trigger fires, and uses the
//! weighted `overall_confidence` to pick between steps.

use serde::{Deserialize, Serialize};
use rustc_hash::FxHashSet;

use super::SearchResult;
use crate::config::AdaptiveThresholds;
use crate::types::ConfidenceTier;

/// Title-prefix length used for near-duplicate detection.
const DUPLICATE_PREFIX_CHARS: usize = 40;

/// Signals computed after each retrieval pass.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ConfidenceSignals {
    /// Score of the rank-1 result, 0 when empty.
    pub top_score: f32,
    /// Top-1/top-2 separation, normalized by the full score spread.
    pub margin: f32,
    /// Fraction of required tokens that surfaced anywhere in the results.
    pub must_include_hit_rate: f32,
    /// Fusion top-score improvement (0 for non-fused retrievals).
    pub fusion_gain: f32,
    /// Overlap of top-k sets across sub-queries (1 for single-query).
    pub overlap_ratio: f32,
    /// Fraction of results duplicating a higher-ranked title prefix.
    pub near_duplicate_ratio: f32,
    /// Distinct `(doc_type, source)` pairs.
    pub unique_sources: usize,
    /// Weighted sum of the above, in [0, 1].
    pub overall_confidence: f32,
    /// Bucketed overall confidence.
    pub confidence_tier: ConfidenceTier,
}

/// Fusion telemetry handed to the calculator.
#[derive(Clone, Copy, Debug, Default)]
pub struct FusionMetrics {
    /// Fused top-score improvement over the naive query.
    pub fusion_gain: f32,
    /// Overlap of top-k sets across the sub-queries.
    pub overlap_ratio: f32,
}

/// Computes [`ConfidenceSignals`] and decides whether a step escalates.
#[derive(Clone, Debug, Default)]
pub struct ConfidenceCalculator {
    thresholds: AdaptiveThresholds,
}

impl ConfidenceCalculator {
    /// Calculator with the given escalation thresholds.
    #[must_use]
    pub fn new(thresholds: AdaptiveThresholds) -> Self {
        Self { thresholds }
    }

    /// Compute all signals for a ranked result list.
    #[must_use]
    pub fn compute(
        &self,
        results: &[SearchResult],
        must_include: &[String],
        fusion: FusionMetrics,
        k: usize,
    ) -> ConfidenceSignals {
        let top_score = results.first().map_or(0.0, |r| r.score);
        let margin = margin(results);
        let must_include_hit_rate = must_include_hit_rate(results, must_include);
        let near_duplicate_ratio = near_duplicate_ratio(results);
        let unique_sources = unique_sources(results);

        // All weighted inputs clamp to [0, 1] so the sum stays a proper score
        // even when fusion gain overshoots.
        let unique_ratio = if k == 0 {
            0.0
        } else {
            (unique_sources as f32 / k as f32).clamp(0.0, 1.0)
        };
        let overall_confidence = 0.30 * must_include_hit_rate.clamp(0.0, 1.0)
            + 0.25 * top_score.clamp(0.0, 1.0)
            + 0.15 * margin.clamp(0.0, 1.0)
            + 0.10 * fusion.fusion_gain.clamp(0.0, 1.0)
            + 0.10 * (1.0 - near_duplicate_ratio.clamp(0.0, 1.0))
            + 0.10 * unique_ratio;

        ConfidenceSignals {
            top_score,
            margin,
            must_include_hit_rate,
            fusion_gain: fusion.fusion_gain,
            overlap_ratio: fusion.overlap_ratio,
            near_duplicate_ratio,
            unique_sources,
            overall_confidence,
            confidence_tier: ConfidenceTier::from_confidence(overall_confidence),
        }
    }

    /// True when any escalation trigger fires for these signals.
    #[must_use]
    pub fn should_escalate(&self, signals: &ConfidenceSignals) -> bool {
        signals.top_score < self.thresholds.min_top_score
            || signals.margin < self.thresholds.min_margin
            || signals.must_include_hit_rate < self.thresholds.min_must_include_hit_rate
            || signals.near_duplicate_ratio > self.thresholds.max_near_duplicate_ratio
    }
}

/// Top-1/top-2 separation normalized by the top-1/top-N spread.
///
/// A single result is maximally separated, so its margin is its own score.
fn margin(results: &[SearchResult]) -> f32 {
    match results {
        [] => 0.0,
        [only] => only.score,
        [first, .., last] => {
            let spread = first.score - last.score;
            if spread <= f32::EPSILON {
                0.0
            } else {
                (first.score - results[1].score) / spread
            }
        }
    }
}

/// Fraction of `must_include` tokens appearing in any title or snippet,
/// case-insensitively. Empty requirements count as fully satisfied.
fn must_include_hit_rate(results: &[SearchResult], must_include: &[String]) -> f32 {
    if must_include.is_empty() {
        return 1.0;
    }
    let haystacks: Vec<String> = results
        .iter()
        .map(|r| format!("{} {}", r.title, r.snippet).to_lowercase())
        .collect();
    let found = must_include
        .iter()
        .filter(|token| {
            let needle = token.to_lowercase();
            haystacks.iter().any(|haystack| haystack.contains(&needle))
        })
        .count();
    found as f32 / must_include.len() as f32
}

/// Fraction of results sharing a 40-char title prefix with a higher-ranked
/// result.
fn near_duplicate_ratio(results: &[SearchResult]) -> f32 {
    if results.is_empty() {
        return 0.0;
    }
    let mut seen: FxHashSet<String> = FxHashSet::default();
    let mut duplicates = 0usize;
    for result in results {
        let prefix: String = result
            .title
            .to_lowercase()
            .chars()
            .take(DUPLICATE_PREFIX_CHARS)
            .collect();
        if !seen.insert(prefix) {
            duplicates += 1;
        }
    }
    duplicates as f32 / results.len() as f32
}

/// Count of distinct `(doc_type, source)` pairs.
fn unique_sources(results: &[SearchResult]) -> usize {
    results
        .iter()
        .map(|r| (r.doc_type.clone().unwrap_or_default(), r.source.clone()))
        .collect::<FxHashSet<_>>()
        .len()
}
