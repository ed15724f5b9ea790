//! Core tags shared across the answer pipeline.
//!
//! This module defines the small enums that classify a request and its
//! retrieval quality. These are the domain concepts the rest of the engine is
//! written in terms of:
//!
//! - [`ResponseMode`]: how the answer is generated and constrained
//! - [`StrategyKind`]: which retrieval algorithm runs
//! - [`EvidenceLevel`]: qualitative grade of retrieval quality
//! - [`ConfidenceTier`]: bucketed adaptive-retrieval confidence
//!
//! # Examples
//!
//! ```rust
//! use kallgrund::types::{ResponseMode, StrategyKind};
//!
//! let mode = ResponseMode::parse_hint("evidence");
//! assert_eq!(mode, Some(ResponseMode::Evidence));
//!
//! let strategy: StrategyKind = "rag_fusion".parse().unwrap();
//! assert_eq!(strategy, StrategyKind::RagFusion);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Response mode controlling generation parameters and citation constraints.
///
/// Modes form a ladder of decreasing freedom: `Chat` answers directly with no
/// sources, `Assist` retrieves but may answer in prose, `Evidence` retrieves
/// and must cite every factual claim or refuse.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseMode {
    /// Greeting or pleasantry with no information intent. Retrieval skipped.
    Chat,
    /// Informational but open-ended. Retrieval performed, prose tone allowed.
    Assist,
    /// Factual statement, legal basis, or statistic requested. Retrieval
    /// mandatory; uncited claims are not allowed to reach the caller.
    Evidence,
}

impl ResponseMode {
    /// Parse a caller-supplied mode hint. `"auto"` and unknown values return
    /// `None`, which leaves classification to the query processor.
    #[must_use]
    pub fn parse_hint(hint: &str) -> Option<Self> {
        match hint.to_ascii_lowercase().as_str() {
            "chat" => Some(Self::Chat),
            "assist" => Some(Self::Assist),
            "evidence" => Some(Self::Evidence),
            _ => None,
        }
    }

    /// Upper-case wire label, as echoed in structured answers.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "CHAT",
            Self::Assist => "ASSIST",
            Self::Evidence => "EVIDENCE",
        }
    }
}

impl fmt::Display for ResponseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Tag selecting the retrieval algorithm for a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Single-query vector search with widened fetch, no fusion.
    ParallelV1,
    /// LLM paraphrases fan out; merged by document id keeping max score.
    RewriteV1,
    /// Multi-query retrieval fused with reciprocal rank fusion.
    RagFusion,
    /// Confidence-driven escalation ladder over fusion retrievals.
    Adaptive,
}

impl StrategyKind {
    /// Wire label, matching the request schema.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ParallelV1 => "parallel_v1",
            Self::RewriteV1 => "rewrite_v1",
            Self::RagFusion => "rag_fusion",
            Self::Adaptive => "adaptive",
        }
    }
}

impl Default for StrategyKind {
    fn default() -> Self {
        Self::ParallelV1
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "parallel_v1" => Ok(Self::ParallelV1),
            "rewrite_v1" => Ok(Self::RewriteV1),
            "rag_fusion" => Ok(Self::RagFusion),
            "adaptive" => Ok(Self::Adaptive),
            other => Err(UnknownStrategy(other.to_string())),
        }
    }
}

/// Error returned when a strategy label is not recognized.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown retrieval strategy: {0}")]
pub struct UnknownStrategy(pub String);

/// Qualitative grade of retrieval quality, derived from top scores and the
/// number of relevant sources.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EvidenceLevel {
    /// Top score ≥ 0.85 and at least two relevant sources.
    High,
    /// Top score ≥ 0.6.
    Medium,
    /// Top score ≥ 0.3.
    Low,
    /// Nothing usable retrieved; refusals always carry this level.
    None,
}

impl EvidenceLevel {
    /// Grade retrieval output. `relevant_sources` counts results that
    /// survived any filtering.
    #[must_use]
    pub fn grade(top_score: f32, relevant_sources: usize) -> Self {
        if top_score >= 0.85 && relevant_sources >= 2 {
            Self::High
        } else if top_score >= 0.6 {
            Self::Medium
        } else if top_score >= 0.3 {
            Self::Low
        } else {
            Self::None
        }
    }

    /// Upper-case wire label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
            Self::None => "NONE",
        }
    }
}

impl fmt::Display for EvidenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Bucketed overall confidence for adaptive retrieval.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    /// Overall confidence ≥ 0.7.
    High,
    /// Overall confidence ≥ 0.5.
    Medium,
    /// Overall confidence ≥ 0.3.
    Low,
    /// Anything below 0.3.
    VeryLow,
}

impl Default for ConfidenceTier {
    fn default() -> Self {
        Self::VeryLow
    }
}

impl ConfidenceTier {
    /// Bucket an overall confidence score.
    #[must_use]
    pub fn from_confidence(overall: f32) -> Self {
        if overall >= 0.7 {
            Self::High
        } else if overall >= 0.5 {
            Self::Medium
        } else if overall >= 0.3 {
            Self::Low
        } else {
            Self::VeryLow
        }
    }
}

impl fmt::Display for ConfidenceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
            Self::VeryLow => write!(f, "very_low"),
        }
    }
}
