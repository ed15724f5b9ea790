//! Streaming event model and wire encoding.
//!
//! The streaming variant of the pipeline produces a strictly ordered feed of
//! [`SseEvent`]s: one `metadata`, at most one `decontextualized`, any number
//! of `token`s, at most one `corrections`, and exactly one terminal `done`
//! or `error`. [`encode`] frames an event for the `text/event-stream`
//! transport.

use serde::{Deserialize, Serialize};

use crate::guardrail::TermCorrection;
use crate::orchestrator::CallerSource;
use crate::types::{EvidenceLevel, ResponseMode};

/// One event on the streaming feed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SseEvent {
    /// First event of every stream: what the answer will be based on.
    Metadata {
        /// Classified response mode.
        mode: ResponseMode,
        /// Caller-visible sources (empty for chat and refusals).
        sources: Vec<CallerSource>,
        /// Retrieval quality grade.
        evidence_level: EvidenceLevel,
    },
    /// Emitted when the question was rewritten to stand alone.
    Decontextualized {
        /// The question as asked.
        original: String,
        /// The standalone rewrite used for retrieval.
        rewritten: String,
    },
    /// One model token, in arrival order.
    Token {
        /// Token text.
        content: String,
    },
    /// Terminology corrections applied to the final answer.
    Corrections {
        /// The corrections, in order of application.
        corrections: Vec<TermCorrection>,
        /// The fully corrected answer text.
        corrected_text: String,
    },
    /// Successful terminal event.
    Done {
        /// Whole-request wall clock.
        total_time_ms: u64,
    },
    /// Failing terminal event.
    Error {
        /// Operator-safe description.
        message: String,
    },
}

impl SseEvent {
    /// True for the two terminal variants.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }

    /// Short label used in logs.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Metadata { .. } => "metadata",
            Self::Decontextualized { .. } => "decontextualized",
            Self::Token { .. } => "token",
            Self::Corrections { .. } => "corrections",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }
}

/// Frame an event as one `text/event-stream` record: `data: <json>\n\n`.
pub fn encode(event: &SseEvent) -> Result<String, serde_json::Error> {
    Ok(format!("data: {}\n\n", serde_json::to_string(event)?))
}
