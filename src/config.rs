//! Process-wide engine configuration.
//!
//! One [`EngineConfig`] is built at startup and shared by the orchestrator
//! and every service it injects. Values come from defaults, the environment
//! (via `dotenvy`), or explicit builder calls; nothing reads configuration
//! after startup.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Canonical Swedish refusal sentence used when the retrieved material does
/// not support an evidence-mode answer.
pub const DEFAULT_REFUSAL_TEMPLATE: &str =
    "Tyvärr kan jag inte besvara frågan utifrån de dokument som har hämtats.";

/// Thresholds steering the adaptive escalation ladder.
///
/// A retrieval step escalates when *any* trigger fires.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveThresholds {
    /// Escalate when the best score falls below this.
    pub min_top_score: f32,
    /// Escalate when the top-1/top-2 margin falls below this.
    pub min_margin: f32,
    /// Escalate when fewer than this fraction of required tokens surfaced.
    pub min_must_include_hit_rate: f32,
    /// Escalate when more than this fraction of results are near-duplicates.
    pub max_near_duplicate_ratio: f32,
    /// Accept the step outright at or above this overall confidence.
    pub accept_overall_confidence: f32,
}

impl Default for AdaptiveThresholds {
    fn default() -> Self {
        Self {
            min_top_score: 0.3,
            min_margin: 0.05,
            min_must_include_hit_rate: 0.5,
            max_near_duplicate_ratio: 0.7,
            accept_overall_confidence: 0.5,
        }
    }
}

/// Per-phase time budgets, enforced by the orchestrator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Budgets {
    /// Decontextualization LLM call.
    pub decontextualize_ms: u64,
    /// Paraphrase rewrite LLM call (total for all paraphrases).
    pub rewrite_ms: u64,
    /// Each retrieval sub-query.
    pub retrieval_subquery_ms: u64,
    /// Grading all documents of one request.
    pub grader_total_ms: u64,
    /// Non-streaming generation.
    pub generation_ms: u64,
    /// Maximum silence between streamed tokens.
    pub stream_stall_ms: u64,
    /// One critique call.
    pub critique_ms: u64,
    /// One revision call.
    pub revise_ms: u64,
    /// Whole-request wall clock.
    pub total_ms: u64,
}

impl Default for Budgets {
    fn default() -> Self {
        Self {
            decontextualize_ms: 3_000,
            rewrite_ms: 3_000,
            retrieval_subquery_ms: 10_000,
            grader_total_ms: 20_000,
            generation_ms: 60_000,
            stream_stall_ms: 5_000,
            critique_ms: 10_000,
            revise_ms: 15_000,
            total_ms: 120_000,
        }
    }
}

impl Budgets {
    pub(crate) fn decontextualize(&self) -> Duration {
        Duration::from_millis(self.decontextualize_ms)
    }
    pub(crate) fn rewrite(&self) -> Duration {
        Duration::from_millis(self.rewrite_ms)
    }
    pub(crate) fn retrieval_subquery(&self) -> Duration {
        Duration::from_millis(self.retrieval_subquery_ms)
    }
    pub(crate) fn grader_total(&self) -> Duration {
        Duration::from_millis(self.grader_total_ms)
    }
    pub(crate) fn generation(&self) -> Duration {
        Duration::from_millis(self.generation_ms)
    }
    pub(crate) fn stream_stall(&self) -> Duration {
        Duration::from_millis(self.stream_stall_ms)
    }
    pub(crate) fn critique(&self) -> Duration {
        Duration::from_millis(self.critique_ms)
    }
    pub(crate) fn revise(&self) -> Duration {
        Duration::from_millis(self.revise_ms)
    }
    pub(crate) fn total(&self) -> Duration {
        Duration::from_millis(self.total_ms)
    }
}

/// Engine configuration shared by all services.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Exact string used for EVIDENCE refusals.
    pub evidence_refusal_template: String,
    /// If false, model output is treated as plain prose (no JSON contract).
    pub structured_output_enabled: bool,
    /// If false, the critique→revise loop is skipped entirely.
    pub critic_revise_enabled: bool,
    /// Upper bound on revision attempts per request.
    pub critic_max_revisions: u32,
    /// Enables the per-document relevance filter between retrieval and
    /// generation.
    pub crag_enabled: bool,
    /// Adds the sufficiency self-reflection gate after filtering.
    pub crag_enable_self_reflection: bool,
    /// Minimum grade a document needs to survive the filter.
    pub crag_grade_threshold: f32,
    /// Enables cross-encoder re-scoring of retrieval candidates.
    pub rerank_enabled: bool,
    /// Candidate pool handed to the reranker.
    pub rerank_candidates: usize,
    /// Escalation thresholds for adaptive retrieval.
    pub adaptive_thresholds: AdaptiveThresholds,
    /// Per-phase time budgets.
    pub budgets: Budgets,
    /// Bound on concurrent retrieval sub-queries per request.
    pub retrieval_fanout_cap: usize,
    /// Bound on concurrent grading calls per request.
    pub grader_concurrency: usize,
    /// Base URL of the OpenAI-compatible LLM endpoint.
    pub llm_base_url: String,
    /// Model name sent with generation requests.
    pub llm_model: String,
    /// Model name sent with embedding requests.
    pub embedding_model: String,
    /// Vector store collection queried for passages.
    pub vector_collection: String,
    /// Base URL of the vector store REST endpoint.
    pub vector_store_url: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            evidence_refusal_template: DEFAULT_REFUSAL_TEMPLATE.to_string(),
            structured_output_enabled: true,
            critic_revise_enabled: true,
            critic_max_revisions: 2,
            crag_enabled: false,
            crag_enable_self_reflection: false,
            crag_grade_threshold: 0.3,
            rerank_enabled: false,
            rerank_candidates: 20,
            adaptive_thresholds: AdaptiveThresholds::default(),
            budgets: Budgets::default(),
            retrieval_fanout_cap: 8,
            grader_concurrency: 8,
            llm_base_url: "http://127.0.0.1:8000/v1".to_string(),
            llm_model: "ministral-14b".to_string(),
            embedding_model: "bge-m3".to_string(),
            vector_collection: "forvaltning".to_string(),
            vector_store_url: "http://127.0.0.1:6333".to_string(),
        }
    }
}

impl EngineConfig {
    /// Build a config from defaults overlaid with environment variables.
    ///
    /// Reads `.env` when present. Recognized variables mirror the field
    /// names with a `KALLGRUND_` prefix, e.g. `KALLGRUND_LLM_BASE_URL`,
    /// `KALLGRUND_CRAG_ENABLED`, `KALLGRUND_REFUSAL_TEMPLATE`.
    #[must_use]
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let mut config = Self::default();

        if let Ok(v) = std::env::var("KALLGRUND_REFUSAL_TEMPLATE") {
            config.evidence_refusal_template = v;
        }
        if let Some(v) = env_bool("KALLGRUND_STRUCTURED_OUTPUT_ENABLED") {
            config.structured_output_enabled = v;
        }
        if let Some(v) = env_bool("KALLGRUND_CRITIC_REVISE_ENABLED") {
            config.critic_revise_enabled = v;
        }
        if let Some(v) = env_parse("KALLGRUND_CRITIC_MAX_REVISIONS") {
            config.critic_max_revisions = v;
        }
        if let Some(v) = env_bool("KALLGRUND_CRAG_ENABLED") {
            config.crag_enabled = v;
        }
        if let Some(v) = env_bool("KALLGRUND_CRAG_SELF_REFLECTION") {
            config.crag_enable_self_reflection = v;
        }
        if let Some(v) = env_parse("KALLGRUND_CRAG_GRADE_THRESHOLD") {
            config.crag_grade_threshold = v;
        }
        if let Some(v) = env_bool("KALLGRUND_RERANK_ENABLED") {
            config.rerank_enabled = v;
        }
        if let Ok(v) = std::env::var("KALLGRUND_LLM_BASE_URL") {
            config.llm_base_url = v;
        }
        if let Ok(v) = std::env::var("KALLGRUND_LLM_MODEL") {
            config.llm_model = v;
        }
        if let Ok(v) = std::env::var("KALLGRUND_EMBEDDING_MODEL") {
            config.embedding_model = v;
        }
        if let Ok(v) = std::env::var("KALLGRUND_VECTOR_COLLECTION") {
            config.vector_collection = v;
        }
        if let Ok(v) = std::env::var("KALLGRUND_VECTOR_STORE_URL") {
            config.vector_store_url = v;
        }

        config
    }

    /// Override the refusal template.
    #[must_use]
    pub fn with_refusal_template(mut self, template: impl Into<String>) -> Self {
        self.evidence_refusal_template = template.into();
        self
    }

    /// Enable or disable the CRAG filter.
    #[must_use]
    pub fn with_crag(mut self, enabled: bool) -> Self {
        self.crag_enabled = enabled;
        self
    }

    /// Enable or disable the self-reflection gate.
    #[must_use]
    pub fn with_self_reflection(mut self, enabled: bool) -> Self {
        self.crag_enable_self_reflection = enabled;
        self
    }

    /// Enable or disable the critique→revise loop.
    #[must_use]
    pub fn with_critic(mut self, enabled: bool) -> Self {
        self.critic_revise_enabled = enabled;
        self
    }

    /// Enable or disable the reranker.
    #[must_use]
    pub fn with_rerank(mut self, enabled: bool) -> Self {
        self.rerank_enabled = enabled;
        self
    }

    /// Replace the adaptive thresholds.
    #[must_use]
    pub fn with_adaptive_thresholds(mut self, thresholds: AdaptiveThresholds) -> Self {
        self.adaptive_thresholds = thresholds;
        self
    }
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key).ok().and_then(|v| {
        match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        }
    })
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
