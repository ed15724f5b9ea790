//! The top-level pipeline coordinator.
//!
//! One [`Orchestrator`] is built at startup with every service injected and
//! handles all requests. The blocking entry point is
//! [`Orchestrator::process_query`]; the incremental variant lives in
//! [`streaming`].
//!
//! The pipeline is deterministic: classify → decontextualize → retrieve →
//! grade → rerank → generate → parse → critique/revise → guardrail. Every
//! dead end (empty retrieval, unusable output, exhausted revisions, denied
//! terminology) converges on the refusal path, which is a well-formed
//! result, never an error. Errors proper are reserved for invalid requests,
//! cancellation, and blown deadlines.

pub mod streaming;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::critic::CriticService;
use crate::embedding::EmbeddingProvider;
use crate::error::{InputError, LlmError, PipelineError, SchemaError};
use crate::grader::GraderService;
use crate::guardrail::{GuardrailService, GuardrailStatus};
use crate::llm::LlmGateway;
use crate::message::ChatMessage;
use crate::prompt;
use crate::query_processor::{ModeConfig, QueryProcessor};
use crate::rerank::{CrossEncoder, Reranker};
use crate::retrieval::{
    AdaptiveStrategy, ConfidenceCalculator, FusionStrategy, ParallelStrategy, RetrievalMetrics,
    RetrievalStrategy, Retriever, RewriteStrategy, SearchResult,
};
use crate::structured::{StructuredAnswer, StructuredOutputService, citation_markers};
use crate::types::{EvidenceLevel, ResponseMode, StrategyKind};

/// One query against the engine.
#[derive(Clone, Debug)]
pub struct QueryRequest {
    /// The natural-language question.
    pub question: String,
    /// Explicit mode, `None` for automatic classification.
    pub mode: Option<ResponseMode>,
    /// Prior conversation turns, oldest first.
    pub history: Vec<ChatMessage>,
    /// How many sources the answer may use.
    pub k: usize,
    /// Which retrieval strategy runs.
    pub strategy: StrategyKind,
}

impl QueryRequest {
    /// A request with defaults: auto mode, no history, `k = 10`,
    /// `parallel_v1` retrieval.
    #[must_use]
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            mode: None,
            history: Vec::new(),
            k: 10,
            strategy: StrategyKind::default(),
        }
    }

    /// Pin the response mode.
    #[must_use]
    pub fn with_mode(mut self, mode: ResponseMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Attach conversation history.
    #[must_use]
    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = history;
        self
    }

    /// Override the source budget.
    #[must_use]
    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    /// Select the retrieval strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    /// Check the request against the interface contract.
    pub fn validate(&self) -> Result<(), InputError> {
        let len = self.question.chars().count();
        if len == 0 || len > 2000 {
            return Err(InputError::QuestionLength { len });
        }
        if self.history.len() > 10 {
            return Err(InputError::HistoryLength {
                len: self.history.len(),
            });
        }
        if self.k == 0 || self.k > 50 {
            return Err(InputError::KRange { k: self.k });
        }
        Ok(())
    }
}

/// Caller-visible projection of a retrieved source.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallerSource {
    /// Chunk id.
    pub id: String,
    /// Document title.
    pub title: String,
    /// Short excerpt.
    pub snippet: String,
    /// Similarity in [0, 1].
    pub score: f32,
    /// Document category.
    pub doc_type: Option<String>,
    /// Origin system or site.
    pub source: String,
}

impl From<&SearchResult> for CallerSource {
    fn from(result: &SearchResult) -> Self {
        Self {
            id: result.id.clone(),
            title: result.title.clone(),
            snippet: result.snippet.clone(),
            score: result.score,
            doc_type: result.doc_type.clone(),
            source: result.source.clone(),
        }
    }
}

/// Internal per-request telemetry. Never serialized toward the caller.
#[derive(Clone, Debug, Default)]
pub struct PipelineMetrics {
    /// Whole-request wall clock.
    pub total_ms: u64,
    /// Telemetry from the retrieval phase.
    pub retrieval: RetrievalMetrics,
    /// How many critic revisions ran.
    pub critic_revision_count: u32,
    /// Model that served the generation.
    pub model_used: String,
    /// Tokens the provider reported generating.
    pub tokens_generated: u32,
    /// Human-readable pipeline trace.
    pub reasoning_steps: Vec<String>,
}

/// The final value of a processed query.
///
/// Deliberately not serializable: callers go through
/// [`RagResult::to_response`], which projects away every internal field.
#[derive(Clone, Debug)]
pub struct RagResult {
    /// The answer text, terminology-corrected.
    pub answer: String,
    /// Sources the answer rests on.
    pub sources: Vec<SearchResult>,
    /// Mode the request was answered in.
    pub mode: ResponseMode,
    /// True when the answer is the refusal template.
    pub saknas_underlag: bool,
    /// Retrieval quality grade.
    pub evidence_level: EvidenceLevel,
    /// Internal telemetry.
    pub metrics: PipelineMetrics,
}

/// The only shape the caller ever sees.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CallerResponse {
    /// The answer text.
    pub answer: String,
    /// Caller-visible sources.
    pub sources: Vec<CallerSource>,
    /// Response mode.
    pub mode: ResponseMode,
    /// Whether the answer is a refusal.
    pub saknas_underlag: bool,
    /// Retrieval quality grade.
    pub evidence_level: EvidenceLevel,
}

impl RagResult {
    /// Project to the caller-visible shape.
    #[must_use]
    pub fn to_response(&self) -> CallerResponse {
        CallerResponse {
            answer: self.answer.clone(),
            sources: self.sources.iter().map(CallerSource::from).collect(),
            mode: self.mode,
            saknas_underlag: self.saknas_underlag,
            evidence_level: self.evidence_level,
        }
    }
}

/// A request after classification and decontextualization.
pub(crate) struct Prepared {
    pub mode: ResponseMode,
    pub mode_config: ModeConfig,
    pub must_include: Vec<String>,
    pub effective_question: String,
    pub rewritten: Option<String>,
    pub history: Vec<ChatMessage>,
    pub k: usize,
    pub strategy: StrategyKind,
}

/// What the retrieval phase decided.
pub(crate) enum RetrievePhase {
    /// Generation proceeds over these sources.
    Proceed {
        sources: Vec<SearchResult>,
        metrics: RetrievalMetrics,
    },
    /// The request goes straight to the refusal path.
    Refuse {
        metrics: RetrievalMetrics,
        reason: String,
    },
}

/// Outcome of the parse→critique→revise loop.
pub(crate) struct Candidate {
    pub answer: StructuredAnswer,
    pub revisions: u32,
    pub refused: bool,
}

/// Builder for [`Orchestrator`]. Providers are injected explicitly; there
/// are no hidden globals.
pub struct OrchestratorBuilder {
    config: EngineConfig,
    llm: Option<Arc<dyn LlmGateway>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    store: Option<Arc<dyn crate::vector_store::VectorStore>>,
    cross_encoder: Option<Arc<dyn CrossEncoder>>,
    guardrail: Option<GuardrailService>,
}

impl OrchestratorBuilder {
    /// Attach the LLM gateway.
    #[must_use]
    pub fn llm(mut self, llm: Arc<dyn LlmGateway>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Attach the embedding provider.
    #[must_use]
    pub fn embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Attach the vector store.
    #[must_use]
    pub fn vector_store(mut self, store: Arc<dyn crate::vector_store::VectorStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Attach a cross-encoder for reranking.
    #[must_use]
    pub fn cross_encoder(mut self, encoder: Arc<dyn CrossEncoder>) -> Self {
        self.cross_encoder = Some(encoder);
        self
    }

    /// Replace the stock guardrail.
    #[must_use]
    pub fn guardrail(mut self, guardrail: GuardrailService) -> Self {
        self.guardrail = Some(guardrail);
        self
    }

    /// Wire everything together.
    ///
    /// Fails when a required provider is missing.
    pub fn build(self) -> Result<Orchestrator, &'static str> {
        let llm = self.llm.ok_or("llm gateway is required")?;
        let embedder = self.embedder.ok_or("embedding provider is required")?;
        let store = self.store.ok_or("vector store is required")?;
        let config = self.config;

        let retriever = Arc::new(Retriever::new(
            embedder,
            store,
            config.budgets.retrieval_subquery(),
        ));

        let mut strategies: FxHashMap<StrategyKind, Arc<dyn RetrievalStrategy>> =
            FxHashMap::default();
        strategies.insert(
            StrategyKind::ParallelV1,
            Arc::new(ParallelStrategy::new(Arc::clone(&retriever))),
        );
        strategies.insert(
            StrategyKind::RewriteV1,
            Arc::new(RewriteStrategy::new(
                Arc::clone(&retriever),
                Arc::clone(&llm),
                config.budgets.rewrite(),
                config.retrieval_fanout_cap,
            )),
        );
        strategies.insert(
            StrategyKind::RagFusion,
            Arc::new(FusionStrategy::new(RewriteStrategy::new(
                Arc::clone(&retriever),
                Arc::clone(&llm),
                config.budgets.rewrite(),
                config.retrieval_fanout_cap,
            ))),
        );
        strategies.insert(
            StrategyKind::Adaptive,
            Arc::new(AdaptiveStrategy::new(
                FusionStrategy::new(RewriteStrategy::new(
                    Arc::clone(&retriever),
                    Arc::clone(&llm),
                    config.budgets.rewrite(),
                    config.retrieval_fanout_cap,
                )),
                ConfidenceCalculator::new(config.adaptive_thresholds.clone()),
            )),
        );

        let query_processor =
            QueryProcessor::new(Arc::clone(&llm), config.budgets.decontextualize());
        let grader = GraderService::new(
            Arc::clone(&llm),
            config.crag_grade_threshold,
            config.grader_concurrency,
            config.budgets.grader_total(),
        );
        let reranker = match self.cross_encoder {
            Some(encoder) => Reranker::new(encoder, config.rerank_enabled),
            None => Reranker::disabled(),
        };
        let structured = StructuredOutputService::new(config.structured_output_enabled);
        let critic = CriticService::new(
            Arc::clone(&llm),
            config.budgets.critique(),
            config.budgets.revise(),
        );
        let guardrail = self.guardrail.unwrap_or_default();

        Ok(Orchestrator {
            config,
            llm,
            query_processor,
            strategies,
            grader,
            reranker,
            structured,
            critic,
            guardrail,
        })
    }
}

/// The pipeline coordinator. See the module docs for the step sequence.
pub struct Orchestrator {
    pub(crate) config: EngineConfig,
    pub(crate) llm: Arc<dyn LlmGateway>,
    pub(crate) query_processor: QueryProcessor,
    strategies: FxHashMap<StrategyKind, Arc<dyn RetrievalStrategy>>,
    grader: GraderService,
    reranker: Reranker,
    pub(crate) structured: StructuredOutputService,
    critic: CriticService,
    pub(crate) guardrail: GuardrailService,
}

impl Orchestrator {
    /// Start building an orchestrator with this configuration.
    #[must_use]
    pub fn builder(config: EngineConfig) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            llm: None,
            embedder: None,
            store: None,
            cross_encoder: None,
            guardrail: None,
        }
    }

    /// Per-service readiness, for the health endpoint.
    #[must_use]
    pub fn status(&self) -> FxHashMap<String, String> {
        let mut services = FxHashMap::default();
        services.insert("llm".to_string(), "ready".to_string());
        services.insert("retrieval".to_string(), "ready".to_string());
        services.insert(
            "grader".to_string(),
            if self.config.crag_enabled { "ready" } else { "disabled" }.to_string(),
        );
        services.insert(
            "reranker".to_string(),
            if self.reranker.is_active() { "ready" } else { "disabled" }.to_string(),
        );
        services.insert(
            "critic".to_string(),
            if self.config.critic_revise_enabled { "ready" } else { "disabled" }.to_string(),
        );
        services.insert("guardrail".to_string(), "ready".to_string());
        services
    }

    /// Process one query to completion.
    pub async fn process_query(&self, request: QueryRequest) -> Result<RagResult, PipelineError> {
        request.validate()?;
        let budget = self.config.budgets.total();
        let budget_ms = self.config.budgets.total_ms;
        timeout(budget, self.process_inner(request))
            .await
            .map_err(|_| PipelineError::Deadline { budget_ms })?
    }

    /// Like [`process_query`](Self::process_query), aborting cleanly when
    /// `cancel` fires. Nothing is returned on cancellation.
    pub async fn process_query_with_cancel(
        &self,
        request: QueryRequest,
        cancel: CancellationToken,
    ) -> Result<RagResult, PipelineError> {
        tokio::select! {
            () = cancel.cancelled() => Err(PipelineError::Cancelled),
            result = self.process_query(request) => result,
        }
    }

    async fn process_inner(&self, request: QueryRequest) -> Result<RagResult, PipelineError> {
        let started = Instant::now();
        let request_id = uuid::Uuid::new_v4();
        tracing::debug!(
            %request_id,
            strategy = %request.strategy,
            k = request.k,
            "processing query"
        );
        let mut steps: Vec<String> = Vec::new();

        let prepared = self.prepare(&request, &mut steps).await;

        if prepared.mode == ResponseMode::Chat {
            return Ok(self.chat_flow(&prepared, started, steps).await);
        }

        let phase = self.retrieve_phase(&prepared, &mut steps).await;
        let (sources, retrieval_metrics) = match phase {
            RetrievePhase::Proceed { sources, metrics } => (sources, metrics),
            RetrievePhase::Refuse { metrics, reason } => {
                steps.push(format!("refusal: {reason}"));
                return Ok(self.refusal_result(metrics, started, steps, 0));
            }
        };

        let (raw, model_used, tokens_generated) =
            match self.generate_with_retry(&prepared, &sources).await {
                Ok(output) => output,
                Err(err) => {
                    steps.push(format!("refusal: generation failed ({err})"));
                    return Ok(self.refusal_result(retrieval_metrics, started, steps, 0));
                }
            };

        let candidate = self
            .critic_phase(raw, &prepared, &sources, true, &mut steps)
            .await;
        if candidate.refused {
            return Ok(self.refusal_result(retrieval_metrics, started, steps, candidate.revisions));
        }

        let mut result = self.finalize(
            candidate.answer,
            sources,
            &prepared,
            retrieval_metrics,
            started,
            steps,
            candidate.revisions,
        );
        result.metrics.model_used = model_used;
        result.metrics.tokens_generated = tokens_generated;
        Ok(result)
    }

    /// Classify and, when needed, decontextualize.
    pub(crate) async fn prepare(&self, request: &QueryRequest, steps: &mut Vec<String>) -> Prepared {
        let classification = self.query_processor.classify(&request.question, request.mode);
        let mode_config = self.query_processor.mode_config(classification.mode);
        steps.push(format!("classified as {}", classification.mode));

        let mut effective_question = request.question.clone();
        let mut rewritten = None;
        if classification.mode != ResponseMode::Chat
            && self
                .query_processor
                .needs_decontextualization(&request.question, &request.history)
        {
            let standalone = self
                .query_processor
                .decontextualize(&request.question, &request.history)
                .await;
            if standalone != request.question {
                steps.push("decontextualized follow-up question".to_string());
                rewritten = Some(standalone.clone());
                effective_question = standalone;
            }
        }

        Prepared {
            mode: classification.mode,
            mode_config,
            must_include: classification.must_include,
            effective_question,
            rewritten,
            history: request.history.clone(),
            k: request.k,
            strategy: request.strategy,
        }
    }

    /// Retrieval, CRAG filtering, and reranking.
    pub(crate) async fn retrieve_phase(
        &self,
        prepared: &Prepared,
        steps: &mut Vec<String>,
    ) -> RetrievePhase {
        let strategy = self
            .strategies
            .get(&prepared.strategy)
            .unwrap_or_else(|| &self.strategies[&StrategyKind::ParallelV1]);

        let outcome = match strategy
            .search(&prepared.effective_question, prepared.k, &prepared.must_include)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(error = %err, "retrieval failed");
                return RetrievePhase::Refuse {
                    metrics: RetrievalMetrics {
                        strategy: prepared.strategy.as_str().to_string(),
                        ..Default::default()
                    },
                    reason: format!("retrieval failed: {err}"),
                };
            }
        };
        steps.push(format!(
            "retrieved {} documents via {}",
            outcome.results.len(),
            outcome.metrics.strategy
        ));

        if outcome.metrics.fallback_triggered == Some(true) {
            return RetrievePhase::Refuse {
                metrics: outcome.metrics,
                reason: "adaptive ladder exhausted".to_string(),
            };
        }
        if outcome.results.is_empty() {
            return RetrievePhase::Refuse {
                metrics: outcome.metrics,
                reason: "no documents retrieved".to_string(),
            };
        }

        let mut sources = outcome.results;
        let metrics = outcome.metrics;

        if self.config.crag_enabled {
            let grades = self
                .grader
                .grade_documents(&prepared.effective_question, &sources)
                .await;
            let retained = self.grader.filter_results(&sources, &grades);
            steps.push(format!(
                "relevance filter retained {} of {} documents",
                retained.len(),
                sources.len()
            ));
            if retained.is_empty() {
                return RetrievePhase::Refuse {
                    metrics,
                    reason: "no relevant documents after grading".to_string(),
                };
            }
            sources = retained;

            if self.config.crag_enable_self_reflection {
                let reflection = self
                    .grader
                    .self_reflect(&prepared.effective_question, &sources)
                    .await;
                if !reflection.has_sufficient_evidence {
                    steps.push("self-reflection judged evidence insufficient".to_string());
                    return RetrievePhase::Refuse {
                        metrics,
                        reason: "insufficient evidence".to_string(),
                    };
                }
            }
        }

        if self.reranker.is_active() && sources.len() > prepared.k {
            let pool: Vec<SearchResult> = sources
                .into_iter()
                .take(self.config.rerank_candidates)
                .collect();
            sources = self
                .reranker
                .rerank(&prepared.effective_question, pool, prepared.k)
                .await;
            steps.push(format!("reranked to top {}", sources.len()));
        } else {
            sources.truncate(prepared.k);
        }

        RetrievePhase::Proceed { sources, metrics }
    }

    /// Generation with one stricter retry on any LLM or parse trouble
    /// downstream (the retry is triggered by the caller re-invoking with
    /// `strict = true`).
    async fn generate_once(
        &self,
        prepared: &Prepared,
        sources: &[SearchResult],
        strict: bool,
    ) -> Result<String, LlmError> {
        let mut system = prompt::system_prompt(prepared.mode_config.system_prompt_id).to_string();
        if strict {
            system = format!("{}\n\n{}", prompt::STRICT_JSON_REMINDER, system);
        }
        let messages =
            prompt::generation_messages(&prepared.effective_question, sources, &prepared.history);
        let budget = self.config.budgets.generation();
        let budget_ms = self.config.budgets.generation_ms;
        timeout(
            budget,
            self.llm.chat(&system, &messages, &prepared.mode_config.params),
        )
        .await
        .map_err(|_| LlmError::Timeout { budget_ms })?
    }

    async fn generate_with_retry(
        &self,
        prepared: &Prepared,
        sources: &[SearchResult],
    ) -> Result<(String, String, u32), LlmError> {
        match self.generate_once(prepared, sources, false).await {
            Ok(raw) => Ok((raw, self.config.llm_model.clone(), 0)),
            Err(err) => {
                tracing::warn!(error = %err, "generation failed, retrying with strict instruction");
                let raw = self.generate_once(prepared, sources, true).await?;
                Ok((raw, self.config.llm_model.clone(), 0))
            }
        }
    }

    /// Parse, validate, and run the critique→revise loop over raw model
    /// output. With `allow_regenerate`, an unusable first candidate triggers
    /// one stricter regeneration before the refusal path.
    pub(crate) async fn critic_phase(
        &self,
        raw: String,
        prepared: &Prepared,
        sources: &[SearchResult],
        allow_regenerate: bool,
        steps: &mut Vec<String>,
    ) -> Candidate {
        let mut raw = raw;
        let mut answer = match self.parse_and_validate(&raw, prepared, sources) {
            Ok(answer) => answer,
            Err(err) => {
                tracing::warn!(error = %err, "candidate rejected by schema validation");
                if !allow_regenerate {
                    return Candidate::refused();
                }
                match self.generate_once(prepared, sources, true).await {
                    Ok(retry_raw) => {
                        raw = retry_raw;
                        match self.parse_and_validate(&raw, prepared, sources) {
                            Ok(answer) => {
                                steps.push("strict regeneration recovered the answer".to_string());
                                answer
                            }
                            Err(err) => {
                                steps.push(format!("refusal: unusable model output ({err})"));
                                return Candidate::refused();
                            }
                        }
                    }
                    Err(err) => {
                        steps.push(format!("refusal: strict regeneration failed ({err})"));
                        return Candidate::refused();
                    }
                }
            }
        };

        if !self.config.critic_revise_enabled {
            return Candidate {
                answer,
                revisions: 0,
                refused: false,
            };
        }

        let mut revisions: u32 = 0;
        loop {
            let verdict = self.critic.critique(&answer, prepared.mode, sources);
            if verdict.ok {
                if revisions > 0 {
                    steps.push(format!("critic accepted after {revisions} revision(s)"));
                }
                return Candidate {
                    answer,
                    revisions,
                    refused: false,
                };
            }
            if revisions >= self.config.critic_max_revisions {
                steps.push(format!(
                    "critic exhausted after {revisions} revision(s): {}",
                    verdict.errors.join("; ")
                ));
                return self.exhausted_candidate(answer, revisions, prepared.mode);
            }

            revisions += 1;
            let candidate_json =
                serde_json::to_string(&answer).unwrap_or_else(|_| raw.clone());
            match self.critic.revise(&candidate_json, &verdict).await {
                Ok(revised_raw) => {
                    raw = revised_raw;
                    match self.parse_and_validate(&raw, prepared, sources) {
                        Ok(revised) => answer = revised,
                        Err(err) => {
                            tracing::debug!(error = %err, revision = revisions, "revision unparseable");
                            // An unusable revision burns the attempt; the
                            // previous candidate stays current.
                        }
                    }
                }
                Err(err) => {
                    steps.push(format!("refusal: revision call failed ({err})"));
                    return self.exhausted_candidate(answer, revisions, prepared.mode);
                }
            }
        }
    }

    fn parse_and_validate(
        &self,
        raw: &str,
        prepared: &Prepared,
        sources: &[SearchResult],
    ) -> Result<StructuredAnswer, SchemaError> {
        let answer = self.structured.parse(raw, prepared.mode)?;
        self.structured.validate(&answer, prepared.mode, sources)?;
        Ok(answer)
    }

    /// What exhaustion means depends on the mode: evidence refuses, assist
    /// keeps the candidate but flags missing citations.
    fn exhausted_candidate(
        &self,
        answer: StructuredAnswer,
        revisions: u32,
        mode: ResponseMode,
    ) -> Candidate {
        match mode {
            ResponseMode::Evidence => Candidate {
                answer,
                revisions,
                refused: true,
            },
            ResponseMode::Assist => {
                let mut answer = answer;
                if citation_markers(&answer.svar).is_empty() {
                    answer.saknas_underlag = true;
                }
                Candidate {
                    answer,
                    revisions,
                    refused: false,
                }
            }
            ResponseMode::Chat => Candidate {
                answer,
                revisions,
                refused: false,
            },
        }
    }

    /// Direct generation without retrieval.
    async fn chat_flow(
        &self,
        prepared: &Prepared,
        started: Instant,
        mut steps: Vec<String>,
    ) -> RagResult {
        let system = prompt::system_prompt(prepared.mode_config.system_prompt_id);
        let messages =
            prompt::generation_messages(&prepared.effective_question, &[], &prepared.history);
        let reply = timeout(
            self.config.budgets.generation(),
            self.llm.chat(system, &messages, &prepared.mode_config.params),
        )
        .await;

        let svar = match reply {
            Ok(Ok(text)) => text.trim().to_string(),
            _ => {
                steps.push("refusal: chat generation failed".to_string());
                return self.refusal_result(RetrievalMetrics::default(), started, steps, 0);
            }
        };

        self.finalize(
            StructuredAnswer::chat(svar),
            Vec::new(),
            prepared,
            RetrievalMetrics::default(),
            started,
            steps,
            0,
        )
    }

    /// Guardrail application and result assembly.
    pub(crate) fn finalize(
        &self,
        answer: StructuredAnswer,
        sources: Vec<SearchResult>,
        prepared: &Prepared,
        retrieval_metrics: RetrievalMetrics,
        started: Instant,
        mut steps: Vec<String>,
        revisions: u32,
    ) -> RagResult {
        let guardrail_result = self.guardrail.validate_response(&answer.svar);
        if guardrail_result.status == GuardrailStatus::Refused {
            steps.push("refusal: guardrail denied terminology".to_string());
            return self.refusal_result(retrieval_metrics, started, steps, revisions);
        }
        if guardrail_result.status == GuardrailStatus::Corrected {
            steps.push(format!(
                "guardrail applied {} correction(s)",
                guardrail_result.corrections.len()
            ));
        }

        let (sources, evidence_level) = if answer.saknas_underlag {
            (Vec::new(), EvidenceLevel::None)
        } else if prepared.mode == ResponseMode::Chat {
            (Vec::new(), EvidenceLevel::None)
        } else {
            let level = EvidenceLevel::grade(
                sources.first().map_or(0.0, |s| s.score),
                sources.len(),
            );
            (sources, level)
        };

        let answer_text = if answer.saknas_underlag {
            self.config.evidence_refusal_template.clone()
        } else {
            guardrail_result.corrected_text
        };

        RagResult {
            answer: answer_text,
            sources,
            mode: prepared.mode,
            saknas_underlag: answer.saknas_underlag,
            evidence_level,
            metrics: PipelineMetrics {
                total_ms: started.elapsed().as_millis() as u64,
                retrieval: retrieval_metrics,
                critic_revision_count: revisions,
                model_used: self.config.llm_model.clone(),
                tokens_generated: 0,
                reasoning_steps: steps,
            },
        }
    }

    /// The refusal path: the canonical template, no sources, still run
    /// through the guardrail.
    pub(crate) fn refusal_result(
        &self,
        retrieval_metrics: RetrievalMetrics,
        started: Instant,
        steps: Vec<String>,
        revisions: u32,
    ) -> RagResult {
        let template = &self.config.evidence_refusal_template;
        let guarded = self.guardrail.validate_response(template);
        let answer = match guarded.status {
            GuardrailStatus::Corrected => guarded.corrected_text,
            _ => template.clone(),
        };
        tracing::info!("request resolved on the refusal path");
        RagResult {
            answer,
            sources: Vec::new(),
            mode: ResponseMode::Evidence,
            saknas_underlag: true,
            evidence_level: EvidenceLevel::None,
            metrics: PipelineMetrics {
                total_ms: started.elapsed().as_millis() as u64,
                retrieval: retrieval_metrics,
                critic_revision_count: revisions,
                model_used: self.config.llm_model.clone(),
                tokens_generated: 0,
                reasoning_steps: steps,
            },
        }
    }

    /// The configured refusal template.
    #[must_use]
    pub fn refusal_template(&self) -> &str {
        &self.config.evidence_refusal_template
    }
}

impl Candidate {
    fn refused() -> Self {
        Self {
            answer: StructuredAnswer::refusal(ResponseMode::Evidence, ""),
            revisions: 0,
            refused: true,
        }
    }
}
