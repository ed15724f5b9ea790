//! ```text
//! Question ──► QueryProcessor ─┬─► CHAT: direct generation
//!                              └─► ASSIST / EVIDENCE
//!                                      │
//!     (history) decontextualize ◄──────┤
//!                                      ▼
//!            RetrievalStrategy ──► parallel / rewrite / fusion / adaptive
//!                                      │
//!                 GraderService ──► CRAG filter (+ self-reflection)
//!                                      │
//!                      Reranker ──► cross-encoder re-scoring
//!                                      │
//!                    LlmGateway ──► streamed generation
//!                                      │
//!              StructuredOutput ──► parse + validate + strip
//!                                      │
//!                 CriticService ──► critique ─► revise ─► re-validate
//!                                      │
//!              GuardrailService ──► terminology normalization
//!                                      │
//!                     RagResult ◄── Orchestrator (refusal path on any dead end)
//! ```
//!
//! # Kallgrund
//!
//! Kallgrund is a retrieval-augmented question-answering engine for Swedish
//! administrative and legal text. Every answer is either grounded in cited
//! corpus passages or replaced by a canonical refusal: the pipeline enforces
//! source citation, bans speculation when the underlying material is missing,
//! and keeps opinion out of evidence-mode answers.
//!
//! ## Core pieces
//!
//! - **Retrieval strategies** ([`retrieval`]): parallel vector search, query
//!   rewriting, reciprocal-rank fusion, and an adaptive escalation ladder
//!   driven by [`retrieval::confidence`] signals.
//! - **Response modes** ([`query_processor`]): `CHAT`, `ASSIST`, `EVIDENCE`,
//!   each with its own generation parameters and citation contract.
//! - **Answer validation** ([`structured`], [`critic`], [`guardrail`]): the
//!   model's JSON answer is parsed, schema-checked, critiqued, optionally
//!   revised, and terminology-normalized before anything reaches the caller.
//! - **Streaming** ([`orchestrator`], [`sse`], [`server`]): the same pipeline
//!   with an incremental SSE feed (metadata, tokens, corrections, done).
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use kallgrund::config::EngineConfig;
//! use kallgrund::orchestrator::Orchestrator;
//!
//! let config = EngineConfig::from_env()?;
//! let orchestrator = Orchestrator::builder(config)
//!     .llm(Arc::new(my_gateway))
//!     .embedder(Arc::new(my_embedder))
//!     .vector_store(Arc::new(my_store))
//!     .build()?;
//!
//! let result = orchestrator
//!     .process_query(QueryRequest::new("Vad säger GDPR om samtycke?"))
//!     .await?;
//! println!("{}", result.answer);
//! ```
//!
//! ## Module guide
//!
//! - [`message`] - Chat message types shared across the pipeline
//! - [`types`] - Response modes, strategy tags, evidence levels
//! - [`config`] - Process-wide engine configuration
//! - [`error`] - Layered error taxonomy
//! - [`llm`] - LLM gateway trait and OpenAI-compatible HTTP client
//! - [`embedding`] - Embedding provider seam
//! - [`vector_store`] - k-NN search seam with REST and in-memory backends
//! - [`retrieval`] - Retrieval strategies, metrics, confidence signals
//! - [`grader`] - Per-document relevance grading (CRAG)
//! - [`rerank`] - Optional cross-encoder re-scoring
//! - [`query_processor`] - Mode classification and decontextualization
//! - [`structured`] - Structured answer parsing and validation
//! - [`critic`] - Critique and revision of candidate answers
//! - [`guardrail`] - Terminology normalization and refusal enforcement
//! - [`orchestrator`] - The top-level pipeline, blocking and streaming
//! - [`sse`] - Streaming event model and wire encoding
//! - [`server`] - axum router exposing query, stream, and health endpoints

pub mod config;
pub mod critic;
pub mod embedding;
pub mod error;
pub mod grader;
pub mod guardrail;
pub mod llm;
pub mod message;
pub mod orchestrator;
pub mod prompt;
pub mod query_processor;
pub mod rerank;
pub mod retrieval;
pub mod server;
pub mod sse;
pub mod structured;
pub mod telemetry;
pub mod types;
pub mod vector_store;

pub use config::EngineConfig;
pub use orchestrator::{Orchestrator, QueryRequest, RagResult};
pub use types::{EvidenceLevel, ResponseMode, StrategyKind};
