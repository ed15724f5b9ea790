//! Layered error taxonomy for the answer pipeline.
//!
//! Errors are values at the seams: providers fail with their own error type,
//! services wrap those into pipeline signals, and only the
//! [`Orchestrator`](crate::orchestrator::Orchestrator) decides whether a
//! request as a whole succeeds, refuses, or errors. Refusal is *not* an
//! error; it is a well-formed result and never appears here.

use miette::Diagnostic;
use thiserror::Error;

/// Errors from the LLM gateway: generation, rewriting, grading, critiquing.
#[derive(Debug, Error, Diagnostic)]
pub enum LlmError {
    /// The HTTP transport failed before a response arrived.
    #[error("llm transport error: {0}")]
    #[diagnostic(code(kallgrund::llm::transport))]
    Transport(String),

    /// The provider answered with a non-success status.
    #[error("llm provider rejected request (status {status}): {message}")]
    #[diagnostic(code(kallgrund::llm::provider))]
    Provider { status: u16, message: String },

    /// The response body did not match the expected shape.
    #[error("llm response malformed: {0}")]
    #[diagnostic(code(kallgrund::llm::malformed))]
    Malformed(String),

    /// A budget elapsed before the call finished.
    #[error("llm call timed out after {budget_ms}ms")]
    #[diagnostic(
        code(kallgrund::llm::timeout),
        help("The per-phase budgets are configurable on EngineConfig.")
    )]
    Timeout { budget_ms: u64 },

    /// The token stream went silent past the stall budget.
    #[error("llm stream stalled (no token for {stall_ms}ms)")]
    #[diagnostic(code(kallgrund::llm::stall))]
    Stalled { stall_ms: u64 },

    /// The request was cancelled by the caller.
    #[error("llm call cancelled")]
    #[diagnostic(code(kallgrund::llm::cancelled))]
    Cancelled,
}

/// Errors from the embedding provider.
#[derive(Debug, Error, Diagnostic)]
pub enum EmbeddingError {
    /// Transport or provider failure.
    #[error("embedding request failed: {0}")]
    #[diagnostic(code(kallgrund::embedding::request))]
    Request(String),

    /// The provider returned a vector of unexpected shape.
    #[error("embedding response malformed: {0}")]
    #[diagnostic(code(kallgrund::embedding::malformed))]
    Malformed(String),
}

/// Errors from the vector store.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    /// Transport-level failure talking to the store.
    #[error("vector store unreachable: {0}")]
    #[diagnostic(code(kallgrund::store::transport))]
    Transport(String),

    /// The store answered but the payload could not be interpreted.
    #[error("vector store payload malformed: {0}")]
    #[diagnostic(code(kallgrund::store::malformed))]
    Malformed(String),
}

/// Retrieval-layer failure: embedding or store trouble that survived the
/// per-strategy retry.
#[derive(Debug, Error, Diagnostic)]
pub enum RetrievalError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    /// A retrieval sub-query exceeded its budget.
    #[error("retrieval sub-query timed out after {budget_ms}ms")]
    #[diagnostic(code(kallgrund::retrieval::timeout))]
    Timeout { budget_ms: u64 },

    /// The request was cancelled while retrieval was in flight.
    #[error("retrieval cancelled")]
    #[diagnostic(code(kallgrund::retrieval::cancelled))]
    Cancelled,
}

/// Structured-output validation failure.
#[derive(Debug, Error, Diagnostic)]
pub enum SchemaError {
    /// No JSON object could be located in the model output.
    #[error("no JSON object found in model output")]
    #[diagnostic(
        code(kallgrund::schema::no_json),
        help("The generation is retried once with a stricter instruction before refusing.")
    )]
    NoJson,

    /// The extracted candidate was not valid JSON.
    #[error("model output is not valid JSON: {0}")]
    #[diagnostic(code(kallgrund::schema::invalid_json))]
    InvalidJson(String),

    /// JSON parsed but violated the answer schema.
    #[error("structured answer invalid: {0}")]
    #[diagnostic(code(kallgrund::schema::invalid_answer))]
    InvalidAnswer(String),

    /// The answer declared a mode other than the classified one.
    #[error("answer mode {got} does not match classified mode {expected}")]
    #[diagnostic(
        code(kallgrund::schema::mode_mismatch),
        help("Mode smuggling is treated as malformed output and forces the refusal path.")
    )]
    ModeMismatch { expected: String, got: String },
}

/// Request validation failure, surfaced to the caller as a client error.
#[derive(Debug, Error, Diagnostic)]
pub enum InputError {
    /// Question length outside 1..=2000 characters.
    #[error("question length {len} outside allowed range 1..=2000")]
    #[diagnostic(code(kallgrund::input::question_length))]
    QuestionLength { len: usize },

    /// More history than the contract allows.
    #[error("history has {len} messages, maximum is 10")]
    #[diagnostic(code(kallgrund::input::history_length))]
    HistoryLength { len: usize },

    /// k outside 1..=50.
    #[error("k = {k} outside allowed range 1..=50")]
    #[diagnostic(code(kallgrund::input::k_range))]
    KRange { k: usize },

    /// Unknown mode or strategy label.
    #[error("unknown value for {field}: {value}")]
    #[diagnostic(code(kallgrund::input::unknown_value))]
    UnknownValue { field: &'static str, value: String },
}

/// Top-level pipeline error, produced only by the orchestrator.
///
/// Anything that can be absorbed into the refusal path never becomes a
/// `PipelineError`; this type covers client errors, cancellation, and the
/// rare transport-level failures that leave no answer to give.
#[derive(Debug, Error, Diagnostic)]
pub enum PipelineError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Retrieval(#[from] RetrievalError),

    /// The caller disconnected or the deadline elapsed; partial results are
    /// discarded and no response is emitted.
    #[error("request cancelled")]
    #[diagnostic(code(kallgrund::pipeline::cancelled))]
    Cancelled,

    /// The 120 s per-request wall clock elapsed.
    #[error("request exceeded total budget of {budget_ms}ms")]
    #[diagnostic(code(kallgrund::pipeline::deadline))]
    Deadline { budget_ms: u64 },
}

impl PipelineError {
    /// True when the error maps to an HTTP 4xx.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Input(_))
    }
}
