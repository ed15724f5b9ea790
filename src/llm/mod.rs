//! LLM gateway seam.
//!
//! Everything that talks to a language model goes through [`LlmGateway`]:
//! generation, query rewriting, decontextualization, grading, critiquing,
//! and revision. The trait deliberately mirrors the two shapes the pipeline
//! needs — a single-prompt call and a token stream — and nothing else.
//!
//! [`http::HttpLlmGateway`] implements the trait against any
//! OpenAI-compatible endpoint; tests script their own implementations.

pub mod http;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::message::ChatMessage;

pub use http::HttpLlmGateway;

/// Generation parameters for one LLM call.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatParams {
    /// Sampling temperature.
    pub temperature: f32,
    /// Hard cap on generated tokens.
    pub max_tokens: u32,
}

impl ChatParams {
    /// Parameters for a short utility call (rewrites, grading, critiques).
    #[must_use]
    pub fn utility() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 512,
        }
    }
}

impl Default for ChatParams {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: 1024,
        }
    }
}

/// Summary statistics delivered with the final element of a token stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamStats {
    /// Number of tokens the provider reported generating.
    pub tokens_generated: u32,
    /// Model that actually served the request.
    pub model_used: String,
    /// When the stream opened.
    pub start_time: DateTime<Utc>,
    /// When the final chunk arrived.
    pub end_time: DateTime<Utc>,
}

/// One element of a token stream.
///
/// Every element carries a (possibly empty) token; the terminal element
/// additionally carries [`StreamStats`].
#[derive(Clone, Debug, PartialEq)]
pub struct StreamItem {
    /// Token text, in provider arrival order.
    pub token: String,
    /// Present only on the final element.
    pub stats: Option<StreamStats>,
}

impl StreamItem {
    /// A plain token element.
    #[must_use]
    pub fn token(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            stats: None,
        }
    }

    /// The terminal element carrying stats.
    #[must_use]
    pub fn done(stats: StreamStats) -> Self {
        Self {
            token: String::new(),
            stats: Some(stats),
        }
    }
}

/// Boxed token stream returned by [`LlmGateway::chat_stream`].
pub type TokenStream = BoxStream<'static, Result<StreamItem, LlmError>>;

/// Single-prompt and streaming chat against an external LLM.
///
/// Implementations must emit tokens in provider arrival order and terminate
/// streams with exactly one stats-carrying element (or an error).
#[async_trait]
pub trait LlmGateway: Send + Sync {
    /// One-shot completion. Returns the full response text.
    async fn chat(
        &self,
        system: &str,
        messages: &[ChatMessage],
        params: &ChatParams,
    ) -> Result<String, LlmError>;

    /// Streaming completion. The final element carries [`StreamStats`].
    async fn chat_stream(
        &self,
        system: &str,
        messages: &[ChatMessage],
        params: &ChatParams,
    ) -> Result<TokenStream, LlmError>;
}
