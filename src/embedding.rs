//! Embedding provider seam.
//!
//! Retrieval embeds queries through [`EmbeddingProvider`]; the corpus side
//! (document embedding at ingest time) lives outside this crate. The HTTP
//! implementation targets OpenAI-compatible `/embeddings` endpoints.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::error::EmbeddingError;

/// Turns a text into a dense unit-norm vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed one text. The returned vector is unit-norm.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Normalize a vector to unit length in place. Zero vectors pass unchanged.
pub(crate) fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

/// HTTP client for OpenAI-compatible embedding endpoints.
#[derive(Clone)]
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

impl HttpEmbeddingProvider {
    /// Create a provider against `base_url` (e.g. `http://host:8000/v1`).
    #[must_use]
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/embeddings", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let body = json!({
            "model": self.model,
            "input": text,
        });
        let response = self
            .client
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(|err| EmbeddingError::Request(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Request(format!("status {status}: {message}")));
        }
        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|err| EmbeddingError::Malformed(err.to_string()))?;
        let mut vector = parsed
            .data
            .into_iter()
            .next()
            .map(|datum| datum.embedding)
            .ok_or_else(|| EmbeddingError::Malformed("response carried no embedding".to_string()))?;
        if vector.is_empty() {
            return Err(EmbeddingError::Malformed("embedding is empty".to_string()));
        }
        normalize(&mut vector);
        Ok(vector)
    }
}
