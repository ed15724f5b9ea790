//! REST client for a Qdrant-style points API.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{VectorHit, VectorStore};
use crate::error::StoreError;

/// Vector store backed by a Qdrant-compatible `points/search` endpoint.
#[derive(Clone)]
pub struct QdrantStore {
    client: reqwest::Client,
    base_url: String,
    collection: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    result: Vec<ScoredPoint>,
}

#[derive(Deserialize)]
struct ScoredPoint {
    id: serde_json::Value,
    score: f32,
    #[serde(default)]
    payload: serde_json::Value,
}

impl QdrantStore {
    /// Create a client for `collection` at `base_url`
    /// (e.g. `http://host:6333`).
    #[must_use]
    pub fn new(base_url: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            collection: collection.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/collections/{}/points/search",
            self.base_url.trim_end_matches('/'),
            self.collection
        )
    }

    fn point_id_to_string(id: &serde_json::Value) -> String {
        match id {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<VectorHit>, StoreError> {
        let body = json!({
            "vector": vector,
            "limit": k,
            "with_payload": true,
        });
        let response = self
            .client
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(|err| StoreError::Transport(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(StoreError::Transport(format!("status {status}: {message}")));
        }
        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|err| StoreError::Malformed(err.to_string()))?;
        Ok(parsed
            .result
            .into_iter()
            .map(|point| VectorHit {
                id: Self::point_id_to_string(&point.id),
                score: point.score,
                payload: point.payload,
            })
            .collect())
    }
}
