//! Vector store seam.
//!
//! The corpus lives in an external k-NN store; this crate only searches it.
//! [`VectorStore`] is the narrow read-side contract: given a query vector,
//! return the nearest payloads with similarity scores (higher = closer).
//! Two implementations ship here:
//!
//! - [`qdrant::QdrantStore`] — REST client for a Qdrant-style points API
//! - [`memory::MemoryStore`] — in-process cosine store for tests and demos
//!
//! Writers (the ingest path) never go through this trait; the core is a
//! pure reader.

pub mod memory;
pub mod qdrant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

pub use memory::MemoryStore;
pub use qdrant::QdrantStore;

/// One nearest-neighbor hit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VectorHit {
    /// Point id in the store.
    pub id: String,
    /// Raw similarity score; higher means more similar. Not yet normalized.
    pub score: f32,
    /// Arbitrary payload attached at ingest time.
    pub payload: serde_json::Value,
}

impl VectorHit {
    /// Fetch a string field from the payload, empty when absent.
    #[must_use]
    pub fn payload_str(&self, key: &str) -> String {
        self.payload
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    }

    /// Fetch an optional string field from the payload.
    #[must_use]
    pub fn payload_opt(&self, key: &str) -> Option<String> {
        self.payload
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }
}

/// k-nearest-neighbor search over stored payloads.
///
/// Calls are idempotent and retry-safe; the retrieval layer retries once on
/// [`StoreError`] before giving up.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Return up to `k` nearest points for `vector`, best first.
    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<VectorHit>, StoreError>;
}
