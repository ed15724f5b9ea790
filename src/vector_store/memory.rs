//! In-process cosine store for tests and demos.

use async_trait::async_trait;
use std::sync::Arc;

use super::{VectorHit, VectorStore};
use crate::error::StoreError;

/// One stored point.
#[derive(Clone, Debug)]
pub struct MemoryPoint {
    /// Point id.
    pub id: String,
    /// Unit-norm embedding.
    pub vector: Vec<f32>,
    /// Payload returned with hits.
    pub payload: serde_json::Value,
}

/// Immutable in-memory vector store using cosine similarity.
///
/// Points are fixed at construction; the core only ever reads, matching the
/// single-writer discipline of the real corpus store.
#[derive(Clone)]
pub struct MemoryStore {
    points: Arc<Vec<MemoryPoint>>,
}

impl MemoryStore {
    /// Build a store over the given points.
    #[must_use]
    pub fn new(points: Vec<MemoryPoint>) -> Self {
        Self {
            points: Arc::new(points),
        }
    }

    /// An empty store.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        if a.is_empty() || a.len() != b.len() {
            return 0.0;
        }
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
            return 0.0;
        }
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<VectorHit>, StoreError> {
        let mut hits: Vec<VectorHit> = self
            .points
            .iter()
            .map(|point| VectorHit {
                id: point.id.clone(),
                score: Self::cosine(vector, &point.vector),
                payload: point.payload.clone(),
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(k);
        Ok(hits)
    }
}
