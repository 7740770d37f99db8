//! `VectorIndex` — nearest-neighbor search over chunk embeddings, scoped per user.
//!
//! A brute-force cosine scan sits behind this trait for now so the retriever doesn't care whether
//! vectors live in memory or in a real ANN backend later.

pub mod memory;

use async_trait::async_trait;

use crate::error::CoreResult;

/// A single scored hit: chunk id and a score in `[0, 1]` (cosine remapped via
/// [`crate::embedding::cosine_to_unit_score`]).
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk_id: String,
    pub score: f32,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Inserts or replaces the vector for `chunk_id` in `user_id`'s namespace.
    async fn upsert(&self, user_id: &str, chunk_id: &str, vector: Vec<f32>) -> CoreResult<()>;

    /// Top-`k` nearest neighbors to `query_vector` within `user_id`'s namespace, sorted by score
    /// descending. Fewer than `k` results are returned if the namespace has fewer vectors.
    async fn search(&self, user_id: &str, query_vector: &[f32], k: usize) -> CoreResult<Vec<ScoredChunk>>;

    /// Removes the listed chunk ids from `user_id`'s namespace. Ids not present are ignored.
    async fn delete(&self, user_id: &str, chunk_ids: &[String]) -> CoreResult<()>;
}
