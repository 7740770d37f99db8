//! In-memory [`VectorIndex`], brute-force cosine scan per user.
//!
//! Same shape as the teacher's `InMemoryStore` vector scan: a `RwLock<HashMap>` keyed by user,
//! linear search scored with [`crate::embedding::cosine_to_unit_score`]. Fine at the scale this
//! crate targets (a single user's study materials); a real ANN index would replace this module
//! without touching the trait.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::{ScoredChunk, VectorIndex};
use crate::embedding::cosine_similarity;
use crate::error::CoreResult;

#[derive(Default)]
pub struct InMemoryVectorIndex {
    inner: RwLock<HashMap<String, HashMap<String, Vec<f32>>>>, // user_id -> chunk_id -> vector
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, user_id: &str, chunk_id: &str, vector: Vec<f32>) -> CoreResult<()> {
        let mut inner = self.inner.write().unwrap();
        inner.entry(user_id.to_string()).or_default().insert(chunk_id.to_string(), vector);
        Ok(())
    }

    async fn search(&self, user_id: &str, query_vector: &[f32], k: usize) -> CoreResult<Vec<ScoredChunk>> {
        let inner = self.inner.read().unwrap();
        let Some(namespace) = inner.get(user_id) else {
            return Ok(Vec::new());
        };
        let mut scored: Vec<ScoredChunk> = namespace
            .iter()
            .map(|(chunk_id, vector)| ScoredChunk {
                chunk_id: chunk_id.clone(),
                score: crate::embedding::cosine_to_unit_score(cosine_similarity(query_vector, vector)),
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    async fn delete(&self, user_id: &str, chunk_ids: &[String]) -> CoreResult<()> {
        let mut inner = self.inner.write().unwrap();
        if let Some(namespace) = inner.get_mut(user_id) {
            for id in chunk_ids {
                namespace.remove(id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn search_ranks_by_cosine_similarity() {
        let index = InMemoryVectorIndex::new();
        index.upsert("u1", "close", vec![1.0, 0.0]).await.unwrap();
        index.upsert("u1", "far", vec![0.0, 1.0]).await.unwrap();
        let hits = index.search("u1", &[0.9, 0.1], 2).await.unwrap();
        assert_eq!(hits[0].chunk_id, "close");
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn search_respects_k() {
        let index = InMemoryVectorIndex::new();
        for i in 0..5 {
            index.upsert("u1", &format!("c{i}"), vec![i as f32, 1.0]).await.unwrap();
        }
        let hits = index.search("u1", &[0.0, 1.0], 3).await.unwrap();
        assert_eq!(hits.len(), 3);
    }

    #[tokio::test]
    async fn delete_removes_from_namespace() {
        let index = InMemoryVectorIndex::new();
        index.upsert("u1", "c1", vec![1.0, 0.0]).await.unwrap();
        index.delete("u1", &["c1".to_string()]).await.unwrap();
        let hits = index.search("u1", &[1.0, 0.0], 5).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn namespaces_are_isolated() {
        let index = InMemoryVectorIndex::new();
        index.upsert("u1", "c1", vec![1.0, 0.0]).await.unwrap();
        let hits = index.search("u2", &[1.0, 0.0], 5).await.unwrap();
        assert!(hits.is_empty());
    }
}
