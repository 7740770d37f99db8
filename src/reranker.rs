//! `RerankerClient` — optional cross-encoder reranking interface.
//!
//! Absence degrades gracefully: the Retriever keeps fused top-k ordering and marks
//! `used_strategy`/diagnostics accordingly rather than failing the request.

use async_trait::async_trait;

use crate::error::LlmError;

/// Cross-encoder reranker contract: score `(query, doc)` pairs in `[0,1]`.
#[async_trait]
pub trait RerankerClient: Send + Sync {
    /// Returns one score per input doc, in the same order, each in `[0, 1]`.
    async fn rerank(&self, query: &str, docs: &[String]) -> Result<Vec<f32>, LlmError>;
}
