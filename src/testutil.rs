//! Deterministic in-memory fakes for [`crate::llm::LLMClient`], [`crate::embedding::EmbedClient`],
//! and [`crate::reranker::RerankerClient`], used by this crate's own unit/integration tests and
//! exported behind the `testutil` feature so downstream binaries can build deterministic
//! end-to-end tests without a network call.
//!
//! Hand-written fakes rather than a mocking crate — these traits are small enough that a literal
//! struct implementing them is clearer than a generated mock.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::embedding::EmbedClient;
use crate::error::LlmError;
use crate::llm::{CompletionRequest, LLMClient};
use crate::reranker::RerankerClient;

/// What a [`FakeLLMClient`] does when `complete` is called, independent of the prompt text (these
/// fakes are not prompt-aware; callers select behavior per test instead of pattern-matching prompts).
#[derive(Debug, Clone)]
pub enum LLMBehavior {
    StringList(Vec<String>),
    SingleString(String),
    TripleList(Vec<(String, String, String)>),
    Sufficiency(crate::llm::Sufficiency),
    /// Echoes the prompt back verbatim (useful for rewrite/decomposition tests that just check
    /// plumbing, not content).
    Echo,
    AlwaysUnavailable,
    AlwaysTimeout,
}

pub struct FakeLLMClient {
    behavior: LLMBehavior,
    calls: AtomicUsize,
}

impl FakeLLMClient {
    pub fn new(behavior: LLMBehavior) -> Self {
        Self { behavior, calls: AtomicUsize::new(0) }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LLMClient for FakeLLMClient {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            LLMBehavior::StringList(items) => Ok(serde_json::to_string(items).unwrap()),
            LLMBehavior::SingleString(s) => Ok(serde_json::to_string(s).unwrap()),
            LLMBehavior::TripleList(triples) => {
                let json: Vec<_> = triples
                    .iter()
                    .map(|(s, p, o)| serde_json::json!({"subject": s, "predicate": p, "object": o}))
                    .collect();
                Ok(serde_json::to_string(&json).unwrap())
            }
            LLMBehavior::Sufficiency(v) => Ok(match v {
                crate::llm::Sufficiency::Sufficient => "sufficient".to_string(),
                crate::llm::Sufficiency::Insufficient => "insufficient".to_string(),
            }),
            LLMBehavior::Echo => Ok(request.prompt.to_string()),
            LLMBehavior::AlwaysUnavailable => Err(LlmError::Unavailable("fake LLM unavailable".into())),
            LLMBehavior::AlwaysTimeout => Err(LlmError::Timeout),
        }
    }
}

/// Deterministic hash-based embedding: stable per input string, cheap, and similar strings don't
/// accidentally collide the way a trivial length-based embedding would. Not semantically meaningful,
/// only useful for exercising plumbing (cache hits on identical queries, distinct vectors for
/// distinct chunks).
pub struct FakeEmbedClient {
    dims: usize,
}

impl FakeEmbedClient {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut vector = vec![0.0f32; self.dims];
        for (i, word) in text.split_whitespace().enumerate() {
            let mut hasher = DefaultHasher::new();
            word.hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h as usize) % self.dims;
            vector[idx] += 1.0;
            let _ = i;
        }
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbedClient for FakeEmbedClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn model_name(&self) -> &str {
        "fake-embed"
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

/// Scores documents by overlap with the query's lowercased token set. Enough to make "the relevant
/// doc should rank first" assertions meaningful without a real cross-encoder.
pub struct FakeRerankerClient {
    pub unavailable: bool,
}

impl FakeRerankerClient {
    pub fn new() -> Self {
        Self { unavailable: false }
    }

    pub fn always_unavailable() -> Self {
        Self { unavailable: true }
    }
}

impl Default for FakeRerankerClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RerankerClient for FakeRerankerClient {
    async fn rerank(&self, query: &str, docs: &[String]) -> Result<Vec<f32>, LlmError> {
        if self.unavailable {
            return Err(LlmError::Unavailable("fake reranker unavailable".into()));
        }
        let query_terms: std::collections::HashSet<String> =
            query.to_lowercase().split_whitespace().map(|s| s.to_string()).collect();
        Ok(docs
            .iter()
            .map(|doc| {
                let doc_terms: std::collections::HashSet<String> =
                    doc.to_lowercase().split_whitespace().map(|s| s.to_string()).collect();
                let overlap = query_terms.intersection(&doc_terms).count();
                overlap as f32 / (query_terms.len().max(1) as f32)
            })
            .collect())
    }
}

/// Wraps another `LLMClient` and fails the first `fail_times` calls with `Timeout`, then delegates.
/// Used to exercise the ingestor's embedding-retry path and self-RAG's retry loop deterministically.
pub struct FlakyLLMClient {
    inner: Box<dyn LLMClient>,
    remaining_failures: Mutex<usize>,
}

impl FlakyLLMClient {
    pub fn new(inner: Box<dyn LLMClient>, fail_times: usize) -> Self {
        Self { inner, remaining_failures: Mutex::new(fail_times) }
    }
}

#[async_trait]
impl LLMClient for FlakyLLMClient {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<String, LlmError> {
        {
            let mut remaining = self.remaining_failures.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(LlmError::Timeout);
            }
        }
        self.inner.complete(request).await
    }
}

/// A deadline long enough that fakes never trip it.
pub fn generous_deadline() -> Duration {
    Duration::from_secs(30)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_embed_client_is_deterministic() {
        let client = FakeEmbedClient::new(16);
        let a = client.embed(&["hello world".to_string()]).await.unwrap();
        let b = client.embed(&["hello world".to_string()]).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn fake_reranker_ranks_overlapping_doc_higher() {
        let reranker = FakeRerankerClient::new();
        let scores = reranker
            .rerank("mitochondria powerhouse", &["mitochondria is the powerhouse".into(), "unrelated text".into()])
            .await
            .unwrap();
        assert!(scores[0] > scores[1]);
    }

    #[tokio::test]
    async fn flaky_client_recovers_after_failures() {
        let inner = Box::new(FakeLLMClient::new(LLMBehavior::SingleString("ok".into())));
        let flaky = FlakyLLMClient::new(inner, 2);
        let req = || CompletionRequest { prompt: "x", schema: None, deadline: generous_deadline() };
        assert!(flaky.complete(req()).await.is_err());
        assert!(flaky.complete(req()).await.is_err());
        assert!(flaky.complete(req()).await.is_ok());
    }
}
