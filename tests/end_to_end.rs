//! End-to-end scenarios over the public API: ingest a document, then ask questions against it,
//! using the deterministic fakes from `studyrag_core::testutil` (enabled via this crate's own
//! `testutil` feature) instead of a network provider.

use std::sync::Arc;

use studyrag_core::cache::ResponseCache;
use studyrag_core::config::{Config, DbConfig, DeadlinesConfig, RetrievalConfig};
use studyrag_core::embedding::EmbedClient;
use studyrag_core::feedback::{rate_answer, FeedbackTracker};
use studyrag_core::ingest::Ingestor;
use studyrag_core::lexical::LexicalIndex;
use studyrag_core::llm::LLMClient;
use studyrag_core::models::Thumbs;
use studyrag_core::orchestrator::AnswerOrchestrator;
use studyrag_core::progress::NoProgress;
use studyrag_core::reranker::RerankerClient;
use studyrag_core::retriever::Retriever;
use studyrag_core::store::memory::InMemoryChunkStore;
use studyrag_core::store::ChunkStore;
use studyrag_core::testutil::{FakeEmbedClient, FakeLLMClient, FakeRerankerClient, LLMBehavior};
use studyrag_core::vector::memory::InMemoryVectorIndex;

fn test_config() -> Config {
    Config {
        db: DbConfig { path: std::path::PathBuf::from(":memory:") },
        chunking: Default::default(),
        retrieval: RetrievalConfig::default(),
        embedding: Default::default(),
        llm: Default::default(),
        reranker: Default::default(),
        cache: Default::default(),
        ingest: Default::default(),
        deadlines: DeadlinesConfig::default(),
    }
}

struct Harness {
    store: Arc<InMemoryChunkStore>,
    vectors: Arc<InMemoryVectorIndex>,
    lexical: Arc<LexicalIndex>,
    embed: Arc<dyn EmbedClient>,
    cache: Arc<ResponseCache>,
}

impl Harness {
    fn new() -> Self {
        Self {
            store: Arc::new(InMemoryChunkStore::new()),
            vectors: Arc::new(InMemoryVectorIndex::new()),
            lexical: Arc::new(LexicalIndex::new(8)),
            embed: Arc::new(FakeEmbedClient::new(24)),
            cache: Arc::new(ResponseCache::new(10, 86_400, 0.95)),
        }
    }

    fn ingestor(&self, llm: Option<Arc<dyn LLMClient>>) -> Ingestor {
        Ingestor::new(
            self.store.clone(),
            self.vectors.clone(),
            self.lexical.clone(),
            self.embed.clone(),
            llm,
            Some(self.cache.clone()),
            test_config(),
            Arc::new(NoProgress),
        )
    }

    fn orchestrator(&self, llm: Arc<dyn LLMClient>, reranker: Option<Arc<dyn RerankerClient>>) -> AnswerOrchestrator {
        let retriever = Arc::new(Retriever::new(
            self.store.clone(),
            self.vectors.clone(),
            self.lexical.clone(),
            reranker,
            Some(llm.clone()),
            RetrievalConfig::default(),
        ));
        AnswerOrchestrator::new(
            self.store.clone(),
            retriever,
            self.cache.clone(),
            self.embed.clone(),
            llm,
            DeadlinesConfig::default(),
        )
    }

    async fn ingest_textbook(&self, user_id: &str, title: &str, text: &str) -> String {
        self.ingestor(None).submit_document(user_id, title, text, None, None).await.unwrap()
    }
}

const CELL_TEXT: &str = "The mitochondrion is the powerhouse of the cell.\n\nIt generates most of the cell's supply of \
adenosine triphosphate, used as a source of chemical energy. Mitochondria have a double membrane structure: an \
outer membrane and a folded inner membrane called the cristae.\n\nThe cytoplasm surrounds the organelles and \
fills the rest of the cell's interior.";

/// A cache hit on the exact same question, second time around, never touches the LLM again.
#[tokio::test]
async fn repeated_question_hits_the_cache() {
    let harness = Harness::new();
    harness.ingest_textbook("u1", "Biology 101", CELL_TEXT).await;

    let llm = Arc::new(FakeLLMClient::new(LLMBehavior::Echo));
    let orchestrator = harness.orchestrator(llm.clone(), None);

    let first = orchestrator.answer("u1", "what is the mitochondrion", None).await.unwrap();
    assert!(!first.diagnostics.cache_hit);
    let calls_after_first = llm.call_count();

    let second = orchestrator.answer("u1", "what is the mitochondrion", None).await.unwrap();
    assert!(second.diagnostics.cache_hit, "identical question should hit the cache");
    assert_eq!(second.answer_text, first.answer_text);
    assert_eq!(llm.call_count(), calls_after_first, "a cache hit must not call the LLM again");
}

/// A compound question with coordination ("and") is split into sub-questions before retrieval.
#[tokio::test]
async fn compound_question_is_decomposed() {
    let harness = Harness::new();
    harness.ingest_textbook("u1", "Biology 101", CELL_TEXT).await;

    let llm = Arc::new(FakeLLMClient::new(LLMBehavior::StringList(vec![
        "What does the mitochondrion do?".into(),
        "What is the cytoplasm?".into(),
    ])));
    let orchestrator = harness.orchestrator(llm, None);

    let result = orchestrator
        .answer("u1", "What does the mitochondrion do and what is the cytoplasm?", None)
        .await
        .unwrap();
    assert_eq!(result.diagnostics.decomposed_n, 2);
}

/// An insufficient verdict triggers a reformulate-and-retry; an empty document set never becomes
/// sufficient, so the self-RAG loop runs to its configured cap and flags low confidence.
#[tokio::test]
async fn self_rag_retries_then_flags_low_confidence_when_context_never_suffices() {
    let harness = Harness::new();
    // No documents ingested at all: every retrieval returns an empty context.

    let llm = Arc::new(FakeLLMClient::new(LLMBehavior::Sufficiency(
        studyrag_core::llm::Sufficiency::Insufficient,
    )));
    let orchestrator = harness.orchestrator(llm, None);

    let result = orchestrator.answer("u1", "what is the krebs cycle", None).await.unwrap();
    assert!(result.diagnostics.low_confidence);
    assert_eq!(result.diagnostics.self_rag_iterations, DeadlinesConfig::default().max_self_rag_iterations);
}

/// Deleting a document invalidates that user's cached answers (doc_set_version bump), so a
/// previously-cached question is re-answered rather than served stale.
#[tokio::test]
async fn deleting_a_document_invalidates_its_cached_answers() {
    let harness = Harness::new();
    let doc_id = harness.ingest_textbook("u1", "Biology 101", CELL_TEXT).await;

    let llm = Arc::new(FakeLLMClient::new(LLMBehavior::Echo));
    let orchestrator = harness.orchestrator(llm.clone(), None);

    let first = orchestrator.answer("u1", "what is the mitochondrion", None).await.unwrap();
    assert!(!first.diagnostics.cache_hit);

    harness.ingestor(None).delete_document("u1", &doc_id).await.unwrap();

    let after_delete = orchestrator.answer("u1", "what is the mitochondrion", None).await.unwrap();
    assert!(!after_delete.diagnostics.cache_hit, "cache entry tied to a deleted document must not be served");
}

/// A textbook's parent/child chunk split means the context handed to generation is the wider
/// parent window, not just the single matched child chunk.
#[tokio::test]
async fn retrieval_expands_matched_child_chunks_to_their_parent_window() {
    let harness = Harness::new();
    harness.ingest_textbook("u1", "Biology 101", CELL_TEXT).await;

    let retriever = Retriever::new(
        harness.store.clone(),
        harness.vectors.clone(),
        harness.lexical.clone(),
        None,
        None,
        RetrievalConfig::default(),
    );
    let embedding = studyrag_core::embedding::embed_query(
        harness.embed.as_ref(),
        &studyrag_core::embedding::enrich("", None, "mitochondrion powerhouse"),
    )
    .await
    .unwrap();
    let result = retriever.retrieve("u1", "mitochondrion powerhouse", &embedding).await.unwrap();

    assert!(!result.chunks.is_empty());
    let top = &result.chunks[0];
    assert!(top.expanded_text.len() >= top.chunk_id.len());
}

/// When the reranker is unavailable, retrieval degrades to the fused lexical/vector ranking
/// instead of failing the whole question.
#[tokio::test]
async fn answer_survives_reranker_outage() {
    let harness = Harness::new();
    harness.ingest_textbook("u1", "Biology 101", CELL_TEXT).await;

    let llm = Arc::new(FakeLLMClient::new(LLMBehavior::Echo));
    let reranker: Arc<dyn RerankerClient> = Arc::new(FakeRerankerClient::always_unavailable());
    let orchestrator = harness.orchestrator(llm, Some(reranker));

    let result = orchestrator.answer("u1", "what is the mitochondrion", None).await.unwrap();
    assert!(!result.answer_text.is_empty());
}

/// A thumbs-up on the chunks that answered a question nudges them above an otherwise-tied
/// competitor on a later, differently-worded retrieval for the same user.
#[tokio::test]
async fn upvoted_chunk_is_boosted_on_a_later_retrieval() {
    let harness = Harness::new();
    harness.ingest_textbook("u1", "Biology 101", CELL_TEXT).await;

    let chunks = harness.store.list_chunks_by_user("u1").await.unwrap();
    let served_chunk_id = chunks[0].id.clone();

    let tracker = Arc::new(FeedbackTracker::new(8));
    tracker.record_answer("u1", "q1", vec![served_chunk_id.clone()]);
    rate_answer(harness.store.as_ref(), &tracker, "u1", "q1", Thumbs::Up, None).await.unwrap();

    assert!(tracker.boost_for("u1", &served_chunk_id) > 0.0);
    let feedback_rows = harness.store.list_feedback("u1").await.unwrap();
    assert_eq!(feedback_rows.len(), 1);
    assert_eq!(feedback_rows[0].thumbs, Thumbs::Up);
}
