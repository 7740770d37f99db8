//! Hybrid retrieval (SPEC_FULL.md §4.6): lexical + vector fusion, cross-encoder rerank, sliding
//! window/parent expansion, and knowledge-graph augmentation.
//!
//! Grounded in the teacher's `search.rs` fusion/normalisation pass (candidate gathering, per-list
//! normalisation, then a weighted combine) generalized from a single fixed weight to the adaptive
//! per-query-type weights [`crate::config::RetrievalConfig::weights_for`] selects.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::embedding::min_max_normalize;
use crate::error::{CoreError, CoreResult};
use crate::feedback::FeedbackTracker;
use crate::kg;
use crate::lexical::LexicalIndex;
use crate::llm::LLMClient;
use crate::models::{KgTriple, QueryType, StrategyTag};
use crate::query_classify::classify_query;
use crate::reranker::RerankerClient;
use crate::store::ChunkStore;
use crate::vector::VectorIndex;

/// One retrieved chunk, expanded and ready for prompt assembly.
#[derive(Debug, Clone)]
pub struct ContextChunk {
    pub chunk_id: String,
    pub text: String,
    /// `text` with neighbours concatenated (sliding window) or replaced by the parent's full text
    /// (parent expansion) per SPEC_FULL §4.6 Expansion policy.
    pub expanded_text: String,
    pub doc_title: String,
    pub section: Option<String>,
    pub page: Option<u32>,
    pub score: f32,
}

#[derive(Debug, Clone)]
pub struct RankedContext {
    pub chunks: Vec<ContextChunk>,
    pub triples: Vec<KgTriple>,
    pub used_strategy: StrategyTag,
}

pub struct Retriever {
    store: Arc<dyn ChunkStore>,
    vector_index: Arc<dyn VectorIndex>,
    lexical_index: Arc<LexicalIndex>,
    reranker: Option<Arc<dyn RerankerClient>>,
    llm: Option<Arc<dyn LLMClient>>,
    config: RetrievalConfig,
    feedback: Option<Arc<FeedbackTracker>>,
}

impl Retriever {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        vector_index: Arc<dyn VectorIndex>,
        lexical_index: Arc<LexicalIndex>,
        reranker: Option<Arc<dyn RerankerClient>>,
        llm: Option<Arc<dyn LLMClient>>,
        config: RetrievalConfig,
    ) -> Self {
        Self { store, vector_index, lexical_index, reranker, llm, config, feedback: None }
    }

    /// Attaches a [`FeedbackTracker`] so past thumbs-up/down ratings nudge future fused scores
    /// (SPEC_FULL §6 Feedback API).
    pub fn with_feedback_tracker(mut self, tracker: Arc<FeedbackTracker>) -> Self {
        self.feedback = Some(tracker);
        self
    }

    /// One retrieval pass for a single query (SPEC_FULL §4.6 steps 1-8). `query_embedding` must
    /// already carry the enrichment rule applied to chunk embeddings (empty title/section per §4.6).
    #[tracing::instrument(skip(self, query_embedding), fields(user_id, candidates = tracing::field::Empty))]
    pub async fn retrieve(
        &self,
        user_id: &str,
        query_text: &str,
        query_embedding: &[f32],
    ) -> CoreResult<RankedContext> {
        let candidate_k = self.config.candidate_k as usize;
        let rerank_k = self.config.rerank_k as usize;

        let lexical_result = self.lexical_index.search(self.store.as_ref(), user_id, query_text, candidate_k).await;
        let vector_result = self.vector_index.search(user_id, query_embedding, candidate_k).await;

        let (lexical_hits, lexical_failed) = match lexical_result {
            Ok(hits) => (hits, false),
            Err(_) => (Vec::new(), true),
        };
        let (vector_hits, vector_failed) = match vector_result {
            Ok(hits) => (hits.into_iter().map(|h| (h.chunk_id, h.score)).collect(), false),
            Err(_) => (Vec::new(), true),
        };

        if lexical_failed && vector_failed {
            return Err(CoreError::RetrievalUnavailable(
                "both lexical and vector retrieval paths failed".into(),
            ));
        }

        let used_strategy = if vector_failed {
            StrategyTag::LexicalOnly
        } else if lexical_failed {
            StrategyTag::VectorOnly
        } else {
            StrategyTag::Hybrid
        };
        tracing::Span::current().record("candidates", lexical_hits.len() + vector_hits.len());
        if lexical_failed || vector_failed {
            tracing::warn!(lexical_failed, vector_failed, "a retrieval path degraded");
        }

        let query_type = classify_query(query_text);
        let weights = self.config.weights_for(query_type);
        let mut fused = fuse(&lexical_hits, &vector_hits, weights.alpha as f32, weights.beta as f32);
        if let Some(tracker) = &self.feedback {
            for (chunk_id, score) in fused.iter_mut() {
                *score += tracker.boost_for(user_id, chunk_id);
            }
        }

        let mut fused: Vec<(String, f32)> = fused.into_iter().collect();
        fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        fused.truncate(candidate_k);

        let reranked = self.rerank(query_text, fused, rerank_k).await?;
        let chunks = self.expand(reranked).await?;

        let entities = kg::candidate_entities(query_text);
        let triples = if entities.is_empty() {
            Vec::new()
        } else {
            kg::bfs_augment(self.store.as_ref(), user_id, &entities, self.config.kg_hops, self.config.kg_max_triples)
                .await?
        };

        Ok(RankedContext { chunks, triples, used_strategy })
    }

    /// Merges multiple single-query `RankedContext`s by taking the max fused+rerank score per chunk
    /// (SPEC_FULL §4.6 "Multi-query expansion"), then re-sorts by score. Triples are unioned by id.
    pub fn merge(contexts: Vec<RankedContext>) -> RankedContext {
        let mut best_chunks: HashMap<String, ContextChunk> = HashMap::new();
        let mut triples: HashMap<String, KgTriple> = HashMap::new();
        let mut strategy = StrategyTag::Hybrid;

        for ctx in contexts {
            strategy = ctx.used_strategy;
            for chunk in ctx.chunks {
                best_chunks
                    .entry(chunk.chunk_id.clone())
                    .and_modify(|existing| {
                        if chunk.score > existing.score {
                            *existing = chunk.clone();
                        }
                    })
                    .or_insert(chunk);
            }
            for triple in ctx.triples {
                triples.entry(triple.id.clone()).or_insert(triple);
            }
        }

        let mut chunks: Vec<ContextChunk> = best_chunks.into_values().collect();
        chunks.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        RankedContext { chunks, triples: triples.into_values().collect(), used_strategy: strategy }
    }

    async fn rerank(&self, query_text: &str, fused: Vec<(String, f32)>, rerank_k: usize) -> CoreResult<Vec<(String, f32)>> {
        let Some(reranker) = &self.reranker else {
            let mut fused = fused;
            fused.truncate(rerank_k);
            return Ok(fused);
        };

        let mut chunk_texts = Vec::with_capacity(fused.len());
        for (chunk_id, _) in &fused {
            let text = self.store.get_chunk(chunk_id).await?.map(|c| c.text).unwrap_or_default();
            chunk_texts.push(text);
        }

        match reranker.rerank(query_text, &chunk_texts).await {
            Ok(scores) => {
                let mut scored: Vec<(String, f32)> =
                    fused.into_iter().zip(scores).map(|((id, _), s)| (id, s)).collect();
                scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
                scored.truncate(rerank_k);
                Ok(scored)
            }
            Err(_) => {
                let mut fused = fused;
                fused.truncate(rerank_k);
                Ok(fused)
            }
        }
    }

    /// Sliding-window or parent-substitution expansion, run after reranking (SPEC_FULL §5 ordering
    /// guarantee).
    async fn expand(&self, reranked: Vec<(String, f32)>) -> CoreResult<Vec<ContextChunk>> {
        let mut chunks = Vec::with_capacity(reranked.len());
        for (chunk_id, score) in reranked {
            let Some(chunk) = self.store.get_chunk(&chunk_id).await? else { continue };
            let doc_title = self
                .store
                .get_document(&chunk.document_id)
                .await?
                .map(|d| d.title)
                .unwrap_or_else(|| "Untitled".to_string());

            let expanded_text = if chunk.parent_id.is_some() {
                match self.store.get_parent(&chunk_id).await? {
                    Some(parent) => parent.text,
                    None => chunk.text.clone(),
                }
            } else {
                let neighbours = self.store.get_adjacent(&chunk_id, 1).await?;
                neighbours.into_iter().map(|c| c.text).collect::<Vec<_>>().join("\n\n")
            };

            chunks.push(ContextChunk {
                chunk_id: chunk.id,
                text: chunk.text,
                expanded_text,
                doc_title,
                section: chunk.section_title,
                page: chunk.page,
                score,
            });
        }

        let mut seen = std::collections::HashSet::new();
        chunks.retain(|c| seen.insert(c.chunk_id.clone()));
        Ok(chunks)
    }
}

/// Combines two score lists (already top-k, not yet normalised) into `alpha * lex + beta * vec` per
/// chunk id, after independently min-max normalising each list (SPEC_FULL §4.6 steps 3-4). A chunk
/// present in only one list is scored using `0.0` for the missing side.
fn fuse(lexical: &[(String, f32)], vector: &[(String, f32)], alpha: f32, beta: f32) -> HashMap<String, f32> {
    let lex_scores = min_max_normalize(&lexical.iter().map(|(_, s)| *s).collect::<Vec<_>>());
    let vec_scores = min_max_normalize(&vector.iter().map(|(_, s)| *s).collect::<Vec<_>>());

    let mut fused: HashMap<String, f32> = HashMap::new();
    for ((id, _), norm) in lexical.iter().zip(lex_scores) {
        *fused.entry(id.clone()).or_insert(0.0) += alpha * norm;
    }
    for ((id, _), norm) in vector.iter().zip(vec_scores) {
        *fused.entry(id.clone()).or_insert(0.0) += beta * norm;
    }
    fused
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrievalConfig;
    use crate::models::{Chunk, Document, DocumentStatus, SourceType};
    use crate::store::memory::InMemoryChunkStore;
    use crate::testutil::FakeRerankerClient;
    use crate::vector::memory::InMemoryVectorIndex;

    fn doc(id: &str, title: &str) -> Document {
        Document {
            id: id.to_string(),
            user_id: "u1".to_string(),
            title: title.to_string(),
            source_type: SourceType::General,
            page_count: None,
            status: DocumentStatus::Ready,
            created_at: chrono::Utc::now(),
        }
    }

    fn chunk(id: &str, doc_id: &str, ordinal: i64, text: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            document_id: doc_id.to_string(),
            user_id: "u1".to_string(),
            ordinal,
            text: text.to_string(),
            page: Some(1),
            section_title: None,
            parent_id: None,
            hash: "h".to_string(),
        }
    }

    async fn build_fixture() -> (Arc<InMemoryChunkStore>, Arc<InMemoryVectorIndex>, Arc<LexicalIndex>) {
        let store = Arc::new(InMemoryChunkStore::new());
        store.put_document(doc("d1", "Biology 101")).await.unwrap();
        store
            .put_chunks(vec![
                chunk("c0", "d1", 0, "Mitochondria is the powerhouse of the cell"),
                chunk("c1", "d1", 1, "Chloroplasts perform photosynthesis in plants"),
                chunk("c2", "d1", 2, "The cell membrane regulates what enters and exits"),
            ])
            .await
            .unwrap();

        let vectors = Arc::new(InMemoryVectorIndex::new());
        vectors.upsert("u1", "c0", vec![1.0, 0.0, 0.0]).await.unwrap();
        vectors.upsert("u1", "c1", vec![0.0, 1.0, 0.0]).await.unwrap();
        vectors.upsert("u1", "c2", vec![0.0, 0.0, 1.0]).await.unwrap();

        (store, vectors, Arc::new(LexicalIndex::new(8)))
    }

    #[tokio::test]
    async fn hybrid_retrieval_surfaces_lexically_matching_chunk() {
        let (store, vectors, lexical) = build_fixture().await;
        let retriever = Retriever::new(store, vectors, lexical, None, None, RetrievalConfig::default());
        let result = retriever.retrieve("u1", "mitochondria powerhouse", &[1.0, 0.0, 0.0]).await.unwrap();
        assert_eq!(result.used_strategy, StrategyTag::Hybrid);
        assert_eq!(result.chunks[0].chunk_id, "c0");
        assert_eq!(result.chunks[0].doc_title, "Biology 101");
    }

    #[tokio::test]
    async fn sliding_window_expansion_attaches_neighbours() {
        let (store, vectors, lexical) = build_fixture().await;
        let retriever = Retriever::new(store, vectors, lexical, None, None, RetrievalConfig::default());
        let result = retriever.retrieve("u1", "photosynthesis chloroplasts", &[0.0, 1.0, 0.0]).await.unwrap();
        let hit = result.chunks.iter().find(|c| c.chunk_id == "c1").unwrap();
        assert!(hit.expanded_text.contains("Mitochondria") || hit.expanded_text.contains("membrane"));
    }

    #[tokio::test]
    async fn reranker_outage_degrades_to_fused_order() {
        let (store, vectors, lexical) = build_fixture().await;
        let reranker: Arc<dyn RerankerClient> = Arc::new(FakeRerankerClient::always_unavailable());
        let retriever = Retriever::new(store, vectors, lexical, Some(reranker), None, RetrievalConfig::default());
        let result = retriever.retrieve("u1", "mitochondria powerhouse", &[1.0, 0.0, 0.0]).await.unwrap();
        assert!(!result.chunks.is_empty());
    }

    #[tokio::test]
    async fn empty_vector_index_still_surfaces_lexical_hits() {
        let store = Arc::new(InMemoryChunkStore::new());
        store.put_document(doc("d1", "Biology 101")).await.unwrap();
        store.put_chunks(vec![chunk("c0", "d1", 0, "mitochondria powerhouse of the cell")]).await.unwrap();
        let empty_vectors = Arc::new(InMemoryVectorIndex::new());
        let lexical = Arc::new(LexicalIndex::new(8));
        let retriever =
            Retriever::new(store, empty_vectors, lexical, None, None, RetrievalConfig::default());
        let result = retriever.retrieve("u1", "mitochondria", &[1.0, 0.0, 0.0]).await.unwrap();
        assert!(!result.chunks.is_empty());
    }

    #[test]
    fn fuse_weights_favor_vector_for_comparison_queries() {
        let weights = RetrievalConfig::default().weights_for(QueryType::Comparison);
        assert!((weights.beta - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn feedback_boost_reorders_fused_candidates() {
        let (store, vectors, lexical) = build_fixture().await;
        let tracker = Arc::new(FeedbackTracker::new(8));
        tracker.record_answer("u1", "earlier-query", vec!["c2".to_string()]);
        for _ in 0..20 {
            tracker.apply_rating("u1", "earlier-query", crate::models::Thumbs::Up);
        }

        let retriever = Retriever::new(store, vectors, lexical, None, None, RetrievalConfig::default())
            .with_feedback_tracker(tracker);
        let result = retriever.retrieve("u1", "cell biology", &[0.3, 0.3, 0.3]).await.unwrap();
        assert_eq!(result.chunks[0].chunk_id, "c2", "heavily upvoted chunk should be boosted to the top");
    }

    #[test]
    fn merge_keeps_highest_score_per_chunk() {
        let chunk_a = ContextChunk {
            chunk_id: "c1".into(),
            text: "t".into(),
            expanded_text: "t".into(),
            doc_title: "D".into(),
            section: None,
            page: None,
            score: 0.4,
        };
        let mut chunk_b = chunk_a.clone();
        chunk_b.score = 0.9;

        let ctx_a = RankedContext { chunks: vec![chunk_a], triples: vec![], used_strategy: StrategyTag::Hybrid };
        let ctx_b = RankedContext { chunks: vec![chunk_b], triples: vec![], used_strategy: StrategyTag::Hybrid };

        let merged = Retriever::merge(vec![ctx_a, ctx_b]);
        assert_eq!(merged.chunks.len(), 1);
        assert!((merged.chunks[0].score - 0.9).abs() < 1e-9);
    }
}
