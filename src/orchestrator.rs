//! `AnswerOrchestrator` — the top-level handler for one question, gluing cache, rewrite,
//! decomposition, multi-query retrieval, self-RAG verification, and generation into a nine-step
//! flow.
//!
//! Each optional step is LLM-assisted and degrades non-fatally on `LlmError`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::cache::ResponseCache;
use crate::config::{Config, DeadlinesConfig};
use crate::embedding::{embed_query, enrich, EmbedClient};
use crate::error::{CoreError, CoreResult};
use crate::llm::{parse_string_list, parse_sufficiency, CompletionRequest, LLMClient, ResponseSchema, Sufficiency};
use crate::models::{QueryType, ResponseCacheEntry, Source, StrategyTag};
use crate::query_classify::classify_query;
use crate::retriever::{ContextChunk, RankedContext, Retriever};
use crate::store::ChunkStore;

const MAX_SUB_QUERIES: usize = 4;
const MAX_REFORMULATIONS: usize = 3;

/// Everything the caller gets back for one question.
#[derive(Debug, Clone)]
pub struct AnswerResult {
    pub answer_text: String,
    pub sources: Vec<Source>,
    pub diagnostics: Diagnostics,
}

#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    pub cache_hit: bool,
    pub reformulated_n: usize,
    pub decomposed_n: usize,
    pub strategy_tag: Option<StrategyTag>,
    pub self_rag_iterations: u32,
    pub low_confidence: bool,
}

pub struct AnswerOrchestrator {
    store: Arc<dyn ChunkStore>,
    retriever: Arc<Retriever>,
    cache: Arc<ResponseCache>,
    embed_client: Arc<dyn EmbedClient>,
    llm: Arc<dyn LLMClient>,
    deadlines: DeadlinesConfig,
}

impl AnswerOrchestrator {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        retriever: Arc<Retriever>,
        cache: Arc<ResponseCache>,
        embed_client: Arc<dyn EmbedClient>,
        llm: Arc<dyn LLMClient>,
        deadlines: DeadlinesConfig,
    ) -> Self {
        Self { store, retriever, cache, embed_client, llm, deadlines }
    }

    pub fn from_config(
        store: Arc<dyn ChunkStore>,
        retriever: Arc<Retriever>,
        cache: Arc<ResponseCache>,
        embed_client: Arc<dyn EmbedClient>,
        llm: Arc<dyn LLMClient>,
        config: &Config,
    ) -> Self {
        Self::new(store, retriever, cache, embed_client, llm, config.deadlines.clone())
    }

    /// Runs the full nine-step flow for one question.
    pub async fn answer(
        &self,
        user_id: &str,
        query_text: &str,
        conversation_hint: Option<&str>,
    ) -> CoreResult<AnswerResult> {
        let deadline = Duration::from_secs(self.deadlines.answer_secs);
        let mut diagnostics = Diagnostics::default();

        // Step 1: cache probe.
        let query_embedding = embed_query(self.embed_client.as_ref(), &enrich("", None, query_text))
            .await
            .map_err(CoreError::from)?;
        let doc_set_version = self.store.doc_set_version(user_id).await?;
        if let Some((answer_text, sources)) = self.cache.get(user_id, &query_embedding, doc_set_version, Utc::now()) {
            diagnostics.cache_hit = true;
            return Ok(AnswerResult { answer_text, sources, diagnostics });
        }

        // Step 2: rewrite (non-fatal).
        let rewritten = self.rewrite(query_text, conversation_hint, deadline).await.unwrap_or_else(|| query_text.to_string());

        // Step 3: decompose (conditional).
        let query_type = classify_query(&rewritten);
        let sub_queries = if should_decompose(&rewritten, query_type) {
            let decomposed = self.decompose(&rewritten, deadline).await;
            diagnostics.decomposed_n = decomposed.len();
            if decomposed.is_empty() {
                vec![rewritten.clone()]
            } else {
                decomposed
            }
        } else {
            vec![rewritten.clone()]
        };

        // Steps 4-6: per sub-query multi-query retrieval, with a self-RAG verification loop.
        let mut iterations = 0u32;
        let mut context = self.retrieve_all(user_id, &sub_queries, &mut diagnostics).await?;

        loop {
            let verdict = self.check_sufficiency(query_text, &context, deadline).await;
            if verdict != Some(Sufficiency::Insufficient) || iterations >= self.deadlines.max_self_rag_iterations {
                if verdict.is_none() || verdict == Some(Sufficiency::Insufficient) {
                    diagnostics.low_confidence = iterations >= self.deadlines.max_self_rag_iterations;
                }
                break;
            }
            iterations += 1;
            diagnostics.self_rag_iterations = iterations;

            let Some(reformulated) = self.reformulate(query_text, deadline).await else {
                diagnostics.low_confidence = true;
                break;
            };
            context = self.retrieve_all(user_id, std::slice::from_ref(&reformulated), &mut diagnostics).await?;
        }
        diagnostics.self_rag_iterations = iterations;
        diagnostics.strategy_tag = Some(context.used_strategy);

        // Step 7: generate.
        let (answer_text, sources) = self.generate(query_text, &context, deadline).await?;

        // Step 8: store cache.
        self.cache.put(ResponseCacheEntry {
            query_embedding,
            query_text: query_text.to_string(),
            answer_text: answer_text.clone(),
            sources: sources.clone(),
            created_at: Utc::now(),
            user_id: user_id.to_string(),
            doc_set_version,
        });

        Ok(AnswerResult { answer_text, sources, diagnostics })
    }

    async fn rewrite(&self, query_text: &str, conversation_hint: Option<&str>, deadline: Duration) -> Option<String> {
        let hint = conversation_hint.unwrap_or("");
        let prompt = format!(
            "Rewrite the following question to resolve pronouns using the conversation hint and expand \
             abbreviations. Preserve its meaning exactly. Respond with a single JSON string.\n\nHint: {hint}\nQuestion: {query_text}"
        );
        let request = CompletionRequest { prompt: &prompt, schema: Some(ResponseSchema::SingleString), deadline };
        let raw = self.llm.complete(request).await.ok()?;
        serde_json::from_str::<String>(raw.trim()).ok().filter(|s| !s.trim().is_empty())
    }

    async fn decompose(&self, query_text: &str, deadline: Duration) -> Vec<String> {
        let prompt = format!(
            "Split the following question into 2 to 4 atomic sub-questions, each answerable \
             independently. Respond with a JSON array of strings.\n\n{query_text}"
        );
        let request = CompletionRequest { prompt: &prompt, schema: Some(ResponseSchema::StringList), deadline };
        match self.llm.complete(request).await {
            Ok(raw) => parse_string_list(&raw)
                .unwrap_or_default()
                .into_iter()
                .filter(|s| !s.trim().is_empty())
                .take(MAX_SUB_QUERIES)
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    async fn alternative_phrasings(&self, query_text: &str, deadline: Duration) -> Vec<String> {
        let prompt = format!(
            "Produce up to 3 alternative phrasings of the following question that preserve its \
             meaning. Respond with a JSON array of strings.\n\n{query_text}"
        );
        let request = CompletionRequest { prompt: &prompt, schema: Some(ResponseSchema::StringList), deadline };
        match self.llm.complete(request).await {
            Ok(raw) => parse_string_list(&raw)
                .unwrap_or_default()
                .into_iter()
                .filter(|s| !s.trim().is_empty())
                .take(MAX_REFORMULATIONS)
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    async fn retrieve_all(
        &self,
        user_id: &str,
        queries: &[String],
        diagnostics: &mut Diagnostics,
    ) -> CoreResult<RankedContext> {
        let deadline = Duration::from_secs(self.deadlines.retrieve_secs);
        let mut all_phrasings: Vec<String> = Vec::new();
        for query in queries {
            all_phrasings.push(query.clone());
            let alternatives = self.alternative_phrasings(query, deadline).await;
            diagnostics.reformulated_n += alternatives.len();
            all_phrasings.extend(alternatives);
        }

        let mut contexts = Vec::with_capacity(all_phrasings.len());
        let tasks = all_phrasings.into_iter().map(|phrasing| {
            let retriever = self.retriever.clone();
            let embed_client = self.embed_client.clone();
            let user_id = user_id.to_string();
            tokio::spawn(async move {
                let embedding = embed_query(embed_client.as_ref(), &enrich("", None, &phrasing)).await?;
                retriever.retrieve(&user_id, &phrasing, &embedding).await
            })
        });

        for task in tasks {
            match task.await {
                Ok(Ok(ctx)) => contexts.push(ctx),
                Ok(Err(_)) | Err(_) => continue,
            }
        }

        if contexts.is_empty() {
            return Err(CoreError::RetrievalUnavailable("no sub-query retrieval succeeded".into()));
        }
        Ok(Retriever::merge(contexts))
    }

    async fn check_sufficiency(&self, query_text: &str, context: &RankedContext, deadline: Duration) -> Option<Sufficiency> {
        if context.chunks.is_empty() {
            return Some(Sufficiency::Insufficient);
        }
        let summary = summarize_context(context);
        let prompt = format!(
            "Question: {query_text}\n\nRetrieved context:\n{summary}\n\nIs this context sufficient to \
             answer the question? Respond with exactly the word sufficient or insufficient."
        );
        let request =
            CompletionRequest { prompt: &prompt, schema: Some(ResponseSchema::SufficiencyVerdict), deadline };
        let raw = self.llm.complete(request).await.ok()?;
        parse_sufficiency(&raw).ok()
    }

    async fn reformulate(&self, query_text: &str, deadline: Duration) -> Option<String> {
        let prompt = format!(
            "The retrieved context was insufficient to answer this question. Reformulate it to \
             improve retrieval, preserving its meaning. Respond with a single JSON string.\n\n{query_text}"
        );
        let request = CompletionRequest { prompt: &prompt, schema: Some(ResponseSchema::SingleString), deadline };
        let raw = self.llm.complete(request).await.ok()?;
        serde_json::from_str::<String>(raw.trim()).ok().filter(|s| !s.trim().is_empty())
    }

    async fn generate(
        &self,
        query_text: &str,
        context: &RankedContext,
        deadline: Duration,
    ) -> CoreResult<(String, Vec<Source>)> {
        let summary = summarize_context(context);
        let triple_summary: String = context
            .triples
            .iter()
            .map(|t| format!("({}, {}, {})", t.subject, t.predicate, t.object))
            .collect::<Vec<_>>()
            .join("; ");
        let prompt = format!(
            "Answer the question using only the provided context, citing sources inline with \
             numbered footnote markers like [1].\n\nQuestion: {query_text}\n\nContext:\n{summary}\n\nKnown facts: {triple_summary}"
        );
        let request = CompletionRequest { prompt: &prompt, schema: None, deadline };
        let answer_text = self.llm.complete(request).await?;

        let sources = context
            .chunks
            .iter()
            .map(|c| Source { chunk_id: c.chunk_id.clone(), doc_title: c.doc_title.clone(), page: c.page })
            .collect();
        Ok((answer_text, sources))
    }
}

fn summarize_context(context: &RankedContext) -> String {
    context
        .chunks
        .iter()
        .enumerate()
        .map(|(i, c): (usize, &ContextChunk)| format!("[{}] ({}) {}", i + 1, c.doc_title, c.expanded_text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Decomposition trigger: multiple `?`-clauses, coordination spanning heads
/// ("and"/"vs"/"compared to"), or length > 200 chars on a non-definition query.
fn should_decompose(query: &str, query_type: QueryType) -> bool {
    let question_marks = query.matches('?').count();
    if question_marks > 1 {
        return true;
    }
    let lower = query.to_lowercase();
    let has_coordination =
        lower.contains(" and ") || lower.contains(" vs ") || lower.contains(" vs. ") || lower.contains("compared to");
    if has_coordination {
        return true;
    }
    query.len() > 200 && query_type != QueryType::Definition
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResponseCache;
    use crate::config::RetrievalConfig;
    use crate::lexical::LexicalIndex;
    use crate::models::{Chunk, Document, DocumentStatus, SourceType};
    use crate::store::memory::InMemoryChunkStore;
    use crate::testutil::{FakeEmbedClient, FakeLLMClient, LLMBehavior};
    use crate::vector::memory::InMemoryVectorIndex;

    async fn fixture_store() -> Arc<InMemoryChunkStore> {
        let store = Arc::new(InMemoryChunkStore::new());
        store
            .put_document(Document {
                id: "d1".into(),
                user_id: "u1".into(),
                title: "Calculus".into(),
                source_type: SourceType::Textbook,
                page_count: None,
                status: DocumentStatus::Ready,
                created_at: chrono::Utc::now(),
            })
            .await
            .unwrap();
        store
            .put_chunks(vec![Chunk {
                id: "c1".into(),
                document_id: "d1".into(),
                user_id: "u1".into(),
                ordinal: 0,
                text: "A derivative measures the instantaneous rate of change of a function.".into(),
                page: Some(12),
                section_title: Some("Derivatives".into()),
                parent_id: None,
                hash: "h".into(),
            }])
            .await
            .unwrap();
        store
    }

    fn vectors_with_one_match() -> Arc<InMemoryVectorIndex> {
        let vectors = Arc::new(InMemoryVectorIndex::new());
        vectors
    }

    #[tokio::test]
    async fn cache_hit_short_circuits_retrieval_and_generation() {
        let store = fixture_store().await;
        let vectors = vectors_with_one_match();
        let lexical = Arc::new(LexicalIndex::new(8));
        let embed: Arc<dyn EmbedClient> = Arc::new(FakeEmbedClient::new(16));
        let llm: Arc<dyn LLMClient> = Arc::new(FakeLLMClient::new(LLMBehavior::Echo));

        let retriever = Arc::new(Retriever::new(
            store.clone(),
            vectors,
            lexical,
            None,
            Some(llm.clone()),
            RetrievalConfig::default(),
        ));
        let cache = Arc::new(ResponseCache::new(10, 86400, 0.95));

        let query_embedding =
            embed_query(embed.as_ref(), &enrich("", None, "what is a derivative")).await.unwrap();
        let version = store.doc_set_version("u1").await.unwrap();
        cache.put(ResponseCacheEntry {
            query_embedding,
            query_text: "what is a derivative".into(),
            answer_text: "cached answer".into(),
            sources: vec![],
            created_at: Utc::now(),
            user_id: "u1".into(),
            doc_set_version: version,
        });

        let orchestrator = AnswerOrchestrator::new(store, retriever, cache, embed, llm, DeadlinesConfig::default());
        let result = orchestrator.answer("u1", "what is a derivative", None).await.unwrap();
        assert!(result.diagnostics.cache_hit);
        assert_eq!(result.answer_text, "cached answer");
    }

    #[test]
    fn should_decompose_detects_multiple_question_marks() {
        assert!(should_decompose("What is X? What is Y?", QueryType::General));
    }

    #[test]
    fn should_decompose_detects_coordination() {
        assert!(should_decompose("Compare mitosis and meiosis", QueryType::General));
    }

    #[test]
    fn should_decompose_is_false_for_short_definition_queries() {
        assert!(!should_decompose("What is a derivative?", QueryType::Definition));
    }

    #[test]
    fn should_decompose_long_non_definition_query() {
        let long_query = "a".repeat(210);
        assert!(should_decompose(&long_query, QueryType::General));
    }
}
