//! `Ingestor` — accepts raw document bytes, classifies, chunks, extracts, embeds, and writes to the
//! stores, driving the `pending -> processing -> {ready, failed}` state machine.
//!
//! Coordinates the scan/normalize/chunk/embed/store stages for a single uploaded document, plus
//! the classification and proposition/KG extraction stages.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::cache::ResponseCache;
use crate::chunk::chunk_document;
use crate::classify::classify;
use crate::config::{Config, IngestConfig};
use crate::embedding::{enrich, EmbedClient};
use crate::error::{CoreError, CoreResult, LlmError};
use crate::kg::extract_triples;
use crate::lexical::LexicalIndex;
use crate::llm::LLMClient;
use crate::models::{Chunk, Document, DocumentStatus, SourceType};
use crate::progress::{IngestProgressEvent, ProgressReporter};
use crate::proposition::{extract_propositions, extract_propositions_without_llm};
use crate::store::ChunkStore;
use crate::vector::VectorIndex;

pub struct Ingestor {
    store: Arc<dyn ChunkStore>,
    vector_index: Arc<dyn VectorIndex>,
    lexical_index: Arc<LexicalIndex>,
    embed_client: Arc<dyn EmbedClient>,
    llm: Option<Arc<dyn LLMClient>>,
    cache: Option<Arc<ResponseCache>>,
    config: Config,
    ingest: IngestConfig,
    progress: Arc<dyn ProgressReporter>,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        vector_index: Arc<dyn VectorIndex>,
        lexical_index: Arc<LexicalIndex>,
        embed_client: Arc<dyn EmbedClient>,
        llm: Option<Arc<dyn LLMClient>>,
        cache: Option<Arc<ResponseCache>>,
        config: Config,
        progress: Arc<dyn ProgressReporter>,
    ) -> Self {
        let ingest = config.ingest.clone();
        Self { store, vector_index, lexical_index, embed_client, llm, cache, config, ingest, progress }
    }

    /// Submits one document for ingestion, running it through classification, chunking, extraction,
    /// and embedding. Returns the new document's id on success; on failure, the document is rolled
    /// back (I3: a document that never completed embedding leaves no partial chunks behind) and its
    /// status left as `failed`.
    #[tracing::instrument(skip(self, text), fields(user_id, chars = text.len(), document_id = tracing::field::Empty))]
    pub async fn submit_document(
        &self,
        user_id: &str,
        title: &str,
        text: &str,
        filename: Option<&str>,
        source_type_override: Option<SourceType>,
    ) -> CoreResult<String> {
        let document_id = Uuid::new_v4().to_string();
        tracing::Span::current().record("document_id", tracing::field::display(&document_id));
        tracing::info!(document_id = %document_id, "submitting document");
        self.progress.report(IngestProgressEvent::Classifying { document_id: document_id.clone() });
        let source_type = source_type_override.unwrap_or_else(|| classify(text, filename));

        let document = Document {
            id: document_id.clone(),
            user_id: user_id.to_string(),
            title: title.to_string(),
            source_type,
            page_count: None,
            status: DocumentStatus::Pending,
            created_at: chrono::Utc::now(),
        };
        self.store.put_document(document).await?;
        self.store.update_document_status(&document_id, DocumentStatus::Processing).await?;

        match self.process(user_id, &document_id, title, text, source_type).await {
            Ok(()) => {
                self.store.update_document_status(&document_id, DocumentStatus::Ready).await?;
                self.progress.report(IngestProgressEvent::Done {
                    document_id: document_id.clone(),
                    status: DocumentStatus::Ready,
                });
                tracing::info!(document_id = %document_id, "document ready");
                Ok(document_id)
            }
            Err(e) => {
                // Rollback: remove whatever partial chunks/triples/propositions landed.
                let _ = self.store.delete_document(user_id, &document_id).await;
                let _ = self.store.update_document_status(&document_id, DocumentStatus::Failed).await;
                self.progress.report(IngestProgressEvent::Done {
                    document_id: document_id.clone(),
                    status: DocumentStatus::Failed,
                });
                tracing::warn!(document_id = %document_id, error = %e, "document ingestion failed, rolled back");
                Err(e)
            }
        }
    }

    async fn process(
        &self,
        user_id: &str,
        document_id: &str,
        title: &str,
        text: &str,
        source_type: SourceType,
    ) -> CoreResult<()> {
        let profile = self.config.chunking.profile_for(source_type);
        let chunked = chunk_document(document_id, user_id, text, profile);
        let all_chunks: Vec<Chunk> = chunked.parents.into_iter().chain(chunked.children.clone()).collect();
        self.progress.report(IngestProgressEvent::Chunking {
            document_id: document_id.to_string(),
            n: all_chunks.len(),
        });
        self.store.put_chunks(all_chunks).await?;

        self.extract(user_id, document_id, &chunked.children).await;
        self.embed(user_id, title, &chunked.children).await?;

        Ok(())
    }

    /// Proposition and KG extraction, non-fatal: a chunk yielding nothing contributes no
    /// propositions/triples. Propositions fall back to sentence-tokenization when no `LLMClient` is
    /// configured at all (SPEC_FULL §4.1); KG triples have no such fallback and are simply skipped
    /// without an LLM.
    async fn extract(&self, user_id: &str, document_id: &str, children: &[Chunk]) {
        let total = children.len();
        let deadline = Duration::from_secs(30);

        for (i, chunk) in children.iter().enumerate() {
            let propositions = match &self.llm {
                Some(llm) => extract_propositions(llm, &chunk.id, &chunk.text, deadline).await,
                None => extract_propositions_without_llm(&chunk.id, &chunk.text),
            };
            if !propositions.is_empty() {
                let _ = self.store.put_propositions(propositions).await;
            }

            if let Some(llm) = &self.llm {
                let triples = extract_triples(llm, user_id, document_id, &chunk.id, &chunk.text, deadline).await;
                if !triples.is_empty() {
                    let _ = self.store.put_triples(triples).await;
                }
            }

            self.progress.report(IngestProgressEvent::Extracting {
                document_id: document_id.to_string(),
                n: i + 1,
                total,
            });
        }
    }

    /// Embeds every child chunk in batches sized by byte budget (SPEC_FULL §4.1) and bounded by
    /// `config.embedding.batch_size` items, with bounded retry/backoff on each batch's embedding
    /// call. A batch that exhausts retries fails the whole document (unlike extraction, embeddings
    /// are required for retrieval).
    async fn embed(&self, user_id: &str, title: &str, children: &[Chunk]) -> CoreResult<()> {
        let total = children.len();
        let mut done = 0usize;

        for batch in batch_for_embedding(children, title, self.ingest.embedding_batch_byte_budget, self.config.embedding.batch_size)
        {
            let texts: Vec<String> = batch.iter().map(|(_, enriched)| enriched.clone()).collect();
            let vectors = self.embed_with_retry(&texts).await?;
            if vectors.len() != batch.len() {
                return Err(CoreError::from(LlmError::InvalidResponse(format!(
                    "embedding batch returned {} vectors for {} texts",
                    vectors.len(),
                    batch.len()
                ))));
            }
            for ((chunk, _), vector) in batch.iter().zip(vectors) {
                self.vector_index.upsert(user_id, &chunk.id, vector).await?;
                done += 1;
                self.progress.report(IngestProgressEvent::Embedding {
                    document_id: chunk.document_id.clone(),
                    n: done,
                    total,
                });
            }
        }
        Ok(())
    }

    async fn embed_with_retry(&self, texts: &[String]) -> CoreResult<Vec<Vec<f32>>> {
        let mut attempt = 0u32;
        loop {
            match self.embed_client.embed(texts).await {
                Ok(vectors) if vectors.len() == texts.len() => return Ok(vectors),
                Ok(_) => return Err(CoreError::from(LlmError::InvalidResponse("empty embedding response".into()))),
                Err(e) if attempt + 1 >= self.ingest.embedding_max_retries => return Err(CoreError::from(e)),
                Err(_) => {
                    let backoff_ms =
                        (self.ingest.embedding_backoff_base_ms * 2u64.pow(attempt)).min(self.ingest.embedding_backoff_cap_ms);
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Deletes a document and cascades the cleanup: chunk/proposition/
    /// triple removal from `ChunkStore` (handled by `delete_document` itself), vector removal, and
    /// cache eviction for the user (the version bump alone would invalidate stale entries lazily, but
    /// dropping them immediately frees memory right away).
    pub async fn delete_document(&self, user_id: &str, document_id: &str) -> CoreResult<()> {
        let deleted = self.store.delete_document(user_id, document_id).await?;
        self.vector_index.delete(user_id, &deleted.chunk_ids).await?;
        self.lexical_index.invalidate(user_id);
        if let Some(cache) = &self.cache {
            cache.invalidate_user(user_id);
        }
        Ok(())
    }
}

/// Groups `children` into batches for `EmbedClient::embed`, flushing whenever the next enriched
/// text would push the running batch past `byte_budget` or `max_items` (SPEC_FULL §4.1: "batches
/// sized by byte budget"). A single chunk larger than `byte_budget` still forms its own batch rather
/// than being dropped.
fn batch_for_embedding<'a>(
    children: &'a [Chunk],
    title: &str,
    byte_budget: usize,
    max_items: usize,
) -> Vec<Vec<(&'a Chunk, String)>> {
    let mut batches = Vec::new();
    let mut current: Vec<(&Chunk, String)> = Vec::new();
    let mut current_bytes = 0usize;

    for chunk in children {
        let enriched = enrich(title, chunk.section_title.as_deref(), &chunk.text);
        let len = enriched.len();
        if !current.is_empty() && (current.len() >= max_items || current_bytes + len > byte_budget) {
            batches.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current_bytes += len;
        current.push((chunk, enriched));
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbConfig;
    use crate::progress::NoProgress;
    use crate::store::memory::InMemoryChunkStore;
    use crate::testutil::{FakeEmbedClient, FakeLLMClient, LLMBehavior};
    use crate::vector::memory::InMemoryVectorIndex;

    fn test_config() -> Config {
        Config {
            db: DbConfig { path: std::path::PathBuf::from(":memory:") },
            chunking: Default::default(),
            retrieval: Default::default(),
            embedding: Default::default(),
            llm: Default::default(),
            reranker: Default::default(),
            cache: Default::default(),
            ingest: Default::default(),
            deadlines: Default::default(),
        }
    }

    fn ingestor_with(llm: Option<Arc<dyn LLMClient>>) -> Ingestor {
        Ingestor::new(
            Arc::new(InMemoryChunkStore::new()),
            Arc::new(InMemoryVectorIndex::new()),
            Arc::new(LexicalIndex::new(8)),
            Arc::new(FakeEmbedClient::new(16)),
            llm,
            None,
            test_config(),
            Arc::new(NoProgress),
        )
    }

    #[tokio::test]
    async fn submit_document_reaches_ready_status() {
        let ingestor = ingestor_with(Some(Arc::new(FakeLLMClient::new(LLMBehavior::StringList(vec!["fact".into()])))));
        let doc_id = ingestor
            .submit_document("u1", "My Notes", "Some notes.\n- point one\n- point two\n", None, None)
            .await
            .unwrap();
        let doc = ingestor.store.get_document(&doc_id).await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Ready);
    }

    #[tokio::test]
    async fn extraction_without_llm_does_not_fail_document() {
        let ingestor = ingestor_with(None);
        let doc_id = ingestor.submit_document("u1", "Doc", "Some plain text content here.", None, None).await.unwrap();
        let doc = ingestor.store.get_document(&doc_id).await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Ready);
        let chunks = ingestor.store.list_chunks_by_document(&doc_id).await.unwrap();
        assert!(!chunks.is_empty());
    }

    #[tokio::test]
    async fn delete_document_cascades_to_vector_index() {
        let ingestor = ingestor_with(None);
        let doc_id = ingestor.submit_document("u1", "Doc", "Some plain text content here.", None, None).await.unwrap();
        ingestor.delete_document("u1", &doc_id).await.unwrap();
        assert!(ingestor.store.get_document(&doc_id).await.unwrap().is_none());
    }

    fn test_chunk(id: &str, ordinal: i64, text: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            document_id: "d1".to_string(),
            user_id: "u1".to_string(),
            ordinal,
            text: text.to_string(),
            page: None,
            section_title: None,
            parent_id: None,
            hash: "h".to_string(),
        }
    }

    #[test]
    fn batch_for_embedding_splits_on_byte_budget() {
        let children = vec![
            test_chunk("c0", 0, &"a".repeat(40)),
            test_chunk("c1", 1, &"b".repeat(40)),
            test_chunk("c2", 2, &"c".repeat(40)),
        ];
        // Each enriched text is the chunk text plus the "Document: ... \n\n" prefix, so budget just
        // under 2x one enriched text forces a new batch every other chunk.
        let one_len = enrich("T", None, &"a".repeat(40)).len();
        let batches = batch_for_embedding(&children, "T", one_len + 10, 64);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[1].len(), 1);
    }

    #[test]
    fn batch_for_embedding_splits_on_item_count() {
        let children: Vec<Chunk> = (0..5).map(|i| test_chunk(&format!("c{i}"), i, "short")).collect();
        let batches = batch_for_embedding(&children, "T", 1_000_000, 2);
        assert_eq!(batches.iter().map(|b| b.len()).collect::<Vec<_>>(), vec![2, 2, 1]);
    }

    #[test]
    fn batch_for_embedding_keeps_an_oversized_single_chunk_alone() {
        let children = vec![test_chunk("c0", 0, &"x".repeat(200))];
        let batches = batch_for_embedding(&children, "T", 10, 64);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
    }
}
