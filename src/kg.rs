//! Knowledge-graph triple extraction and the 2-hop BFS augmentation used by [`crate::retriever`].
//!
//! LLM-driven via the same [`crate::llm::LLMClient`] seam as [`crate::proposition`]. Unlike
//! propositions, a chunk producing zero valid triples is not a failure — most chunks don't name
//! extractable facts — so there is no sentence-level fallback here, only schema validation and a
//! lowercase dedup key ([`crate::models::KgTriple::dedup_key`]).

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::llm::{parse_triples, CompletionRequest, LLMClient, RawTriple, ResponseSchema};
use crate::models::KgTriple;
use crate::store::ChunkStore;

/// Extracts triples from a single chunk's text. Drops any triple with an empty subject, predicate,
/// or object and lowercases all three fields before returning, matching [`KgTriple::dedup_key`]'s
/// expectations.
pub async fn extract_triples(
    llm: &Arc<dyn LLMClient>,
    user_id: &str,
    doc_id: &str,
    chunk_id: &str,
    chunk_text: &str,
    deadline: Duration,
) -> Vec<KgTriple> {
    let prompt = format!(
        "Extract factual (subject, predicate, object) triples from the following text. \
         Respond with a JSON array of objects with keys subject, predicate, object.\n\n{chunk_text}"
    );
    let request = CompletionRequest { prompt: &prompt, schema: Some(ResponseSchema::TripleList), deadline };

    let raw_triples: Vec<RawTriple> = match llm.complete(request).await {
        Ok(raw) => parse_triples(&raw).unwrap_or_default(),
        Err(_) => Vec::new(),
    };

    raw_triples
        .into_iter()
        .filter(|t| !t.subject.trim().is_empty() && !t.predicate.trim().is_empty() && !t.object.trim().is_empty())
        .map(|t| KgTriple {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            doc_id: doc_id.to_string(),
            chunk_id: chunk_id.to_string(),
            subject: t.subject.trim().to_lowercase(),
            predicate: t.predicate.trim().to_lowercase(),
            object: t.object.trim().to_lowercase(),
        })
        .collect()
}

/// Extracts candidate entity names from a query for KG lookup. A capitalized n-gram heuristic: runs
/// of consecutive title-cased words, plus any standalone quoted phrase. No LLM dependency here —
/// cheap enough to always run before falling back to the LLM-extracted subjects already in scope
/// from query rewriting.
pub fn candidate_entities(query: &str) -> Vec<String> {
    let mut entities = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for word in query.split_whitespace() {
        let clean = word.trim_matches(|c: char| !c.is_alphanumeric());
        let is_titlecase = clean.chars().next().map(|c| c.is_uppercase()).unwrap_or(false) && clean.len() > 1;
        if is_titlecase {
            current.push(clean);
        } else if !current.is_empty() {
            entities.push(current.join(" "));
            current.clear();
        }
    }
    if !current.is_empty() {
        entities.push(current.join(" "));
    }
    entities.into_iter().map(|e| e.to_lowercase()).collect()
}

/// 2-hop BFS from `seed_subjects` over `store`'s triples in `user_id`'s namespace, capped at
/// `max_triples` total.
pub async fn bfs_augment(
    store: &dyn ChunkStore,
    user_id: &str,
    seed_subjects: &[String],
    hops: usize,
    max_triples: usize,
) -> crate::error::CoreResult<Vec<KgTriple>> {
    let mut collected: Vec<KgTriple> = Vec::new();
    let mut seen_ids: HashSet<String> = HashSet::new();
    let mut frontier: VecDeque<(String, usize)> = seed_subjects.iter().map(|s| (s.clone(), 0)).collect();
    let mut visited_subjects: HashSet<String> = seed_subjects.iter().map(|s| s.to_lowercase()).collect();

    while let Some((subject, depth)) = frontier.pop_front() {
        if depth >= hops || collected.len() >= max_triples {
            continue;
        }
        let triples = store.triples_for(user_id, std::slice::from_ref(&subject)).await?;
        for triple in triples {
            if collected.len() >= max_triples {
                break;
            }
            if seen_ids.insert(triple.id.clone()) {
                if depth + 1 < hops && visited_subjects.insert(triple.object.clone()) {
                    frontier.push_back((triple.object.clone(), depth + 1));
                }
                collected.push(triple);
            }
        }
    }

    Ok(collected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, Document, DocumentStatus, SourceType};
    use crate::store::memory::InMemoryChunkStore;
    use crate::testutil::{FakeLLMClient, LLMBehavior};

    #[tokio::test]
    async fn extract_triples_lowercases_and_fills_ids() {
        let llm: Arc<dyn LLMClient> = Arc::new(FakeLLMClient::new(LLMBehavior::TripleList(vec![(
            "Rust".into(),
            "Is A".into(),
            "Systems Language".into(),
        )])));
        let triples =
            extract_triples(&llm, "u1", "d1", "c1", "text", Duration::from_secs(5)).await;
        assert_eq!(triples.len(), 1);
        assert_eq!(triples[0].subject, "rust");
        assert_eq!(triples[0].object, "systems language");
        assert_eq!(triples[0].user_id, "u1");
    }

    #[tokio::test]
    async fn extract_triples_drops_empty_fields() {
        let llm: Arc<dyn LLMClient> =
            Arc::new(FakeLLMClient::new(LLMBehavior::TripleList(vec![("".into(), "is a".into(), "x".into())])));
        let triples = extract_triples(&llm, "u1", "d1", "c1", "text", Duration::from_secs(5)).await;
        assert!(triples.is_empty());
    }

    #[tokio::test]
    async fn extraction_failure_yields_no_triples_not_an_error() {
        let llm: Arc<dyn LLMClient> = Arc::new(FakeLLMClient::new(LLMBehavior::AlwaysUnavailable));
        let triples = extract_triples(&llm, "u1", "d1", "c1", "text", Duration::from_secs(5)).await;
        assert!(triples.is_empty());
    }

    #[test]
    fn candidate_entities_extracts_titlecase_runs() {
        let entities = candidate_entities("How does the Krebs Cycle relate to Cellular Respiration?");
        assert!(entities.contains(&"krebs cycle".to_string()));
        assert!(entities.contains(&"cellular respiration".to_string()));
    }

    fn triple(id: &str, subject: &str, object: &str) -> KgTriple {
        KgTriple {
            id: id.to_string(),
            user_id: "u1".to_string(),
            doc_id: "d1".to_string(),
            chunk_id: "c1".to_string(),
            subject: subject.to_string(),
            predicate: "relates to".to_string(),
            object: object.to_string(),
        }
    }

    #[tokio::test]
    async fn bfs_augment_follows_two_hops_and_respects_cap() {
        let store = InMemoryChunkStore::new();
        store
            .put_document(Document {
                id: "d1".into(),
                user_id: "u1".into(),
                title: "T".into(),
                source_type: SourceType::General,
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
                text: "x".into(),
                page: None,
                section_title: None,
                parent_id: None,
                hash: "h".into(),
            }])
            .await
            .unwrap();
        store
            .put_triples(vec![
                triple("t1", "rust", "memory safety"),
                triple("t2", "memory safety", "borrow checker"),
                triple("t3", "borrow checker", "lifetimes"),
            ])
            .await
            .unwrap();

        let result = bfs_augment(&store, "u1", &["rust".to_string()], 2, 32).await.unwrap();
        let subjects: HashSet<String> = result.iter().map(|t| t.subject.clone()).collect();
        assert!(subjects.contains("rust"));
        assert!(subjects.contains("memory safety"), "2-hop BFS should reach the second triple");
        assert!(!subjects.contains("borrow checker"), "3rd hop is beyond the 2-hop cap");
    }

    #[tokio::test]
    async fn bfs_augment_respects_max_triples_cap() {
        let store = InMemoryChunkStore::new();
        let triples: Vec<KgTriple> =
            (0..50).map(|i| triple(&format!("t{i}"), "rust", &format!("fact{i}"))).collect();
        store.put_triples(triples).await.unwrap();
        let result = bfs_augment(&store, "u1", &["rust".to_string()], 2, 32).await.unwrap();
        assert_eq!(result.len(), 32);
    }
}
