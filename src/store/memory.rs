//! In-memory [`ChunkStore`](super::ChunkStore), used by tests and the CLI harness's default mode.
//!
//! `std::sync::RwLock`-guarded `HashMap`/`Vec`, brute-force filtering across five collections
//! (documents, chunks, propositions, triples, feedback) plus a per-user version counter.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::{ChunkStore, DeletedDocument};
use crate::error::{CoreError, CoreResult};
use crate::models::{Chunk, Document, DocumentStatus, Feedback, KgTriple, Proposition};

#[derive(Default)]
struct Inner {
    documents: HashMap<String, Document>,
    chunks: HashMap<String, Chunk>,
    propositions: HashMap<String, Vec<Proposition>>, // chunk_id -> propositions
    triples: HashMap<String, Vec<KgTriple>>,         // user_id -> triples
    feedback: HashMap<String, Vec<Feedback>>,        // user_id -> feedback
    versions: HashMap<String, u64>,                  // user_id -> doc_set_version
}

/// `RwLock`-guarded in-memory `ChunkStore`.
pub struct InMemoryChunkStore {
    inner: RwLock<Inner>,
}

impl InMemoryChunkStore {
    pub fn new() -> Self {
        Self { inner: RwLock::new(Inner::default()) }
    }

    fn bump_version(inner: &mut Inner, user_id: &str) -> u64 {
        let v = inner.versions.entry(user_id.to_string()).or_insert(0);
        *v += 1;
        *v
    }
}

impl Default for InMemoryChunkStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChunkStore for InMemoryChunkStore {
    async fn put_document(&self, doc: Document) -> CoreResult<()> {
        let mut inner = self.inner.write().unwrap();
        inner.documents.insert(doc.id.clone(), doc);
        Ok(())
    }

    async fn update_document_status(&self, document_id: &str, status: DocumentStatus) -> CoreResult<()> {
        let mut inner = self.inner.write().unwrap();
        let doc = inner
            .documents
            .get_mut(document_id)
            .ok_or_else(|| CoreError::NotFound(format!("document {document_id}")))?;
        doc.status = status;
        Ok(())
    }

    async fn get_document(&self, document_id: &str) -> CoreResult<Option<Document>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.documents.get(document_id).cloned())
    }

    async fn list_documents_by_user(&self, user_id: &str) -> CoreResult<Vec<Document>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.documents.values().filter(|d| d.user_id == user_id).cloned().collect())
    }

    async fn put_chunks(&self, chunks: Vec<Chunk>) -> CoreResult<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let user_id = chunks[0].user_id.clone();
        let mut inner = self.inner.write().unwrap();
        for chunk in chunks {
            inner.chunks.insert(chunk.id.clone(), chunk);
        }
        Self::bump_version(&mut inner, &user_id);
        Ok(())
    }

    async fn put_propositions(&self, propositions: Vec<Proposition>) -> CoreResult<()> {
        let mut inner = self.inner.write().unwrap();
        for prop in propositions {
            inner.propositions.entry(prop.chunk_id.clone()).or_default().push(prop);
        }
        Ok(())
    }

    async fn put_triples(&self, triples: Vec<KgTriple>) -> CoreResult<Vec<KgTriple>> {
        if triples.is_empty() {
            return Ok(Vec::new());
        }
        let user_id = triples[0].user_id.clone();
        let mut inner = self.inner.write().unwrap();
        let existing = inner.triples.entry(user_id.clone()).or_default();
        let mut seen: std::collections::HashSet<_> = existing.iter().map(|t| t.dedup_key()).collect();
        let mut inserted = Vec::new();
        for triple in triples {
            let key = triple.dedup_key();
            if seen.insert(key) {
                existing.push(triple.clone());
                inserted.push(triple);
            }
        }
        Ok(inserted)
    }

    async fn get_chunk(&self, chunk_id: &str) -> CoreResult<Option<Chunk>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.chunks.get(chunk_id).cloned())
    }

    async fn get_adjacent(&self, chunk_id: &str, window: i64) -> CoreResult<Vec<Chunk>> {
        let inner = self.inner.read().unwrap();
        let Some(anchor) = inner.chunks.get(chunk_id) else {
            return Ok(Vec::new());
        };
        let lo = (anchor.ordinal - window).max(0);
        let hi = anchor.ordinal + window;
        let mut out: Vec<Chunk> = inner
            .chunks
            .values()
            .filter(|c| c.document_id == anchor.document_id && c.ordinal >= lo && c.ordinal <= hi)
            .cloned()
            .collect();
        out.sort_by_key(|c| c.ordinal);
        Ok(out)
    }

    async fn get_parent(&self, chunk_id: &str) -> CoreResult<Option<Chunk>> {
        let inner = self.inner.read().unwrap();
        let Some(child) = inner.chunks.get(chunk_id) else {
            return Ok(None);
        };
        let Some(parent_id) = &child.parent_id else {
            return Ok(None);
        };
        Ok(inner.chunks.get(parent_id).cloned())
    }

    async fn triples_for(&self, user_id: &str, subjects: &[String]) -> CoreResult<Vec<KgTriple>> {
        let inner = self.inner.read().unwrap();
        let wanted: std::collections::HashSet<String> =
            subjects.iter().map(|s| s.to_lowercase()).collect();
        Ok(inner
            .triples
            .get(user_id)
            .map(|triples| {
                triples
                    .iter()
                    .filter(|t| wanted.contains(&t.subject.to_lowercase()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_chunks_by_user(&self, user_id: &str) -> CoreResult<Vec<Chunk>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.chunks.values().filter(|c| c.user_id == user_id).cloned().collect())
    }

    async fn list_chunks_by_document(&self, document_id: &str) -> CoreResult<Vec<Chunk>> {
        let inner = self.inner.read().unwrap();
        let mut out: Vec<Chunk> =
            inner.chunks.values().filter(|c| c.document_id == document_id).cloned().collect();
        out.sort_by_key(|c| c.ordinal);
        Ok(out)
    }

    async fn delete_document(&self, user_id: &str, document_id: &str) -> CoreResult<DeletedDocument> {
        let mut inner = self.inner.write().unwrap();
        inner.documents.remove(document_id);

        let removed_ids: Vec<String> = inner
            .chunks
            .iter()
            .filter(|(_, c)| c.document_id == document_id)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &removed_ids {
            inner.chunks.remove(id);
            inner.propositions.remove(id);
        }
        if let Some(triples) = inner.triples.get_mut(user_id) {
            triples.retain(|t| t.doc_id != document_id);
        }

        let new_version = Self::bump_version(&mut inner, user_id);
        Ok(DeletedDocument { chunk_ids: removed_ids, new_version })
    }

    async fn doc_set_version(&self, user_id: &str) -> CoreResult<u64> {
        let inner = self.inner.read().unwrap();
        Ok(inner.versions.get(user_id).copied().unwrap_or(0))
    }

    async fn put_feedback(&self, feedback: Feedback) -> CoreResult<()> {
        let mut inner = self.inner.write().unwrap();
        inner.feedback.entry(feedback.user_id.clone()).or_default().push(feedback);
        Ok(())
    }

    async fn list_feedback(&self, user_id: &str) -> CoreResult<Vec<Feedback>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.feedback.get(user_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn doc(id: &str, user: &str) -> Document {
        Document {
            id: id.to_string(),
            user_id: user.to_string(),
            title: "T".to_string(),
            source_type: crate::models::SourceType::General,
            page_count: None,
            status: DocumentStatus::Pending,
            created_at: Utc::now(),
        }
    }

    fn chunk(id: &str, doc_id: &str, user: &str, ordinal: i64) -> Chunk {
        Chunk {
            id: id.to_string(),
            document_id: doc_id.to_string(),
            user_id: user.to_string(),
            ordinal,
            text: format!("chunk {ordinal}"),
            page: None,
            section_title: None,
            parent_id: None,
            hash: "h".to_string(),
        }
    }

    #[tokio::test]
    async fn put_chunks_bumps_version() {
        let store = InMemoryChunkStore::new();
        assert_eq!(store.doc_set_version("u1").await.unwrap(), 0);
        store.put_chunks(vec![chunk("c1", "d1", "u1", 0)]).await.unwrap();
        assert_eq!(store.doc_set_version("u1").await.unwrap(), 1);
        store.put_chunks(vec![chunk("c2", "d1", "u1", 1)]).await.unwrap();
        assert_eq!(store.doc_set_version("u1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn get_adjacent_at_ordinal_zero_has_no_negative_neighbors() {
        let store = InMemoryChunkStore::new();
        store
            .put_chunks(vec![
                chunk("c0", "d1", "u1", 0),
                chunk("c1", "d1", "u1", 1),
                chunk("c2", "d1", "u1", 2),
            ])
            .await
            .unwrap();
        let adjacent = store.get_adjacent("c0", 1).await.unwrap();
        let ordinals: Vec<i64> = adjacent.iter().map(|c| c.ordinal).collect();
        assert_eq!(ordinals, vec![0, 1]);
    }

    #[tokio::test]
    async fn delete_document_cascades_and_bumps_version() {
        let store = InMemoryChunkStore::new();
        store.put_document(doc("d1", "u1")).await.unwrap();
        store
            .put_chunks(vec![chunk("c0", "d1", "u1", 0), chunk("c1", "d1", "u1", 1)])
            .await
            .unwrap();
        let v_before = store.doc_set_version("u1").await.unwrap();

        let deleted = store.delete_document("u1", "d1").await.unwrap();
        assert_eq!(deleted.chunk_ids.len(), 2);
        assert!(deleted.new_version > v_before);
        assert!(store.get_chunk("c0").await.unwrap().is_none());
        assert!(store.get_document("d1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_triples_dedups_within_user_namespace() {
        let store = InMemoryChunkStore::new();
        let t = KgTriple {
            id: "t1".into(),
            user_id: "u1".into(),
            doc_id: "d1".into(),
            chunk_id: "c1".into(),
            subject: "Rust".into(),
            predicate: "Is A".into(),
            object: "Language".into(),
        };
        let mut t2 = t.clone();
        t2.id = "t2".into();
        let inserted_first = store.put_triples(vec![t]).await.unwrap();
        let inserted_second = store.put_triples(vec![t2]).await.unwrap();
        assert_eq!(inserted_first.len(), 1);
        assert_eq!(inserted_second.len(), 0, "duplicate triple (case-insensitive) should be dropped");
    }
}
