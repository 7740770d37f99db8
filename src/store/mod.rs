//! `ChunkStore` — the durable store of documents, chunks, propositions, triples, and feedback,
//! keyed by user + document.
//!
//! Five named collections (documents, chunks, propositions, triples, feedback) plus a per-user
//! `doc_set_version` counter that `LexicalIndex` and `ResponseCache` invalidate against.
//!
//! Two implementations live in sibling modules, both behind this trait object so the rest of the core
//! is backend-agnostic:
//! - [`memory::InMemoryChunkStore`] — used by tests and the CLI harness's default mode.
//! - [`sqlite::SqliteChunkStore`] — durable, used when a real `db.path` is configured.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::CoreResult;
use crate::models::{Chunk, Document, DocumentStatus, Feedback, KgTriple, Proposition};

/// The result of deleting a document: the chunk ids that must also be removed from `VectorIndex`
/// (I1: deletion is atomic across ChunkStore <-> VectorIndex, enforced by the caller doing both).
pub struct DeletedDocument {
    pub chunk_ids: Vec<String>,
    pub new_version: u64,
}

#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Insert a new document in `pending` status, or upsert an existing one's fields. Does not bump
    /// `doc_set_version` by itself — `put_chunks` (the mutation that actually changes what's
    /// retrievable) does.
    async fn put_document(&self, doc: Document) -> CoreResult<()>;

    /// I4: the only way a document's status changes after creation.
    async fn update_document_status(&self, document_id: &str, status: DocumentStatus) -> CoreResult<()>;

    async fn get_document(&self, document_id: &str) -> CoreResult<Option<Document>>;

    async fn list_documents_by_user(&self, user_id: &str) -> CoreResult<Vec<Document>>;

    /// Single-document transaction (§5): either all of `chunks` land, or none do. Bumps
    /// `doc_set_version` for `chunks[0].user_id` on success.
    async fn put_chunks(&self, chunks: Vec<Chunk>) -> CoreResult<()>;

    async fn put_propositions(&self, propositions: Vec<Proposition>) -> CoreResult<()>;

    /// Inserts triples not already present under the lowercased `(subject, predicate, object)` dedup
    /// key within the triple's `user_id` namespace (Open Question decision, DESIGN.md). Returns only
    /// the triples that were newly inserted.
    async fn put_triples(&self, triples: Vec<KgTriple>) -> CoreResult<Vec<KgTriple>>;

    async fn get_chunk(&self, chunk_id: &str) -> CoreResult<Option<Chunk>>;

    /// Chunks sharing `document_id` with `chunk_id`, ordinals in `[ord-window, ord+window]`, sorted by
    /// ordinal ascending (B2: at ordinal 0 only `0..window` come back).
    async fn get_adjacent(&self, chunk_id: &str, window: i64) -> CoreResult<Vec<Chunk>>;

    async fn get_parent(&self, chunk_id: &str) -> CoreResult<Option<Chunk>>;

    /// Triples in `user_id`'s namespace whose subject is (case-insensitively) one of `subjects`.
    async fn triples_for(&self, user_id: &str, subjects: &[String]) -> CoreResult<Vec<KgTriple>>;

    async fn list_chunks_by_user(&self, user_id: &str) -> CoreResult<Vec<Chunk>>;

    async fn list_chunks_by_document(&self, document_id: &str) -> CoreResult<Vec<Chunk>>;

    /// Cascades to chunks, propositions, and triples of `document_id`; bumps `doc_set_version`.
    /// Returns the deleted chunk ids so the caller can delete them from `VectorIndex` too (I1).
    async fn delete_document(&self, user_id: &str, document_id: &str) -> CoreResult<DeletedDocument>;

    /// The user's current version counter (0 for a user with no documents yet).
    async fn doc_set_version(&self, user_id: &str) -> CoreResult<u64>;

    async fn put_feedback(&self, feedback: Feedback) -> CoreResult<()>;

    async fn list_feedback(&self, user_id: &str) -> CoreResult<Vec<Feedback>>;
}
