//! Core data models shared across ingestion and retrieval (SPEC_FULL.md §3).
//!
//! Field shapes follow the teacher's `Document`/`Chunk` structs; the enums and the
//! proposition/triple/cache/feedback types are new, added to carry the academic-assistant domain the
//! teacher's generic "connector item" model didn't need.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One of the five document types the classifier can assign (SPEC_FULL §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Textbook,
    Paper,
    Notes,
    Code,
    General,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Textbook => "textbook",
            SourceType::Paper => "paper",
            SourceType::Notes => "notes",
            SourceType::Code => "code",
            SourceType::General => "general",
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Document lifecycle state (I4: transitions only pending -> processing -> {ready, failed}).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Ready,
    Failed,
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Ready => "ready",
            DocumentStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// A document owned by a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub source_type: SourceType,
    pub page_count: Option<u32>,
    pub status: DocumentStatus,
    pub created_at: DateTime<Utc>,
}

/// A contiguous substring of a document used as the unit of retrieval.
///
/// `ordinal` is a per-document monotonic integer (I2: dense, `0..n`) defining adjacency for
/// `ChunkStore::get_adjacent`. `parent_id` is set on child chunks produced by the parent/child split
/// (SPEC_FULL §4.1); children are embedded and retrieved, parents are substituted in at
/// context-assembly time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub user_id: String,
    pub ordinal: i64,
    pub text: String,
    pub page: Option<u32>,
    pub section_title: Option<String>,
    pub parent_id: Option<String>,
    /// Content hash, used the same way the teacher's `Chunk::hash` gates re-embedding on re-ingest.
    pub hash: String,
}

/// An atomic, pronoun-resolved factual statement derived from a chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposition {
    pub id: String,
    pub chunk_id: String,
    pub text: String,
}

/// An extracted `(subject, predicate, object)` fact, normalised to lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KgTriple {
    pub id: String,
    pub user_id: String,
    pub doc_id: String,
    pub chunk_id: String,
    pub subject: String,
    pub predicate: String,
    pub object: String,
}

impl KgTriple {
    /// The dedup key this crate uses for KG triples: the lowercased `(subject, predicate, object)`
    /// tuple, scoped to a user's namespace (see DESIGN.md Open Question decisions).
    pub fn dedup_key(&self) -> (String, String, String) {
        (
            self.subject.to_lowercase(),
            self.predicate.to_lowercase(),
            self.object.to_lowercase(),
        )
    }
}

/// A citation attached to an answer: `{doc_title, page?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub chunk_id: String,
    pub doc_title: String,
    pub page: Option<u32>,
}

/// An entry in the per-user [`crate::cache::ResponseCache`].
#[derive(Debug, Clone)]
pub struct ResponseCacheEntry {
    pub query_embedding: Vec<f32>,
    pub query_text: String,
    pub answer_text: String,
    pub sources: Vec<Source>,
    pub created_at: DateTime<Utc>,
    pub user_id: String,
    pub doc_set_version: u64,
}

/// Thumbs-up/down feedback on a previously-returned answer (SPEC_FULL §6 Feedback API).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Thumbs {
    Up,
    Down,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feedback {
    pub id: String,
    pub user_id: String,
    pub query_id: String,
    pub thumbs: Thumbs,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Query classification label driving adaptive fusion weights (SPEC_FULL §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    Definition,
    Comparison,
    Code,
    Procedural,
    General,
}

/// Which retrieval path actually served a request, surfaced in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyTag {
    Hybrid,
    LexicalOnly,
    VectorOnly,
}
