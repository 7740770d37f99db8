//! `LexicalIndex` — per-user BM25 index over chunk text.
//!
//! The standard Okapi BM25 formula (k1=1.2, b=0.75) over a `RwLock`-guarded per-user cache, lazily
//! rebuilt from `ChunkStore` on version mismatch, with a small LRU cap across users so a
//! multi-tenant process doesn't grow unbounded.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::Mutex as AsyncMutex;

use crate::error::CoreResult;
use crate::store::ChunkStore;

const K1: f32 = 1.2;
const B: f32 = 0.75;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "he", "in", "is", "it",
    "its", "of", "on", "that", "the", "to", "was", "were", "will", "with",
];

/// Lowercases, splits on non-alphanumeric boundaries, and drops stopwords and empty tokens.
/// Unicode-aware via `char::is_alphanumeric` rather than ASCII-only splitting.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty() && !STOPWORDS.contains(t))
        .map(|t| t.to_string())
        .collect()
}

struct DocEntry {
    chunk_id: String,
    term_counts: HashMap<String, u32>,
    length: usize,
}

struct BuiltIndex {
    version: u64,
    docs: Vec<DocEntry>,
    doc_freq: HashMap<String, u32>,
    avg_doc_len: f32,
}

impl BuiltIndex {
    fn empty(version: u64) -> Self {
        Self { version, docs: Vec::new(), doc_freq: HashMap::new(), avg_doc_len: 0.0 }
    }

    fn score(&self, query_terms: &[String]) -> Vec<(String, f32)> {
        if self.docs.is_empty() {
            return Vec::new();
        }
        let n = self.docs.len() as f32;
        let unique_terms: HashSet<&String> = query_terms.iter().collect();

        let mut out = Vec::with_capacity(self.docs.len());
        for doc in &self.docs {
            let mut score = 0.0f32;
            for term in &unique_terms {
                let Some(&tf) = doc.term_counts.get(*term) else { continue };
                let df = *self.doc_freq.get(*term).unwrap_or(&0) as f32;
                if df == 0.0 {
                    continue;
                }
                let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
                let tf = tf as f32;
                let denom = tf + K1 * (1.0 - B + B * (doc.length as f32 / self.avg_doc_len.max(1.0)));
                score += idf * (tf * (K1 + 1.0)) / denom.max(f32::EPSILON);
            }
            if score > 0.0 {
                out.push((doc.chunk_id.clone(), score));
            }
        }
        out
    }
}

fn build_index(version: u64, chunks: &[crate::models::Chunk]) -> BuiltIndex {
    if chunks.is_empty() {
        return BuiltIndex::empty(version);
    }
    let mut docs = Vec::with_capacity(chunks.len());
    let mut doc_freq: HashMap<String, u32> = HashMap::new();
    let mut total_len = 0usize;

    for chunk in chunks {
        let terms = tokenize(&chunk.text);
        let mut term_counts: HashMap<String, u32> = HashMap::new();
        for t in &terms {
            *term_counts.entry(t.clone()).or_insert(0) += 1;
        }
        for t in term_counts.keys() {
            *doc_freq.entry(t.clone()).or_insert(0) += 1;
        }
        total_len += terms.len();
        docs.push(DocEntry { chunk_id: chunk.id.clone(), term_counts, length: terms.len() });
    }

    let avg_doc_len = total_len as f32 / docs.len() as f32;
    BuiltIndex { version, docs, doc_freq, avg_doc_len }
}

/// Per-user BM25 index with lazy, version-gated rebuilds.
///
/// `max_cached_users` bounds memory in a multi-tenant process: the least-recently-used user's
/// cached index is evicted once the cap is exceeded. A rebuild for one user never blocks searches
/// for another (each user's build is serialized by its own entry in `builds`).
pub struct LexicalIndex {
    cached: RwLock<HashMap<String, Arc<BuiltIndex>>>,
    /// One `tokio::sync::Mutex` per user, whose `Send` guard can span the `.await` in
    /// `ensure_built` (unlike a `std::sync::MutexGuard`, which would make `search`'s future `!Send`
    /// and break `tokio::spawn` in the orchestrator's per-sub-query fan-out).
    build_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    lru: Mutex<VecDeque<String>>,
    max_cached_users: usize,
}

impl LexicalIndex {
    pub fn new(max_cached_users: usize) -> Self {
        Self {
            cached: RwLock::new(HashMap::new()),
            build_locks: Mutex::new(HashMap::new()),
            lru: Mutex::new(VecDeque::new()),
            max_cached_users,
        }
    }

    fn touch_lru(&self, user_id: &str) {
        let mut lru = self.lru.lock().unwrap();
        lru.retain(|u| u != user_id);
        lru.push_back(user_id.to_string());
        while lru.len() > self.max_cached_users {
            if let Some(evicted) = lru.pop_front() {
                self.cached.write().unwrap().remove(&evicted);
            }
        }
    }

    fn build_lock(&self, user_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.build_locks.lock().unwrap();
        locks.entry(user_id.to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    /// Ensures this user's cached index matches `store`'s current `doc_set_version`, rebuilding from
    /// `ChunkStore::list_chunks_by_user` if stale or absent. Rebuilds for one user are serialized via
    /// an async mutex (its guard is `Send`, so it can span the `list_chunks_by_user` await without
    /// making this future `!Send`); every std-lock section is acquired and dropped synchronously.
    async fn ensure_built(&self, store: &dyn ChunkStore, user_id: &str) -> CoreResult<Arc<BuiltIndex>> {
        let current_version = store.doc_set_version(user_id).await?;
        if let Some(built) = self.cached.read().unwrap().get(user_id) {
            if built.version == current_version {
                return Ok(built.clone());
            }
        }

        let lock = self.build_lock(user_id);
        let _guard = lock.lock().await;
        if let Some(built) = self.cached.read().unwrap().get(user_id) {
            if built.version == current_version {
                return Ok(built.clone());
            }
        }

        let chunks = store.list_chunks_by_user(user_id).await?;
        let built = Arc::new(build_index(current_version, &chunks));
        self.cached.write().unwrap().insert(user_id.to_string(), built.clone());
        self.touch_lru(user_id);
        Ok(built)
    }

    /// Top-`k` BM25 matches for `query`, min-max normalized into `[0, 1]` for fusion with vector
    /// scores.
    pub async fn search(
        &self,
        store: &dyn ChunkStore,
        user_id: &str,
        query: &str,
        k: usize,
    ) -> CoreResult<Vec<(String, f32)>> {
        let built = self.ensure_built(store, user_id).await?;
        let query_terms = tokenize(query);
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }
        let mut scored = built.score(&query_terms);
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        let raw_scores: Vec<f32> = scored.iter().map(|(_, s)| *s).collect();
        let normalized = crate::embedding::min_max_normalize(&raw_scores);
        Ok(scored.into_iter().zip(normalized).map(|((id, _), n)| (id, n)).collect())
    }

    /// Drops the cached index for `user_id`, forcing a rebuild on next search. Not strictly needed
    /// (version-gating already catches staleness) but lets callers free memory after a bulk delete.
    pub fn invalidate(&self, user_id: &str) {
        self.cached.write().unwrap().remove(user_id);
    }
}

impl Default for LexicalIndex {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, Document};
    use crate::store::memory::InMemoryChunkStore;

    fn chunk(id: &str, doc_id: &str, user: &str, ordinal: i64, text: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            document_id: doc_id.to_string(),
            user_id: user.to_string(),
            ordinal,
            text: text.to_string(),
            page: None,
            section_title: None,
            parent_id: None,
            hash: "h".to_string(),
        }
    }

    #[test]
    fn tokenize_lowercases_and_drops_stopwords() {
        let tokens = tokenize("The Quick Brown Fox");
        assert_eq!(tokens, vec!["quick", "brown", "fox"]);
    }

    #[tokio::test]
    async fn search_ranks_matching_chunk_first() {
        let store = InMemoryChunkStore::new();
        store
            .put_chunks(vec![
                chunk("c1", "d1", "u1", 0, "mitochondria is the powerhouse of the cell"),
                chunk("c2", "d1", "u1", 1, "photosynthesis occurs in chloroplasts"),
            ])
            .await
            .unwrap();

        let index = LexicalIndex::new(8);
        let hits = index.search(&store, "u1", "mitochondria powerhouse", 5).await.unwrap();
        assert_eq!(hits[0].0, "c1");
    }

    #[tokio::test]
    async fn search_rebuilds_after_new_chunks_bump_version() {
        let store = InMemoryChunkStore::new();
        store.put_chunks(vec![chunk("c1", "d1", "u1", 0, "aardvark")]).await.unwrap();
        let index = LexicalIndex::new(8);
        assert!(index.search(&store, "u1", "zephyr", 5).await.unwrap().is_empty());

        store.put_chunks(vec![chunk("c2", "d1", "u1", 1, "zephyr winds")]).await.unwrap();
        let hits = index.search(&store, "u1", "zephyr", 5).await.unwrap();
        assert_eq!(hits[0].0, "c2");
    }

    #[tokio::test]
    async fn empty_query_returns_no_hits() {
        let store = InMemoryChunkStore::new();
        store.put_chunks(vec![chunk("c1", "d1", "u1", 0, "some text")]).await.unwrap();
        let index = LexicalIndex::new(8);
        assert!(index.search(&store, "u1", "the a of", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn namespaces_are_isolated() {
        let store = InMemoryChunkStore::new();
        store.put_document(Document {
            id: "d1".into(),
            user_id: "u1".into(),
            title: "T".into(),
            source_type: crate::models::SourceType::General,
            page_count: None,
            status: crate::models::DocumentStatus::Ready,
            created_at: chrono::Utc::now(),
        }).await.unwrap();
        store.put_chunks(vec![chunk("c1", "d1", "u1", 0, "quantum entanglement")]).await.unwrap();
        let index = LexicalIndex::new(8);
        assert!(index.search(&store, "u2", "quantum entanglement", 5).await.unwrap().is_empty());
    }
}
