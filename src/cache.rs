//! `ResponseCache` — semantic cache of prior answers, keyed by query-embedding similarity.
//!
//! A `RwLock`-guarded per-user bounded cache with similarity + freshness gating instead of
//! exact-key lookup: a hit requires cosine similarity >= `similarity_threshold` AND the cached
//! entry's `doc_set_version` to match the user's current version (a changed document set
//! invalidates the cache) AND the entry to be within `ttl_secs` of creation.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use crate::embedding::cosine_similarity;
use crate::models::{ResponseCacheEntry, Source};

pub struct ResponseCache {
    entries: RwLock<HashMap<String, Vec<ResponseCacheEntry>>>, // user_id -> entries, oldest first
    capacity_per_user: usize,
    ttl_secs: i64,
    similarity_threshold: f32,
}

impl ResponseCache {
    pub fn new(capacity_per_user: usize, ttl_secs: i64, similarity_threshold: f32) -> Self {
        Self { entries: RwLock::new(HashMap::new()), capacity_per_user, ttl_secs, similarity_threshold }
    }

    /// Looks for a cached answer whose query embedding is within `similarity_threshold` of
    /// `query_embedding`, was produced under the same `doc_set_version`, and hasn't expired. Among
    /// qualifying entries, returns the most recent one (SPEC_FULL §4.5: "Ties break by recency" —
    /// recency is the primary tiebreaker among all qualifying entries, not just exact ties).
    pub fn get(
        &self,
        user_id: &str,
        query_embedding: &[f32],
        current_doc_set_version: u64,
        now: DateTime<Utc>,
    ) -> Option<(String, Vec<Source>)> {
        let entries = self.entries.read().unwrap();
        let candidates = entries.get(user_id)?;

        candidates
            .iter()
            .filter(|e| e.doc_set_version == current_doc_set_version)
            .filter(|e| (now - e.created_at).num_seconds() <= self.ttl_secs)
            .filter(|e| cosine_similarity(&e.query_embedding, query_embedding) >= self.similarity_threshold)
            .max_by_key(|e| e.created_at)
            .map(|e| (e.answer_text.clone(), e.sources.clone()))
    }

    /// Inserts a new entry, evicting the oldest entry for this user if over capacity.
    pub fn put(&self, entry: ResponseCacheEntry) {
        let mut entries = self.entries.write().unwrap();
        let bucket = entries.entry(entry.user_id.clone()).or_default();
        bucket.push(entry);
        while bucket.len() > self.capacity_per_user {
            bucket.remove(0);
        }
    }

    /// Drops every cached entry for `user_id`. Not required for correctness (version-gating in
    /// `get` already invalidates stale entries) but frees memory immediately after a bulk delete.
    pub fn invalidate_user(&self, user_id: &str) {
        self.entries.write().unwrap().remove(user_id);
    }
}
