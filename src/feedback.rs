//! Thumbs-up/down feedback on answers, and the small relevance nudge it feeds back into
//! retrieval.
//!
//! The same `RwLock`-guarded-map shape as [`crate::cache::ResponseCache`]. Feedback itself
//! persists to [`crate::store::ChunkStore`] as a `{id, user_id, query_id, thumbs, comment,
//! created_at}` row; since a `Feedback` row only carries a `query_id` and `ChunkStore` has no query
//! log, a [`FeedbackTracker`] remembers which chunks served a given `query_id` for the short window
//! needed to turn a rating into a per-chunk score nudge. This is a weak signal, not required for
//! correctness — losing a tracker entry just means a late rating no longer nudges anything, which
//! is fine.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use uuid::Uuid;

use crate::error::CoreResult;
use crate::models::{Feedback, Thumbs};
use crate::store::ChunkStore;

const UP_BOOST: f32 = 0.05;
const DOWN_BOOST: f32 = -0.05;
const MAX_BOOST: f32 = 0.2;
const MIN_BOOST: f32 = -0.2;

struct TrackerInner {
    /// query_id -> chunk ids it served, per user. Bounded FIFO so a long-running process doesn't
    /// grow this unboundedly; oldest query forgotten first.
    served: HashMap<String, HashMap<String, Vec<String>>>,
    served_order: HashMap<String, VecDeque<String>>,
    /// (user_id, chunk_id) -> accumulated boost, clamped to [MIN_BOOST, MAX_BOOST].
    boosts: HashMap<(String, String), f32>,
}

/// Tracks which chunks answered which query, and the resulting per-chunk relevance boost.
pub struct FeedbackTracker {
    inner: RwLock<TrackerInner>,
    capacity_per_user: usize,
}

impl FeedbackTracker {
    pub fn new(capacity_per_user: usize) -> Self {
        Self {
            inner: RwLock::new(TrackerInner {
                served: HashMap::new(),
                served_order: HashMap::new(),
                boosts: HashMap::new(),
            }),
            capacity_per_user,
        }
    }

    /// Records that `query_id` was answered using `chunk_ids`, so a later rating can be attributed
    /// to them. Called once per `AnswerOrchestrator::answer`.
    pub fn record_answer(&self, user_id: &str, query_id: &str, chunk_ids: Vec<String>) {
        let mut inner = self.inner.write().unwrap();
        let bucket = inner.served.entry(user_id.to_string()).or_default();
        bucket.insert(query_id.to_string(), chunk_ids);

        let order = inner.served_order.entry(user_id.to_string()).or_default();
        order.push_back(query_id.to_string());
        while order.len() > self.capacity_per_user {
            if let Some(oldest) = order.pop_front() {
                bucket.remove(&oldest);
            }
        }
    }

    /// Nudges the boost for every chunk that served `query_id`, if it's still tracked.
    pub(crate) fn apply_rating(&self, user_id: &str, query_id: &str, thumbs: Thumbs) {
        let delta = match thumbs {
            Thumbs::Up => UP_BOOST,
            Thumbs::Down => DOWN_BOOST,
        };
        let mut inner = self.inner.write().unwrap();
        let Some(chunk_ids) = inner.served.get(user_id).and_then(|m| m.get(query_id)).cloned() else {
            return;
        };
        for chunk_id in chunk_ids {
            let entry = inner.boosts.entry((user_id.to_string(), chunk_id)).or_insert(0.0);
            *entry = (*entry + delta).clamp(MIN_BOOST, MAX_BOOST);
        }
    }

    /// The accumulated relevance nudge for a chunk, 0.0 if never rated.
    pub fn boost_for(&self, user_id: &str, chunk_id: &str) -> f32 {
        let inner = self.inner.read().unwrap();
        inner.boosts.get(&(user_id.to_string(), chunk_id.to_string())).copied().unwrap_or(0.0)
    }
}

/// Records a thumbs-up/down rating for a previously-returned answer: persists it to `store`
/// and nudges `tracker`'s per-chunk boosts so future retrievals for this user favor (or avoid)
/// the chunks that produced it.
pub async fn rate_answer(
    store: &dyn ChunkStore,
    tracker: &FeedbackTracker,
    user_id: &str,
    query_id: &str,
    thumbs: Thumbs,
    comment: Option<String>,
) -> CoreResult<()> {
    let feedback = Feedback {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        query_id: query_id.to_string(),
        thumbs,
        comment,
        created_at: chrono::Utc::now(),
    };
    store.put_feedback(feedback).await?;
    tracker.apply_rating(user_id, query_id, thumbs);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryChunkStore;

    #[tokio::test]
    async fn rating_persists_and_nudges_served_chunks() {
        let store = InMemoryChunkStore::new();
        let tracker = FeedbackTracker::new(8);
        tracker.record_answer("u1", "q1", vec!["c1".into(), "c2".into()]);

        rate_answer(&store, &tracker, "u1", "q1", Thumbs::Up, None).await.unwrap();

        assert!(tracker.boost_for("u1", "c1") > 0.0);
        assert!(tracker.boost_for("u1", "c2") > 0.0);
        assert_eq!(tracker.boost_for("u1", "c3"), 0.0);
        assert_eq!(store.list_feedback("u1").await.unwrap().len(), 1);
    }

    #[test]
    fn boost_is_clamped() {
        let tracker = FeedbackTracker::new(8);
        tracker.record_answer("u1", "q1", vec!["c1".into()]);
        for _ in 0..20 {
            tracker.apply_rating("u1", "q1", Thumbs::Up);
        }
        assert_eq!(tracker.boost_for("u1", "c1"), MAX_BOOST);
    }

    #[test]
    fn unrated_query_is_a_no_op() {
        let tracker = FeedbackTracker::new(8);
        tracker.apply_rating("u1", "missing", Thumbs::Down);
        assert_eq!(tracker.boost_for("u1", "anything"), 0.0);
    }

    #[test]
    fn capacity_forgets_oldest_query() {
        let tracker = FeedbackTracker::new(2);
        tracker.record_answer("u1", "q1", vec!["c1".into()]);
        tracker.record_answer("u1", "q2", vec!["c2".into()]);
        tracker.record_answer("u1", "q3", vec!["c3".into()]);

        tracker.apply_rating("u1", "q1", Thumbs::Up);
        assert_eq!(tracker.boost_for("u1", "c1"), 0.0, "q1 should have been evicted");

        tracker.apply_rating("u1", "q3", Thumbs::Up);
        assert!(tracker.boost_for("u1", "c3") > 0.0);
    }
}
