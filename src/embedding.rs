//! `EmbedClient` — the embedding interface every component that touches vectors depends on, plus
//! the vector utilities shared by `VectorIndex`/`ResponseCache`/`Retriever`.
//!
//! A single `#[async_trait]` method so callers hold an `Arc<dyn EmbedClient>` directly instead of
//! routing through `Config`.

use async_trait::async_trait;

use crate::error::LlmError;

/// The single external embedding contract the core depends on.
///
/// `embed` accepts already-batched, already-enriched texts (the core applies the
/// `"Document: {title} | Section: {section}\n\n"` enrichment before calling this); batching beyond
/// that is the client's own responsibility. Every returned vector shares `dims()`.
#[async_trait]
pub trait EmbedClient: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError>;

    /// Model identifier, surfaced in diagnostics/logging only.
    fn model_name(&self) -> &str;

    /// Vector dimensionality every embedding this client returns will have.
    fn dims(&self) -> usize;
}

/// Embed a single query text. Convenience wrapper around [`EmbedClient::embed`].
pub async fn embed_query(client: &dyn EmbedClient, text: &str) -> Result<Vec<f32>, LlmError> {
    let results = client.embed(std::slice::from_ref(&text.to_string())).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::InvalidResponse("embedding response was empty".into()))
}

/// A no-op `EmbedClient` that always errors. Used when no provider is configured; lets the rest of the
/// core construct without an optional everywhere.
pub struct DisabledEmbedClient;

#[async_trait]
impl EmbedClient for DisabledEmbedClient {
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        Err(LlmError::Unavailable("embedding client is disabled".into()))
    }
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
}

/// Prefix chunk/query text with `"Document: {title} | Section: {section}\n\n"` before embedding.
/// Queries use an empty title/section.
pub fn enrich(title: &str, section: Option<&str>, text: &str) -> String {
    format!("Document: {} | Section: {}\n\n{}", title, section.unwrap_or(""), text)
}

/// Truncate `text` to at most `max_bytes`, cutting at a UTF-8 char boundary (B1: an 8 KB query is
/// truncated, not rejected, before embedding).
pub fn truncate_utf8(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Encode a float vector as a BLOB (little-endian f32 bytes), for `SqliteChunkStore`/`VectorIndex`
/// persistence.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector. Reverses [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors, in `[-1.0, 1.0]`.
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// `(1 + cos) / 2` normalisation into `[0, 1]`, the score shape `VectorIndex::search` must return.
pub fn cosine_to_unit_score(cos: f32) -> f32 {
    ((1.0 + cos) / 2.0).clamp(0.0, 1.0)
}

/// Min-max normalise a set of scores into `[0, 1]`. A single-element or all-equal set normalises to
/// all `1.0` (there is nothing to rank between).
pub fn min_max_normalize(scores: &[f32]) -> Vec<f32> {
    if scores.is_empty() {
        return Vec::new();
    }
    let min = scores.iter().cloned().fold(f32::INFINITY, f32::min);
    let max = scores.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    if (max - min).abs() < f32::EPSILON {
        return vec![1.0; scores.len()];
    }
    scores.iter().map(|s| (s - min) / (max - min)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        assert_eq!(blob.len(), 20);
        assert_eq!(blob_to_vec(&blob), vec);
    }

    #[test]
    fn cosine_identical_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_is_zero() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_opposite_is_minus_one() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_mismatched_lengths_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn unit_score_normalises_into_zero_one() {
        assert!((cosine_to_unit_score(1.0) - 1.0).abs() < 1e-6);
        assert!((cosine_to_unit_score(-1.0) - 0.0).abs() < 1e-6);
        assert!((cosine_to_unit_score(0.0) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn min_max_normalize_handles_flat_input() {
        assert_eq!(min_max_normalize(&[3.0, 3.0, 3.0]), vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn min_max_normalize_spreads_into_unit_range() {
        let out = min_max_normalize(&[0.0, 5.0, 10.0]);
        assert!((out[0] - 0.0).abs() < 1e-6);
        assert!((out[1] - 0.5).abs() < 1e-6);
        assert!((out[2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn truncate_cuts_on_char_boundary() {
        let text = "héllo world"; // 'é' is 2 bytes
        let truncated = truncate_utf8(text, 2);
        assert!(text.is_char_boundary(truncated.len()));
        assert!(truncated.len() <= 2);
    }

    #[test]
    fn enrich_prefixes_title_and_section() {
        let out = enrich("Intro to Algebra", Some("Chapter 1"), "Variables are symbols.");
        assert_eq!(out, "Document: Intro to Algebra | Section: Chapter 1\n\nVariables are symbols.");
    }
}
