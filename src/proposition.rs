//! Proposition extraction: 1-7 atomic, self-contained statements per chunk, used downstream by the
//! self-RAG sufficiency check and (optionally) finer-grained retrieval.
//!
//! LLM-driven via [`crate::llm::LLMClient`] with [`ResponseSchema::StringList`], routing every
//! model call through the single `LLMClient` seam rather than a bespoke HTTP call per feature.
//! Falls back to a sentence-tokenizer when the LLM is unavailable instead of failing the chunk.

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::llm::{parse_string_list, CompletionRequest, LLMClient, ResponseSchema};
use crate::models::Proposition;

const MIN_FALLBACK_SENTENCE_LEN: usize = 25;
const MAX_PROPOSITIONS: usize = 7;

/// Extracts propositions for a single chunk's text. Tries `llm` first; on any `LlmError` (timeout,
/// unavailable, malformed response) falls back to [`sentence_fallback`] rather than failing the
/// chunk or document.
pub async fn extract_propositions(
    llm: &Arc<dyn LLMClient>,
    chunk_id: &str,
    chunk_text: &str,
    deadline: Duration,
) -> Vec<Proposition> {
    let prompt = format!(
        "Extract 1 to 7 atomic, self-contained factual statements from the following text. \
         Resolve pronouns using context from the text itself. Respond with a JSON array of strings.\n\n{chunk_text}"
    );
    let request = CompletionRequest { prompt: &prompt, schema: Some(ResponseSchema::StringList), deadline };

    let texts = match llm.complete(request).await {
        Ok(raw) => match parse_string_list(&raw) {
            Ok(items) if !items.is_empty() => items,
            _ => sentence_fallback(chunk_text),
        },
        Err(_) => sentence_fallback(chunk_text),
    };

    texts
        .into_iter()
        .filter(|t| !t.trim().is_empty())
        .take(MAX_PROPOSITIONS)
        .map(|text| Proposition { id: Uuid::new_v4().to_string(), chunk_id: chunk_id.to_string(), text })
        .collect()
}

/// Extracts propositions using only the sentence-tokenizer fallback, for when no `LLMClient` is
/// configured at all (as opposed to one that is configured but errors, handled by
/// [`extract_propositions`]). Spec: "If the LLM is unavailable, a sentence-tokeniser fallback..."
pub fn extract_propositions_without_llm(chunk_id: &str, chunk_text: &str) -> Vec<Proposition> {
    sentence_fallback(chunk_text)
        .into_iter()
        .filter(|t| !t.trim().is_empty())
        .take(MAX_PROPOSITIONS)
        .map(|text| Proposition { id: Uuid::new_v4().to_string(), chunk_id: chunk_id.to_string(), text })
        .collect()
}

/// One proposition per sentence of at least [`MIN_FALLBACK_SENTENCE_LEN`] characters, splitting on
/// `.`/`?`/`!` followed by whitespace. Used when the LLM is unavailable or returns garbage.
fn sentence_fallback(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if matches!(b, b'.' | b'?' | b'!') {
            let end = i + 1;
            let candidate = text[start..end].trim();
            if candidate.len() >= MIN_FALLBACK_SENTENCE_LEN {
                sentences.push(candidate.to_string());
            }
            start = end;
        }
    }
    let trailing = text[start..].trim();
    if trailing.len() >= MIN_FALLBACK_SENTENCE_LEN {
        sentences.push(trailing.to_string());
    }
    sentences.truncate(MAX_PROPOSITIONS);
    sentences
}
