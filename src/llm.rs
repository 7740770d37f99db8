//! `LLMClient` — the one structured-completion interface every LLM-touching component depends on.
//! The core never depends on a concrete provider; callers inject an `Arc<dyn LLMClient>` (an
//! in-memory fake in tests, the reference `adapters::openai` client in the CLI harness).
//!
//! A small `#[async_trait]` interface, `Send + Sync`, with implementations swapped behind a trait
//! object.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::error::LlmError;

/// What kind of structured response a prompt expects back. Each variant names the JSON shape the
/// caller will deserialize the raw completion into; `LLMClient` implementations are free to use this
/// to pick a provider-side "JSON mode" / function-calling schema, but the trait itself only promises
/// "the text you get back, if `Some(schema)` was passed, parses as that shape or you get
/// `InvalidResponse`".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSchema {
    /// A JSON array of strings (decomposition sub-queries, multi-query phrasings, proposition list).
    StringList,
    /// A single JSON string (query rewrite, reformulation).
    SingleString,
    /// A JSON array of `{subject, predicate, object}` objects (KG extraction).
    TripleList,
    /// The literal token `"sufficient"` or `"insufficient"` (self-RAG verdict).
    SufficiencyVerdict,
}

/// A prompt plus the schema the caller expects, and a deadline the client must respect.
pub struct CompletionRequest<'a> {
    pub prompt: &'a str,
    pub schema: Option<ResponseSchema>,
    pub deadline: Duration,
}

/// The single external LLM contract the core depends on.
///
/// `complete` always returns raw text; when `schema` was set the caller will immediately try to parse
/// it with [`parse_string_list`]/[`parse_triples`]/etc. An implementation that can validate
/// server-side (e.g. a JSON-mode API) should still return well-formed JSON text rather than a
/// pre-parsed structure, so the trait stays agnostic of any particular provider's SDK types.
#[async_trait]
pub trait LLMClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<String, LlmError>;
}

/// Parse a `StringList` response. Tolerates a bare JSON array or an object with a `"items"` key (some
/// providers' JSON mode wraps arrays this way).
pub fn parse_string_list(raw: &str) -> Result<Vec<String>, LlmError> {
    #[derive(serde::Deserialize)]
    #[serde(untagged)]
    enum Wrapped {
        Array(Vec<String>),
        Wrapper { items: Vec<String> },
    }
    match serde_json::from_str::<Wrapped>(raw.trim()) {
        Ok(Wrapped::Array(v)) | Ok(Wrapped::Wrapper { items: v }) => Ok(v),
        Err(e) => Err(LlmError::InvalidResponse(format!("expected string list: {e}"))),
    }
}

/// Raw triple shape as returned by the LLM, before lowercase normalisation/schema validation in
/// `crate::kg`.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct RawTriple {
    pub subject: String,
    pub predicate: String,
    pub object: String,
}

pub fn parse_triples(raw: &str) -> Result<Vec<RawTriple>, LlmError> {
    parse_json::<Vec<RawTriple>>(raw).map_err(|e| LlmError::InvalidResponse(format!("expected triple list: {e}")))
}

/// Self-RAG sufficiency verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sufficiency {
    Sufficient,
    Insufficient,
}

pub fn parse_sufficiency(raw: &str) -> Result<Sufficiency, LlmError> {
    match raw.trim().trim_matches('"').to_lowercase().as_str() {
        "sufficient" => Ok(Sufficiency::Sufficient),
        "insufficient" => Ok(Sufficiency::Insufficient),
        other => Err(LlmError::InvalidResponse(format!(
            "expected 'sufficient'/'insufficient', got '{other}'"
        ))),
    }
}

fn parse_json<T: DeserializeOwned>(raw: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(raw.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_array() {
        let items = parse_string_list(r#"["a", "b"]"#).unwrap();
        assert_eq!(items, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn parses_wrapped_array() {
        let items = parse_string_list(r#"{"items": ["a"]}"#).unwrap();
        assert_eq!(items, vec!["a".to_string()]);
    }

    #[test]
    fn rejects_malformed_list() {
        assert!(parse_string_list("not json").is_err());
    }

    #[test]
    fn parses_triples() {
        let triples = parse_triples(r#"[{"subject":"a","predicate":"b","object":"c"}]"#).unwrap();
        assert_eq!(triples.len(), 1);
        assert_eq!(triples[0].subject, "a");
    }

    #[test]
    fn parses_sufficiency_case_insensitively() {
        assert_eq!(parse_sufficiency("Sufficient").unwrap(), Sufficiency::Sufficient);
        assert_eq!(parse_sufficiency("\"insufficient\"").unwrap(), Sufficiency::Insufficient);
        assert!(parse_sufficiency("maybe").is_err());
    }
}
