//! Query type classification, driving which row of [`crate::config::RetrievalConfig`]'s per-type
//! `FusionWeights` a query uses.
//!
//! Keyword/pattern heuristics over the five [`crate::models::QueryType`] labels, checked
//! most-specific-first for deterministic tie-breaking.

use crate::models::QueryType;

const DEFINITION_PREFIXES: &[&str] = &["what is", "what are", "define", "what does", "meaning of"];
const COMPARISON_MARKERS: &[&str] = &[" vs ", " vs. ", " versus ", "difference between", "compare"];
const PROCEDURAL_PREFIXES: &[&str] = &["how do i", "how to", "how does one", "steps to", "walk me through"];
const CODE_MARKERS: &[&str] =
    &["```", "function", "def ", "fn ", "class ", "import ", "syntax error", "stack trace", "exception"];

/// Classifies a natural-language query. Falls back to [`QueryType::General`] when no pattern
/// matches, which carries the most balanced hybrid weights.
pub fn classify_query(query: &str) -> QueryType {
    let lower = query.to_lowercase();

    if CODE_MARKERS.iter().any(|m| lower.contains(m)) {
        return QueryType::Code;
    }
    if COMPARISON_MARKERS.iter().any(|m| lower.contains(m)) {
        return QueryType::Comparison;
    }
    if PROCEDURAL_PREFIXES.iter().any(|p| lower.starts_with(p) || lower.contains(p)) {
        return QueryType::Procedural;
    }
    if DEFINITION_PREFIXES.iter().any(|p| lower.starts_with(p)) {
        return QueryType::Definition;
    }

    QueryType::General
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_definition_queries() {
        assert_eq!(classify_query("What is a derivative?"), QueryType::Definition);
        assert_eq!(classify_query("Define entropy"), QueryType::Definition);
    }

    #[test]
    fn recognizes_comparison_queries() {
        assert_eq!(classify_query("TCP vs UDP"), QueryType::Comparison);
        assert_eq!(classify_query("What is the difference between mitosis and meiosis?"), QueryType::Comparison);
    }

    #[test]
    fn recognizes_code_queries() {
        assert_eq!(classify_query("why does this stack trace happen"), QueryType::Code);
        assert_eq!(classify_query("```rust\nfn main() {}\n```"), QueryType::Code);
    }

    #[test]
    fn recognizes_procedural_queries() {
        assert_eq!(classify_query("How do I integrate by parts?"), QueryType::Procedural);
        assert_eq!(classify_query("Steps to balance a chemical equation"), QueryType::Procedural);
    }

    #[test]
    fn falls_back_to_general() {
        assert_eq!(classify_query("Tell me about the French Revolution"), QueryType::General);
    }

    #[test]
    fn code_markers_take_priority_over_definition_prefix() {
        assert_eq!(classify_query("what is this stack trace telling me"), QueryType::Code);
    }
}
