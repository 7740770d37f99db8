//! Reference network adapters for `EmbedClient`/`LLMClient`/`RerankerClient` (SPEC_FULL.md §6),
//! gated behind the `adapters` feature so the core itself never depends on `reqwest` or a concrete
//! provider.
//!
//! Grounded in the teacher's `embedding.rs` `OpenAIProvider`/`embed_openai` (batched call, retry on
//! 429/5xx with exponential backoff, fail-fast on other 4xx), generalized from embeddings-only to the
//! three trait objects the core depends on.

#[cfg(feature = "adapters")]
pub mod openai;

#[cfg(feature = "local-embeddings-tract")]
pub mod local_tract;
