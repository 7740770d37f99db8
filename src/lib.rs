//! # Study RAG Core
//!
//! **A local-first retrieval-augmented question-answering core for an academic study assistant.**
//!
//! Accepts uploaded study documents (textbooks, papers, lecture notes, code, general text),
//! classifies and chunks them, extracts propositions and knowledge-graph triples, embeds and
//! indexes them for hybrid (lexical + vector) retrieval, and answers natural-language questions
//! against a user's own document set with citations.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌───────────┐   ┌────────────┐   ┌────────────┐
//! │  Ingestor │──▶│  Chunking │──▶│ Extraction │──▶│  Embedding │
//! │  (submit) │   │  (parent/ │   │ (props/kg) │   │  (vector)  │
//! └───────────┘   │   child)  │   └────────────┘   └─────┬──────┘
//!                 └───────────┘                          │
//!                                                         ▼
//!                                                  ┌─────────────┐
//!                                                  │  ChunkStore │
//!                                                  │ VectorIndex │
//!                                                  └──────┬──────┘
//!                                                         │
//!                      ┌──────────────────────────────────┤
//!                      ▼                                  ▼
//!               ┌─────────────┐                   ┌───────────────┐
//!               │  Retriever  │◀──────────────────│ AnswerOrchestr-│
//!               │ (hybrid/kg) │                    │ ator (9 steps) │
//!               └─────────────┘                    └───────────────┘
//! ```
//!
//! ## Data Flow
//!
//! 1. [`Ingestor::submit_document`] classifies ([`classify`]), chunks ([`chunk`]) into parent/child
//!    pairs, stores them ([`store`]), and non-fatally extracts propositions ([`proposition`]) and
//!    knowledge-graph triples ([`kg`]) before embedding every child chunk ([`embedding`],
//!    [`vector`]).
//! 2. [`AnswerOrchestrator::answer`] probes the semantic cache ([`cache`]), optionally rewrites and
//!    decomposes the query, retrieves per sub-query/phrasing via [`Retriever::retrieve`]
//!    ([`retriever`], [`lexical`]), runs the self-RAG sufficiency loop, and generates a cited
//!    answer.
//! 3. [`feedback::rate_answer`] records a thumbs-up/down rating that nudges future retrieval scores
//!    for the chunks that produced an answer.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types: `Document`, `Chunk`, `Proposition`, `KgTriple`, `Feedback` |
//! | [`error`] | Typed error taxonomy (`CoreError`, `LlmError`) |
//! | [`store`] | `ChunkStore` trait plus in-memory and SQLite implementations |
//! | [`vector`] | `VectorIndex` trait plus the in-memory brute-force cosine implementation |
//! | [`lexical`] | BM25 lexical index with per-user lazy rebuild |
//! | [`cache`] | Semantic response cache |
//! | [`feedback`] | Thumbs-up/down feedback, persisted and fed back as a retrieval score nudge |
//! | [`chunk`] | Paragraph-boundary chunker with adaptive parent/child profiles |
//! | [`classify`] | Document source-type classifier (textbook/paper/notes/code/general) |
//! | [`query_classify`] | Query-type classifier driving adaptive fusion weights |
//! | [`proposition`] | Atomic-statement extraction from chunks |
//! | [`kg`] | Knowledge-graph triple extraction and BFS augmentation |
//! | [`embedding`] | `EmbedClient` trait and vector utilities |
//! | [`llm`] | `LLMClient` trait and structured-response parsing |
//! | [`reranker`] | `RerankerClient` trait |
//! | [`retriever`] | Hybrid retrieval: fusion, rerank, expansion, KG augmentation |
//! | [`orchestrator`] | Top-level `answer()` flow: cache, rewrite, decompose, self-RAG, generate |
//! | [`ingest`] | `Ingestor`: classify → chunk → extract → embed, with progress reporting |
//! | [`progress`] | Ingestion progress events and reporters (human/JSON/off) |
//! | [`db`] | SQLite connection pool with WAL mode |
//! | [`migrate`] | Database schema migrations (idempotent) |
//! | [`adapters`] | Reference `reqwest`/`tract`-based `EmbedClient`/`LLMClient`/`RerankerClient` impls |
//! | [`testutil`] | Deterministic fakes for `LLMClient`/`EmbedClient`/`RerankerClient` used in tests |
//!
//! ## Configuration
//!
//! Configured via a TOML file. See [`config`] for all available options and
//! [`config::load_config`] for validation rules.

pub mod adapters;
pub mod cache;
pub mod chunk;
pub mod classify;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod feedback;
pub mod ingest;
pub mod kg;
pub mod lexical;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod orchestrator;
pub mod progress;
pub mod proposition;
pub mod query_classify;
pub mod reranker;
pub mod retriever;
pub mod store;
pub mod vector;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;
