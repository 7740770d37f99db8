//! Configuration parsing and validation.
//!
//! `studyrag-core` is configured via a single TOML document tree (default: `config/studyrag.toml`).
//! Every section has field-level defaults so a minimal file (just `[db]`) is enough to run against
//! the in-memory backends; enabling a real embedding/LLM provider requires filling in the matching
//! section.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub reranker: RerankerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub deadlines: DeadlinesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// One row of the adaptive chunking profile table.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct ChunkProfile {
    pub target_chars: usize,
    pub overlap_chars: usize,
    pub splitter: SplitterKind,
    /// `0` means "no parent/child split" (notes, code).
    pub parent_window_multiplier: usize,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SplitterKind {
    Semantic,
    Recursive,
    RecursiveBlockAware,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    pub textbook: ChunkProfile,
    pub paper: ChunkProfile,
    pub notes: ChunkProfile,
    pub code: ChunkProfile,
    pub general: ChunkProfile,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            textbook: ChunkProfile {
                target_chars: 1200,
                overlap_chars: 300,
                splitter: SplitterKind::Semantic,
                parent_window_multiplier: 3,
            },
            paper: ChunkProfile {
                target_chars: 800,
                overlap_chars: 200,
                splitter: SplitterKind::Recursive,
                parent_window_multiplier: 2,
            },
            notes: ChunkProfile {
                target_chars: 600,
                overlap_chars: 100,
                splitter: SplitterKind::Recursive,
                parent_window_multiplier: 0,
            },
            code: ChunkProfile {
                target_chars: 1000,
                overlap_chars: 150,
                splitter: SplitterKind::RecursiveBlockAware,
                parent_window_multiplier: 0,
            },
            general: ChunkProfile {
                target_chars: 1000,
                overlap_chars: 200,
                splitter: SplitterKind::Recursive,
                parent_window_multiplier: 2,
            },
        }
    }
}

impl ChunkingConfig {
    /// The chunk profile for a document's classified [`crate::models::SourceType`].
    pub fn profile_for(&self, source_type: crate::models::SourceType) -> &ChunkProfile {
        use crate::models::SourceType;
        match source_type {
            SourceType::Textbook => &self.textbook,
            SourceType::Paper => &self.paper,
            SourceType::Notes => &self.notes,
            SourceType::Code => &self.code,
            SourceType::General => &self.general,
        }
    }
}

/// Fusion weights `(alpha, beta)` for one query-classification label, `alpha + beta == 1.0`.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct FusionWeights {
    pub alpha: f64,
    pub beta: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_candidate_k")]
    pub candidate_k: i64,
    #[serde(default = "default_rerank_k")]
    pub rerank_k: i64,
    #[serde(default = "default_weights_default")]
    pub weights_default: FusionWeights,
    #[serde(default = "default_weights_definition")]
    pub weights_definition: FusionWeights,
    #[serde(default = "default_weights_comparison")]
    pub weights_comparison: FusionWeights,
    #[serde(default = "default_weights_code")]
    pub weights_code: FusionWeights,
    #[serde(default = "default_weights_procedural")]
    pub weights_procedural: FusionWeights,
    #[serde(default = "default_kg_max_triples")]
    pub kg_max_triples: usize,
    #[serde(default = "default_kg_hops")]
    pub kg_hops: usize,
}

fn default_candidate_k() -> i64 {
    20
}
fn default_rerank_k() -> i64 {
    5
}
fn default_weights_default() -> FusionWeights {
    FusionWeights { alpha: 0.3, beta: 0.7 }
}
fn default_weights_definition() -> FusionWeights {
    FusionWeights { alpha: 0.5, beta: 0.5 }
}
fn default_weights_comparison() -> FusionWeights {
    FusionWeights { alpha: 0.2, beta: 0.8 }
}
fn default_weights_code() -> FusionWeights {
    FusionWeights { alpha: 0.6, beta: 0.4 }
}
fn default_weights_procedural() -> FusionWeights {
    FusionWeights { alpha: 0.4, beta: 0.6 }
}
fn default_kg_max_triples() -> usize {
    32
}
fn default_kg_hops() -> usize {
    2
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            candidate_k: default_candidate_k(),
            rerank_k: default_rerank_k(),
            weights_default: default_weights_default(),
            weights_definition: default_weights_definition(),
            weights_comparison: default_weights_comparison(),
            weights_code: default_weights_code(),
            weights_procedural: default_weights_procedural(),
            kg_max_triples: default_kg_max_triples(),
            kg_hops: default_kg_hops(),
        }
    }
}

impl RetrievalConfig {
    /// The `(alpha, beta)` fusion weights for one query classification.
    pub fn weights_for(&self, query_type: crate::models::QueryType) -> FusionWeights {
        use crate::models::QueryType;
        match query_type {
            QueryType::Definition => self.weights_definition,
            QueryType::Comparison => self.weights_comparison,
            QueryType::Code => self.weights_code,
            QueryType::Procedural => self.weights_procedural,
            QueryType::General => self.weights_default,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: default_dims(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_dims() -> Option<usize> {
    Some(768)
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RerankerConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_capacity")]
    pub capacity_per_user: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: i64,
    #[serde(default = "default_cache_similarity_threshold")]
    pub similarity_threshold: f32,
}

fn default_cache_capacity() -> usize {
    50
}
fn default_cache_ttl_secs() -> i64 {
    24 * 3600
}
fn default_cache_similarity_threshold() -> f32 {
    0.95
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity_per_user: default_cache_capacity(),
            ttl_secs: default_cache_ttl_secs(),
            similarity_threshold: default_cache_similarity_threshold(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_ingest_concurrency")]
    pub max_concurrent: usize,
    #[serde(default = "default_ingest_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_reap_timeout_secs")]
    pub reap_timeout_secs: i64,
    #[serde(default = "default_embedding_max_retries")]
    pub embedding_max_retries: u32,
    #[serde(default = "default_embedding_backoff_base_ms")]
    pub embedding_backoff_base_ms: u64,
    #[serde(default = "default_embedding_backoff_cap_ms")]
    pub embedding_backoff_cap_ms: u64,
    /// Cumulative enriched-text byte budget per `EmbedClient::embed` call during ingestion
    /// (SPEC_FULL §4.1: "batches sized by byte budget"), in addition to `embedding.batch_size`'s
    /// item-count cap.
    #[serde(default = "default_embedding_batch_byte_budget")]
    pub embedding_batch_byte_budget: usize,
}

fn default_ingest_concurrency() -> usize {
    4
}
fn default_ingest_queue_capacity() -> usize {
    256
}
fn default_reap_timeout_secs() -> i64 {
    600
}
fn default_embedding_max_retries() -> u32 {
    3
}
fn default_embedding_backoff_base_ms() -> u64 {
    500
}
fn default_embedding_backoff_cap_ms() -> u64 {
    8_000
}
fn default_embedding_batch_byte_budget() -> usize {
    64 * 1024
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_ingest_concurrency(),
            queue_capacity: default_ingest_queue_capacity(),
            reap_timeout_secs: default_reap_timeout_secs(),
            embedding_max_retries: default_embedding_max_retries(),
            embedding_backoff_base_ms: default_embedding_backoff_base_ms(),
            embedding_backoff_cap_ms: default_embedding_backoff_cap_ms(),
            embedding_batch_byte_budget: default_embedding_batch_byte_budget(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeadlinesConfig {
    #[serde(default = "default_answer_deadline_secs")]
    pub answer_secs: u64,
    #[serde(default = "default_retrieve_deadline_secs")]
    pub retrieve_secs: u64,
    #[serde(default = "default_max_self_rag_iterations")]
    pub max_self_rag_iterations: u32,
}

fn default_answer_deadline_secs() -> u64 {
    30
}
fn default_retrieve_deadline_secs() -> u64 {
    5
}
fn default_max_self_rag_iterations() -> u32 {
    2
}

impl Default for DeadlinesConfig {
    fn default() -> Self {
        Self {
            answer_secs: default_answer_deadline_secs(),
            retrieve_secs: default_retrieve_deadline_secs(),
            max_self_rag_iterations: default_max_self_rag_iterations(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl RerankerConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn validate_weights(label: &str, w: FusionWeights) -> Result<()> {
    if (w.alpha + w.beta - 1.0).abs() > 1e-6 {
        anyhow::bail!(
            "retrieval.weights_{}: alpha + beta must equal 1.0 (got {} + {})",
            label,
            w.alpha,
            w.beta
        );
    }
    if !(0.0..=1.0).contains(&w.alpha) || !(0.0..=1.0).contains(&w.beta) {
        anyhow::bail!("retrieval.weights_{}: alpha and beta must be in [0.0, 1.0]", label);
    }
    Ok(())
}

fn validate_profile(label: &str, p: &ChunkProfile) -> Result<()> {
    if p.target_chars == 0 {
        anyhow::bail!("chunking.{}.target_chars must be > 0", label);
    }
    if p.overlap_chars >= p.target_chars {
        anyhow::bail!("chunking.{}.overlap_chars must be < target_chars", label);
    }
    Ok(())
}

/// Parse and validate a TOML config file: parse, then check every
/// numeric invariant the rest of the crate assumes holds.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Validate an already-constructed [`Config`] (used by `load_config` and by callers building a
/// `Config` in-process, e.g. the CLI harness's in-memory default).
pub fn validate(config: &Config) -> Result<()> {
    for (label, p) in [
        ("textbook", &config.chunking.textbook),
        ("paper", &config.chunking.paper),
        ("notes", &config.chunking.notes),
        ("code", &config.chunking.code),
        ("general", &config.chunking.general),
    ] {
        validate_profile(label, p)?;
    }

    if config.retrieval.candidate_k < 1 {
        anyhow::bail!("retrieval.candidate_k must be >= 1");
    }
    if config.retrieval.rerank_k < 1 {
        anyhow::bail!("retrieval.rerank_k must be >= 1");
    }
    validate_weights("default", config.retrieval.weights_default)?;
    validate_weights("definition", config.retrieval.weights_definition)?;
    validate_weights("comparison", config.retrieval.weights_comparison)?;
    validate_weights("code", config.retrieval.weights_code)?;
    validate_weights("procedural", config.retrieval.weights_procedural)?;

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or local.",
            other
        ),
    }

    if !(0.0..=1.0).contains(&config.cache.similarity_threshold) {
        anyhow::bail!("cache.similarity_threshold must be in [0.0, 1.0]");
    }

    if config.deadlines.max_self_rag_iterations > 2 {
        anyhow::bail!("deadlines.max_self_rag_iterations must be <= 2 per spec");
    }

    if config.ingest.embedding_batch_byte_budget == 0 {
        anyhow::bail!("ingest.embedding_batch_byte_budget must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let config = Config {
            db: DbConfig { path: PathBuf::from(":memory:") },
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            reranker: RerankerConfig::default(),
            cache: CacheConfig::default(),
            ingest: IngestConfig::default(),
            deadlines: DeadlinesConfig::default(),
        };
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn rejects_unbalanced_weights() {
        let mut config = base_config();
        config.retrieval.weights_code = FusionWeights { alpha: 0.9, beta: 0.9 };
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_zero_target_chars() {
        let mut config = base_config();
        config.chunking.notes.target_chars = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_enabled_embedding_without_dims() {
        let mut config = base_config();
        config.embedding.provider = "openai".to_string();
        config.embedding.model = Some("text-embedding-3-small".to_string());
        config.embedding.dims = None;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_self_rag_iterations_above_two() {
        let mut config = base_config();
        config.deadlines.max_self_rag_iterations = 3;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_zero_embedding_batch_byte_budget() {
        let mut config = base_config();
        config.ingest.embedding_batch_byte_budget = 0;
        assert!(validate(&config).is_err());
    }

    fn base_config() -> Config {
        Config {
            db: DbConfig { path: PathBuf::from(":memory:") },
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            reranker: RerankerConfig::default(),
            cache: CacheConfig::default(),
            ingest: IngestConfig::default(),
            deadlines: DeadlinesConfig::default(),
        }
    }
}
