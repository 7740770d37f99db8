//! CLI harness for `studyrag-core`: ingest documents and ask questions against them.
//!
//! Defaults to the in-memory `ChunkStore`/`VectorIndex` and a disabled embed/LLM client so the
//! crate runs out of the box with no external dependencies; pass `--config` to point at a TOML file
//! naming a real `db.path` and/or `openai` providers (requires the `adapters` feature and
//! `OPENAI_API_KEY`). Mirrors the teacher's `ctx` binary's shape (clap subcommands dispatching to one
//! function per command) but answers questions instead of running a connector sync.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use studyrag_core::cache::ResponseCache;
use studyrag_core::config::{
    self, CacheConfig, ChunkingConfig, Config, DbConfig, DeadlinesConfig, EmbeddingConfig, IngestConfig, LlmConfig,
    RerankerConfig, RetrievalConfig,
};
use studyrag_core::embedding::{DisabledEmbedClient, EmbedClient};
use studyrag_core::feedback::{rate_answer, FeedbackTracker};
use studyrag_core::ingest::Ingestor;
use studyrag_core::lexical::LexicalIndex;
use studyrag_core::llm::LLMClient;
use studyrag_core::models::{SourceType, Thumbs};
use studyrag_core::orchestrator::AnswerOrchestrator;
use studyrag_core::progress::ProgressMode;
use studyrag_core::reranker::RerankerClient;
use studyrag_core::retriever::Retriever;
use studyrag_core::store::memory::InMemoryChunkStore;
use studyrag_core::store::sqlite::SqliteChunkStore;
use studyrag_core::store::ChunkStore;
use studyrag_core::vector::memory::InMemoryVectorIndex;
use studyrag_core::vector::VectorIndex;

#[derive(Parser)]
#[command(name = "studyrag", about = "A retrieval-augmented study assistant over your own documents", version)]
struct Cli {
    /// Path to a TOML config file. Without one, runs fully in-memory with embeddings/LLM disabled.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Progress output on stderr: off, human, or json. Defaults to human on a TTY.
    #[arg(long, global = true)]
    progress: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a document from a file.
    Ingest {
        /// Owning user id.
        #[arg(long)]
        user: String,
        /// Document title.
        #[arg(long)]
        title: String,
        /// Path to the document's text.
        file: PathBuf,
        /// Force a source type instead of classifying (textbook, paper, notes, code, general).
        #[arg(long = "type")]
        source_type: Option<String>,
    },

    /// Ask a question against a user's ingested documents.
    Answer {
        /// Owning user id.
        #[arg(long)]
        user: String,
        /// The question text.
        query: String,
        /// Prior-turn context, used as a coreference-resolution hint for rewriting.
        #[arg(long)]
        hint: Option<String>,
    },

    /// Show a user's documents and their ingestion status.
    Status {
        /// Owning user id.
        #[arg(long)]
        user: String,
    },

    /// Record a thumbs-up/down rating for a previous answer.
    Rate {
        /// Owning user id.
        #[arg(long)]
        user: String,
        /// The query id the rating applies to.
        #[arg(long = "query-id")]
        query_id: String,
        /// up or down.
        thumbs: String,
        /// Optional free-text comment.
        #[arg(long)]
        comment: Option<String>,
    },
}

fn parse_source_type(s: &str) -> anyhow::Result<SourceType> {
    match s {
        "textbook" => Ok(SourceType::Textbook),
        "paper" => Ok(SourceType::Paper),
        "notes" => Ok(SourceType::Notes),
        "code" => Ok(SourceType::Code),
        "general" => Ok(SourceType::General),
        other => anyhow::bail!("unknown source type '{other}', expected textbook/paper/notes/code/general"),
    }
}

fn parse_thumbs(s: &str) -> anyhow::Result<Thumbs> {
    match s {
        "up" => Ok(Thumbs::Up),
        "down" => Ok(Thumbs::Down),
        other => anyhow::bail!("unknown thumbs value '{other}', expected up/down"),
    }
}

/// The config used when `--config` is omitted: everything in-memory, embeddings/LLM/reranker
/// disabled. Mirrors the field-level defaults `Config`'s own `Deserialize` impls already carry.
fn default_config() -> Config {
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

async fn build_store(cfg: &Config) -> anyhow::Result<Arc<dyn ChunkStore>> {
    if cfg.db.path.as_os_str() == ":memory:" {
        return Ok(Arc::new(InMemoryChunkStore::new()));
    }
    let pool = studyrag_core::db::connect(cfg).await?;
    Ok(Arc::new(SqliteChunkStore::new(pool)))
}

fn build_embed_client(cfg: &Config) -> anyhow::Result<Arc<dyn EmbedClient>> {
    if !cfg.embedding.is_enabled() {
        return Ok(Arc::new(DisabledEmbedClient));
    }
    match cfg.embedding.provider.as_str() {
        #[cfg(feature = "adapters")]
        "openai" => Ok(Arc::new(studyrag_core::adapters::openai::OpenAIEmbedClient::new(&cfg.embedding)?)),
        #[cfg(feature = "local-embeddings-tract")]
        "local" => Ok(Arc::new(studyrag_core::adapters::local_tract::LocalTractEmbedClient::new(&cfg.embedding)?)),
        other => anyhow::bail!(
            "embedding provider '{other}' requires a feature not compiled into this binary (adapters or local-embeddings-tract)"
        ),
    }
}

fn build_llm_client(cfg: &Config) -> anyhow::Result<Option<Arc<dyn LLMClient>>> {
    if !cfg.llm.is_enabled() {
        return Ok(None);
    }
    match cfg.llm.provider.as_str() {
        #[cfg(feature = "adapters")]
        "openai" => Ok(Some(Arc::new(studyrag_core::adapters::openai::OpenAILLMClient::new(&cfg.llm)?))),
        other => anyhow::bail!("llm provider '{other}' requires the adapters feature"),
    }
}

fn build_reranker(cfg: &Config) -> anyhow::Result<Option<Arc<dyn RerankerClient>>> {
    if !cfg.reranker.is_enabled() {
        return Ok(None);
    }
    #[cfg(feature = "adapters")]
    {
        return Ok(Some(Arc::new(studyrag_core::adapters::openai::HttpRerankerClient::new(&cfg.reranker)?)));
    }
    #[cfg(not(feature = "adapters"))]
    anyhow::bail!("reranker provider '{}' requires the adapters feature", cfg.reranker.provider)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => default_config(),
    };

    let progress_mode = match cli.progress.as_deref() {
        Some("off") => ProgressMode::Off,
        Some("human") => ProgressMode::Human,
        Some("json") => ProgressMode::Json,
        Some(other) => anyhow::bail!("unknown --progress value '{other}', expected off/human/json"),
        None => ProgressMode::default_for_tty(),
    };

    let store = build_store(&cfg).await?;
    let vector_index: Arc<dyn VectorIndex> = Arc::new(InMemoryVectorIndex::new());
    let lexical_index = Arc::new(LexicalIndex::default());
    let embed_client = build_embed_client(&cfg)?;
    let llm = build_llm_client(&cfg)?;
    let reranker = build_reranker(&cfg)?;
    let cache = Arc::new(ResponseCache::new(
        cfg.cache.capacity_per_user,
        cfg.cache.ttl_secs,
        cfg.cache.similarity_threshold,
    ));
    let feedback_tracker = Arc::new(FeedbackTracker::new(cfg.cache.capacity_per_user));

    match cli.command {
        Commands::Ingest { user, title, file, source_type } => {
            let text = std::fs::read_to_string(&file)?;
            let filename = file.file_name().and_then(|f| f.to_str()).map(str::to_string);
            let source_type_override = source_type.as_deref().map(parse_source_type).transpose()?;

            let ingestor = Ingestor::new(
                store,
                vector_index,
                lexical_index,
                embed_client,
                llm,
                Some(cache),
                cfg,
                progress_mode.reporter().into(),
            );
            let document_id = ingestor
                .submit_document(&user, &title, &text, filename.as_deref(), source_type_override)
                .await?;
            println!("{document_id}");
        }

        Commands::Answer { user, query, hint } => {
            let llm = llm.ok_or_else(|| anyhow::anyhow!("answering requires an enabled llm provider"))?;
            let retriever = Arc::new(
                Retriever::new(store.clone(), vector_index, lexical_index, reranker, Some(llm.clone()), cfg.retrieval.clone())
                    .with_feedback_tracker(feedback_tracker),
            );
            let orchestrator = AnswerOrchestrator::from_config(store, retriever, cache, embed_client, llm, &cfg);
            let result = orchestrator.answer(&user, &query, hint.as_deref()).await?;

            println!("{}", result.answer_text);
            for source in &result.sources {
                match source.page {
                    Some(page) => println!("  - {} (p. {page})", source.doc_title),
                    None => println!("  - {}", source.doc_title),
                }
            }
            if result.diagnostics.low_confidence {
                eprintln!("note: this answer is flagged low confidence");
            }
        }

        Commands::Status { user } => {
            let docs = store.list_documents_by_user(&user).await?;
            if docs.is_empty() {
                println!("no documents for user '{user}'");
            }
            for doc in docs {
                println!("{}  {}  {}  {}", doc.id, doc.status, doc.source_type, doc.title);
            }
        }

        Commands::Rate { user, query_id, thumbs, comment } => {
            let thumbs = parse_thumbs(&thumbs)?;
            rate_answer(store.as_ref(), &feedback_tracker, &user, &query_id, thumbs, comment).await?;
            println!("recorded");
        }
    }

    Ok(())
}
