//! Typed error taxonomy shared by every component.
//!
//! Callers need to branch on *kind* (retry this, surface that message, fall back) so the taxonomy
//! is a matchable enum rather than a bare [`anyhow::Error`]. Internal plumbing still uses
//! `anyhow::Context` for convenience and is folded into [`CoreError::Internal`] at the boundary via
//! the `From<anyhow::Error>` impl below.

/// The error taxonomy shared across ingestion and retrieval.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Malformed document bytes or query.
    #[error("invalid input: {0}")]
    InputInvalid(String),

    /// Document or chunk absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// LLM/Embedder/Reranker/VectorIndex timed out.
    #[error("dependency timed out: {0}")]
    DependencyTimeout(String),

    /// External service unreachable.
    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),

    /// Both lexical and vector retrieval paths failed.
    #[error("retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    /// Backpressure from the pool, or the caller's deadline already expired.
    #[error("overloaded: {0}")]
    Overloaded(String),

    /// An LLM response didn't parse against its expected schema, after the one allowed retry.
    #[error("invalid llm response: {0}")]
    InvalidResponse(String),

    /// Invariant violation. Logged with full context; surfaced to callers as an opaque message.
    #[error("internal error")]
    Internal(#[source] anyhow::Error),
}

impl CoreError {
    /// One of `retry`, `upload more documents`, `rephrase` — per §7's user-visible suggestion field.
    pub fn suggestion(&self) -> &'static str {
        match self {
            CoreError::DependencyTimeout(_)
            | CoreError::DependencyUnavailable(_)
            | CoreError::Overloaded(_)
            | CoreError::InvalidResponse(_) => "retry",
            CoreError::RetrievalUnavailable(_) | CoreError::NotFound(_) => "upload more documents",
            CoreError::InputInvalid(_) => "rephrase",
            CoreError::Internal(_) => "retry",
        }
    }

    /// A short, stable tag for diagnostics/logging that never leaks internal detail.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::InputInvalid(_) => "input_invalid",
            CoreError::NotFound(_) => "not_found",
            CoreError::DependencyTimeout(_) => "dependency_timeout",
            CoreError::DependencyUnavailable(_) => "dependency_unavailable",
            CoreError::RetrievalUnavailable(_) => "retrieval_unavailable",
            CoreError::Overloaded(_) => "overloaded",
            CoreError::InvalidResponse(_) => "invalid_response",
            CoreError::Internal(_) => "internal",
        }
    }

    /// True for errors worth one bounded exponential-backoff retry at the two call sites that
    /// attempt it (Ingestor's embedding step, Retriever's vector call).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::DependencyTimeout(_) | CoreError::DependencyUnavailable(_)
        )
    }
}

impl From<anyhow::Error> for CoreError {
    fn from(e: anyhow::Error) -> Self {
        CoreError::Internal(e)
    }
}

/// Result alias used across the crate.
pub type CoreResult<T> = Result<T, CoreError>;

/// The `LLMClient` error taxonomy, kept distinct from [`CoreError`] because an
/// `LlmError` is always converted at the call site into the broader taxonomy (a timed-out rewrite is
/// non-fatal and degrades; a timed-out generation is a `CoreError::DependencyTimeout`).
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("llm call timed out")]
    Timeout,
    #[error("llm rate limited")]
    RateLimited,
    #[error("llm unavailable: {0}")]
    Unavailable(String),
    #[error("llm returned a response that did not match the requested schema: {0}")]
    InvalidResponse(String),
}

impl From<LlmError> for CoreError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Timeout => CoreError::DependencyTimeout("llm".into()),
            LlmError::RateLimited => CoreError::DependencyUnavailable("llm rate limited".into()),
            LlmError::Unavailable(m) => CoreError::DependencyUnavailable(m),
            LlmError::InvalidResponse(m) => CoreError::InvalidResponse(m),
        }
    }
}
