//! Closed error-kind taxonomy shared across the indexing pipeline, storage
//! engine, embedding orchestrator, and coordination protocol.
//!
//! Kinds mirror the "error kinds, not types" design in the spec: each
//! variant is a category an operator or a retrying caller can branch on,
//! not a 1:1 wrapper around a library's own error type.

use thiserror::Error;

/// Sub-kinds of [`SearchError::Embedding`], reflecting the distinct ways an
/// embedding provider call can fail and the distinct retry policy each implies.
#[derive(Debug, Error)]
pub enum EmbeddingErrorKind {
    #[error("text exceeds provider token limit ({tokens} > {limit})")]
    TokenLimit { tokens: usize, limit: usize },

    #[error("request to provider timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("provider rejected credentials")]
    Auth,

    #[error("provider rate-limited the request")]
    Rate,

    #[error("transport error calling provider: {0}")]
    Transport(String),
}

/// The closed set of error kinds surfaced anywhere in this crate.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("embedding error: {kind}")]
    Embedding {
        #[source]
        kind: EmbeddingErrorKind,
    },

    #[error("coordination error: {0}")]
    Coordination(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl SearchError {
    pub fn validation(msg: impl Into<String>) -> Self {
        SearchError::Validation(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        SearchError::Storage(msg.into())
    }

    pub fn embedding(kind: EmbeddingErrorKind) -> Self {
        SearchError::Embedding { kind }
    }

    pub fn coordination(msg: impl Into<String>) -> Self {
        SearchError::Coordination(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        SearchError::Configuration(msg.into())
    }

    /// Stable machine-readable tag used in JSON-RPC / HTTP error bodies.
    pub fn kind_tag(&self) -> &'static str {
        match self {
            SearchError::Validation(_) => "validation",
            SearchError::Parse(_) => "parse",
            SearchError::Storage(_) => "storage",
            SearchError::Embedding { .. } => "embedding",
            SearchError::Coordination(_) => "coordination",
            SearchError::Configuration(_) => "configuration",
        }
    }
}

impl From<lancedb::Error> for SearchError {
    fn from(e: lancedb::Error) -> Self {
        SearchError::Storage(e.to_string())
    }
}

impl From<arrow_schema::ArrowError> for SearchError {
    fn from(e: arrow_schema::ArrowError) -> Self {
        SearchError::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SearchError>;
