//! Error taxonomy shared by every layer of the index.
//!
//! Store backends, embedders, the ingestor and the search engine all
//! return [`Error`]. The application crate wraps it in `anyhow` at the
//! command boundary; library code matches on the variants.

use std::time::Duration;

/// Boxed error type used for backend failures (sqlx, I/O, lock poisoning).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result alias used across `uridx-core`.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The ingestion request is structurally invalid (empty uri, no
    /// chunks, blank chunk text, malformed JSON record).
    #[error("invalid ingest request: {0}")]
    InvalidIngestRequest(String),

    /// A caller-supplied argument is out of range (e.g. `limit <= 0`).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The embedding service could not be reached or answered with a
    /// retryable failure (connection refused, 429, 5xx).
    #[error("embedding service unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// The embedding service answered with a permanent failure, such as
    /// an unknown model or a rejected request body.
    #[error("embedding request rejected: {0}")]
    EmbeddingRejected(String),

    #[error("embedding request timed out after {0:?}")]
    EmbeddingTimeout(Duration),

    /// A vector's length disagrees with the dimension fixed by the index's
    /// first commit, or with the other vectors staged alongside it.
    #[error("embedding dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("storage error: {0}")]
    StorageIo(#[source] BoxError),

    #[error("not found: {0}")]
    NotFound(String),

    /// Context wrapper for a failed ingestion. `stage` names the step
    /// that failed, e.g. `chunk 3` or `commit`.
    #[error("ingesting {uri} failed at {stage}: {source}")]
    Ingest {
        uri: String,
        stage: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Wrap any backend error as [`Error::StorageIo`].
    pub fn storage<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        Error::StorageIo(err.into())
    }

    /// True for failures worth retrying: the embedding service being
    /// down or slow.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::EmbeddingUnavailable(_) | Error::EmbeddingTimeout(_) => true,
            Error::Ingest { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// The innermost error, skipping [`Error::Ingest`] context layers.
    pub fn root(&self) -> &Error {
        match self {
            Error::Ingest { source, .. } => source.root(),
            other => other,
        }
    }

    pub(crate) fn ingest(uri: &str, stage: impl Into<String>, source: Error) -> Self {
        Error::Ingest {
            uri: uri.to_string(),
            stage: stage.into(),
            source: Box::new(source),
        }
    }
}
