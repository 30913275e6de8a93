//! Error taxonomy for the harvesting pipeline.
//!
//! Every failure is scoped to a single source pass except
//! [`ConversionError`], which only drops one result. Each error that can end
//! a pass exposes a stable `kind()` string for reports and logs.

use std::path::PathBuf;
use thiserror::Error;

use crate::models::QueryKind;

/// Boxed cause carried by fetch errors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The abstract query could not be expressed for a source.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("source '{source_id}' does not support {kind} queries")]
    UnsupportedQueryKind { source_id: String, kind: QueryKind },

    #[error("query needs at least one non-blank keyword")]
    EmptyKeywords,
}

/// A source could not produce its result stream.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("query conversion failed: {0}")]
    QueryConversion(#[from] QueryError),

    /// Transport failure or transient remote outage. Retried on the next run.
    #[error("connectivity failure: {message}")]
    Connectivity {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Anything else: auth, unexpected status, malformed response.
    #[error("fetch failed: {message}")]
    SourceFetch {
        message: String,
        #[source]
        source: Option<BoxError>,
    },
}

impl FetchError {
    pub fn connectivity(message: impl Into<String>) -> Self {
        FetchError::Connectivity {
            message: message.into(),
            source: None,
        }
    }

    pub fn fetch(message: impl Into<String>) -> Self {
        FetchError::SourceFetch {
            message: message.into(),
            source: None,
        }
    }

    /// Attach the underlying cause. No-op for query conversion errors.
    pub fn with_source(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        match &mut self {
            FetchError::Connectivity { source, .. } | FetchError::SourceFetch { source, .. } => {
                *source = Some(Box::new(cause));
            }
            FetchError::QueryConversion(_) => {}
        }
        self
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::QueryConversion(QueryError::UnsupportedQueryKind { .. }) => {
                "unsupported_query_kind"
            }
            FetchError::QueryConversion(_) => "query_conversion",
            FetchError::Connectivity { .. } => "connectivity",
            FetchError::SourceFetch { .. } => "source_fetch",
        }
    }

    pub fn is_unsupported_query(&self) -> bool {
        matches!(
            self,
            FetchError::QueryConversion(QueryError::UnsupportedQueryKind { .. })
        )
    }
}

/// One native result could not be turned into an entry.
#[derive(Debug, Error)]
#[error("could not convert result: {message}")]
pub struct ConversionError {
    pub message: String,
}

impl ConversionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn missing(field: &str) -> Self {
        Self::new(format!("missing required field '{}'", field))
    }
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O failed for {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("checkpoint file {} is corrupt: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("checkpoint database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("stored watermark for '{source_id}' is out of range: {value}")]
    InvalidTimestamp { source_id: String, value: i64 },
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to render front matter: {0}")]
    Render(#[from] toml::ser::Error),
}

/// Why a single source pass was abandoned.
#[derive(Debug, Error)]
pub enum PassError {
    #[error("reading watermark: {0}")]
    CheckpointRead(#[source] CheckpointError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("persisting entry: {0}")]
    Write(#[from] WriteError),

    #[error("advancing watermark: {0}")]
    CheckpointCommit(#[source] CheckpointError),
}

impl PassError {
    pub fn kind(&self) -> &'static str {
        match self {
            PassError::CheckpointRead(_) => "checkpoint_read",
            PassError::Fetch(e) => e.kind(),
            PassError::Write(_) => "write",
            PassError::CheckpointCommit(_) => "checkpoint_commit",
        }
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("all {failed} source passes of aggregator '{aggregator}' failed")]
    AllSourcesFailed { aggregator: String, failed: usize },
}
