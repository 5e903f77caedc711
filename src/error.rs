//! Error types for statement-ingest.
//!
//! Two layers: [`Error`] is what a run can fail with as a whole, while
//! [`FetchError`] describes a single task attempt and never leaves the
//! fetch-and-persist unit (it is folded into a `TaskOutcome`).

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    /// The progress file could not be read or written. Always run-ending.
    #[error("checkpoint error at {}: {reason}", path.display())]
    Checkpoint { path: PathBuf, reason: String },

    #[error("cannot enumerate universe: {0}")]
    Universe(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub(crate) fn checkpoint(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::Checkpoint {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error must end the run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Checkpoint { .. } | Error::Universe(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure of one fetch-and-persist attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Network failure, throttling response, upstream 5xx.
    #[error("transient: {0}")]
    Transient(String),

    /// The per-call deadline elapsed.
    #[error("timeout")]
    Timeout,

    /// Malformed or unexpected upstream response.
    #[error("permanent: {0}")]
    Permanent(String),

    /// Repository write failed; the fetched data is still in hand.
    #[error("storage: {0}")]
    Storage(String),
}

impl FetchError {
    /// Permanent errors are not retried; everything else spends retry budget.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FetchError::Permanent(_))
    }

    /// Short label used for metrics and span fields.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Transient(_) => "transient",
            FetchError::Timeout => "timeout",
            FetchError::Permanent(_) => "permanent",
            FetchError::Storage(_) => "storage",
        }
    }
}
