//! Error types for fleetscore
//!
//! Every variant is fatal for the current measurement round only. The
//! scheduler catches them at the round boundary and re-arms for the next tick.

use std::path::PathBuf;
use thiserror::Error;

/// Path reported for `MalformedInput` raised on text that did not come from a file.
pub const INLINE_SOURCE: &str = "<inline>";

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// fleetscore error types
#[derive(Error, Debug)]
pub enum Error {
    /// Results artifact, score file, or inventory could not be read or parsed
    #[error("Malformed input in {}: {reason}", path.display())]
    MalformedInput {
        /// File the bad input came from
        path: PathBuf,
        /// Underlying parse or read failure
        reason: String,
    },

    /// Raw metrics, scores, and metric schema disagree
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Custom weights cannot be renormalized or do not cover every metric
    #[error("Invalid weights: {0}\nWeights must sum to a non-zero total and name every scored metric")]
    InvalidWeights(String),

    /// An expected artifact is not on disk yet
    #[error("Missing artifact: {0}")]
    MissingArtifact(String),

    /// Persistent store failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet error
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Build a `MalformedInput` error for `path`.
    pub fn malformed(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Self::MalformedInput {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Attach `path` to a `MalformedInput` raised while parsing in-memory text.
    #[must_use]
    pub fn at_path(self, path: impl Into<PathBuf>) -> Self {
        match self {
            Self::MalformedInput { reason, .. } => Self::MalformedInput {
                path: path.into(),
                reason,
            },
            other => other,
        }
    }

    /// Whether the round should be skipped quietly (logged as a warning)
    /// rather than reported as a failure.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::MissingArtifact(_))
    }
}
