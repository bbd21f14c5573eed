//! Error types for finding ingestion
//!
//! Every variant here is an input error: the run aborts before any
//! attempt touches the working tree.

use std::path::PathBuf;

/// Errors while loading or normalizing analyzer output
#[derive(Debug, thiserror::Error)]
pub enum FindingsError {
    /// Findings file could not be read
    #[error("io error reading findings {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Findings document is not valid JSON or has an unknown shape
    #[error("malformed findings document: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A single record is structurally valid JSON but semantically unusable
    #[error("invalid finding #{index}: {reason}")]
    InvalidFinding { index: usize, reason: String },
}

impl FindingsError {
    /// Create IO error for path
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create invalid-record error
    pub fn invalid(index: usize, reason: impl Into<String>) -> Self {
        Self::InvalidFinding {
            index,
            reason: reason.into(),
        }
    }
}
