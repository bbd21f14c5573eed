//! Error types for the verification pipeline
//!
//! Errors are layered by blast radius:
//! - [`WorkspaceError`], [`BuildError`]: infrastructure failures of a collaborator
//! - [`OracleError`]: a single task yields no proposals
//! - [`AttemptError`]: aborts one file attempt; the run continues
//! - [`PipelineError`]: aborts the run

use crate::attempt::AttemptState;
use sqlport_findings::FindingsError;
use std::path::PathBuf;

/// VCS or file I/O failure
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    /// A VCS operation failed
    #[error("{operation} failed: {message}")]
    Vcs { operation: String, message: String },

    /// File does not exist in the working tree
    #[error("file not found in working tree: {0}")]
    FileNotFound(PathBuf),

    /// Filesystem error
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl WorkspaceError {
    /// Create VCS error
    #[inline]
    pub fn vcs(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Vcs {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create I/O error
    #[inline]
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Build tool could not produce a verdict
///
/// A failing build is a [`BuildVerdict`](crate::BuildVerdict), not an error.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// Build command could not be started
    #[error("failed to launch build command '{command}': {source}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Build tool crashed or was killed
    #[error("build tool failed: {0}")]
    Tool(String),
}

/// Rewrite oracle failure for one task
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    /// Oracle could not be reached or exited abnormally
    #[error("oracle unavailable: {0}")]
    Unavailable(String),

    /// Oracle answered with something that is not a proposal list
    #[error("invalid oracle response: {0}")]
    InvalidResponse(String),
}

/// Failure that aborts a single file attempt
#[derive(Debug, thiserror::Error)]
pub enum AttemptError {
    /// No task has the attempted file as its sink
    #[error("no conversion task targets {file}")]
    OriginalTaskNotFound { file: PathBuf },

    /// State machine was driven along an edge it does not have
    #[error("illegal attempt transition {from:?} -> {to:?}")]
    IllegalTransition { from: AttemptState, to: AttemptState },

    /// VCS or file I/O failure
    #[error("workspace error: {0}")]
    Workspace(#[from] WorkspaceError),

    /// Build tool failure
    #[error("build error: {0}")]
    Build(#[from] BuildError),
}

impl AttemptError {
    /// Whether a collaborator failed (as opposed to bad input)
    #[inline]
    #[must_use]
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Self::Workspace(_) | Self::Build(_))
    }
}

/// Configuration could not be loaded
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File unreadable
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Not valid TOML for [`MigrationConfig`](crate::MigrationConfig)
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Semantically invalid value
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Failure that aborts the whole run
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Findings missing or malformed
    #[error("findings error: {0}")]
    Findings(#[from] FindingsError),

    /// Bad configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Base branch could not be restored after an attempt
    #[error("workspace corrupted: cannot return to base branch '{base}': {source}")]
    WorkspaceCorrupted {
        base: String,
        #[source]
        source: WorkspaceError,
    },

    /// Workspace unusable before any attempt started
    #[error("workspace error: {0}")]
    Workspace(#[from] WorkspaceError),

    /// Output directory or report could not be written
    #[error("cannot write output {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Report serialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    /// Create output error
    #[inline]
    pub fn output(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Output {
            path: path.into(),
            source,
        }
    }

    /// Whether the working tree may be left on an attempt branch
    #[inline]
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::WorkspaceCorrupted { .. })
    }

    /// Whether the error is caused by user input rather than the environment
    #[inline]
    #[must_use]
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::Findings(_) | Self::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_error_classification() {
        let infra = AttemptError::from(WorkspaceError::vcs("commit", "index.lock exists"));
        assert!(infra.is_infrastructure());
        assert_eq!(
            infra.to_string(),
            "workspace error: commit failed: index.lock exists"
        );

        let missing = AttemptError::OriginalTaskNotFound {
            file: PathBuf::from("src/F.java"),
        };
        assert!(!missing.is_infrastructure());
        assert_eq!(missing.to_string(), "no conversion task targets src/F.java");
    }

    #[test]
    fn pipeline_error_classification() {
        let corrupted = PipelineError::WorkspaceCorrupted {
            base: "main".to_string(),
            source: WorkspaceError::vcs("checkout", "conflict"),
        };
        assert!(corrupted.is_corruption());
        assert!(!corrupted.is_input_error());

        let findings = PipelineError::from(FindingsError::invalid(3, "empty code"));
        assert!(findings.is_input_error());
    }
}
