//! Collaborator seams
//!
//! The pipeline talks to three external capabilities:
//!
//! - [`Workspace`]: the working tree and its branch pointer, as one handle
//! - [`BuildChecker`]: compiles a file or the whole project
//! - [`RewriteOracle`]: turns a task into rewrite proposals
//!
//! Every mutating [`Workspace`] operation takes `&mut self`. The controller
//! owns its workspace by value, so two attempts cannot interleave on one tree.

use crate::error::{BuildError, OracleError, WorkspaceError};
use serde::{Deserialize, Serialize};
use sqlport_findings::ConversionTask;
use sqlport_patch::RewriteProposal;
use std::path::{Path, PathBuf};

/// Working tree plus VCS
///
/// Paths are relative to the tree root.
#[async_trait::async_trait]
pub trait Workspace: Send + Sync {
    /// Name of the checked-out branch
    async fn current_branch(&self) -> Result<String, WorkspaceError>;

    /// Branches whose name starts with `prefix`
    async fn list_branches(&self, prefix: &str) -> Result<Vec<String>, WorkspaceError>;

    /// Create `name` pointing at `start_point` (does not check it out)
    async fn create_branch(&mut self, name: &str, start_point: &str)
        -> Result<(), WorkspaceError>;

    /// Check out an existing branch
    async fn checkout(&mut self, branch: &str) -> Result<(), WorkspaceError>;

    /// Delete a branch that is not checked out
    async fn delete_branch(&mut self, name: &str) -> Result<(), WorkspaceError>;

    /// Stage one file
    async fn stage(&mut self, path: &Path) -> Result<(), WorkspaceError>;

    /// Commit staged changes, returning the commit id
    async fn commit(&mut self, message: &str) -> Result<String, WorkspaceError>;

    /// Uncommitted changes of one file as a unified diff (empty if clean)
    async fn diff(&self, path: &Path) -> Result<String, WorkspaceError>;

    /// Render a commit as a mailbox patch inside the workspace, returning its path
    async fn format_patch(&mut self, commit: &str) -> Result<PathBuf, WorkspaceError>;

    /// Discard working-tree and staged changes of one file
    async fn revert(&mut self, path: &Path) -> Result<(), WorkspaceError>;

    /// Read file content
    async fn read(&self, path: &Path) -> Result<String, WorkspaceError>;

    /// Overwrite file content
    async fn write(&mut self, path: &Path, content: &str) -> Result<(), WorkspaceError>;

    /// Copy an artifact from the workspace to `dest` on the host
    async fn export(&mut self, artifact: &Path, dest: &Path) -> Result<(), WorkspaceError>;
}

/// Result of a build check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum BuildVerdict {
    /// Compiled cleanly
    Pass,
    /// Compilation failed
    Fail {
        /// Tool diagnostics
        output: String,
    },
}

impl BuildVerdict {
    /// Create failing verdict
    #[inline]
    #[must_use]
    pub fn fail(output: impl Into<String>) -> Self {
        Self::Fail {
            output: output.into(),
        }
    }

    /// Whether the build passed
    #[inline]
    #[must_use]
    pub fn passed(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

/// Build verification
#[async_trait::async_trait]
pub trait BuildChecker: Send + Sync {
    /// Compile exactly one file
    async fn check(&self, path: &Path) -> Result<BuildVerdict, BuildError>;

    /// Compile the whole project
    async fn check_full(&self) -> Result<BuildVerdict, BuildError>;
}

/// Rewrite oracle
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait RewriteOracle: Send + Sync {
    /// Propose rewrites for one task
    async fn propose(&self, task: &ConversionTask) -> Result<Vec<RewriteProposal>, OracleError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_serializes_tagged() {
        let pass = serde_json::to_value(BuildVerdict::Pass).unwrap();
        assert_eq!(pass["verdict"], "pass");

        let fail = serde_json::to_value(BuildVerdict::fail("F.java:3: error")).unwrap();
        assert_eq!(fail["verdict"], "fail");
        assert_eq!(fail["output"], "F.java:3: error");
        assert!(!BuildVerdict::fail("x").passed());
    }
}
