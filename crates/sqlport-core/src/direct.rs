//! Direct mode
//!
//! Applies every matched proposal to the working tree in place, with no
//! branching and no build check, and collects `diff(path)` of each changed
//! file into one combined document.

use crate::accumulator::PatchAccumulator;
use crate::controller::FileBatches;
use crate::error::{AttemptError, PipelineError};
use crate::report::FileFailure;
use crate::workspace::Workspace;
use sqlport_findings::ConversionTask;
use sqlport_patch::{PatchStrategy, ProposalMatcher, Replacement, RewriteProposal, SourcePatcher};
use std::path::{Path, PathBuf};

/// What a direct run did
#[derive(Debug, Clone, Default)]
pub struct DirectSummary {
    /// Branch the tree was on
    pub branch: String,
    /// Proposals that resolved
    pub resolved: usize,
    /// Files whose diff was collected
    pub changed_files: Vec<PathBuf>,
    /// Files that could not be processed, with the reason
    pub failures: Vec<FileFailure>,
}

/// In-place applier
pub struct DirectApplier<W> {
    workspace: W,
    matcher: ProposalMatcher,
    patcher: SourcePatcher,
}

impl<W: Workspace> DirectApplier<W> {
    /// Create applier owning `workspace`
    #[must_use]
    pub fn new(workspace: W, strategy: PatchStrategy) -> Self {
        Self {
            workspace,
            matcher: ProposalMatcher::new(),
            patcher: SourcePatcher::new(strategy),
        }
    }

    /// Give the workspace back
    #[inline]
    #[must_use]
    pub fn into_workspace(self) -> W {
        self.workspace
    }

    /// Patch every file in `batches` and collect its diff
    ///
    /// Per-file failures are logged and recorded; they do not stop the run.
    ///
    /// # Errors
    /// Returns `PipelineError::Workspace` if the current branch cannot be read
    pub async fn run(
        &mut self,
        tasks: &[ConversionTask],
        batches: &FileBatches,
        accumulator: &mut PatchAccumulator,
    ) -> Result<DirectSummary, PipelineError> {
        let mut summary = DirectSummary {
            branch: self.workspace.current_branch().await?,
            ..DirectSummary::default()
        };
        tracing::info!(branch = %summary.branch, files = batches.len(), "starting direct run");

        for (file, proposals) in batches {
            let sink_tasks: Vec<&ConversionTask> =
                tasks.iter().filter(|t| t.file_path() == file).collect();
            match self.apply_file(file, &sink_tasks, proposals).await {
                Ok((resolved, diff)) => {
                    summary.resolved += resolved;
                    if !diff.trim().is_empty() {
                        summary.changed_files.push(file.clone());
                        accumulator.push_diff(diff);
                    }
                }
                Err(e) => {
                    tracing::error!(file = %file.display(), error = %e, "direct apply failed");
                    summary.failures.push(FileFailure::new(file.clone(), e.to_string()));
                }
            }
        }
        Ok(summary)
    }

    async fn apply_file(
        &mut self,
        file: &Path,
        tasks: &[&ConversionTask],
        proposals: &[RewriteProposal],
    ) -> Result<(usize, String), AttemptError> {
        if tasks.is_empty() {
            return Err(AttemptError::OriginalTaskNotFound {
                file: file.to_path_buf(),
            });
        }
        let resolution = self.matcher.resolve_all_in(proposals, tasks);
        if resolution.is_empty() {
            return Ok((0, String::new()));
        }
        let replacements: Vec<Replacement> =
            resolution.resolved.iter().map(Replacement::from).collect();

        let original = self.workspace.read(file).await?;
        let outcome = self.patcher.apply(&original, &replacements);
        if !outcome.changed {
            return Ok((resolution.resolved.len(), String::new()));
        }
        self.workspace.write(file, &outcome.content).await?;
        let diff = self.workspace.diff(file).await?;
        Ok((resolution.resolved.len(), diff))
    }
}
