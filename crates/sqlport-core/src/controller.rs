//! Verification controller
//!
//! Drives one [`PatchAttempt`] per file, strictly one at a time:
//!
//! 1. create and check out an attempt branch from the base branch
//! 2. resolve proposals, patch the file, write it
//! 3. build-check the file (or the project)
//! 4. commit and export a patch, or revert
//! 5. always: revert if dirty, return to base, delete the attempt branch
//!
//! Step functions return `Result`; an error aborts the attempt but never
//! skips step 5. Only a failure to return to the base branch aborts the run.

use crate::accumulator::PatchAccumulator;
use crate::attempt::{AttemptOutcome, AttemptRecord, AttemptState, PatchAttempt};
use crate::config::{BuildScope, MigrationConfig};
use crate::error::{AttemptError, PipelineError, WorkspaceError};
use crate::progress::{Progress, ProgressEvent, ProgressSender};
use crate::report::RunOutcome;
use crate::workspace::{BuildChecker, BuildVerdict, Workspace};
use sqlport_findings::ConversionTask;
use sqlport_patch::{ProposalMatcher, Replacement, RewriteProposal, SourcePatcher};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use ulid::Ulid;

/// Proposals grouped by sink file, in file order
pub type FileBatches = BTreeMap<PathBuf, Vec<RewriteProposal>>;

/// What the controller did
#[derive(Debug, Clone, Default)]
pub struct ControllerSummary {
    /// Branch every attempt started from and returned to
    pub base_branch: String,
    /// Attempts in execution order
    pub attempts: Vec<AttemptRecord>,
    /// Proposals that resolved, across all attempts
    pub resolved: usize,
    /// Attempts that reached `Extracted`
    pub applied: usize,
    /// Patched content of every applied file, in attempt order
    pub patched: Vec<(PathBuf, String)>,
}

impl ControllerSummary {
    /// `NothingToDo` when no proposal resolved anywhere
    #[inline]
    #[must_use]
    pub fn outcome(&self) -> RunOutcome {
        if self.resolved == 0 {
            RunOutcome::NothingToDo
        } else {
            RunOutcome::Completed
        }
    }
}

enum Step {
    Next(AttemptState),
    Done(AttemptOutcome),
}

/// Branch-isolated apply, verify, commit-or-revert driver
pub struct VerificationController<W> {
    workspace: W,
    checker: Arc<dyn BuildChecker>,
    config: MigrationConfig,
    matcher: ProposalMatcher,
    patcher: SourcePatcher,
    progress: Progress,
}

impl<W: Workspace> VerificationController<W> {
    /// Create controller owning `workspace`
    #[must_use]
    pub fn new(workspace: W, checker: Arc<dyn BuildChecker>, config: MigrationConfig) -> Self {
        let patcher = SourcePatcher::new(config.patch_strategy);
        Self {
            workspace,
            checker,
            config,
            matcher: ProposalMatcher::new(),
            patcher,
            progress: Progress::default(),
        }
    }

    /// Publish progress events on `sender`
    #[must_use]
    pub fn with_progress(mut self, sender: ProgressSender) -> Self {
        self.progress = Progress::new(Some(sender));
        self
    }

    pub(crate) fn with_progress_sink(mut self, progress: Progress) -> Self {
        self.progress = progress;
        self
    }

    /// Owned workspace
    #[inline]
    #[must_use]
    pub fn workspace(&self) -> &W {
        &self.workspace
    }

    /// Give the workspace back
    #[inline]
    #[must_use]
    pub fn into_workspace(self) -> W {
        self.workspace
    }

    /// Run one attempt per file in `batches`
    ///
    /// # Errors
    /// - `PipelineError::Workspace` if the base branch cannot be determined or checked out
    /// - `PipelineError::WorkspaceCorrupted` if an attempt cannot return to base
    /// - `PipelineError::Output` if the output directory cannot be created
    pub async fn run(
        &mut self,
        tasks: &[ConversionTask],
        batches: &FileBatches,
        accumulator: &mut PatchAccumulator,
    ) -> Result<ControllerSummary, PipelineError> {
        let base = match &self.config.base_branch {
            Some(branch) => branch.clone(),
            None => self.workspace.current_branch().await?,
        };
        self.workspace.checkout(&base).await?;
        accumulator.prepare().await?;

        let run_tag = Ulid::new().to_string().to_lowercase();
        tracing::info!(base = %base, files = batches.len(), "starting verified run");

        let mut summary = ControllerSummary {
            base_branch: base.clone(),
            ..ControllerSummary::default()
        };

        for (index, (file, proposals)) in batches.iter().enumerate() {
            let seq = index + 1;
            let branch = format!("{}/attempt-{seq:04}-{run_tag}", self.config.branch_prefix);
            let mut attempt = PatchAttempt::new(seq, file.clone(), branch);
            tracing::info!(
                seq,
                file = %file.display(),
                branch = attempt.branch_name(),
                proposals = proposals.len(),
                "attempt started"
            );
            self.progress.emit(ProgressEvent::AttemptStarted {
                seq,
                file: file.clone(),
            });

            let sink_tasks: Vec<&ConversionTask> =
                tasks.iter().filter(|t| t.file_path() == file).collect();

            if let Err(e) = self
                .drive(&mut attempt, &base, &sink_tasks, proposals, accumulator)
                .await
            {
                if e.is_infrastructure() {
                    tracing::error!(seq, file = %file.display(), error = %e, "attempt aborted");
                } else {
                    tracing::warn!(seq, file = %file.display(), error = %e, "attempt aborted");
                }
                attempt.finish(AttemptOutcome::Failed {
                    reason: e.to_string(),
                });
            }

            self.cleanup(&mut attempt, &base).await?;

            summary.resolved += attempt.rewrites().len();
            let outcome = attempt.outcome().cloned().unwrap_or(AttemptOutcome::Unchanged);
            if outcome == AttemptOutcome::Applied {
                summary.applied += 1;
                if let Some(content) = attempt.patched_content() {
                    summary.patched.push((file.clone(), content.to_string()));
                }
            }
            tracing::info!(seq, file = %file.display(), outcome = ?outcome, "attempt finished");
            self.progress.emit(ProgressEvent::AttemptFinished {
                seq,
                file: file.clone(),
                outcome,
            });
            summary.attempts.push(attempt.record());
        }

        tracing::info!(
            applied = summary.applied,
            resolved = summary.resolved,
            attempts = summary.attempts.len(),
            "verified run finished"
        );
        Ok(summary)
    }

    /// Build the whole project once with every applied patch in place
    ///
    /// Attempt branches are deleted as the run goes, so the base branch never
    /// holds the patches. This check creates a throwaway `<prefix>/final-*`
    /// branch from the base, writes the patched content of each applied file,
    /// runs the full build there, then discards the changes and returns to the
    /// base. Returns `None` when the build could not run.
    ///
    /// # Errors
    /// Returns `PipelineError::WorkspaceCorrupted` if the base branch cannot be restored
    pub async fn final_check(
        &mut self,
        summary: &ControllerSummary,
    ) -> Result<Option<BuildVerdict>, PipelineError> {
        let base = summary.base_branch.as_str();
        let branch = format!(
            "{}/final-{}",
            self.config.branch_prefix,
            Ulid::new().to_string().to_lowercase()
        );
        tracing::info!(branch = %branch, files = summary.patched.len(), "final full build");

        let mut created = false;
        let verdict = match self
            .build_combined(&branch, base, &summary.patched, &mut created)
            .await
        {
            Ok(verdict) => {
                if verdict.passed() {
                    tracing::info!("final full build passed");
                } else {
                    tracing::warn!("final full build failed");
                }
                Some(verdict)
            }
            Err(e) => {
                tracing::error!(error = %e, "final full build could not run");
                None
            }
        };

        if created {
            for (file, _) in &summary.patched {
                if let Err(e) = self.workspace.revert(file).await {
                    tracing::error!(file = %file.display(), error = %e, "final check revert failed");
                }
            }
        }
        if let Err(source) = self.workspace.checkout(base).await {
            tracing::error!(base, error = %source, "cannot return to base branch");
            return Err(PipelineError::WorkspaceCorrupted {
                base: base.to_string(),
                source,
            });
        }
        if created {
            if let Err(e) = self.workspace.delete_branch(&branch).await {
                tracing::warn!(branch = %branch, error = %e, "final check branch left behind");
            }
        }
        Ok(verdict)
    }

    async fn build_combined(
        &mut self,
        branch: &str,
        base: &str,
        patched: &[(PathBuf, String)],
        created: &mut bool,
    ) -> Result<BuildVerdict, AttemptError> {
        self.workspace.create_branch(branch, base).await?;
        *created = true;
        self.workspace.checkout(branch).await?;
        for (file, content) in patched {
            self.workspace.write(file, content).await?;
        }
        Ok(self.checker.check_full().await?)
    }

    async fn drive(
        &mut self,
        attempt: &mut PatchAttempt,
        base: &str,
        tasks: &[&ConversionTask],
        proposals: &[RewriteProposal],
        accumulator: &mut PatchAccumulator,
    ) -> Result<(), AttemptError> {
        loop {
            let step = match attempt.state() {
                AttemptState::Start => self.branch(attempt, base).await?,
                AttemptState::Branched => self.patch(attempt, tasks, proposals).await?,
                AttemptState::Patched => self.verify(attempt).await?,
                AttemptState::BuildOk => self.commit(attempt).await?,
                AttemptState::Committed => self.extract(attempt, accumulator).await?,
                AttemptState::BuildFailed => self.revert(attempt).await?,
                AttemptState::Extracted | AttemptState::Reverted | AttemptState::CleanedUp => {
                    return Ok(())
                }
            };
            match step {
                Step::Next(state) => self.transition(attempt, state)?,
                Step::Done(outcome) => {
                    attempt.finish(outcome);
                    return Ok(());
                }
            }
        }
    }

    fn transition(
        &self,
        attempt: &mut PatchAttempt,
        state: AttemptState,
    ) -> Result<(), AttemptError> {
        attempt.advance(state)?;
        self.progress.emit(ProgressEvent::StateChanged {
            seq: attempt.seq(),
            state,
        });
        Ok(())
    }

    async fn branch(&mut self, attempt: &mut PatchAttempt, base: &str) -> Result<Step, AttemptError> {
        let branch = attempt.branch_name().to_string();
        self.workspace.create_branch(&branch, base).await?;
        attempt.mark_branch_created();
        self.workspace.checkout(&branch).await?;
        Ok(Step::Next(AttemptState::Branched))
    }

    async fn patch(
        &mut self,
        attempt: &mut PatchAttempt,
        tasks: &[&ConversionTask],
        proposals: &[RewriteProposal],
    ) -> Result<Step, AttemptError> {
        let file = attempt.file().to_path_buf();
        if tasks.is_empty() {
            return Err(AttemptError::OriginalTaskNotFound { file });
        }

        let resolution = self.matcher.resolve_all_in(proposals, tasks);
        let rejected = resolution.rejected.len();
        if resolution.is_empty() {
            attempt.set_resolution(Vec::new(), rejected);
            tracing::info!(file = %file.display(), rejected, "no resolvable proposals");
            return Ok(Step::Done(AttemptOutcome::Unchanged));
        }
        let replacements: Vec<Replacement> =
            resolution.resolved.iter().map(Replacement::from).collect();
        attempt.set_resolution(resolution.resolved, rejected);

        let original = self.workspace.read(&file).await?;
        let outcome = self.patcher.apply(&original, &replacements);
        attempt.set_original(original);
        if !outcome.changed {
            tracing::info!(file = %file.display(), "proposals produce no change");
            return Ok(Step::Done(AttemptOutcome::Unchanged));
        }

        attempt.set_tree_dirty(true);
        self.workspace.write(&file, &outcome.content).await?;
        attempt.set_patched(outcome.content);
        Ok(Step::Next(AttemptState::Patched))
    }

    async fn verify(&mut self, attempt: &mut PatchAttempt) -> Result<Step, AttemptError> {
        let verdict = match self.config.build_scope {
            BuildScope::File => self.checker.check(attempt.file()).await?,
            BuildScope::Project => self.checker.check_full().await?,
        };
        let next = if verdict.passed() {
            AttemptState::BuildOk
        } else {
            tracing::warn!(file = %attempt.file().display(), "build failed; reverting");
            AttemptState::BuildFailed
        };
        attempt.set_build_result(verdict);
        Ok(Step::Next(next))
    }

    async fn commit(&mut self, attempt: &mut PatchAttempt) -> Result<Step, AttemptError> {
        let file = attempt.file().to_path_buf();
        self.workspace.stage(&file).await?;
        let message = commit_message(&self.config.commit_prefix, attempt);
        let commit = self.workspace.commit(&message).await?;
        attempt.set_tree_dirty(false);
        attempt.set_commit(commit);
        Ok(Step::Next(AttemptState::Committed))
    }

    async fn extract(
        &mut self,
        attempt: &mut PatchAttempt,
        accumulator: &mut PatchAccumulator,
    ) -> Result<Step, AttemptError> {
        let Some(commit) = attempt.commit_id().map(str::to_owned) else {
            return Err(WorkspaceError::vcs("format-patch", "no commit recorded for attempt").into());
        };
        let artifact = self.workspace.format_patch(&commit).await?;
        let dest = accumulator.next_patch_path(attempt.file());
        self.workspace.export(&artifact, &dest).await?;
        accumulator.record_patch(dest.clone());
        attempt.set_extracted(dest);
        attempt.finish(AttemptOutcome::Applied);
        Ok(Step::Next(AttemptState::Extracted))
    }

    async fn revert(&mut self, attempt: &mut PatchAttempt) -> Result<Step, AttemptError> {
        self.workspace.revert(attempt.file()).await?;
        attempt.set_tree_dirty(false);
        attempt.finish(AttemptOutcome::Reverted);
        Ok(Step::Next(AttemptState::Reverted))
    }

    async fn cleanup(&mut self, attempt: &mut PatchAttempt, base: &str) -> Result<(), PipelineError> {
        let file = attempt.file().to_path_buf();
        if attempt.tree_dirty() {
            match self.workspace.revert(&file).await {
                Ok(()) => attempt.set_tree_dirty(false),
                Err(e) => {
                    tracing::error!(file = %file.display(), error = %e, "cleanup revert failed")
                }
            }
        }

        if let Err(source) = self.workspace.checkout(base).await {
            tracing::error!(base, error = %source, "cannot return to base branch");
            return Err(PipelineError::WorkspaceCorrupted {
                base: base.to_string(),
                source,
            });
        }

        if attempt.branch_created() {
            let branch = attempt.branch_name().to_string();
            if let Err(e) = self.workspace.delete_branch(&branch).await {
                tracing::warn!(branch = %branch, error = %e, "attempt branch left behind");
            }
        }

        if let Err(e) = self.transition(attempt, AttemptState::CleanedUp) {
            tracing::debug!(error = %e, "attempt already cleaned up");
        }
        Ok(())
    }
}

/// Return to `base` and delete every `<prefix>/` branch left by an interrupted run
///
/// # Errors
/// Returns `WorkspaceError` if `base` cannot be checked out or a branch
/// cannot be listed or deleted
pub async fn clean_stray_branches<W: Workspace>(
    workspace: &mut W,
    prefix: &str,
    base: &str,
) -> Result<Vec<String>, WorkspaceError> {
    workspace.checkout(base).await?;
    let pattern = format!("{prefix}/");
    let stray = workspace.list_branches(&pattern).await?;
    for branch in &stray {
        workspace.delete_branch(branch).await?;
        tracing::info!(branch = %branch, "deleted stray attempt branch");
    }
    Ok(stray)
}

fn commit_message(prefix: &str, attempt: &PatchAttempt) -> String {
    let mut message = format!("{prefix}: {}\n\n", attempt.file().display());
    let _ = writeln!(message, "Rewrote {} fragment(s).", attempt.rewrites().len());
    for rewrite in attempt.rewrites() {
        let explanation = rewrite.explanation.split_whitespace().collect::<Vec<_>>().join(" ");
        let _ = write!(message, "\n- {} [{}]", rewrite.block_id, rewrite.task_key);
        if !explanation.is_empty() {
            let _ = write!(message, ": {explanation}");
        }
    }
    message.push('\n');
    message
}
