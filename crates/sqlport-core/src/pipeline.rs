//! End-to-end migration run
//!
//! findings → tasks → oracle → proposals → verified or direct application
//! → report.

use crate::accumulator::PatchAccumulator;
use crate::attempt::AttemptOutcome;
use crate::config::{MigrationConfig, Mode};
use crate::controller::{FileBatches, VerificationController};
use crate::direct::DirectApplier;
use crate::error::PipelineError;
use crate::progress::{Progress, ProgressEvent, ProgressSender};
use crate::report::{FileFailure, RunOutcome, RunReport};
use crate::workspace::{BuildChecker, BuildVerdict, RewriteOracle, Workspace};
use chrono::Utc;
use sqlport_findings::{ConversionTask, Finding, FindingNormalizer, TaskBuilder};
use std::path::Path;
use std::sync::Arc;
use ulid::Ulid;

/// Proposals collected from an oracle
#[derive(Debug, Clone, Default)]
pub struct CollectedProposals {
    /// Proposals grouped by sink file
    pub batches: FileBatches,
    /// Tasks whose oracle call failed
    pub oracle_failures: usize,
}

/// Migration pipeline over one working tree
pub struct MigrationPipeline<W> {
    config: MigrationConfig,
    workspace: W,
    checker: Arc<dyn BuildChecker>,
    progress: Progress,
}

impl<W: Workspace> MigrationPipeline<W> {
    /// Create pipeline
    #[must_use]
    pub fn new(config: MigrationConfig, workspace: W, checker: Arc<dyn BuildChecker>) -> Self {
        Self {
            config,
            workspace,
            checker,
            progress: Progress::default(),
        }
    }

    /// Publish progress events on `sender`
    #[must_use]
    pub fn with_progress(mut self, sender: ProgressSender) -> Self {
        self.progress = Progress::new(Some(sender));
        self
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Group findings into tasks at the configured granularity
    #[must_use]
    pub fn build_tasks(&self, findings: Vec<Finding>) -> Vec<ConversionTask> {
        let tasks = TaskBuilder::new(self.config.granularity).build(findings);
        tracing::info!(tasks = tasks.len(), granularity = ?self.config.granularity, "built tasks");
        tasks
    }

    /// Load a findings file and build tasks
    ///
    /// # Errors
    /// Returns `PipelineError::Findings` if the file is missing or malformed
    pub async fn load_tasks(&self, findings: &Path) -> Result<Vec<ConversionTask>, PipelineError> {
        let findings = FindingNormalizer::new().load(findings).await?;
        Ok(self.build_tasks(findings))
    }

    /// Ask the oracle about every task
    ///
    /// A failing task is logged and contributes no proposals.
    pub async fn collect_proposals(
        &self,
        tasks: &[ConversionTask],
        oracle: &dyn RewriteOracle,
    ) -> CollectedProposals {
        let mut collected = CollectedProposals::default();
        for task in tasks {
            match oracle.propose(task).await {
                Ok(proposals) => {
                    tracing::debug!(task = %task.key(), proposals = proposals.len(), "oracle answered");
                    if !proposals.is_empty() {
                        collected
                            .batches
                            .entry(task.file_path().to_path_buf())
                            .or_default()
                            .extend(proposals);
                    }
                }
                Err(e) => {
                    tracing::warn!(task = %task.key(), error = %e, "oracle failed; skipping task");
                    collected.oracle_failures += 1;
                    self.progress.emit(ProgressEvent::OracleFailed {
                        task: task.key().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        collected
    }

    /// Run with proposals from an oracle
    ///
    /// # Errors
    /// See [`MigrationPipeline::run_with_proposals`]
    pub async fn run_with_oracle(
        self,
        tasks: Vec<ConversionTask>,
        oracle: &dyn RewriteOracle,
    ) -> Result<RunReport, PipelineError> {
        let collected = self.collect_proposals(&tasks, oracle).await;
        self.execute(tasks, collected).await
    }

    /// Run with proposals already grouped by file
    ///
    /// # Errors
    /// - `PipelineError::WorkspaceCorrupted` if the base branch cannot be restored
    /// - `PipelineError::Workspace` / `Output` if the run cannot start or write output
    pub async fn run_with_proposals(
        self,
        tasks: Vec<ConversionTask>,
        batches: FileBatches,
    ) -> Result<RunReport, PipelineError> {
        self.execute(
            tasks,
            CollectedProposals {
                batches,
                oracle_failures: 0,
            },
        )
        .await
    }

    async fn execute(
        self,
        tasks: Vec<ConversionTask>,
        collected: CollectedProposals,
    ) -> Result<RunReport, PipelineError> {
        let run_id = Ulid::new();
        let started_at = Utc::now();
        let Self {
            config,
            workspace,
            checker,
            progress,
        } = self;

        tracing::info!(
            run = %run_id,
            mode = ?config.mode,
            tasks = tasks.len(),
            files = collected.batches.len(),
            "migration run started"
        );
        progress.emit(ProgressEvent::RunStarted {
            tasks: tasks.len(),
            files: collected.batches.len(),
        });

        let (accumulator, base_branch, resolved, attempts, changed_files, failures, final_build) =
            match config.mode {
                Mode::Verified => {
                    let mut accumulator = PatchAccumulator::new(&config.output_dir);
                    let mut controller = VerificationController::new(
                        workspace,
                        Arc::clone(&checker),
                        config.clone(),
                    )
                    .with_progress_sink(progress.clone());
                    let summary = controller
                        .run(&tasks, &collected.batches, &mut accumulator)
                        .await?;
                    let final_build = if config.final_full_check {
                        controller.final_check(&summary).await?
                    } else {
                        None
                    };
                    let failures = summary
                        .attempts
                        .iter()
                        .filter_map(|record| match &record.outcome {
                            AttemptOutcome::Failed { reason } => {
                                Some(FileFailure::new(record.file.clone(), reason.clone()))
                            }
                            _ => None,
                        })
                        .collect();
                    (
                        accumulator,
                        summary.base_branch,
                        summary.resolved,
                        summary.attempts,
                        Vec::new(),
                        failures,
                        final_build,
                    )
                }
                Mode::Direct => {
                    let mut accumulator =
                        PatchAccumulator::combined(&config.output_dir, &config.combined_patch_name);
                    let mut applier = DirectApplier::new(workspace, config.patch_strategy);
                    let summary = applier
                        .run(&tasks, &collected.batches, &mut accumulator)
                        .await?;
                    accumulator.finish().await?;
                    // the patched files are still in the working tree
                    let final_build = if config.final_full_check {
                        final_check(checker.as_ref()).await
                    } else {
                        None
                    };
                    (
                        accumulator,
                        summary.branch,
                        summary.resolved,
                        Vec::new(),
                        summary.changed_files,
                        summary.failures,
                        final_build,
                    )
                }
            };

        let outcome = if resolved == 0 {
            RunOutcome::NothingToDo
        } else {
            RunOutcome::Completed
        };
        let applied = accumulator.applied();
        let summary = accumulator.summary();
        tracing::info!(outcome = ?outcome, applied, "{summary}");
        progress.emit(ProgressEvent::RunFinished { outcome, applied });

        Ok(RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            mode: config.mode,
            base_branch,
            outcome,
            tasks: tasks.len(),
            oracle_failures: collected.oracle_failures,
            resolved_proposals: resolved,
            applied_patches: applied,
            attempts,
            changed_files,
            failures,
            final_build,
            output: (applied > 0).then(|| accumulator.output_path()),
            summary,
        })
    }
}

/// Full build of the working tree as it stands; `None` if the build could not run
///
/// Direct mode only: verified runs restore the base tree after each attempt
/// and use [`VerificationController::final_check`] instead.
async fn final_check(checker: &dyn BuildChecker) -> Option<BuildVerdict> {
    match checker.check_full().await {
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
    }
}
