//! sqlport core
//!
//! Applies untrusted rewrite proposals to a shared working tree and keeps
//! only the ones that build.
//!
//! # Core Concepts
//!
//! - [`Workspace`]: working tree and branch pointer as one owned handle
//! - [`VerificationController`]: per-file branch → patch → build → commit-or-revert
//! - [`DirectApplier`]: in-place application producing one combined diff
//! - [`PatchAccumulator`]: numbered patch files and the run summary
//! - [`MigrationPipeline`]: findings to [`RunReport`]
//!
//! # Example
//!
//! ```rust,ignore
//! use sqlport_core::{MigrationConfig, MigrationPipeline};
//! use std::sync::Arc;
//!
//! let pipeline = MigrationPipeline::new(MigrationConfig::new(), workspace, Arc::new(checker));
//! let tasks = pipeline.load_tasks("findings.json".as_ref()).await?;
//! let report = pipeline.run_with_oracle(tasks, &oracle).await?;
//! println!("{}", report.summary);
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod accumulator;
pub mod attempt;
pub mod config;
pub mod controller;
pub mod direct;
pub mod error;
pub mod hash;
pub mod pipeline;
pub mod progress;
pub mod report;
pub mod workspace;

pub use accumulator::PatchAccumulator;
pub use attempt::{
    allowed_transitions, validate_transition, AttemptOutcome, AttemptRecord, AttemptState,
    PatchAttempt,
};
pub use config::{BuildScope, MigrationConfig, Mode};
pub use controller::{
    clean_stray_branches, ControllerSummary, FileBatches, VerificationController,
};
pub use direct::{DirectApplier, DirectSummary};
pub use error::{
    AttemptError, BuildError, ConfigError, OracleError, PipelineError, WorkspaceError,
};
pub use hash::ContentHash;
pub use pipeline::{CollectedProposals, MigrationPipeline};
pub use progress::{ProgressEvent, ProgressReceiver, ProgressSender};
pub use report::{FileFailure, RunOutcome, RunReport};
pub use workspace::{BuildChecker, BuildVerdict, RewriteOracle, Workspace};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
