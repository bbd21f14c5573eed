//! Run report

use crate::attempt::AttemptRecord;
use crate::config::Mode;
use crate::error::PipelineError;
use crate::workspace::BuildVerdict;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use ulid::Ulid;

/// Overall result of a run that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// At least one proposal resolved; `applied_patches` may still be zero
    Completed,
    /// No proposal resolved anywhere
    NothingToDo,
}

/// A file the run could not process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileFailure {
    /// Sink file
    pub file: PathBuf,
    /// Error description
    pub reason: String,
}

impl FileFailure {
    /// Failure of `file` for `reason`
    #[must_use]
    pub fn new(file: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            reason: reason.into(),
        }
    }
}

/// Everything a run did, in serializable form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    /// Run identifier
    pub run_id: Ulid,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// End time
    pub finished_at: DateTime<Utc>,
    /// Mode the run used
    pub mode: Mode,
    /// Base branch
    pub base_branch: String,
    /// Outcome
    pub outcome: RunOutcome,
    /// Tasks built from findings
    pub tasks: usize,
    /// Tasks whose oracle call failed
    pub oracle_failures: usize,
    /// Proposals that resolved to a fragment
    pub resolved_proposals: usize,
    /// Patches produced
    pub applied_patches: usize,
    /// Per-file attempts (verified mode)
    pub attempts: Vec<AttemptRecord>,
    /// Files changed (direct mode)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changed_files: Vec<PathBuf>,
    /// Files that failed: aborted attempts, or direct-mode files that could not be patched
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FileFailure>,
    /// End-of-run full build verdict
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_build: Option<BuildVerdict>,
    /// Patch directory or combined diff, when anything was written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    /// Summary line
    pub summary: String,
}

impl RunReport {
    /// Whether the run found nothing to do
    #[inline]
    #[must_use]
    pub fn is_nothing_to_do(&self) -> bool {
        self.outcome == RunOutcome::NothingToDo
    }

    /// Write as pretty JSON, creating parent directories
    ///
    /// # Errors
    /// Returns `PipelineError::Output` if the file cannot be written
    pub async fn write_json(&self, path: &Path) -> Result<(), PipelineError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::output(parent, e))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, json)
            .await
            .map_err(|e| PipelineError::output(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> RunReport {
        let now = Utc::now();
        RunReport {
            run_id: Ulid::new(),
            started_at: now,
            finished_at: now,
            mode: Mode::Verified,
            base_branch: "main".to_string(),
            outcome: RunOutcome::NothingToDo,
            tasks: 1,
            oracle_failures: 0,
            resolved_proposals: 0,
            applied_patches: 0,
            attempts: Vec::new(),
            changed_files: Vec::new(),
            failures: Vec::new(),
            final_build: None,
            output: None,
            summary: "No patches were applied.".to_string(),
        }
    }

    #[tokio::test]
    async fn round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("report.json");
        let report = report();
        report.write_json(&path).await.unwrap();

        let text = tokio::fs::read_to_string(&path).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["outcome"], "nothing_to_do");
        assert_eq!(value["appliedPatches"], 0);
        assert!(value.get("output").is_none());
        assert!(value.get("failures").is_none());

        let decoded: RunReport = serde_json::from_str(&text).unwrap();
        assert_eq!(decoded, report);
        assert!(decoded.is_nothing_to_do());
    }

    #[test]
    fn failures_serialize_with_their_reason() {
        let mut report = report();
        report.failures = vec![FileFailure::new("src/A.java", "file not found: src/A.java")];

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["failures"][0]["file"], "src/A.java");
        assert_eq!(value["failures"][0]["reason"], "file not found: src/A.java");
    }
}
