//! Attempt state machine
//!
//! ```text
//! Start -> Branched -> Patched -> BuildOk -> Committed -> Extracted
//!                              \-> BuildFailed -> Reverted
//! ```
//!
//! Every state may move to `CleanedUp`, which is terminal.

use crate::error::AttemptError;
use crate::hash::ContentHash;
use crate::workspace::BuildVerdict;
use serde::{Deserialize, Serialize};
use sqlport_patch::ResolvedRewrite;
use std::path::{Path, PathBuf};

/// Lifecycle state of a file attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    /// Nothing touched yet
    Start,
    /// Attempt branch created and checked out
    Branched,
    /// Patched content written to the working tree
    Patched,
    /// Build check passed
    BuildOk,
    /// Build check failed
    BuildFailed,
    /// Patched file committed on the attempt branch
    Committed,
    /// Commit exported as a patch artifact
    Extracted,
    /// Working-tree change discarded
    Reverted,
    /// Base branch restored and attempt branch deleted
    CleanedUp,
}

impl AttemptState {
    /// Whether no further transition is possible
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::CleanedUp)
    }
}

/// States reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: AttemptState) -> Vec<AttemptState> {
    use AttemptState::*;
    match from {
        Start => vec![Branched, CleanedUp],
        Branched => vec![Patched, CleanedUp],
        Patched => vec![BuildOk, BuildFailed, CleanedUp],
        BuildOk => vec![Committed, CleanedUp],
        BuildFailed => vec![Reverted, CleanedUp],
        Committed => vec![Extracted, CleanedUp],
        Extracted => vec![CleanedUp],
        Reverted => vec![CleanedUp],
        CleanedUp => vec![],
    }
}

/// Check a single transition
///
/// # Errors
/// Returns `AttemptError::IllegalTransition` if `to` is not reachable from `from`
pub fn validate_transition(from: AttemptState, to: AttemptState) -> Result<(), AttemptError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(AttemptError::IllegalTransition { from, to })
    }
}

/// How an attempt ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Committed and extracted as a patch
    Applied,
    /// Build failed; change discarded
    Reverted,
    /// Nothing resolved or nothing changed
    Unchanged,
    /// Aborted by an error
    Failed {
        /// Error description
        reason: String,
    },
}

/// One file-level apply/verify/commit-or-revert cycle
#[derive(Debug, Clone)]
pub struct PatchAttempt {
    seq: usize,
    file: PathBuf,
    branch_name: String,
    state: AttemptState,
    history: Vec<AttemptState>,
    branch_created: bool,
    tree_dirty: bool,
    rewrites: Vec<ResolvedRewrite>,
    rejected: usize,
    original_content: Option<String>,
    patched_content: Option<String>,
    build_result: Option<BuildVerdict>,
    commit_id: Option<String>,
    extracted_patch_path: Option<PathBuf>,
    outcome: Option<AttemptOutcome>,
}

impl PatchAttempt {
    /// New attempt in `Start`
    #[must_use]
    pub fn new(seq: usize, file: impl Into<PathBuf>, branch_name: impl Into<String>) -> Self {
        Self {
            seq,
            file: file.into(),
            branch_name: branch_name.into(),
            state: AttemptState::Start,
            history: vec![AttemptState::Start],
            branch_created: false,
            tree_dirty: false,
            rewrites: Vec::new(),
            rejected: 0,
            original_content: None,
            patched_content: None,
            build_result: None,
            commit_id: None,
            extracted_patch_path: None,
            outcome: None,
        }
    }

    /// Move to `to`
    ///
    /// # Errors
    /// Returns `AttemptError::IllegalTransition` on an invalid edge
    pub fn advance(&mut self, to: AttemptState) -> Result<(), AttemptError> {
        validate_transition(self.state, to)?;
        tracing::debug!(
            file = %self.file.display(),
            from = ?self.state,
            to = ?to,
            "attempt transition"
        );
        self.state = to;
        self.history.push(to);
        Ok(())
    }

    /// Attempt number within the run (1-based)
    #[inline]
    #[must_use]
    pub fn seq(&self) -> usize {
        self.seq
    }

    /// Target file
    #[inline]
    #[must_use]
    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Attempt branch
    #[inline]
    #[must_use]
    pub fn branch_name(&self) -> &str {
        &self.branch_name
    }

    /// Current state
    #[inline]
    #[must_use]
    pub fn state(&self) -> AttemptState {
        self.state
    }

    /// Every state visited, in order
    #[inline]
    #[must_use]
    pub fn history(&self) -> &[AttemptState] {
        &self.history
    }

    /// Rewrites resolved for this file
    #[inline]
    #[must_use]
    pub fn rewrites(&self) -> &[ResolvedRewrite] {
        &self.rewrites
    }

    /// Outcome, once decided
    #[inline]
    #[must_use]
    pub fn outcome(&self) -> Option<&AttemptOutcome> {
        self.outcome.as_ref()
    }

    /// Content before patching
    #[inline]
    #[must_use]
    pub fn original_content(&self) -> Option<&str> {
        self.original_content.as_deref()
    }

    /// Content written to the tree
    #[inline]
    #[must_use]
    pub fn patched_content(&self) -> Option<&str> {
        self.patched_content.as_deref()
    }

    /// Last build verdict
    #[inline]
    #[must_use]
    pub fn build_result(&self) -> Option<&BuildVerdict> {
        self.build_result.as_ref()
    }

    /// Commit on the attempt branch
    #[inline]
    #[must_use]
    pub fn commit_id(&self) -> Option<&str> {
        self.commit_id.as_deref()
    }

    /// Exported patch artifact
    #[inline]
    #[must_use]
    pub fn extracted_patch_path(&self) -> Option<&Path> {
        self.extracted_patch_path.as_deref()
    }

    /// Whether the attempt branch exists
    #[inline]
    #[must_use]
    pub fn branch_created(&self) -> bool {
        self.branch_created
    }

    /// Whether the target file may differ from the branch head
    #[inline]
    #[must_use]
    pub fn tree_dirty(&self) -> bool {
        self.tree_dirty
    }

    pub(crate) fn mark_branch_created(&mut self) {
        self.branch_created = true;
    }

    pub(crate) fn set_tree_dirty(&mut self, dirty: bool) {
        self.tree_dirty = dirty;
    }

    pub(crate) fn set_resolution(&mut self, rewrites: Vec<ResolvedRewrite>, rejected: usize) {
        self.rewrites = rewrites;
        self.rejected = rejected;
    }

    pub(crate) fn set_original(&mut self, content: String) {
        self.original_content = Some(content);
    }

    pub(crate) fn set_patched(&mut self, content: String) {
        self.patched_content = Some(content);
    }

    pub(crate) fn set_build_result(&mut self, verdict: BuildVerdict) {
        self.build_result = Some(verdict);
    }

    pub(crate) fn set_commit(&mut self, commit: String) {
        self.commit_id = Some(commit);
    }

    pub(crate) fn set_extracted(&mut self, path: PathBuf) {
        self.extracted_patch_path = Some(path);
    }

    pub(crate) fn finish(&mut self, outcome: AttemptOutcome) {
        self.outcome = Some(outcome);
    }

    /// Report entry for this attempt
    #[must_use]
    pub fn record(&self) -> AttemptRecord {
        AttemptRecord {
            seq: self.seq,
            file: self.file.clone(),
            branch: self.branch_name.clone(),
            states: self.history.clone(),
            outcome: self.outcome.clone().unwrap_or(AttemptOutcome::Unchanged),
            resolved: self.rewrites.len(),
            rejected: self.rejected,
            fragments: self
                .rewrites
                .iter()
                .map(|r| r.fragment.fragment_id.clone())
                .collect(),
            original_hash: self.original_content.as_deref().map(ContentHash::of_text),
            patched_hash: self.patched_content.as_deref().map(ContentHash::of_text),
            build: self.build_result.clone(),
            commit: self.commit_id.clone(),
            patch_path: self.extracted_patch_path.clone(),
        }
    }
}

/// Serializable summary of a finished attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecord {
    /// Attempt number (1-based)
    pub seq: usize,
    /// Target file
    pub file: PathBuf,
    /// Attempt branch
    pub branch: String,
    /// States visited
    pub states: Vec<AttemptState>,
    /// Final outcome
    pub outcome: AttemptOutcome,
    /// Proposals that resolved
    pub resolved: usize,
    /// Proposals that were skipped
    pub rejected: usize,
    /// Fragment ids rewritten
    pub fragments: Vec<String>,
    /// Hash of the content before patching
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_hash: Option<ContentHash>,
    /// Hash of the patched content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patched_hash: Option<ContentHash>,
    /// Build verdict
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildVerdict>,
    /// Commit id on the (deleted) attempt branch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    /// Exported patch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_path: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use AttemptState::*;

    const ALL: [AttemptState; 9] = [
        Start,
        Branched,
        Patched,
        BuildOk,
        BuildFailed,
        Committed,
        Extracted,
        Reverted,
        CleanedUp,
    ];

    #[test]
    fn every_state_can_clean_up() {
        for state in ALL.into_iter().filter(|s| !s.is_terminal()) {
            assert!(validate_transition(state, CleanedUp).is_ok(), "{state:?}");
        }
        assert!(allowed_transitions(CleanedUp).is_empty());
    }

    #[test]
    fn success_path_is_valid() {
        let mut attempt = PatchAttempt::new(1, "F.java", "sqlport/attempt-0001");
        for state in [Branched, Patched, BuildOk, Committed, Extracted, CleanedUp] {
            attempt.advance(state).unwrap();
        }
        assert_eq!(
            attempt.history(),
            &[Start, Branched, Patched, BuildOk, Committed, Extracted, CleanedUp]
        );
    }

    #[test]
    fn failure_path_is_valid() {
        let mut attempt = PatchAttempt::new(1, "F.java", "b");
        for state in [Branched, Patched, BuildFailed, Reverted, CleanedUp] {
            attempt.advance(state).unwrap();
        }
        assert!(attempt.state().is_terminal());
    }

    #[test]
    fn illegal_edges_rejected() {
        assert!(matches!(
            validate_transition(Start, Patched),
            Err(AttemptError::IllegalTransition { from: Start, to: Patched })
        ));
        assert!(validate_transition(BuildFailed, Committed).is_err());
        assert!(validate_transition(Reverted, Extracted).is_err());
        assert!(validate_transition(CleanedUp, Start).is_err());

        let mut attempt = PatchAttempt::new(1, "F.java", "b");
        assert!(attempt.advance(BuildOk).is_err());
        assert_eq!(attempt.state(), Start);
        assert_eq!(attempt.history(), &[Start]);
    }

    #[test]
    fn record_hashes_contents() {
        let mut attempt = PatchAttempt::new(2, "F.java", "b");
        attempt.set_original("old".to_string());
        attempt.set_patched("new".to_string());
        attempt.finish(AttemptOutcome::Reverted);

        let record = attempt.record();
        assert_eq!(record.seq, 2);
        assert_eq!(record.original_hash, Some(ContentHash::of_text("old")));
        assert_eq!(record.patched_hash, Some(ContentHash::of_text("new")));
        assert_eq!(record.outcome, AttemptOutcome::Reverted);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["outcome"]["kind"], "reverted");
        assert!(json.get("patchPath").is_none());
    }
}
