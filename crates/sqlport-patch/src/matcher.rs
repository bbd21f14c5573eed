//! Proposal matcher
//!
//! Resolves each proposal back to the exact fragment of the task it was
//! generated from. Location tuples are matched exactly; identifiers are
//! matched by string equality against block ids, then fragment ids.
//! Failures are per-proposal and never abort the batch.

use crate::error::MatchError;
use crate::proposal::{ProposalTarget, RewriteProposal};
use serde::Serialize;
use sqlport_findings::{Block, ConversionTask, Finding, TaskKey};
use std::collections::HashSet;

/// A proposal bound to the fragment it rewrites
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedRewrite {
    /// Task the fragment belongs to
    pub task_key: TaskKey,
    /// Block identifier within the task
    pub block_id: String,
    /// Original fragment
    pub fragment: Finding,
    /// Replacement text
    pub converted_code: String,
    /// Oracle explanation
    pub explanation: String,
}

impl ResolvedRewrite {
    /// Whether the rewrite leaves the fragment unchanged
    #[inline]
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.fragment.code == self.converted_code
    }
}

/// Outcome of resolving a batch of proposals against one task
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Proposals bound to fragments, in source order
    pub resolved: Vec<ResolvedRewrite>,
    /// Proposals that were skipped, with the reason
    pub rejected: Vec<(RewriteProposal, MatchError)>,
}

impl Resolution {
    /// Whether nothing resolved
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }
}

/// Resolves proposals to task fragments
#[derive(Debug, Clone, Copy, Default)]
pub struct ProposalMatcher;

impl ProposalMatcher {
    /// Create matcher
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Resolve a single proposal
    ///
    /// # Errors
    /// - `MatchError::UnresolvedProposal` if no fragment matches
    /// - `MatchError::IncompatibleFragmentKind` if a lookup key would change
    /// - `MatchError::EmptyConversion` if the replacement is blank
    pub fn resolve(
        &self,
        proposal: &RewriteProposal,
        task: &ConversionTask,
    ) -> Result<ResolvedRewrite, MatchError> {
        let block = Self::locate(&proposal.target, task)
            .ok_or_else(|| MatchError::unresolved(proposal.target.clone()))?;

        let finding = &block.finding;
        if !finding.expression_kind.is_rewritable()
            && finding.code.trim() != proposal.converted_code.trim()
        {
            return Err(MatchError::IncompatibleFragmentKind {
                block_id: block.id.clone(),
                kind: finding.expression_kind,
            });
        }
        if proposal.converted_code.trim().is_empty() {
            return Err(MatchError::EmptyConversion {
                block_id: block.id.clone(),
            });
        }

        Ok(ResolvedRewrite {
            task_key: task.key().clone(),
            block_id: block.id.clone(),
            fragment: finding.clone(),
            converted_code: proposal.converted_code.clone(),
            explanation: proposal.explanation.clone(),
        })
    }

    /// Resolve a batch of proposals, skipping (and logging) failures
    ///
    /// The first proposal to claim a fragment wins; later ones are rejected
    /// as duplicates. Resolved rewrites are returned in source order.
    #[must_use]
    pub fn resolve_all(&self, proposals: &[RewriteProposal], task: &ConversionTask) -> Resolution {
        self.resolve_all_in(proposals, &[task])
    }

    /// Resolve a batch of proposals against every task sharing one sink file
    ///
    /// Each proposal binds to the first task that accepts it. When no task
    /// does, a kind or content rejection is preferred over "unresolved".
    #[must_use]
    pub fn resolve_all_in(
        &self,
        proposals: &[RewriteProposal],
        tasks: &[&ConversionTask],
    ) -> Resolution {
        let mut resolution = Resolution::default();
        let mut claimed: HashSet<(TaskKey, String)> = HashSet::new();

        for proposal in proposals {
            let result = self.resolve_first(proposal, tasks).and_then(|rewrite| {
                if claimed.insert((rewrite.task_key.clone(), rewrite.block_id.clone())) {
                    Ok(rewrite)
                } else {
                    Err(MatchError::DuplicateTarget {
                        block_id: rewrite.block_id,
                    })
                }
            });
            match result {
                Ok(rewrite) => resolution.resolved.push(rewrite),
                Err(e) => {
                    let file = tasks.first().map(|t| t.file_path().display().to_string());
                    tracing::warn!(file = ?file, error = %e, "skipping proposal");
                    resolution.rejected.push((proposal.clone(), e));
                }
            }
        }

        resolution.resolved.sort_by_key(|r| r.fragment.span);
        resolution
    }

    fn resolve_first(
        &self,
        proposal: &RewriteProposal,
        tasks: &[&ConversionTask],
    ) -> Result<ResolvedRewrite, MatchError> {
        let mut rejection = None;
        for task in tasks {
            match self.resolve(proposal, task) {
                Ok(rewrite) => return Ok(rewrite),
                Err(MatchError::UnresolvedProposal { .. }) => {}
                Err(e) => {
                    rejection.get_or_insert(e);
                }
            }
        }
        Err(rejection.unwrap_or_else(|| MatchError::unresolved(proposal.target.clone())))
    }

    fn locate<'t>(target: &ProposalTarget, task: &'t ConversionTask) -> Option<&'t Block> {
        match target {
            ProposalTarget::Location(span) => task.block_at(span),
            ProposalTarget::Block(id) => task.block_by_id(id),
        }
    }
}
