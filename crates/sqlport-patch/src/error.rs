//! Error types for proposal validation and matching
//!
//! All of these are per-proposal: the offending proposal is skipped and the
//! rest of the run proceeds.

use crate::proposal::ProposalTarget;
use sqlport_findings::ExpressionKind;

/// Proposal failed structural validation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProposalError {
    /// Neither a location nor an identifier was supplied
    #[error("proposal has neither a target location nor a target fragment id")]
    MissingTarget,
}

/// Proposal could not be resolved to a task fragment
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatchError {
    /// No fragment at the referenced location / with the referenced id
    #[error("unresolved proposal: no fragment matches {target}")]
    UnresolvedProposal { target: ProposalTarget },

    /// Proposal rewrites a fragment that must be preserved verbatim
    #[error("fragment {block_id} is {kind:?} and must not be rewritten")]
    IncompatibleFragmentKind {
        block_id: String,
        kind: ExpressionKind,
    },

    /// Proposal converts a fragment to nothing
    #[error("proposal for {block_id} has empty converted code")]
    EmptyConversion { block_id: String },

    /// An earlier proposal in the same batch already claimed this fragment
    #[error("fragment {block_id} already targeted by an earlier proposal")]
    DuplicateTarget { block_id: String },
}

impl MatchError {
    /// Create unresolved error
    #[inline]
    pub fn unresolved(target: ProposalTarget) -> Self {
        Self::UnresolvedProposal { target }
    }
}
