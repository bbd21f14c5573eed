//! sqlport patch
//!
//! Validates untrusted rewrite proposals and applies them to source text.
//!
//! # Core Concepts
//!
//! - [`RewriteProposal`]: oracle output, validated into a tagged [`ProposalTarget`]
//! - [`ProposalMatcher`]: resolves a proposal to exactly one task fragment
//! - [`SourcePatcher`]: replaces matched fragments in file content
//!
//! # Example
//!
//! ```rust,ignore
//! use sqlport_patch::{ProposalMatcher, Replacement, SourcePatcher, PatchStrategy};
//!
//! let resolution = ProposalMatcher::new().resolve_all(&proposals, &task);
//! let replacements: Vec<Replacement> = resolution.resolved.iter().map(Replacement::from).collect();
//! let outcome = SourcePatcher::new(PatchStrategy::Substring).apply(&content, &replacements);
//! if outcome.changed {
//!     write(path, outcome.content)?;
//! }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod error;
pub mod matcher;
pub mod patcher;
pub mod proposal;

pub use error::{MatchError, ProposalError};
pub use matcher::{ProposalMatcher, Resolution, ResolvedRewrite};
pub use patcher::{
    normalize_line_endings, LineEnding, PatchOutcome, PatchStrategy, Replacement, SourcePatcher,
};
pub use proposal::{ProposalTarget, RewriteProposal};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
