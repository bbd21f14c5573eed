//! Rewrite proposals
//!
//! Oracle output is untrusted. Raw JSON is validated into a
//! [`RewriteProposal`] whose [`ProposalTarget`] is either an exact location
//! or a fragment identifier, never both and never neither. When the oracle
//! supplies both, the location wins.

use crate::error::ProposalError;
use serde::{Deserialize, Serialize};
use sqlport_findings::Span;
use std::fmt::{self, Display, Formatter};

/// What a proposal claims to rewrite
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProposalTarget {
    /// Exact `(startLine, startColumn, endLine, endColumn)` of the fragment
    Location(Span),
    /// Block identifier or analyzer fragment id
    Block(String),
}

impl Display for ProposalTarget {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Location(span) => write!(f, "location {span}"),
            Self::Block(id) => write!(f, "block {id}"),
        }
    }
}

/// A candidate replacement for one original fragment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawProposal", into = "RawProposal")]
pub struct RewriteProposal {
    /// Fragment the proposal targets
    pub target: ProposalTarget,
    /// Replacement text
    pub converted_code: String,
    /// Oracle's justification, carried into the commit message
    pub explanation: String,
}

impl RewriteProposal {
    /// Proposal addressed by location
    #[must_use]
    pub fn at_location(span: Span, converted: impl Into<String>) -> Self {
        Self {
            target: ProposalTarget::Location(span),
            converted_code: converted.into(),
            explanation: String::new(),
        }
    }

    /// Proposal addressed by block identifier
    #[must_use]
    pub fn for_block(id: impl Into<String>, converted: impl Into<String>) -> Self {
        Self {
            target: ProposalTarget::Block(id.into()),
            converted_code: converted.into(),
            explanation: String::new(),
        }
    }

    /// With explanation
    #[inline]
    #[must_use]
    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = explanation.into();
        self
    }
}

/// Wire form of a proposal
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProposal {
    #[serde(
        default,
        alias = "blockId",
        alias = "fragmentId",
        alias = "id",
        skip_serializing_if = "Option::is_none"
    )]
    target_fragment_id: Option<String>,
    #[serde(default, alias = "location", skip_serializing_if = "Option::is_none")]
    target_location: Option<Span>,
    #[serde(alias = "converted")]
    converted_code: String,
    #[serde(default)]
    explanation: String,
}

impl TryFrom<RawProposal> for RewriteProposal {
    type Error = ProposalError;

    fn try_from(raw: RawProposal) -> Result<Self, Self::Error> {
        let target = match (raw.target_location, raw.target_fragment_id) {
            (Some(span), _) => ProposalTarget::Location(span),
            (None, Some(id)) if !id.trim().is_empty() => ProposalTarget::Block(id),
            _ => return Err(ProposalError::MissingTarget),
        };
        Ok(Self {
            target,
            converted_code: raw.converted_code,
            explanation: raw.explanation,
        })
    }
}

impl From<RewriteProposal> for RawProposal {
    fn from(proposal: RewriteProposal) -> Self {
        let (target_location, target_fragment_id) = match proposal.target {
            ProposalTarget::Location(span) => (Some(span), None),
            ProposalTarget::Block(id) => (None, Some(id)),
        };
        Self {
            target_fragment_id,
            target_location,
            converted_code: proposal.converted_code,
            explanation: proposal.explanation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_location_proposal() {
        let json = r#"{
            "targetLocation": {"startLine": 10, "startColumn": 1, "endLine": 10, "endColumn": 40},
            "convertedCode": "SELECT * FROM T LIMIT 5",
            "explanation": "FETCH FIRST n ROWS ONLY -> LIMIT n"
        }"#;
        let proposal: RewriteProposal = serde_json::from_str(json).unwrap();
        assert_eq!(proposal.target, ProposalTarget::Location(Span::new(10, 1, 10, 40)));
        assert_eq!(proposal.converted_code, "SELECT * FROM T LIMIT 5");
    }

    #[test]
    fn parses_block_alias() {
        let json = r#"{"blockId": "M_L10", "converted": "SELECT 1"}"#;
        let proposal: RewriteProposal = serde_json::from_str(json).unwrap();
        assert_eq!(proposal.target, ProposalTarget::Block("M_L10".to_string()));
        assert_eq!(proposal.explanation, "");
    }

    #[test]
    fn location_wins_over_id() {
        let json = r#"{
            "blockId": "M_L10",
            "location": {"startLine": 3, "startColumn": 2, "endLine": 3, "endColumn": 9},
            "convertedCode": "x"
        }"#;
        let proposal: RewriteProposal = serde_json::from_str(json).unwrap();
        assert!(matches!(proposal.target, ProposalTarget::Location(_)));
    }

    #[test]
    fn rejects_missing_target() {
        let json = r#"{"convertedCode": "SELECT 1"}"#;
        let err = serde_json::from_str::<RewriteProposal>(json).unwrap_err();
        assert!(err.to_string().contains("neither a target location"));

        let blank = r#"{"blockId": "  ", "convertedCode": "SELECT 1"}"#;
        assert!(serde_json::from_str::<RewriteProposal>(blank).is_err());
    }

    #[test]
    fn serializes_back_to_wire_form() {
        let proposal = RewriteProposal::for_block("M_L10", "SELECT 1").with_explanation("why");
        let json = serde_json::to_value(&proposal).unwrap();
        assert_eq!(json["targetFragmentId"], "M_L10");
        assert!(json.get("targetLocation").is_none());
        assert_eq!(json["explanation"], "why");
    }

    #[test]
    fn target_display() {
        assert_eq!(ProposalTarget::Block("X".into()).to_string(), "block X");
        assert_eq!(
            ProposalTarget::Location(Span::new(1, 2, 3, 4)).to_string(),
            "location 1:2-3:4"
        );
    }
}
