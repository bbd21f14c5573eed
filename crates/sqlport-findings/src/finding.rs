//! Normalized analyzer findings
//!
//! A [`Finding`] is immutable once the normalizer has produced it. Lines and
//! columns are 1-based, as reported by the analyzer.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;

/// Source location of a fragment
///
/// Ordering is `(start_line, start_column, end_line, end_column)`, which is
/// the fragment order used everywhere downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    /// First line (1-based)
    pub start_line: u32,
    /// First column (1-based)
    pub start_column: u32,
    /// Last line (1-based)
    pub end_line: u32,
    /// Column just past the fragment on the last line
    pub end_column: u32,
}

impl Span {
    /// Create a span
    #[inline]
    #[must_use]
    pub const fn new(start_line: u32, start_column: u32, end_line: u32, end_column: u32) -> Self {
        Self {
            start_line,
            start_column,
            end_line,
            end_column,
        }
    }

    /// Start position as `(line, column)`
    #[inline]
    #[must_use]
    pub const fn start(&self) -> (u32, u32) {
        (self.start_line, self.start_column)
    }
}

impl Display for Span {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}-{}:{}",
            self.start_line, self.start_column, self.end_line, self.end_column
        )
    }
}

/// What kind of expression the analyzer captured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpressionKind {
    /// String literal carrying SQL text
    SqlLiteral,
    /// Non-SQL identifier-like string (e.g. `orders.query.byId`); preserved verbatim
    LookupKey,
    /// Any other SQL-constructing expression (concatenation, builder call)
    Expression,
}

impl ExpressionKind {
    /// Parse an analyzer-provided kind label
    ///
    /// Returns `None` for labels the normalizer should classify itself.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "sql" | "literal" | "sql_literal" | "string_literal" | "stringliteral" => {
                Some(Self::SqlLiteral)
            }
            "lookup_key" | "lookupkey" | "key" | "identifier" | "property_key" => {
                Some(Self::LookupKey)
            }
            "expression" | "expr" | "concat" | "binary" | "method_call" => Some(Self::Expression),
            _ => None,
        }
    }

    /// Whether fragments of this kind may be rewritten
    #[inline]
    #[must_use]
    pub const fn is_rewritable(&self) -> bool {
        !matches!(self, Self::LookupKey)
    }

    /// Stable label used in prompts and reports
    #[inline]
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::SqlLiteral => "sql_literal",
            Self::LookupKey => "lookup_key",
            Self::Expression => "expression",
        }
    }
}

/// A single SQL-bearing source fragment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    /// Stable identifier (analyzer-provided or synthesized from the location)
    pub fragment_id: String,
    /// File containing the fragment, relative to the working tree root
    pub file_path: PathBuf,
    /// Enclosing class (may be empty for top-level code)
    pub class_name: String,
    /// Enclosing method (may be empty for field initializers)
    pub method_name: String,
    /// Location of the fragment
    #[serde(flatten)]
    pub span: Span,
    /// Fragment text exactly as captured
    pub code: String,
    /// Fragment classification
    pub expression_kind: ExpressionKind,
}

impl Finding {
    /// Synthesized fragment id for a location
    #[must_use]
    pub fn synthesize_id(file_path: &std::path::Path, span: &Span) -> String {
        format!("{}@{}", file_path.display(), span)
    }

    /// `Class.method`, or just the method when the class is unknown
    #[must_use]
    pub fn method_identity(&self) -> String {
        match (self.class_name.is_empty(), self.method_name.is_empty()) {
            (true, _) => self.method_name.clone(),
            (false, true) => self.class_name.clone(),
            (false, false) => format!("{}.{}", self.class_name, self.method_name),
        }
    }

    /// Fragment text with one pair of surrounding double quotes removed
    ///
    /// Approximates the runtime string a literal contributes to the query.
    #[must_use]
    pub fn sql_text(&self) -> &str {
        let trimmed = self.code.trim();
        if self.expression_kind == ExpressionKind::SqlLiteral
            && trimmed.len() >= 2
            && trimmed.starts_with('"')
            && trimmed.ends_with('"')
        {
            &trimmed[1..trimmed.len() - 1]
        } else {
            trimmed
        }
    }
}
