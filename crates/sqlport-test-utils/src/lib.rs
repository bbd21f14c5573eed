//! Testing utilities for the sqlport workspace
//!
//! Fakes for the three collaborator seams plus finding fixtures.

#![allow(missing_docs)]

mod build;
mod oracle;
mod workspace;

pub use build::{BuildCall, FullBuild, ScriptedBuildChecker};
pub use oracle::StaticOracle;
pub use workspace::{CommitRecord, InMemoryWorkspace, Op};

use sqlport_findings::{ExpressionKind, Finding, Span};
use std::path::{Path, PathBuf};

/// A SQL literal finding; `code` is the literal including its quotes
pub fn sql_finding(file: &str, method: &str, line: u32, column: u32, code: &str) -> Finding {
    finding_of_kind(file, method, line, column, code, ExpressionKind::SqlLiteral)
}

pub fn finding_of_kind(
    file: &str,
    method: &str,
    line: u32,
    column: u32,
    code: &str,
    kind: ExpressionKind,
) -> Finding {
    let span = Span::new(line, column, line, column + code.chars().count() as u32);
    Finding {
        fragment_id: Finding::synthesize_id(Path::new(file), &span),
        file_path: PathBuf::from(file),
        class_name: "Dao".to_string(),
        method_name: method.to_string(),
        span,
        code: code.to_string(),
        expression_kind: kind,
    }
}

/// One-method Java class whose line 3 calls `q(<literal>)` at column 7
pub fn java_source(literal: &str) -> String {
    format!("class Dao {{\n  void find() {{\n    q({literal});\n  }}\n}}\n")
}
