//! Finding normalizer
//!
//! Analyzer output arrives as a JSON array (optionally wrapped in a
//! `{"findings": [...]}` object) whose elements are records, CodeQL
//! method results or positional tuples:
//!
//! ```text
//! { "filePath": "F.java", "methodName": "m", "startLine": 10, "code": "..." }
//! { "file": "F.java", "class": "Dao", "method": { "name": "m", "start_line": 8,
//!   "sql_query": { "type": "static", "query_string": "...", "line_start": 10 } } }
//! [ "F.java", "Dao", "m", 10, 5, 10, 44, "...", "sql_literal" ]
//! ```
//!
//! A raw CodeQL `bqrs` export, `{"#select": {"tuples": [["<json>"], ...]}}`,
//! is also accepted: the first column of each tuple is itself a JSON
//! finding. Tuples whose column does not parse are logged and skipped.
//!
//! Records accept the short aliases `file`, `class`, `method`, `line`,
//! `column` and `kind`. Missing end positions are derived from the code.

use crate::error::FindingsError;
use crate::finding::{ExpressionKind, Finding, Span};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

static LOOKUP_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z0-9_\-]+)+$").expect("static regex")
});

static SQL_KEYWORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(select|insert|update|delete|merge|values|fetch|with|call|from)\b")
        .expect("static regex")
});

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDocument {
    Bare(Vec<RawFinding>),
    Wrapped {
        findings: Vec<RawFinding>,
    },
    Select {
        #[serde(rename = "#select")]
        select: RawSelect,
    },
}

#[derive(Debug, Deserialize)]
struct RawSelect {
    tuples: Vec<Vec<serde_json::Value>>,
}

impl RawSelect {
    /// Second-stage parse of the stringified finding in column 0
    fn into_findings(self) -> Vec<RawFinding> {
        let mut findings = Vec::with_capacity(self.tuples.len());
        for (row, tuple) in self.tuples.into_iter().enumerate() {
            let Some(column) = tuple.into_iter().next() else {
                continue;
            };
            let parsed = match column {
                serde_json::Value::String(text) => serde_json::from_str::<RawFinding>(&text),
                other => serde_json::from_value::<RawFinding>(other),
            };
            match parsed {
                Ok(finding) => findings.push(finding),
                Err(e) => tracing::warn!(row, error = %e, "skipping unparsable CodeQL tuple"),
            }
        }
        findings
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawFinding {
    Record(RawRecord),
    CodeQl(RawCodeQlResult),
    Tuple(String, String, String, u32, u32, u32, u32, String, String),
    ShortTuple(String, String, String, u32, u32, u32, u32, String),
}

/// One CodeQL method result
#[derive(Debug, Deserialize)]
struct RawCodeQlResult {
    file: PathBuf,
    #[serde(default)]
    class: Option<String>,
    method: RawMethod,
}

#[derive(Debug, Deserialize)]
struct RawMethod {
    name: String,
    #[serde(default, alias = "startLine")]
    start_line: Option<u32>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default, alias = "sqlQuery")]
    sql_query: Option<RawSqlQuery>,
}

#[derive(Debug, Deserialize)]
struct RawSqlQuery {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(alias = "queryString")]
    query_string: String,
    #[serde(default, alias = "lineStart")]
    line_start: Option<u32>,
    #[serde(default, alias = "lineEnd")]
    line_end: Option<u32>,
}

impl From<RawCodeQlResult> for RawRecord {
    fn from(raw: RawCodeQlResult) -> Self {
        let RawMethod {
            name,
            start_line,
            body,
            sql_query,
        } = raw.method;
        let (code, line, end_line, kind) = match sql_query {
            Some(q) => (
                q.query_string,
                q.line_start.or(start_line),
                q.line_end,
                q.kind,
            ),
            None => (body.unwrap_or_default(), start_line, None, None),
        };
        Self {
            file_path: raw.file,
            class_name: raw.class,
            method_name: Some(name),
            start_line: line.unwrap_or_default(),
            end_line,
            code,
            expression_kind: kind,
            ..Self::default()
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRecord {
    #[serde(default, alias = "id")]
    fragment_id: Option<String>,
    #[serde(alias = "file", alias = "path")]
    file_path: PathBuf,
    #[serde(default, alias = "class")]
    class_name: Option<String>,
    #[serde(default, alias = "method")]
    method_name: Option<String>,
    #[serde(alias = "line")]
    start_line: u32,
    #[serde(default, alias = "column", alias = "col")]
    start_column: Option<u32>,
    #[serde(default)]
    end_line: Option<u32>,
    #[serde(default)]
    end_column: Option<u32>,
    code: String,
    #[serde(default, alias = "kind")]
    expression_kind: Option<String>,
}

impl From<RawFinding> for RawRecord {
    fn from(raw: RawFinding) -> Self {
        match raw {
            RawFinding::Record(record) => record,
            RawFinding::CodeQl(result) => result.into(),
            RawFinding::Tuple(file, class, method, sl, sc, el, ec, code, kind) => Self {
                file_path: PathBuf::from(file),
                class_name: Some(class),
                method_name: Some(method),
                start_line: sl,
                start_column: Some(sc),
                end_line: Some(el),
                end_column: Some(ec),
                code,
                expression_kind: Some(kind),
                ..Self::default()
            },
            RawFinding::ShortTuple(file, class, method, sl, sc, el, ec, code) => Self {
                file_path: PathBuf::from(file),
                class_name: Some(class),
                method_name: Some(method),
                start_line: sl,
                start_column: Some(sc),
                end_line: Some(el),
                end_column: Some(ec),
                code,
                ..Self::default()
            },
        }
    }
}

/// Normalizes raw analyzer output into [`Finding`]s
///
/// Output preserves input order; exact-location duplicates are dropped
/// (first occurrence wins).
#[derive(Debug, Clone, Default)]
pub struct FindingNormalizer {
    strip_prefix: Option<PathBuf>,
}

impl FindingNormalizer {
    /// Create normalizer
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Strip an absolute analyzer root from reported paths
    #[inline]
    #[must_use]
    pub fn with_strip_prefix(mut self, prefix: impl Into<PathBuf>) -> Self {
        self.strip_prefix = Some(prefix.into());
        self
    }

    /// Read and normalize a findings file
    ///
    /// # Errors
    /// - `FindingsError::Io` if the file cannot be read
    /// - `FindingsError::Malformed` / `InvalidFinding` on bad content
    pub async fn load(&self, path: impl AsRef<Path>) -> Result<Vec<Finding>, FindingsError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| FindingsError::io_error(path, e))?;
        let findings = self.normalize_str(&text)?;
        tracing::info!(path = %path.display(), count = findings.len(), "loaded findings");
        Ok(findings)
    }

    /// Normalize an in-memory findings document
    ///
    /// # Errors
    /// Returns error if the document or any record is unusable
    pub fn normalize_str(&self, text: &str) -> Result<Vec<Finding>, FindingsError> {
        let raw = match serde_json::from_str::<RawDocument>(text)? {
            RawDocument::Bare(items) | RawDocument::Wrapped { findings: items } => items,
            RawDocument::Select { select } => select.into_findings(),
        };

        let mut seen = HashSet::new();
        let mut findings = Vec::with_capacity(raw.len());
        for (index, item) in raw.into_iter().enumerate() {
            let finding = self.normalize_record(index, item.into())?;
            if seen.insert((finding.file_path.clone(), finding.span)) {
                findings.push(finding);
            } else {
                tracing::debug!(
                    file = %finding.file_path.display(),
                    span = %finding.span,
                    "dropping duplicate finding"
                );
            }
        }
        Ok(findings)
    }

    fn normalize_record(&self, index: usize, raw: RawRecord) -> Result<Finding, FindingsError> {
        if raw.code.trim().is_empty() {
            return Err(FindingsError::invalid(index, "empty code"));
        }
        if raw.start_line == 0 {
            return Err(FindingsError::invalid(index, "line numbers are 1-based"));
        }

        let file_path = self.relativize(raw.file_path);
        if file_path.as_os_str().is_empty() {
            return Err(FindingsError::invalid(index, "empty file path"));
        }

        let start_column = raw.start_column.unwrap_or(1).max(1);
        let (derived_end_line, derived_end_column) =
            derive_end(raw.start_line, start_column, &raw.code);
        let span = Span::new(
            raw.start_line,
            start_column,
            raw.end_line.unwrap_or(derived_end_line),
            raw.end_column.unwrap_or(derived_end_column),
        );
        if (span.end_line, span.end_column) < span.start() {
            return Err(FindingsError::invalid(
                index,
                format!("end precedes start ({span})"),
            ));
        }

        let expression_kind = raw
            .expression_kind
            .as_deref()
            .and_then(ExpressionKind::from_label)
            .unwrap_or_else(|| classify(&raw.code));

        let fragment_id = raw
            .fragment_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Finding::synthesize_id(&file_path, &span));

        Ok(Finding {
            fragment_id,
            file_path,
            class_name: raw.class_name.unwrap_or_default(),
            method_name: raw.method_name.unwrap_or_default(),
            span,
            code: raw.code,
            expression_kind,
        })
    }

    fn relativize(&self, path: PathBuf) -> PathBuf {
        let stripped = self
            .strip_prefix
            .as_ref()
            .and_then(|prefix| path.strip_prefix(prefix).ok())
            .map(Path::to_path_buf);
        stripped.unwrap_or(path)
    }
}

/// End position implied by the captured code
fn derive_end(start_line: u32, start_column: u32, code: &str) -> (u32, u32) {
    let normalized = code.replace("\r\n", "\n").replace('\r', "\n");
    let mut lines = normalized.split('\n');
    let first = lines.next().unwrap_or_default();
    let rest: Vec<&str> = lines.collect();
    match rest.last() {
        None => (start_line, start_column.saturating_add(count_u32(first.chars().count()))),
        Some(last) => (
            start_line.saturating_add(count_u32(rest.len())),
            count_u32(last.chars().count()).saturating_add(1),
        ),
    }
}

fn count_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

/// Classify a fragment the analyzer did not label
fn classify(code: &str) -> ExpressionKind {
    let unquoted = code.trim().trim_matches('"');
    if LOOKUP_KEY.is_match(unquoted) {
        ExpressionKind::LookupKey
    } else if code.trim_start().starts_with('"') || SQL_KEYWORD.is_match(code) {
        ExpressionKind::SqlLiteral
    } else {
        ExpressionKind::Expression
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn normalizes_short_record_aliases() {
        let text = r#"[{"file":"F.java","method":"m","line":10,"code":"SELECT * FROM T FETCH FIRST 5 ROWS ONLY"}]"#;
        let findings = FindingNormalizer::new().normalize_str(text).unwrap();

        assert_eq!(findings.len(), 1);
        let f = &findings[0];
        assert_eq!(f.file_path, PathBuf::from("F.java"));
        assert_eq!(f.method_name, "m");
        assert_eq!(f.class_name, "");
        assert_eq!(f.span, Span::new(10, 1, 10, 40));
        assert_eq!(f.expression_kind, ExpressionKind::SqlLiteral);
        assert_eq!(f.fragment_id, "F.java@10:1-10:40");
    }

    #[test]
    fn normalizes_tuples() {
        let text = r#"[
            ["A.java", "Dao", "find", 3, 9, 3, 30, "\"SELECT 1 FROM SYSIBM.SYSDUMMY1\"", "literal"],
            ["A.java", "Dao", "key", 7, 20, 7, 40, "\"orders.query.byId\""]
        ]"#;
        let findings = FindingNormalizer::new().normalize_str(text).unwrap();

        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].class_name, "Dao");
        assert_eq!(findings[0].span, Span::new(3, 9, 3, 30));
        assert_eq!(findings[0].expression_kind, ExpressionKind::SqlLiteral);
        assert_eq!(findings[1].expression_kind, ExpressionKind::LookupKey);
    }

    #[test]
    fn accepts_wrapped_document() {
        let text = r#"{"findings":[{"filePath":"B.java","startLine":2,"code":"a + b","kind":"concat"}]}"#;
        let findings = FindingNormalizer::new().normalize_str(text).unwrap();
        assert_eq!(findings[0].expression_kind, ExpressionKind::Expression);
    }

    #[test]
    fn normalizes_codeql_method_results() {
        let text = r#"[{
            "file": "src/OrderDao.java",
            "class": "OrderDao",
            "method": {
                "name": "findRecent",
                "start_line": 40,
                "end_line": 52,
                "body": "{ ... }",
                "sql_query": {
                    "type": "static",
                    "query_string": "\"SELECT * FROM ORDERS FETCH FIRST 10 ROWS ONLY\"",
                    "line_start": 44,
                    "line_end": 44
                }
            }
        }]"#;
        let findings = FindingNormalizer::new().normalize_str(text).unwrap();

        assert_eq!(findings.len(), 1);
        let f = &findings[0];
        assert_eq!(f.file_path, PathBuf::from("src/OrderDao.java"));
        assert_eq!(f.class_name, "OrderDao");
        assert_eq!(f.method_name, "findRecent");
        assert_eq!(f.span.start_line, 44);
        assert_eq!(f.span.end_line, 44);
        assert_eq!(f.code, "\"SELECT * FROM ORDERS FETCH FIRST 10 ROWS ONLY\"");
        assert_eq!(f.expression_kind, ExpressionKind::SqlLiteral);
    }

    #[test]
    fn codeql_camel_case_query_fields() {
        let text = r#"[{"file":"A.java","class":"A","method":{"name":"m",
            "sql_query":{"type":"dynamic","queryString":"\"SELECT 1\"","lineStart":7,"lineEnd":7}}}]"#;
        let findings = FindingNormalizer::new().normalize_str(text).unwrap();
        assert_eq!(findings[0].span.start_line, 7);
        assert_eq!(findings[0].method_name, "m");
    }

    #[test]
    fn unwraps_codeql_select_tuples() {
        let inner = serde_json::json!({
            "file": "src/Dao.java",
            "class": "Dao",
            "method": {
                "name": "find",
                "start_line": 2,
                "sql_query": {"type": "static", "query_string": "\"SELECT 1\"", "line_start": 3}
            }
        })
        .to_string();
        let record = r#"{"file":"src/Keys.java","line":5,"code":"\"orders.by.id\""}"#;
        let doc = serde_json::json!({
            "#select": {
                "columns": [{"kind": "String"}],
                "tuples": [[inner], ["{not json"], [], [record]]
            }
        })
        .to_string();

        let findings = FindingNormalizer::new().normalize_str(&doc).unwrap();

        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].file_path, PathBuf::from("src/Dao.java"));
        assert_eq!(findings[0].method_name, "find");
        assert_eq!(findings[0].span.start_line, 3);
        assert_eq!(findings[1].expression_kind, ExpressionKind::LookupKey);
    }

    #[test]
    fn derived_end_saturates() {
        assert_eq!(derive_end(u32::MAX, u32::MAX - 1, "abcdef"), (u32::MAX, u32::MAX));
        assert_eq!(derive_end(u32::MAX, 1, "a\nb"), (u32::MAX, 2));
    }

    #[test]
    fn keeps_analyzer_fragment_id() {
        let text = r#"[{"fragmentId":"frag-7","file":"F.java","line":1,"code":"SELECT 1"}]"#;
        let findings = FindingNormalizer::new().normalize_str(text).unwrap();
        assert_eq!(findings[0].fragment_id, "frag-7");
    }

    #[test]
    fn derives_multiline_end() {
        let text = r#"[{"file":"F.java","line":4,"column":12,"code":"\"SELECT *\r\n FROM T\""}]"#;
        let findings = FindingNormalizer::new().normalize_str(text).unwrap();
        assert_eq!(findings[0].span, Span::new(4, 12, 5, 9));
    }

    #[test]
    fn drops_duplicate_locations() {
        let text = r#"[
            {"file":"F.java","line":1,"code":"SELECT 1"},
            {"file":"F.java","line":1,"code":"SELECT 1"}
        ]"#;
        let findings = FindingNormalizer::new().normalize_str(text).unwrap();
        assert_eq!(findings.len(), 1);
    }

    #[test]
    fn strips_analyzer_root() {
        let text = r#"[{"file":"/work/src/F.java","line":1,"code":"SELECT 1"}]"#;
        let findings = FindingNormalizer::new()
            .with_strip_prefix("/work")
            .normalize_str(text)
            .unwrap();
        assert_eq!(findings[0].file_path, PathBuf::from("src/F.java"));
    }

    #[test]
    fn rejects_empty_code() {
        let text = r#"[{"file":"F.java","line":1,"code":"   "}]"#;
        let err = FindingsError::invalid(0, "empty code").to_string();
        let result = FindingNormalizer::new().normalize_str(text);
        assert_eq!(result.unwrap_err().to_string(), err);
    }

    #[test]
    fn rejects_zero_line() {
        let text = r#"[{"file":"F.java","line":0,"code":"SELECT 1"}]"#;
        assert!(matches!(
            FindingNormalizer::new().normalize_str(text),
            Err(FindingsError::InvalidFinding { index: 0, .. })
        ));
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(matches!(
            FindingNormalizer::new().normalize_str("{not json"),
            Err(FindingsError::Malformed(_))
        ));
        assert!(matches!(
            FindingNormalizer::new().normalize_str(r#"[{"line": 3}]"#),
            Err(FindingsError::Malformed(_))
        ));
    }

    #[test]
    fn classify_heuristics() {
        assert_eq!(classify("\"app.sql.findUser\""), ExpressionKind::LookupKey);
        assert_eq!(classify("\"SELECT 1\""), ExpressionKind::SqlLiteral);
        assert_eq!(classify("select x from y"), ExpressionKind::SqlLiteral);
        assert_eq!(classify("base + suffix"), ExpressionKind::Expression);
    }

    #[tokio::test]
    async fn load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = FindingNormalizer::new()
            .load(dir.path().join("absent.json"))
            .await;
        assert!(matches!(result, Err(FindingsError::Io { .. })));
    }

    #[tokio::test]
    async fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("findings.json");
        std::fs::write(&path, r#"[{"file":"F.java","line":1,"code":"SELECT 1"}]"#).unwrap();
        let findings = FindingNormalizer::new().load(&path).await.unwrap();
        assert_eq!(findings.len(), 1);
    }
}
