//! Conversion task construction
//!
//! Groups findings into [`ConversionTask`]s. Within a task, fragments are
//! always ordered ascending by `(start_line, start_column)`; block
//! identifiers are assigned in that order, so identical input always yields
//! identical tasks, identifiers and prompts.

use crate::finding::{Finding, Span};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Display, Formatter, Write as _};
use std::path::{Path, PathBuf};

/// Grouping granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// One task per `file + method`; fragments form a single logical query
    #[default]
    Method,
    /// One task per file, subdivided into `Class.method` units
    File,
}

impl std::str::FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "method" => Ok(Self::Method),
            "file" => Ok(Self::File),
            other => Err(format!("unknown granularity '{other}' (expected method|file)")),
        }
    }
}

/// Task grouping key
///
/// Ordering (file first, then method) fixes the order tasks are emitted in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskKey {
    /// Sink file
    pub file_path: PathBuf,
    /// `Class.method` identity; `None` for file granularity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

impl TaskKey {
    /// Key for a whole file
    #[inline]
    #[must_use]
    pub fn file(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
            method: None,
        }
    }

    /// Key for a method within a file
    #[inline]
    #[must_use]
    pub fn method(file_path: impl Into<PathBuf>, method: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            method: Some(method.into()),
        }
    }
}

impl Display for TaskKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.method {
            Some(method) => write!(f, "{}#{}", self.file_path.display(), method),
            None => write!(f, "{}", self.file_path.display()),
        }
    }
}

/// A fragment with its block identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// Identifier unique within the task (e.g. `FINDUSER_L42`)
    pub id: String,
    /// The original fragment
    pub finding: Finding,
}

/// Nested unit of a file-granularity task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskUnit {
    /// `Class.method`
    pub name: String,
    /// Block ids in source order
    pub block_ids: Vec<String>,
}

/// Unit of work sent to the rewrite oracle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionTask {
    key: TaskKey,
    blocks: Vec<Block>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    units: Vec<TaskUnit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inferred_aggregate_text: Option<String>,
}

impl ConversionTask {
    /// Grouping key
    #[inline]
    #[must_use]
    pub fn key(&self) -> &TaskKey {
        &self.key
    }

    /// Sink file of this task
    #[inline]
    #[must_use]
    pub fn file_path(&self) -> &Path {
        &self.key.file_path
    }

    /// Blocks in source order
    #[inline]
    #[must_use]
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Fragments in source order
    pub fn ordered_fragments(&self) -> impl Iterator<Item = &Finding> {
        self.blocks.iter().map(|b| &b.finding)
    }

    /// Nested `Class.method` units (file granularity only)
    #[inline]
    #[must_use]
    pub fn units(&self) -> &[TaskUnit] {
        &self.units
    }

    /// Approximated runtime SQL (method granularity only)
    #[inline]
    #[must_use]
    pub fn inferred_aggregate_text(&self) -> Option<&str> {
        self.inferred_aggregate_text.as_deref()
    }

    /// Number of fragments
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether the task has no fragments
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Block whose fragment sits exactly at `span`
    #[must_use]
    pub fn block_at(&self, span: &Span) -> Option<&Block> {
        self.blocks.iter().find(|b| b.finding.span == *span)
    }

    /// Block by block identifier, falling back to the analyzer fragment id
    #[must_use]
    pub fn block_by_id(&self, id: &str) -> Option<&Block> {
        self.blocks
            .iter()
            .find(|b| b.id == id)
            .or_else(|| self.blocks.iter().find(|b| b.finding.fragment_id == id))
    }

    /// Deterministic oracle prompt for this task
    #[must_use]
    pub fn render_prompt(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "TASK {}", self.key);
        let _ = writeln!(
            out,
            "Rewrite each DB2 SQL block below as PostgreSQL. Reference blocks by id or by location. \
             Blocks of kind lookup_key must be returned unchanged."
        );
        for block in &self.blocks {
            let f = &block.finding;
            let _ = writeln!(out);
            let _ = writeln!(
                out,
                "[{}] kind={} location={} method={}",
                block.id,
                f.expression_kind.label(),
                f.span,
                f.method_identity()
            );
            let _ = writeln!(out, "{}", f.code);
        }
        if let Some(aggregate) = &self.inferred_aggregate_text {
            let _ = writeln!(out);
            let _ = writeln!(out, "AGGREGATE SQL: {aggregate}");
        }
        out
    }
}

/// Groups findings into conversion tasks
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskBuilder {
    granularity: Granularity,
}

impl TaskBuilder {
    /// Create builder for a granularity
    #[inline]
    #[must_use]
    pub fn new(granularity: Granularity) -> Self {
        Self { granularity }
    }

    /// Configured granularity
    #[inline]
    #[must_use]
    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// Build tasks, ordered ascending by [`TaskKey`]
    #[must_use]
    pub fn build(&self, findings: impl IntoIterator<Item = Finding>) -> Vec<ConversionTask> {
        let mut groups: BTreeMap<TaskKey, Vec<Finding>> = BTreeMap::new();
        for finding in findings {
            let key = match self.granularity {
                Granularity::Method => {
                    TaskKey::method(finding.file_path.clone(), finding.method_identity())
                }
                Granularity::File => TaskKey::file(finding.file_path.clone()),
            };
            groups.entry(key).or_default().push(finding);
        }

        let tasks: Vec<ConversionTask> = groups
            .into_iter()
            .map(|(key, fragments)| self.build_task(key, fragments))
            .collect();
        tracing::debug!(
            granularity = ?self.granularity,
            tasks = tasks.len(),
            "built conversion tasks"
        );
        tasks
    }

    fn build_task(&self, key: TaskKey, mut fragments: Vec<Finding>) -> ConversionTask {
        // Fragment id breaks exact span ties so the order never depends on input order.
        fragments.sort_by(|a, b| {
            a.span
                .cmp(&b.span)
                .then_with(|| a.fragment_id.cmp(&b.fragment_id))
        });

        let ids = assign_block_ids(&fragments);
        let blocks: Vec<Block> = ids
            .into_iter()
            .zip(fragments)
            .map(|(id, finding)| Block { id, finding })
            .collect();

        match self.granularity {
            Granularity::Method => {
                let aggregate = blocks
                    .iter()
                    .map(|b| b.finding.sql_text())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
                    .join(" ")
                    .trim()
                    .to_string();
                ConversionTask {
                    key,
                    blocks,
                    units: Vec::new(),
                    inferred_aggregate_text: Some(aggregate),
                }
            }
            Granularity::File => {
                let mut units: BTreeMap<String, Vec<String>> = BTreeMap::new();
                for block in &blocks {
                    let name = format!("{}.{}", block.finding.class_name, block.finding.method_name);
                    units.entry(name).or_default().push(block.id.clone());
                }
                ConversionTask {
                    key,
                    blocks,
                    units: units
                        .into_iter()
                        .map(|(name, block_ids)| TaskUnit { name, block_ids })
                        .collect(),
                    inferred_aggregate_text: None,
                }
            }
        }
    }
}

/// `METHOD_L<line>`, disambiguated with `_C<col>` and then an ordinal on collision
fn assign_block_ids(sorted: &[Finding]) -> Vec<String> {
    let base: Vec<String> = sorted
        .iter()
        .map(|f| format!("{}_L{}", block_prefix(&f.method_name), f.span.start_line))
        .collect();
    let with_column = disambiguate(&base, |i, id| format!("{id}_C{}", sorted[i].span.start_column));
    let mut ordinal: HashMap<String, usize> = HashMap::new();
    disambiguate(&with_column, |_, id| {
        let n = ordinal.entry(id.to_string()).or_insert(0);
        *n += 1;
        format!("{id}_{n}")
    })
}

fn disambiguate(ids: &[String], mut suffix: impl FnMut(usize, &str) -> String) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for id in ids {
        *counts.entry(id.as_str()).or_insert(0) += 1;
    }
    ids.iter()
        .enumerate()
        .map(|(i, id)| {
            if counts[id.as_str()] > 1 {
                suffix(i, id)
            } else {
                id.clone()
            }
        })
        .collect()
}

fn block_prefix(method_name: &str) -> String {
    let prefix: String = method_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    if prefix.is_empty() {
        "FRAGMENT".to_string()
    } else {
        prefix
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::ExpressionKind;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn finding(file: &str, class: &str, method: &str, line: u32, col: u32, code: &str) -> Finding {
        let span = Span::new(line, col, line, col + code.len() as u32);
        Finding {
            fragment_id: Finding::synthesize_id(Path::new(file), &span),
            file_path: PathBuf::from(file),
            class_name: class.to_string(),
            method_name: method.to_string(),
            span,
            code: code.to_string(),
            expression_kind: ExpressionKind::SqlLiteral,
        }
    }

    #[test]
    fn scenario_single_finding_single_task() {
        let tasks = TaskBuilder::new(Granularity::Method).build(vec![finding(
            "F.java",
            "",
            "m",
            10,
            1,
            "SELECT * FROM T FETCH FIRST 5 ROWS ONLY",
        )]);

        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].key(), &TaskKey::method("F.java", "m"));
        assert_eq!(tasks[0].len(), 1);
        assert_eq!(tasks[0].blocks()[0].id, "M_L10");
        assert_eq!(
            tasks[0].inferred_aggregate_text(),
            Some("SELECT * FROM T FETCH FIRST 5 ROWS ONLY")
        );
    }

    #[test]
    fn method_granularity_aggregates_in_source_order() {
        let tasks = TaskBuilder::new(Granularity::Method).build(vec![
            finding("A.java", "Dao", "find", 12, 9, "\"WHERE ID = ?\""),
            finding("A.java", "Dao", "find", 11, 9, "\"SELECT * FROM T \""),
        ]);

        assert_eq!(tasks.len(), 1);
        assert_eq!(
            tasks[0].inferred_aggregate_text(),
            Some("SELECT * FROM T  WHERE ID = ?")
        );
        let ids: Vec<_> = tasks[0].blocks().iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["FIND_L11", "FIND_L12"]);
    }

    #[test]
    fn method_granularity_splits_methods() {
        let tasks = TaskBuilder::new(Granularity::Method).build(vec![
            finding("A.java", "Dao", "save", 30, 1, "INSERT INTO T VALUES (1)"),
            finding("A.java", "Dao", "find", 10, 1, "SELECT 1"),
            finding("B.java", "Repo", "all", 5, 1, "SELECT 2"),
        ]);

        let keys: Vec<String> = tasks.iter().map(|t| t.key().to_string()).collect();
        assert_eq!(keys, vec!["A.java#Dao.find", "A.java#Dao.save", "B.java#Repo.all"]);
    }

    #[test]
    fn file_granularity_builds_units_without_aggregate() {
        let tasks = TaskBuilder::new(Granularity::File).build(vec![
            finding("A.java", "Dao", "save", 30, 1, "INSERT INTO T VALUES (1)"),
            finding("A.java", "Dao", "find", 10, 1, "SELECT 1"),
            finding("A.java", "Dao", "find", 11, 1, "SELECT 2"),
        ]);

        assert_eq!(tasks.len(), 1);
        let task = &tasks[0];
        assert_eq!(task.key(), &TaskKey::file("A.java"));
        assert_eq!(task.inferred_aggregate_text(), None);
        assert_eq!(
            task.units(),
            &[
                TaskUnit {
                    name: "Dao.find".to_string(),
                    block_ids: vec!["FIND_L10".to_string(), "FIND_L11".to_string()],
                },
                TaskUnit {
                    name: "Dao.save".to_string(),
                    block_ids: vec!["SAVE_L30".to_string()],
                },
            ]
        );
    }

    #[test]
    fn colliding_block_ids_get_column_suffix() {
        let tasks = TaskBuilder::new(Granularity::Method).build(vec![
            finding("A.java", "Dao", "find", 10, 40, "\"FROM T\""),
            finding("A.java", "Dao", "find", 10, 9, "\"SELECT *\""),
            finding("A.java", "Dao", "find", 11, 9, "\"WHERE 1=1\""),
        ]);

        let ids: Vec<_> = tasks[0].blocks().iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["FIND_L10_C9", "FIND_L10_C40", "FIND_L11"]);
    }

    #[test]
    fn identical_start_gets_ordinal_suffix() {
        let mut a = finding("A.java", "Dao", "find", 10, 9, "\"SELECT\"");
        let mut b = finding("A.java", "Dao", "find", 10, 9, "\"SELECT\"");
        a.span.end_column = 20;
        b.span.end_column = 30;
        let tasks = TaskBuilder::new(Granularity::Method).build(vec![b, a]);

        let ids: Vec<_> = tasks[0].blocks().iter().map(|x| x.id.as_str()).collect();
        assert_eq!(ids, vec!["FIND_L10_C9_1", "FIND_L10_C9_2"]);
    }

    #[test]
    fn block_lookup_by_span_and_id() {
        let tasks = TaskBuilder::new(Granularity::Method)
            .build(vec![finding("A.java", "Dao", "find", 10, 9, "SELECT 1")]);
        let task = &tasks[0];
        let span = task.blocks()[0].finding.span;
        let fragment_id = task.blocks()[0].finding.fragment_id.clone();

        assert!(task.block_at(&span).is_some());
        assert!(task.block_at(&Span::new(99, 1, 99, 2)).is_none());
        assert_eq!(task.block_by_id("FIND_L10").map(|b| b.finding.span), Some(span));
        assert!(task.block_by_id(&fragment_id).is_some());
        assert!(task.block_by_id("NOPE").is_none());
    }

    #[test]
    fn empty_method_name_prefix() {
        assert_eq!(block_prefix(""), "FRAGMENT");
        assert_eq!(block_prefix("find$1"), "FIND_1");
    }

    #[test]
    fn granularity_parses() {
        assert_eq!("FILE".parse::<Granularity>(), Ok(Granularity::File));
        assert!("class".parse::<Granularity>().is_err());
    }

    #[test]
    fn prompt_is_deterministic_and_lists_blocks() {
        let input = vec![
            finding("A.java", "Dao", "find", 12, 9, "\"WHERE ID = ?\""),
            finding("A.java", "Dao", "find", 11, 9, "\"SELECT * FROM T \""),
        ];
        let mut reversed = input.clone();
        reversed.reverse();

        let p1 = TaskBuilder::new(Granularity::Method).build(input)[0].render_prompt();
        let p2 = TaskBuilder::new(Granularity::Method).build(reversed)[0].render_prompt();

        assert_eq!(p1, p2);
        assert!(p1.starts_with("TASK A.java#Dao.find\n"));
        assert!(p1.find("[FIND_L11]").unwrap() < p1.find("[FIND_L12]").unwrap());
        assert!(p1.contains("AGGREGATE SQL:"));
    }

    fn arb_findings() -> impl Strategy<Value = Vec<Finding>> {
        prop::collection::vec(
            (0usize..3, 0usize..3, 1u32..40, 1u32..20),
            0..24,
        )
        .prop_map(|raw| {
            raw.into_iter()
                .map(|(file, method, line, col)| {
                    finding(
                        ["A.java", "B.java", "C.java"][file],
                        "Dao",
                        ["find", "save", "drop"][method],
                        line,
                        col,
                        "SELECT 1",
                    )
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_fragments_sorted_regardless_of_input_order(
            findings in arb_findings(),
            seed in any::<u64>(),
        ) {
            let mut shuffled = findings.clone();
            // Deterministic permutation driven by the seed
            let len = shuffled.len();
            if len > 1 {
                for i in 0..len {
                    let j = (seed as usize).wrapping_mul(i + 7) % len;
                    shuffled.swap(i, j);
                }
            }

            for granularity in [Granularity::Method, Granularity::File] {
                let builder = TaskBuilder::new(granularity);
                let a = builder.build(findings.clone());
                let b = builder.build(shuffled.clone());
                prop_assert_eq!(&a, &b);

                for task in &a {
                    let starts: Vec<(u32, u32)> =
                        task.ordered_fragments().map(|f| f.span.start()).collect();
                    let mut sorted = starts.clone();
                    sorted.sort();
                    prop_assert_eq!(starts, sorted);

                    let mut ids: Vec<&str> = task.blocks().iter().map(|b| b.id.as_str()).collect();
                    ids.sort();
                    ids.dedup();
                    prop_assert_eq!(ids.len(), task.len());
                }
            }
        }

        #[test]
        fn prop_build_is_deterministic(findings in arb_findings()) {
            let builder = TaskBuilder::new(Granularity::Method);
            let first = builder.build(findings.clone());
            let second = builder.build(findings);
            let keys_a: Vec<_> = first.iter().map(|t| t.key().clone()).collect();
            let keys_b: Vec<_> = second.iter().map(|t| t.key().clone()).collect();
            prop_assert_eq!(keys_a, keys_b);
            prop_assert_eq!(first, second);
        }
    }
}
