//! Patch accumulation
//!
//! Verified runs produce a directory of numbered patches
//! (`0001-src-main-java-dao-java.patch`, ...). Direct runs produce a single
//! combined diff. Either way the accumulator owns the summary line.

use crate::error::PipelineError;
use std::path::{Path, PathBuf};

const MAX_SLUG_LEN: usize = 52;

/// Collects patch artifacts for a run
#[derive(Debug, Clone)]
pub struct PatchAccumulator {
    output_dir: PathBuf,
    combined_name: Option<String>,
    patches: Vec<PathBuf>,
    diffs: Vec<String>,
}

impl PatchAccumulator {
    /// Numbered-patch accumulator writing into `output_dir`
    #[must_use]
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            combined_name: None,
            patches: Vec::new(),
            diffs: Vec::new(),
        }
    }

    /// Combined-diff accumulator writing `output_dir/name`
    #[must_use]
    pub fn combined(output_dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            combined_name: Some(name.into()),
            ..Self::new(output_dir)
        }
    }

    /// Destination of the next numbered patch for `file`
    #[must_use]
    pub fn next_patch_path(&self, file: &Path) -> PathBuf {
        let seq = self.patches.len() + 1;
        self.output_dir
            .join(format!("{seq:04}-{}.patch", slug(file)))
    }

    /// Record an exported patch
    pub fn record_patch(&mut self, path: PathBuf) {
        tracing::info!(patch = %path.display(), "patch extracted");
        self.patches.push(path);
    }

    /// Add a file diff to the combined document (empty diffs are ignored)
    pub fn push_diff(&mut self, diff: String) {
        if !diff.trim().is_empty() {
            self.diffs.push(diff);
        }
    }

    /// Recorded patch files, in order
    #[inline]
    #[must_use]
    pub fn patches(&self) -> &[PathBuf] {
        &self.patches
    }

    /// Number of patches produced
    #[inline]
    #[must_use]
    pub fn applied(&self) -> usize {
        if self.combined_name.is_some() {
            self.diffs.len()
        } else {
            self.patches.len()
        }
    }

    /// Directory (numbered mode) or combined file (combined mode)
    #[must_use]
    pub fn output_path(&self) -> PathBuf {
        match &self.combined_name {
            Some(name) => self.output_dir.join(name),
            None => self.output_dir.clone(),
        }
    }

    /// The combined diff document
    #[must_use]
    pub fn combined_document(&self) -> String {
        let mut doc = String::new();
        for diff in &self.diffs {
            doc.push_str(diff);
            if !diff.ends_with('\n') {
                doc.push('\n');
            }
        }
        doc
    }

    /// Create the output directory
    ///
    /// # Errors
    /// Returns `PipelineError::Output` if the directory cannot be created
    pub async fn prepare(&self) -> Result<(), PipelineError> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| PipelineError::output(&self.output_dir, e))
    }

    /// Write the combined document if in combined mode and non-empty
    ///
    /// # Errors
    /// Returns `PipelineError::Output` on write failure
    pub async fn finish(&self) -> Result<Option<PathBuf>, PipelineError> {
        if self.combined_name.is_none() || self.diffs.is_empty() {
            return Ok(None);
        }
        self.prepare().await?;
        let path = self.output_path();
        tokio::fs::write(&path, self.combined_document())
            .await
            .map_err(|e| PipelineError::output(&path, e))?;
        tracing::info!(path = %path.display(), files = self.diffs.len(), "combined diff written");
        Ok(Some(path))
    }

    /// Human-readable result line
    #[must_use]
    pub fn summary(&self) -> String {
        match self.applied() {
            0 => "No patches were applied.".to_string(),
            n => format!(
                "Applied {n} patch(es); output written to {}",
                self.output_path().display()
            ),
        }
    }
}

/// File-name-safe slug of a path, in the style of `git format-patch`
fn slug(file: &Path) -> String {
    let mut out = String::new();
    let mut pending_dash = false;
    for c in file.to_string_lossy().chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    out.truncate(MAX_SLUG_LEN);
    let trimmed = out.trim_end_matches('-').to_string();
    if trimmed.is_empty() {
        "patch".to_string()
    } else {
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn slugs_are_path_safe() {
        assert_eq!(slug(Path::new("src/main/java/Dao.java")), "src-main-java-dao-java");
        assert_eq!(slug(Path::new("./a//b.sql")), "a-b-sql");
        assert_eq!(slug(Path::new("///")), "patch");
        assert!(slug(Path::new(&"x/".repeat(60))).len() <= MAX_SLUG_LEN);
    }

    #[test]
    fn numbers_follow_recorded_patches() {
        let mut acc = PatchAccumulator::new("out");
        let first = acc.next_patch_path(Path::new("A.java"));
        assert_eq!(first, PathBuf::from("out/0001-a-java.patch"));
        acc.record_patch(first);
        assert_eq!(
            acc.next_patch_path(Path::new("B.java")),
            PathBuf::from("out/0002-b-java.patch")
        );
        assert_eq!(acc.applied(), 1);
    }

    #[test]
    fn summaries() {
        let mut acc = PatchAccumulator::new("out");
        assert_eq!(acc.summary(), "No patches were applied.");
        acc.record_patch(PathBuf::from("out/0001-a.patch"));
        assert_eq!(acc.summary(), "Applied 1 patch(es); output written to out");

        let mut combined = PatchAccumulator::combined("out", "migration.diff");
        combined.push_diff(String::new());
        assert_eq!(combined.summary(), "No patches were applied.");
        combined.push_diff("--- a/A\n+++ b/A\n".to_string());
        combined.push_diff("--- a/B\n+++ b/B".to_string());
        assert_eq!(
            combined.summary(),
            "Applied 2 patch(es); output written to out/migration.diff"
        );
        assert_eq!(
            combined.combined_document(),
            "--- a/A\n+++ b/A\n--- a/B\n+++ b/B\n"
        );
    }

    #[tokio::test]
    async fn finish_writes_combined_document() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested");
        let mut acc = PatchAccumulator::combined(&out, "migration.diff");
        assert_eq!(acc.finish().await.unwrap(), None);

        acc.push_diff("diff --git a/F b/F\n".to_string());
        let path = acc.finish().await.unwrap().unwrap();
        assert_eq!(path, out.join("migration.diff"));
        assert_eq!(
            tokio::fs::read_to_string(&path).await.unwrap(),
            "diff --git a/F b/F\n"
        );
    }
}
