//! `Workspace` over a git checkout, driven through the `git` binary

use async_trait::async_trait;
use sqlport_core::{Workspace, WorkspaceError};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::process::Command;

/// A git working tree plus a private directory for `format-patch` output
pub(crate) struct GitWorkspace {
    root: PathBuf,
    sandbox: TempDir,
}

impl GitWorkspace {
    pub(crate) fn open(root: impl Into<PathBuf>) -> Result<Self, WorkspaceError> {
        let root = root.into();
        let sandbox = tempfile::Builder::new()
            .prefix("sqlport-")
            .tempdir()
            .map_err(|e| WorkspaceError::io_error(std::env::temp_dir(), e))?;
        Ok(Self { root, sandbox })
    }

    async fn git(&self, args: &[&str]) -> Result<String, WorkspaceError> {
        let operation = args.first().copied().unwrap_or("git");
        tracing::trace!(args = ?args, "git");
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.root)
            .args(args)
            .output()
            .await
            .map_err(|e| WorkspaceError::vcs(operation, format!("cannot run git: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WorkspaceError::vcs(operation, stderr.trim().to_string()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn path_arg(path: &Path) -> String {
        path.to_string_lossy().into_owned()
    }
}

#[async_trait]
impl Workspace for GitWorkspace {
    async fn current_branch(&self) -> Result<String, WorkspaceError> {
        let out = self.git(&["rev-parse", "--abbrev-ref", "HEAD"]).await?;
        Ok(out.trim().to_string())
    }

    async fn list_branches(&self, prefix: &str) -> Result<Vec<String>, WorkspaceError> {
        let out = self
            .git(&["for-each-ref", "--format=%(refname:short)", "refs/heads/"])
            .await?;
        Ok(filter_branches(&out, prefix))
    }

    async fn create_branch(&mut self, name: &str, start_point: &str) -> Result<(), WorkspaceError> {
        self.git(&["branch", name, start_point]).await.map(drop)
    }

    async fn checkout(&mut self, branch: &str) -> Result<(), WorkspaceError> {
        self.git(&["checkout", "--quiet", branch]).await.map(drop)
    }

    async fn delete_branch(&mut self, name: &str) -> Result<(), WorkspaceError> {
        self.git(&["branch", "-D", name]).await.map(drop)
    }

    async fn stage(&mut self, path: &Path) -> Result<(), WorkspaceError> {
        let path = Self::path_arg(path);
        self.git(&["add", "--", &path]).await.map(drop)
    }

    async fn commit(&mut self, message: &str) -> Result<String, WorkspaceError> {
        self.git(&["commit", "--quiet", "-m", message]).await?;
        let id = self.git(&["rev-parse", "HEAD"]).await?;
        Ok(id.trim().to_string())
    }

    async fn diff(&self, path: &Path) -> Result<String, WorkspaceError> {
        let path = Self::path_arg(path);
        self.git(&["diff", "HEAD", "--", &path]).await
    }

    async fn format_patch(&mut self, commit: &str) -> Result<PathBuf, WorkspaceError> {
        let dir = self.sandbox.path().to_string_lossy().into_owned();
        let out = self
            .git(&["format-patch", "-1", commit, "--output-directory", &dir])
            .await?;
        out.lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| WorkspaceError::vcs("format-patch", "no patch file produced"))
    }

    async fn revert(&mut self, path: &Path) -> Result<(), WorkspaceError> {
        let path = Self::path_arg(path);
        self.git(&["checkout", "HEAD", "--", &path]).await.map(drop)
    }

    async fn read(&self, path: &Path) -> Result<String, WorkspaceError> {
        let full = self.root.join(path);
        tokio::fs::read_to_string(&full).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                WorkspaceError::FileNotFound(path.to_path_buf())
            } else {
                WorkspaceError::io_error(full, e)
            }
        })
    }

    async fn write(&mut self, path: &Path, content: &str) -> Result<(), WorkspaceError> {
        let full = self.root.join(path);
        tokio::fs::write(&full, content)
            .await
            .map_err(|e| WorkspaceError::io_error(full, e))
    }

    async fn export(&mut self, artifact: &Path, dest: &Path) -> Result<(), WorkspaceError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| WorkspaceError::io_error(parent, e))?;
        }
        tokio::fs::copy(artifact, dest)
            .await
            .map(drop)
            .map_err(|e| WorkspaceError::io_error(artifact, e))
    }
}

fn filter_branches(listing: &str, prefix: &str) -> Vec<String> {
    listing
        .lines()
        .map(str::trim)
        .filter(|b| !b.is_empty() && b.starts_with(prefix))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn branch_listing_keeps_prefixed_names() {
        let listing = "main\nsqlport/attempt-0001-01j\nsqlport/attempt-0002-01k\nfeature/x\n\n";
        assert_eq!(
            filter_branches(listing, "sqlport/"),
            vec![
                "sqlport/attempt-0001-01j".to_string(),
                "sqlport/attempt-0002-01k".to_string()
            ]
        );
        assert!(filter_branches(listing, "none/").is_empty());
    }

    #[tokio::test]
    async fn read_missing_file_is_file_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let ws = GitWorkspace::open(dir.path()).unwrap();
        let err = ws.read(Path::new("src/Absent.java")).await.unwrap_err();
        assert!(matches!(err, WorkspaceError::FileNotFound(p) if p == Path::new("src/Absent.java")));
    }

    #[tokio::test]
    async fn export_creates_destination_directories() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("0001.patch");
        std::fs::write(&artifact, "From abc\n").unwrap();
        let dest = dir.path().join("out/nested/0001-a.patch");

        let mut ws = GitWorkspace::open(dir.path()).unwrap();
        ws.export(&artifact, &dest).await.unwrap();
        assert_eq!(std::fs::read_to_string(dest).unwrap(), "From abc\n");
    }
}
