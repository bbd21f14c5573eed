use parking_lot::Mutex;
use sqlport_core::{Workspace, WorkspaceError};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Workspace operations, for fault injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    CurrentBranch,
    ListBranches,
    CreateBranch,
    Checkout,
    DeleteBranch,
    Stage,
    Commit,
    Diff,
    FormatPatch,
    Revert,
    Read,
    Write,
    Export,
}

#[derive(Debug, Clone)]
pub struct CommitRecord {
    pub id: String,
    pub branch: String,
    pub message: String,
    pub files: Vec<PathBuf>,
}

type Tree = BTreeMap<PathBuf, String>;

#[derive(Debug, Clone, Copy)]
struct FailRule {
    after: usize,
    calls: usize,
}

#[derive(Debug, Default)]
struct State {
    head: String,
    branches: BTreeMap<String, Tree>,
    worktree: Tree,
    staged: BTreeSet<PathBuf>,
    commits: Vec<CommitRecord>,
    commit_diffs: HashMap<String, String>,
    sandbox: Tree,
    failures: HashMap<Op, FailRule>,
    ops: Vec<Op>,
}

impl State {
    fn enter(&mut self, op: Op) -> Result<(), WorkspaceError> {
        self.ops.push(op);
        if let Some(rule) = self.failures.get_mut(&op) {
            rule.calls += 1;
            if rule.calls > rule.after {
                return Err(WorkspaceError::vcs(format!("{op:?}"), "injected failure"));
            }
        }
        Ok(())
    }

    fn head_tree(&self) -> Tree {
        self.branches.get(&self.head).cloned().unwrap_or_default()
    }

    fn is_dirty(&self) -> bool {
        !self.staged.is_empty() || self.worktree != self.head_tree()
    }
}

/// Git-like working tree held in memory
///
/// Clones share state, so a test can keep a handle while the pipeline owns
/// another. `checkout` refuses to run with local changes, like a strict git.
#[derive(Debug, Clone)]
pub struct InMemoryWorkspace {
    state: Arc<Mutex<State>>,
}

impl InMemoryWorkspace {
    /// Empty repository with `branch` checked out
    pub fn new(branch: &str) -> Self {
        let mut branches = BTreeMap::new();
        branches.insert(branch.to_string(), Tree::new());
        Self {
            state: Arc::new(Mutex::new(State {
                head: branch.to_string(),
                branches,
                ..State::default()
            })),
        }
    }

    /// Add a committed file to the checked-out branch
    pub fn with_file(self, path: &str, content: &str) -> Self {
        {
            let mut state = self.state.lock();
            let head = state.head.clone();
            state
                .branches
                .entry(head)
                .or_default()
                .insert(PathBuf::from(path), content.to_string());
            state.worktree.insert(PathBuf::from(path), content.to_string());
        }
        self
    }

    /// Fail every call to `op`
    pub fn fail_on(&self, op: Op) {
        self.fail_after(op, 0);
    }

    /// Let `op` succeed `after` times, then fail
    pub fn fail_after(&self, op: Op, after: usize) {
        self.state
            .lock()
            .failures
            .insert(op, FailRule { after, calls: 0 });
    }

    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    pub fn head(&self) -> String {
        self.state.lock().head.clone()
    }

    pub fn branches(&self) -> Vec<String> {
        self.state.lock().branches.keys().cloned().collect()
    }

    /// Working-tree content
    pub fn file(&self, path: &str) -> Option<String> {
        self.state.lock().worktree.get(Path::new(path)).cloned()
    }

    /// Every working-tree file
    pub fn worktree(&self) -> BTreeMap<PathBuf, String> {
        self.state.lock().worktree.clone()
    }

    /// Committed content on a branch
    pub fn branch_file(&self, branch: &str, path: &str) -> Option<String> {
        self.state
            .lock()
            .branches
            .get(branch)
            .and_then(|tree| tree.get(Path::new(path)).cloned())
    }

    pub fn is_dirty(&self) -> bool {
        self.state.lock().is_dirty()
    }

    pub fn commits(&self) -> Vec<CommitRecord> {
        self.state.lock().commits.clone()
    }

    pub fn ops(&self) -> Vec<Op> {
        self.state.lock().ops.clone()
    }
}

/// Whole-file unified diff; empty when equal
fn render_diff(path: &Path, old: Option<&str>, new: Option<&str>) -> String {
    if old == new {
        return String::new();
    }
    let p = path.display();
    let old_lines: Vec<&str> = old.map(|s| s.lines().collect()).unwrap_or_default();
    let new_lines: Vec<&str> = new.map(|s| s.lines().collect()).unwrap_or_default();
    let mut out = format!(
        "diff --git a/{p} b/{p}\n--- a/{p}\n+++ b/{p}\n@@ -1,{} +1,{} @@\n",
        old_lines.len(),
        new_lines.len()
    );
    for line in old_lines {
        out.push('-');
        out.push_str(line);
        out.push('\n');
    }
    for line in new_lines {
        out.push('+');
        out.push_str(line);
        out.push('\n');
    }
    out
}

#[async_trait::async_trait]
impl Workspace for InMemoryWorkspace {
    async fn current_branch(&self) -> Result<String, WorkspaceError> {
        let mut state = self.state.lock();
        state.enter(Op::CurrentBranch)?;
        Ok(state.head.clone())
    }

    async fn list_branches(&self, prefix: &str) -> Result<Vec<String>, WorkspaceError> {
        let mut state = self.state.lock();
        state.enter(Op::ListBranches)?;
        Ok(state
            .branches
            .keys()
            .filter(|b| b.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn create_branch(&mut self, name: &str, start_point: &str) -> Result<(), WorkspaceError> {
        let mut state = self.state.lock();
        state.enter(Op::CreateBranch)?;
        if state.branches.contains_key(name) {
            return Err(WorkspaceError::vcs("branch", format!("'{name}' already exists")));
        }
        let tree = state
            .branches
            .get(start_point)
            .cloned()
            .ok_or_else(|| WorkspaceError::vcs("branch", format!("unknown start point '{start_point}'")))?;
        state.branches.insert(name.to_string(), tree);
        Ok(())
    }

    async fn checkout(&mut self, branch: &str) -> Result<(), WorkspaceError> {
        let mut state = self.state.lock();
        state.enter(Op::Checkout)?;
        let Some(tree) = state.branches.get(branch).cloned() else {
            return Err(WorkspaceError::vcs("checkout", format!("unknown branch '{branch}'")));
        };
        if state.head == branch {
            return Ok(());
        }
        if state.is_dirty() {
            return Err(WorkspaceError::vcs(
                "checkout",
                "local changes would be overwritten",
            ));
        }
        state.head = branch.to_string();
        state.worktree = tree;
        Ok(())
    }

    async fn delete_branch(&mut self, name: &str) -> Result<(), WorkspaceError> {
        let mut state = self.state.lock();
        state.enter(Op::DeleteBranch)?;
        if state.head == name {
            return Err(WorkspaceError::vcs("branch -D", format!("'{name}' is checked out")));
        }
        state
            .branches
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| WorkspaceError::vcs("branch -D", format!("unknown branch '{name}'")))
    }

    async fn stage(&mut self, path: &Path) -> Result<(), WorkspaceError> {
        let mut state = self.state.lock();
        state.enter(Op::Stage)?;
        if !state.worktree.contains_key(path) {
            return Err(WorkspaceError::FileNotFound(path.to_path_buf()));
        }
        state.staged.insert(path.to_path_buf());
        Ok(())
    }

    async fn commit(&mut self, message: &str) -> Result<String, WorkspaceError> {
        let mut state = self.state.lock();
        state.enter(Op::Commit)?;
        if state.staged.is_empty() {
            return Err(WorkspaceError::vcs("commit", "nothing to commit"));
        }
        let staged: Vec<PathBuf> = std::mem::take(&mut state.staged).into_iter().collect();
        let head = state.head.clone();
        let mut patch = String::new();
        for path in &staged {
            let old = state.branches.get(&head).and_then(|t| t.get(path)).cloned();
            let new = state.worktree.get(path).cloned();
            patch.push_str(&render_diff(path, old.as_deref(), new.as_deref()));
            if let (Some(tree), Some(content)) = (state.branches.get_mut(&head), new) {
                tree.insert(path.clone(), content);
            }
        }
        let id = format!("c{:04}", state.commits.len() + 1);
        state.commits.push(CommitRecord {
            id: id.clone(),
            branch: head,
            message: message.to_string(),
            files: staged,
        });
        state.commit_diffs.insert(id.clone(), patch);
        Ok(id)
    }

    async fn diff(&self, path: &Path) -> Result<String, WorkspaceError> {
        let mut state = self.state.lock();
        state.enter(Op::Diff)?;
        let old = state.head_tree().get(path).cloned();
        let new = state.worktree.get(path).cloned();
        Ok(render_diff(path, old.as_deref(), new.as_deref()))
    }

    async fn format_patch(&mut self, commit: &str) -> Result<PathBuf, WorkspaceError> {
        let mut state = self.state.lock();
        state.enter(Op::FormatPatch)?;
        let diff = state
            .commit_diffs
            .get(commit)
            .cloned()
            .ok_or_else(|| WorkspaceError::vcs("format-patch", format!("unknown commit '{commit}'")))?;
        let message = state
            .commits
            .iter()
            .find(|c| c.id == commit)
            .map(|c| c.message.clone())
            .unwrap_or_default();
        let (subject, body) = message.split_once('\n').unwrap_or((message.as_str(), ""));
        let text = format!(
            "From {commit}\nSubject: [PATCH] {subject}\n\n{}\n---\n{diff}",
            body.trim()
        );
        let path = PathBuf::from(format!(".sandbox/{commit}.patch"));
        state.sandbox.insert(path.clone(), text);
        Ok(path)
    }

    async fn revert(&mut self, path: &Path) -> Result<(), WorkspaceError> {
        let mut state = self.state.lock();
        state.enter(Op::Revert)?;
        state.staged.remove(path);
        match state.head_tree().get(path).cloned() {
            Some(content) => state.worktree.insert(path.to_path_buf(), content),
            None => state.worktree.remove(path),
        };
        Ok(())
    }

    async fn read(&self, path: &Path) -> Result<String, WorkspaceError> {
        let mut state = self.state.lock();
        state.enter(Op::Read)?;
        state
            .worktree
            .get(path)
            .cloned()
            .ok_or_else(|| WorkspaceError::FileNotFound(path.to_path_buf()))
    }

    async fn write(&mut self, path: &Path, content: &str) -> Result<(), WorkspaceError> {
        let mut state = self.state.lock();
        state.enter(Op::Write)?;
        state.worktree.insert(path.to_path_buf(), content.to_string());
        Ok(())
    }

    async fn export(&mut self, artifact: &Path, dest: &Path) -> Result<(), WorkspaceError> {
        let content = {
            let mut state = self.state.lock();
            state.enter(Op::Export)?;
            state
                .sandbox
                .get(artifact)
                .cloned()
                .ok_or_else(|| WorkspaceError::FileNotFound(artifact.to_path_buf()))?
        };
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| WorkspaceError::io_error(parent, e))?;
        }
        tokio::fs::write(dest, content)
            .await
            .map_err(|e| WorkspaceError::io_error(dest, e))
    }
}
