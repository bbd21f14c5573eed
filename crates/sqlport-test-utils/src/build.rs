use crate::InMemoryWorkspace;
use parking_lot::Mutex;
use sqlport_core::{BuildChecker, BuildError, BuildVerdict};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scripted {
    Pass,
    Fail,
    Error,
}

/// A recorded build invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildCall {
    /// Per-file check, with the file content the checker saw (if observing)
    File {
        path: PathBuf,
        content: Option<String>,
    },
    Full,
}

/// What an observed full build saw
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullBuild {
    pub head: String,
    pub tree: BTreeMap<PathBuf, String>,
}

#[derive(Debug)]
struct Script {
    default: Scripted,
    files: HashMap<PathBuf, Scripted>,
    full: Scripted,
    calls: Vec<BuildCall>,
    full_builds: Vec<FullBuild>,
    observed: Option<InMemoryWorkspace>,
}

/// Build checker with scripted verdicts
#[derive(Debug, Clone)]
pub struct ScriptedBuildChecker {
    script: Arc<Mutex<Script>>,
}

impl ScriptedBuildChecker {
    fn with_default(default: Scripted) -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                default,
                files: HashMap::new(),
                full: default,
                calls: Vec::new(),
                full_builds: Vec::new(),
                observed: None,
            })),
        }
    }

    /// Every build passes
    pub fn passing() -> Self {
        Self::with_default(Scripted::Pass)
    }

    /// Every build fails
    pub fn failing() -> Self {
        Self::with_default(Scripted::Fail)
    }

    fn set(self, path: &str, scripted: Scripted) -> Self {
        self.script.lock().files.insert(PathBuf::from(path), scripted);
        self
    }

    pub fn pass_file(self, path: &str) -> Self {
        self.set(path, Scripted::Pass)
    }

    pub fn fail_file(self, path: &str) -> Self {
        self.set(path, Scripted::Fail)
    }

    /// Checking `path` raises an infrastructure error
    pub fn error_file(self, path: &str) -> Self {
        self.set(path, Scripted::Error)
    }

    pub fn fail_full(self) -> Self {
        self.script.lock().full = Scripted::Fail;
        self
    }

    /// Record the working-tree content of each checked file and the tree
    /// each full build ran on
    pub fn observing(self, workspace: &InMemoryWorkspace) -> Self {
        self.script.lock().observed = Some(workspace.clone());
        self
    }

    pub fn calls(&self) -> Vec<BuildCall> {
        self.script.lock().calls.clone()
    }

    /// Branch and working tree of each full build, when observing
    pub fn full_builds(&self) -> Vec<FullBuild> {
        self.script.lock().full_builds.clone()
    }

    fn verdict(scripted: Scripted, what: &str) -> Result<BuildVerdict, BuildError> {
        match scripted {
            Scripted::Pass => Ok(BuildVerdict::Pass),
            Scripted::Fail => Ok(BuildVerdict::fail(format!("{what}: error: incompatible types"))),
            Scripted::Error => Err(BuildError::Tool(format!("compiler crashed on {what}"))),
        }
    }
}

#[async_trait::async_trait]
impl BuildChecker for ScriptedBuildChecker {
    async fn check(&self, path: &Path) -> Result<BuildVerdict, BuildError> {
        let scripted = {
            let mut script = self.script.lock();
            let content = script
                .observed
                .as_ref()
                .and_then(|ws| ws.file(&path.to_string_lossy()));
            script.calls.push(BuildCall::File {
                path: path.to_path_buf(),
                content,
            });
            script.files.get(path).copied().unwrap_or(script.default)
        };
        Self::verdict(scripted, &path.display().to_string())
    }

    async fn check_full(&self) -> Result<BuildVerdict, BuildError> {
        let scripted = {
            let mut script = self.script.lock();
            script.calls.push(BuildCall::Full);
            if let Some(ws) = script.observed.clone() {
                script.full_builds.push(FullBuild {
                    head: ws.head(),
                    tree: ws.worktree(),
                });
            }
            script.full
        };
        Self::verdict(scripted, "project")
    }
}
