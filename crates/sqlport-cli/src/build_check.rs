//! Build checks as shell commands

use async_trait::async_trait;
use sqlport_core::{BuildChecker, BuildError, BuildVerdict};
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Runs `file_command` (with `{file}` substituted) per file and
/// `full_command` for the whole project, in `root`
///
/// A check whose command is not configured is a tool error, not a verdict.
#[derive(Debug, Clone)]
pub(crate) struct CommandBuildChecker {
    root: PathBuf,
    file_command: Option<String>,
    full_command: Option<String>,
}

impl CommandBuildChecker {
    pub(crate) fn new(
        root: impl Into<PathBuf>,
        file_command: Option<String>,
        full_command: Option<String>,
    ) -> Self {
        Self {
            root: root.into(),
            file_command,
            full_command,
        }
    }

    async fn run(&self, command: String) -> Result<BuildVerdict, BuildError> {
        tracing::debug!(command = %command, "running build check");
        let output = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .current_dir(&self.root)
            .output()
            .await
            .map_err(|source| BuildError::Launch {
                command: command.clone(),
                source,
            })?;

        if output.status.success() {
            return Ok(BuildVerdict::Pass);
        }
        if output.status.code().is_none() {
            return Err(BuildError::Tool(format!("'{command}' was terminated by a signal")));
        }
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(BuildVerdict::fail(text))
    }
}

fn substitute(template: &str, file: &Path) -> String {
    template.replace("{file}", &file.to_string_lossy())
}

#[async_trait]
impl BuildChecker for CommandBuildChecker {
    async fn check(&self, path: &Path) -> Result<BuildVerdict, BuildError> {
        let template = self
            .file_command
            .as_deref()
            .ok_or_else(|| BuildError::Tool("no per-file build command configured".to_string()))?;
        self.run(substitute(template, path)).await
    }

    async fn check_full(&self) -> Result<BuildVerdict, BuildError> {
        let command = self
            .full_command
            .clone()
            .ok_or_else(|| BuildError::Tool("no project build command configured".to_string()))?;
        self.run(command).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_placeholder_is_substituted() {
        assert_eq!(
            substitute("javac -d /tmp/out {file}", Path::new("src/Dao.java")),
            "javac -d /tmp/out src/Dao.java"
        );
        assert_eq!(substitute("mvn -q compile", Path::new("A.java")), "mvn -q compile");
    }

    #[tokio::test]
    async fn exit_status_decides_the_verdict() {
        let dir = tempfile::tempdir().unwrap();
        let checker = CommandBuildChecker::new(
            dir.path(),
            Some("test {file} = ok.java".to_string()),
            Some("echo broken; exit 3".to_string()),
        );

        assert!(checker.check(Path::new("ok.java")).await.unwrap().passed());
        assert!(!checker.check(Path::new("bad.java")).await.unwrap().passed());

        match checker.check_full().await.unwrap() {
            BuildVerdict::Fail { output } => assert!(output.contains("broken")),
            BuildVerdict::Pass => panic!("full build should fail"),
        }
    }

    #[tokio::test]
    async fn missing_command_is_a_tool_error() {
        let checker = CommandBuildChecker::new(".", None, None);
        assert!(matches!(
            checker.check(Path::new("A.java")).await,
            Err(BuildError::Tool(_))
        ));
        assert!(matches!(checker.check_full().await, Err(BuildError::Tool(_))));
    }
}
