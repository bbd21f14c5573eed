//! Proposal sources: a JSON file, or an external command per task
//!
//! Both accept two document shapes:
//!
//! ```text
//! { "src/Dao.java": [ { "blockId": "FIND_L3", "convertedCode": "..." } ] }
//! [ { "file": "src/Dao.java", "explanation": "...",
//!     "replacements": [ { "location": { "startLine": 3, ... }, "convertedCode": "..." } ] } ]
//! ```
//!
//! In the second shape the per-file explanation is given to every
//! replacement that has none of its own. An oracle command may also print a
//! bare proposal list.

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use sqlport_core::{FileBatches, OracleError, RewriteOracle};
use sqlport_findings::ConversionTask;
use sqlport_patch::RewriteProposal;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ProposalDocument {
    ByFile(FileBatches),
    Proposals(Vec<RewriteProposal>),
    Responses(Vec<FileResponse>),
}

/// Per-file answer: shared explanation plus replacements
#[derive(Debug, Deserialize)]
struct FileResponse {
    file: PathBuf,
    #[serde(default)]
    explanation: String,
    #[serde(default)]
    replacements: Vec<RewriteProposal>,
}

impl FileResponse {
    fn into_proposals(self) -> (PathBuf, Vec<RewriteProposal>) {
        let explanation = self.explanation.trim().to_string();
        let proposals = self
            .replacements
            .into_iter()
            .map(|p| {
                if p.explanation.trim().is_empty() && !explanation.is_empty() {
                    p.with_explanation(explanation.clone())
                } else {
                    p
                }
            })
            .collect();
        (self.file, proposals)
    }
}

fn group_responses(responses: Vec<FileResponse>) -> FileBatches {
    let mut batches = FileBatches::new();
    for response in responses {
        let (file, proposals) = response.into_proposals();
        batches.entry(file).or_default().extend(proposals);
    }
    batches
}

/// What the oracle command receives on stdin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OracleInput {
    /// The task as JSON
    Json,
    /// The rendered prompt text
    Prompt,
}

/// Runs a shell command once per task; stdout carries the proposals
#[derive(Debug, Clone)]
pub(crate) struct CommandOracle {
    root: PathBuf,
    command: String,
    input: OracleInput,
    timeout: Option<Duration>,
}

impl CommandOracle {
    pub(crate) fn new(root: impl Into<PathBuf>, command: impl Into<String>, input: OracleInput) -> Self {
        Self {
            root: root.into(),
            command: command.into(),
            input,
            timeout: None,
        }
    }

    /// Kill the command and fail the task after `timeout`
    pub(crate) fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn request(&self, task: &ConversionTask) -> Result<String, OracleError> {
        match self.input {
            OracleInput::Json => serde_json::to_string(task)
                .map_err(|e| OracleError::InvalidResponse(format!("cannot encode task: {e}"))),
            OracleInput::Prompt => Ok(task.render_prompt()),
        }
    }

    /// Feed `request` on stdin while draining stdout and stderr
    async fn exchange(&self, request: String, task: &str) -> Result<String, OracleError> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .current_dir(&self.root)
            .env("SQLPORT_TASK", task)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| OracleError::Unavailable(format!("cannot start '{}': {e}", self.command)))?;

        let stdin = child.stdin.take();
        let write = async move {
            let Some(mut stdin) = stdin else {
                return Ok(());
            };
            match stdin.write_all(request.as_bytes()).await {
                // the command may answer without reading all of its input
                Err(e) if e.kind() == ErrorKind::BrokenPipe => Ok(()),
                other => other,
            }
        };
        let exchange = async { tokio::join!(write, child.wait_with_output()) };

        let (written, output) = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, exchange).await.map_err(|_| {
                OracleError::Unavailable(format!(
                    "'{}' timed out after {}s",
                    self.command,
                    limit.as_secs_f32()
                ))
            })?,
            None => exchange.await,
        };
        written.map_err(|e| OracleError::Unavailable(format!("cannot write request: {e}")))?;
        let output = output.map_err(|e| OracleError::Unavailable(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OracleError::Unavailable(format!(
                "'{}' exited with {}: {}",
                self.command,
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl RewriteOracle for CommandOracle {
    async fn propose(&self, task: &ConversionTask) -> Result<Vec<RewriteProposal>, OracleError> {
        let request = self.request(task)?;
        let stdout = self.exchange(request, &task.key().to_string()).await?;
        parse_proposals(&stdout)
    }
}

/// Parse oracle stdout; blank output means no proposals
pub(crate) fn parse_proposals(stdout: &str) -> Result<Vec<RewriteProposal>, OracleError> {
    let stdout = stdout.trim();
    if stdout.is_empty() {
        return Ok(Vec::new());
    }
    let document: ProposalDocument =
        serde_json::from_str(stdout).map_err(|e| OracleError::InvalidResponse(e.to_string()))?;
    Ok(match document {
        ProposalDocument::Proposals(proposals) => proposals,
        ProposalDocument::ByFile(batches) => batches.into_values().flatten().collect(),
        ProposalDocument::Responses(responses) => group_responses(responses)
            .into_values()
            .flatten()
            .collect(),
    })
}

/// Load a proposal file in either document shape
pub(crate) async fn load_proposal_file(path: &Path) -> anyhow::Result<FileBatches> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("cannot read proposals {}", path.display()))?;
    let document: ProposalDocument = serde_json::from_str(&text)
        .with_context(|| format!("malformed proposals {}", path.display()))?;
    let batches = match document {
        ProposalDocument::ByFile(batches) => batches,
        ProposalDocument::Responses(responses) => group_responses(responses),
        ProposalDocument::Proposals(proposals) if proposals.is_empty() => FileBatches::new(),
        ProposalDocument::Proposals(_) => anyhow::bail!(
            "proposals {} do not name their file; use a file-keyed object or `file` entries",
            path.display()
        ),
    };
    tracing::info!(
        files = batches.len(),
        proposals = batches.values().map(Vec::len).sum::<usize>(),
        "loaded proposals"
    );
    Ok(batches)
}
