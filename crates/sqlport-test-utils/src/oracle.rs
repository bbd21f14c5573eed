use sqlport_core::{OracleError, RewriteOracle};
use sqlport_findings::ConversionTask;
use sqlport_patch::RewriteProposal;
use std::collections::HashMap;

/// Oracle answering from a fixed table keyed by task key (`file#Class.method`)
///
/// Unknown tasks get no proposals.
#[derive(Debug, Clone, Default)]
pub struct StaticOracle {
    answers: HashMap<String, Result<Vec<RewriteProposal>, String>>,
}

impl StaticOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_proposals(mut self, task_key: &str, proposals: Vec<RewriteProposal>) -> Self {
        self.answers.insert(task_key.to_string(), Ok(proposals));
        self
    }

    pub fn failing_for(mut self, task_key: &str, reason: &str) -> Self {
        self.answers
            .insert(task_key.to_string(), Err(reason.to_string()));
        self
    }
}

#[async_trait::async_trait]
impl RewriteOracle for StaticOracle {
    async fn propose(&self, task: &ConversionTask) -> Result<Vec<RewriteProposal>, OracleError> {
        match self.answers.get(&task.key().to_string()) {
            Some(Ok(proposals)) => Ok(proposals.clone()),
            Some(Err(reason)) => Err(OracleError::Unavailable(reason.clone())),
            None => Ok(Vec::new()),
        }
    }
}
