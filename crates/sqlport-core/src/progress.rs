//! Progress events
//!
//! Observers receive events on an unbounded channel. Sending never blocks the
//! pipeline and a dropped receiver is ignored.

use crate::attempt::{AttemptOutcome, AttemptState};
use crate::report::RunOutcome;
use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Something observable happened
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// Tasks built and proposals collected
    RunStarted {
        /// Number of tasks
        tasks: usize,
        /// Number of files that will be attempted
        files: usize,
    },
    /// Oracle failed for a task
    OracleFailed {
        /// Task key
        task: String,
        /// Error description
        reason: String,
    },
    /// A file attempt began
    AttemptStarted {
        /// Attempt number
        seq: usize,
        /// Target file
        file: PathBuf,
    },
    /// A file attempt changed state
    StateChanged {
        /// Attempt number
        seq: usize,
        /// New state
        state: AttemptState,
    },
    /// A file attempt finished cleanup
    AttemptFinished {
        /// Attempt number
        seq: usize,
        /// Target file
        file: PathBuf,
        /// Outcome
        outcome: AttemptOutcome,
    },
    /// The run finished
    RunFinished {
        /// Outcome
        outcome: RunOutcome,
        /// Patches produced
        applied: usize,
    },
}

/// Sending half handed to the pipeline
pub type ProgressSender = mpsc::UnboundedSender<ProgressEvent>;

/// Receiving half kept by the observer
pub type ProgressReceiver = mpsc::UnboundedReceiver<ProgressEvent>;

/// Create a progress channel
#[must_use]
pub fn channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Optional progress sink
#[derive(Debug, Clone, Default)]
pub(crate) struct Progress(Option<ProgressSender>);

impl Progress {
    pub(crate) fn new(sender: Option<ProgressSender>) -> Self {
        Self(sender)
    }

    pub(crate) fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.0 {
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_and_tolerates_closed_receiver() {
        let (tx, mut rx) = channel();
        let progress = Progress::new(Some(tx));
        progress.emit(ProgressEvent::StateChanged {
            seq: 1,
            state: AttemptState::Branched,
        });
        assert_eq!(
            rx.try_recv().unwrap(),
            ProgressEvent::StateChanged {
                seq: 1,
                state: AttemptState::Branched
            }
        );

        drop(rx);
        progress.emit(ProgressEvent::RunStarted { tasks: 0, files: 0 });
        Progress::default().emit(ProgressEvent::RunStarted { tasks: 0, files: 0 });
    }

    #[test]
    fn serializes_tagged() {
        let json = serde_json::to_value(ProgressEvent::RunFinished {
            outcome: RunOutcome::NothingToDo,
            applied: 0,
        })
        .unwrap();
        assert_eq!(json["event"], "run_finished");
        assert_eq!(json["outcome"], "nothing_to_do");
    }
}
