//! Final results, available once a job's output sequence is exhausted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::job::{JobId, JobState};

/// Final state of one supervised process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub job_id: JobId,
    pub label: String,
    /// OS process id, if the child was started.
    pub pid: Option<u32>,
    /// Always a terminal state.
    pub state: JobState,
    /// Captured non-progress stdout lines, joined with `\n`.
    pub stdout: String,
    /// Captured non-progress stderr lines, joined with `\n`.
    pub stderr: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl JobOutcome {
    pub const fn exit_code(&self) -> Option<i32> {
        self.state.exit_code()
    }

    pub const fn is_success(&self) -> bool {
        self.state.is_success()
    }
}

/// Outcome of every stage a pipeline executed, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineOutcome {
    pub job_id: JobId,
    pub stages: Vec<JobOutcome>,
    /// Whether every stage ran and exited with code zero.
    pub succeeded: bool,
}

impl PipelineOutcome {
    /// The stage that stopped the pipeline, if any.
    pub fn failed_stage(&self) -> Option<&JobOutcome> {
        self.stages.iter().find(|stage| !stage.is_success())
    }
}
