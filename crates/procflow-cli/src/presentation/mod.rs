//! Shared CLI presentation utilities.
//!
//! Format-only: turning outcomes into summary text and process exit codes.

use procflow_core::{JobOutcome, JobState, PipelineOutcome};

/// Process exit code for a job's terminal state.
///
/// A completed job passes its own code through, with signal deaths mapped
/// to the shell convention `128 + signal`. Any other state yields 1.
pub const fn exit_code_for(state: &JobState) -> i32 {
    match state {
        JobState::Completed { exit_code } if *exit_code >= 0 => *exit_code,
        JobState::Completed { exit_code } => 128 - *exit_code,
        _ => 1,
    }
}

/// Process exit code for a pipeline.
pub fn pipeline_exit_code(outcome: &PipelineOutcome) -> i32 {
    if outcome.succeeded {
        return 0;
    }
    outcome
        .failed_stage()
        .map_or(1, |stage| match exit_code_for(&stage.state) {
            0 => 1,
            code => code,
        })
}

/// One-line human summary of a job outcome.
pub fn job_summary(outcome: &JobOutcome) -> String {
    let elapsed = (outcome.ended_at - outcome.started_at).num_milliseconds();
    format!(
        "{} {} in {:.1}s (job {})",
        outcome.label,
        outcome.state,
        elapsed as f64 / 1000.0,
        outcome.job_id
    )
}

/// Multi-line human summary of a pipeline outcome.
pub fn pipeline_summary(outcome: &PipelineOutcome) -> String {
    let mut lines: Vec<String> = outcome.stages.iter().map(job_summary).collect();
    lines.push(if outcome.succeeded {
        format!("pipeline {} succeeded", outcome.job_id)
    } else {
        format!("pipeline {} failed", outcome.job_id)
    });
    lines.join("\n")
}
