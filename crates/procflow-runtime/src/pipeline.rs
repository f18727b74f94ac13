//! Multi-stage jobs.
//!
//! A pipeline runs its stages one after another under a single job id and
//! streams all of their output as one sequence. The first stage that does
//! not complete with exit code zero stops the pipeline.

use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use async_stream::stream;
use futures_core::Stream;
use futures_util::StreamExt;
use procflow_core::{EngineError, JobId, JobState, LineTag, PipelineOutcome, format_line};
use tracing::{debug, info, warn};

use crate::process::{CANCELLED_MESSAGE, JobSpec, ProcessSupervisor};
use crate::registry::{Admission, JobRegistry};

/// Last line of every pipeline stream.
pub const PIPELINE_FINISHED: &str = "===== pipeline finished =====";

/// Header line emitted before a stage starts.
pub fn stage_header(label: &str) -> String {
    format!("===== {label} =====")
}

/// An ordered list of stages sharing one job id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    id: JobId,
    label: String,
    stages: Vec<JobSpec>,
}

impl Pipeline {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            id: JobId::new(),
            label: label.into(),
            stages: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: JobId) -> Self {
        self.id = id;
        self
    }

    /// Append a stage. Any id set on the stage is replaced by the pipeline's.
    #[must_use]
    pub fn stage(mut self, spec: JobSpec) -> Self {
        self.stages.push(spec);
        self
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn stages(&self) -> &[JobSpec] {
        &self.stages
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// Lazy stream of a whole pipeline's output.
///
/// Dropping it before the end cancels the pipeline's job id.
pub struct PipelineStream {
    job_id: JobId,
    registry: Arc<JobRegistry>,
    inner: Pin<Box<dyn Stream<Item = String> + Send>>,
    outcome: Arc<OnceLock<PipelineOutcome>>,
    registered: bool,
}

impl PipelineStream {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Outcome of every executed stage; `None` until exhausted.
    pub fn outcome(&self) -> Option<&PipelineOutcome> {
        self.outcome.get()
    }

    /// Drive the pipeline to the end, collecting every line.
    pub async fn into_lines(mut self) -> (Vec<String>, Option<PipelineOutcome>) {
        let mut lines = Vec::new();
        while let Some(line) = self.next().await {
            lines.push(line);
        }
        (lines, self.outcome.get().cloned())
    }
}

impl Stream for PipelineStream {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<String>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl Drop for PipelineStream {
    fn drop(&mut self) {
        if self.registered && self.outcome.get().is_none() {
            debug!(job_id = %self.job_id, "pipeline stream dropped early, cancelling");
            // The id may already be gone if the caller removed it
            let _ = self.registry.request_cancel(&self.job_id);
        }
    }
}

impl std::fmt::Debug for PipelineStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineStream")
            .field("job_id", &self.job_id)
            .field("finished", &self.outcome.get().is_some())
            .finish_non_exhaustive()
    }
}

/// Register `pipeline` and return its stream.
///
/// The job id is registered as pending right away so it can be cancelled
/// before the stream is ever polled. An empty pipeline is not registered.
pub(crate) fn start_pipeline(
    supervisor: &ProcessSupervisor,
    pipeline: Pipeline,
) -> Result<PipelineStream, EngineError> {
    let Pipeline { id, label, stages } = pipeline;
    let registry = Arc::clone(supervisor.registry());

    let registered = !stages.is_empty();
    if registered {
        registry.register_pending(&id, &label)?;
    }

    let outcome = Arc::new(OnceLock::new());
    let inner = run_stages(
        id.clone(),
        label,
        stages,
        supervisor.clone(),
        Arc::clone(&outcome),
    );

    Ok(PipelineStream {
        job_id: id,
        registry,
        inner: Box::pin(inner),
        outcome,
        registered,
    })
}

fn run_stages(
    id: JobId,
    label: String,
    stages: Vec<JobSpec>,
    supervisor: ProcessSupervisor,
    outcome: Arc<OnceLock<PipelineOutcome>>,
) -> impl Stream<Item = String> + Send {
    stream! {
        let registry = Arc::clone(supervisor.registry());
        let total = stages.len();
        let mut executed = Vec::with_capacity(total);
        let mut succeeded = true;

        for (index, stage) in stages.into_iter().enumerate() {
            let stage_label = stage.label.clone();

            if index > 0
                && let Err(e) = registry.reopen(&id)
            {
                succeeded = false;
                if matches!(e, EngineError::Cancelled(_)) {
                    info!(job_id = %id, stage = %stage_label, "pipeline cancelled between stages");
                    yield format_line(&stage_label, LineTag::Info, CANCELLED_MESSAGE);
                } else {
                    warn!(job_id = %id, error = %e, "pipeline could not continue");
                    yield format_line(&stage_label, LineTag::Error, &e.to_string());
                }
                break;
            }

            debug!(job_id = %id, stage = %stage_label, index, total, "starting pipeline stage");
            yield stage_header(&stage_label);

            let mut job = supervisor.launch(stage.with_id(id.clone()), Admission::Reserved);
            while let Some(line) = job.next().await {
                yield line;
            }

            let Some(stage_outcome) = job.outcome().cloned() else {
                succeeded = false;
                break;
            };
            let state = stage_outcome.state.clone();
            executed.push(stage_outcome);

            match state {
                JobState::Completed { exit_code: 0 } => {}
                JobState::Completed { exit_code } => {
                    warn!(job_id = %id, stage = %stage_label, exit_code, "pipeline stage failed");
                    yield format!("{stage_label} failed with exit code {exit_code}");
                    succeeded = false;
                    break;
                }
                _ => {
                    succeeded = false;
                    break;
                }
            }
        }

        info!(job_id = %id, pipeline = %label, succeeded, "pipeline finished");
        yield PIPELINE_FINISHED.to_string();

        let _ = outcome.set(PipelineOutcome {
            job_id: id.clone(),
            stages: executed,
            succeeded,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_header() {
        assert_eq!(stage_header("Align"), "===== Align =====");
    }

    #[test]
    fn test_builder_keeps_stage_order() {
        let pipeline = Pipeline::new("hair")
            .with_id(JobId::from("p-1"))
            .stage(JobSpec::shell("Align", "true"))
            .stage(JobSpec::shell("Generate", "true"));

        assert_eq!(pipeline.id().as_str(), "p-1");
        assert_eq!(pipeline.label(), "hair");
        let labels: Vec<&str> = pipeline.stages().iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["Align", "Generate"]);
        assert!(!pipeline.is_empty());
    }
}
