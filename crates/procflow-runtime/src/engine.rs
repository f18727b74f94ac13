//! The caller-facing engine.
//!
//! `ProcessEngine` bundles a registry, a supervisor and a termination
//! controller behind the three operations callers need: start something,
//! cancel it, and look at what is running.

use std::sync::Arc;

use procflow_core::{EngineError, EngineSettings, JobId, JobLogSink, LogRecord, RegistrySnapshot};
use tracing::{info, warn};

use crate::pipeline::{Pipeline, PipelineStream, start_pipeline};
use crate::process::{JobSpec, JobStream, ProcessSupervisor, TerminationController};
use crate::registry::JobRegistry;

/// Result of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job was active and is now cancelled.
    Cancelled,
    /// The job exists but had already stopped (or was already cancelled).
    AlreadyInactive,
}

#[derive(Clone)]
pub struct ProcessEngine {
    registry: Arc<JobRegistry>,
    supervisor: ProcessSupervisor,
    terminator: TerminationController,
    sink: Arc<dyn JobLogSink>,
}

impl ProcessEngine {
    /// Create an engine with its own registry.
    pub fn new(settings: EngineSettings, sink: Arc<dyn JobLogSink>) -> Self {
        Self::with_registry(Arc::new(JobRegistry::new()), settings, sink)
    }

    /// Create an engine over an existing registry.
    pub fn with_registry(
        registry: Arc<JobRegistry>,
        settings: EngineSettings,
        sink: Arc<dyn JobLogSink>,
    ) -> Self {
        let supervisor =
            ProcessSupervisor::new(Arc::clone(&registry), Arc::new(settings), Arc::clone(&sink));
        let terminator = supervisor.terminator();
        Self {
            registry,
            supervisor,
            terminator,
            sink,
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Start a job. The process is spawned on the stream's first poll.
    pub fn start_job(&self, spec: JobSpec) -> JobStream {
        self.supervisor.start_job(spec)
    }

    /// Run `pipeline`'s stages in order under its job id.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DuplicateJob`] if the pipeline's id is
    /// already active.
    pub fn run_pipeline(&self, pipeline: Pipeline) -> Result<PipelineStream, EngineError> {
        start_pipeline(&self.supervisor, pipeline)
    }

    /// Cancel a job and terminate its process group.
    ///
    /// Idempotent: only the first call changes the job's state or signals
    /// the process; later calls report [`CancelOutcome::AlreadyInactive`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::JobNotFound`] for an unknown id.
    pub async fn cancel(&self, id: &JobId) -> Result<CancelOutcome, EngineError> {
        let request = self.registry.request_cancel(id)?;
        if !request.first {
            return Ok(CancelOutcome::AlreadyInactive);
        }

        info!(job_id = %id, pid = ?request.pid, "cancelling job");
        self.sink
            .record(&LogRecord::info(id, "cancellation requested"));

        if let Some(pid) = request.pid
            && let Err(e) = self.terminator.terminate(pid).await
        {
            warn!(job_id = %id, pid, error = %e, "failed to terminate cancelled job");
            self.sink
                .record(&LogRecord::error(id, format!("termination failed: {e}")));
        }

        Ok(CancelOutcome::Cancelled)
    }

    /// Read-only snapshot of every job.
    pub fn status(&self) -> RegistrySnapshot {
        self.registry.snapshot()
    }

    /// Cancel every active job. Used on process shutdown.
    ///
    /// Returns how many jobs were cancelled.
    pub async fn shutdown_all(&self) -> usize {
        let ids = self.registry.active_ids();
        if ids.is_empty() {
            return 0;
        }

        info!(count = ids.len(), "terminating active jobs");
        self.sink.record(&LogRecord::global(format!(
            "shutting down, terminating {} active job(s)",
            ids.len()
        )));

        let mut cancelled = 0;
        for id in ids {
            match self.cancel(&id).await {
                Ok(CancelOutcome::Cancelled) => cancelled += 1,
                Ok(CancelOutcome::AlreadyInactive) | Err(EngineError::JobNotFound(_)) => {}
                Err(e) => warn!(job_id = %id, error = %e, "failed to cancel job during shutdown"),
            }
        }
        cancelled
    }
}

impl std::fmt::Debug for ProcessEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessEngine")
            .field("registry", &self.registry)
            .field("terminator", &self.terminator)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::NoopLogSink;

    fn engine() -> ProcessEngine {
        ProcessEngine::new(EngineSettings::with_defaults(), Arc::new(NoopLogSink))
    }

    #[tokio::test]
    async fn test_cancel_unknown_job() {
        let err = engine().cancel(&JobId::from("ghost")).await.unwrap_err();
        assert!(matches!(err, EngineError::JobNotFound(_)));
    }

    #[tokio::test]
    async fn test_cancel_pending_pipeline_before_poll() {
        let engine = engine();
        let pipeline = Pipeline::new("p")
            .with_id(JobId::from("pipe"))
            .stage(JobSpec::shell("S1", "echo never"));
        let stream = engine.run_pipeline(pipeline).unwrap();
        assert!(engine.registry().is_active(stream.job_id()));

        assert_eq!(
            engine.cancel(stream.job_id()).await.unwrap(),
            CancelOutcome::Cancelled
        );
        assert_eq!(
            engine.cancel(stream.job_id()).await.unwrap(),
            CancelOutcome::AlreadyInactive
        );

        let (lines, outcome) = stream.into_lines().await;
        assert_eq!(
            lines,
            vec![
                "===== S1 =====".to_string(),
                "S1 [INFO]: process was cancelled".to_string(),
                "===== pipeline finished =====".to_string(),
            ]
        );
        assert!(!outcome.unwrap().succeeded);
    }

    #[tokio::test]
    async fn test_duplicate_pipeline_id_rejected() {
        let engine = engine();
        let make = || {
            Pipeline::new("p")
                .with_id(JobId::from("same"))
                .stage(JobSpec::shell("S", "true"))
        };
        let _first = engine.run_pipeline(make()).unwrap();
        assert!(matches!(
            engine.run_pipeline(make()),
            Err(EngineError::DuplicateJob(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_pipeline_is_not_registered() {
        let engine = engine();
        let stream = engine.run_pipeline(Pipeline::new("empty")).unwrap();
        let id = stream.job_id().clone();
        let (lines, outcome) = stream.into_lines().await;

        assert_eq!(lines, vec!["===== pipeline finished ====="]);
        assert!(outcome.unwrap().succeeded);
        assert!(engine.registry().get(&id).is_none());
    }

    #[tokio::test]
    async fn test_shutdown_with_nothing_running() {
        assert_eq!(engine().shutdown_all().await, 0);
    }
}
