//! Job supervision: spawn, drain, time out, cancel, tear down.
//!
//! [`ProcessSupervisor::start_job`] returns a [`JobStream`], a lazy stream
//! of formatted output lines. Nothing happens until the stream is first
//! polled. The final [`JobOutcome`] becomes readable only after the stream
//! has returned `None`.

use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use async_stream::stream;
use chrono::Utc;
use futures_core::Stream;
use futures_util::StreamExt;
use procflow_core::{
    EngineSettings, JobId, JobLogSink, JobOutcome, JobState, LineTag, LogRecord, StreamKind,
    format_line,
};
use tokio::io::AsyncRead;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use super::handle::ProcessHandle;
use super::reader::spawn_output_reader;
use super::shutdown::{TerminationController, process_group_alive};
use super::spawn::{JobSpec, spawn_process};
use crate::registry::{Admission, JobRegistry};

pub(crate) const CANCELLED_MESSAGE: &str = "process was cancelled";
const NO_OUTPUT_MESSAGE: &str = "process produced no output";

/// Why the consumer loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ending {
    Finished,
    TimedOut,
    Cancelled,
}

/// Lazy stream of one job's formatted output lines.
///
/// Dropping the stream before it ends stops the job: the handle is
/// deactivated, the process group is terminated in the background, and
/// the registry entry is marked cancelled.
pub struct JobStream {
    job_id: JobId,
    inner: Pin<Box<dyn Stream<Item = String> + Send>>,
    outcome: Arc<OnceLock<JobOutcome>>,
}

impl JobStream {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Final outcome; `None` until the stream has been exhausted.
    pub fn outcome(&self) -> Option<&JobOutcome> {
        self.outcome.get()
    }

    /// Drive the stream to the end, collecting every line.
    pub async fn into_lines(mut self) -> (Vec<String>, Option<JobOutcome>) {
        let mut lines = Vec::new();
        while let Some(line) = self.next().await {
            lines.push(line);
        }
        (lines, self.outcome.get().cloned())
    }
}

impl std::fmt::Debug for JobStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobStream")
            .field("job_id", &self.job_id)
            .field("finished", &self.outcome.get().is_some())
            .finish_non_exhaustive()
    }
}

impl Stream for JobStream {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<String>> {
        self.inner.as_mut().poll_next(cx)
    }
}

/// Process group to signal when a job ends.
///
/// After a natural exit the leader has been reaped and its pgid may already
/// belong to someone else, so a finished job's group is only signalled while
/// it still has members.
fn teardown_group(ending: Ending, pid: Option<u32>) -> Option<u32> {
    pid.filter(|pid| ending != Ending::Finished || process_group_alive(*pid))
}

/// Stops a job whose stream was dropped mid-run.
struct InterruptGuard {
    id: JobId,
    handle: Arc<ProcessHandle>,
    registry: Arc<JobRegistry>,
    terminator: TerminationController,
    sink: Arc<dyn JobLogSink>,
    armed: bool,
}

impl InterruptGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        warn!(job_id = %self.id, "job stream dropped before completion");
        self.sink.record(&LogRecord::error(
            &self.id,
            "output stream closed before the job finished, job interrupted",
        ));
        self.handle.deactivate();
        self.registry
            .finish(&self.id, JobState::Cancelled { exit_code: None });

        if let Some(pid) = self.handle.pid()
            && let Ok(runtime) = tokio::runtime::Handle::try_current()
        {
            let terminator = self.terminator;
            runtime.spawn(async move {
                if let Err(e) = terminator.terminate(pid).await {
                    warn!(pid, error = %e, "failed to terminate interrupted job");
                }
            });
        }
    }
}

/// Launches jobs and turns their output into [`JobStream`]s.
#[derive(Clone)]
pub struct ProcessSupervisor {
    registry: Arc<JobRegistry>,
    settings: Arc<EngineSettings>,
    terminator: TerminationController,
    sink: Arc<dyn JobLogSink>,
}

impl ProcessSupervisor {
    pub fn new(
        registry: Arc<JobRegistry>,
        settings: Arc<EngineSettings>,
        sink: Arc<dyn JobLogSink>,
    ) -> Self {
        let terminator = TerminationController::new(settings.termination_grace());
        Self {
            registry,
            settings,
            terminator,
            sink,
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub const fn terminator(&self) -> TerminationController {
        self.terminator
    }

    /// Start a job under a fresh registry entry.
    pub fn start_job(&self, spec: JobSpec) -> JobStream {
        self.launch(spec, Admission::Fresh)
    }

    pub(crate) fn launch(&self, mut spec: JobSpec, admission: Admission) -> JobStream {
        let id = spec.id.take().unwrap_or_default();
        let outcome = Arc::new(OnceLock::new());

        let inner = Self::run(
            id.clone(),
            spec,
            admission,
            self.clone(),
            Arc::clone(&outcome),
        );

        JobStream {
            job_id: id,
            inner: Box::pin(inner),
            outcome,
        }
    }

    #[allow(clippy::too_many_lines)]
    fn run(
        id: JobId,
        spec: JobSpec,
        admission: Admission,
        this: Self,
        outcome: Arc<OnceLock<JobOutcome>>,
    ) -> impl Stream<Item = String> + Send {
        stream! {
            let Self { registry, settings, terminator, sink } = this;
            let label = spec.label.clone();
            let timeout_secs = spec
                .timeout_secs
                .unwrap_or_else(|| settings.default_timeout().as_secs());
            let requested_at = Utc::now();

            let unstarted = |state: JobState| JobOutcome {
                job_id: id.clone(),
                label: label.clone(),
                pid: None,
                state,
                stdout: String::new(),
                stderr: String::new(),
                started_at: requested_at,
                ended_at: Utc::now(),
            };

            // Claim the id before anything runs so a rejected job has no side effects
            if admission == Admission::Fresh
                && let Err(e) = registry.register_pending(&id, &label)
            {
                warn!(job_id = %id, error = %e, "job rejected before start");
                sink.record(&LogRecord::error(&id, e.to_string()));
                yield format_line(&label, LineTag::Error, &e.to_string());
                let _ = outcome.set(unstarted(JobState::Failed { reason: e.to_string() }));
                return;
            }

            if registry.is_cancelled(&id) {
                sink.record(&LogRecord::info(&id, CANCELLED_MESSAGE));
                yield format_line(&label, LineTag::Info, CANCELLED_MESSAGE);
                let _ = outcome.set(unstarted(JobState::Cancelled { exit_code: None }));
                return;
            }

            let mut child = match spawn_process(&spec) {
                Ok(child) => child,
                Err(e) => {
                    let reason = e.os_error().map_or_else(|| e.to_string(), ToString::to_string);
                    warn!(job_id = %id, program = %spec.program, error = %e, "failed to start process");
                    sink.record(&LogRecord::error(&id, format!("failed to start process: {reason}")));
                    match admission {
                        Admission::Fresh => registry.discard_pending(&id),
                        Admission::Reserved => registry.fail(&id, reason.clone()),
                    }
                    yield format_line(&label, LineTag::Error, &format!("failed to start process: {reason}"));
                    let _ = outcome.set(unstarted(JobState::Failed { reason }));
                    return;
                }
            };

            let pid = child.id();
            let job_token = match registry.begin(&id, &label, pid) {
                Ok(token) => token,
                Err(e) => {
                    warn!(job_id = %id, error = %e, "job not admitted, stopping its process");
                    if let Some(pid) = pid
                        && let Err(err) = terminator.terminate(pid).await
                    {
                        warn!(pid, error = %err, "failed to terminate unadmitted process");
                    }
                    drop(child);

                    let state = if matches!(e, procflow_core::EngineError::Cancelled(_)) {
                        yield format_line(&label, LineTag::Info, CANCELLED_MESSAGE);
                        JobState::Cancelled { exit_code: None }
                    } else {
                        yield format_line(&label, LineTag::Error, &e.to_string());
                        JobState::Failed { reason: e.to_string() }
                    };
                    let _ = outcome.set(JobOutcome { pid, ..unstarted(state) });
                    return;
                }
            };

            info!(job_id = %id, ?pid, program = %spec.program, "process started");
            sink.record(&LogRecord::info(
                &id,
                format!("started process {pid:?}: {} {}", spec.program, spec.args.join(" ")),
            ));

            let stdout: Box<dyn AsyncRead + Unpin + Send> = match child.stdout.take() {
                Some(out) => Box::new(out),
                None => Box::new(tokio::io::empty()),
            };
            let stderr: Box<dyn AsyncRead + Unpin + Send> = match child.stderr.take() {
                Some(err) => Box::new(err),
                None => Box::new(tokio::io::empty()),
            };
            let handle = ProcessHandle::new(
                id.clone(),
                label.clone(),
                child,
                job_token.child_token(),
                settings.progress_key_len(),
            );

            spawn_output_reader(stdout, StreamKind::Stdout, Arc::clone(&handle), Arc::clone(&sink));
            spawn_output_reader(stderr, StreamKind::Stderr, Arc::clone(&handle), Arc::clone(&sink));

            let mut guard = InterruptGuard {
                id: id.clone(),
                handle: Arc::clone(&handle),
                registry: Arc::clone(&registry),
                terminator,
                sink: Arc::clone(&sink),
                armed: true,
            };

            let deadline = Instant::now() + std::time::Duration::from_secs(timeout_secs);
            let poll = settings.poll_interval();
            let mut emitted = 0_usize;
            let mut progress_lines = 0_usize;
            let mut error_lines = 0_usize;

            let ending = loop {
                let (items, done) = handle.drain();
                let drained = !items.is_empty();
                for item in items {
                    emitted += 1;
                    error_lines += usize::from(item.error);
                    yield item.line;
                }

                // A cancel request wins over a concurrent natural exit
                let ending = if job_token.is_cancelled() || !registry.is_active(&id) {
                    Some(Ending::Cancelled)
                } else if done && !drained {
                    Some(Ending::Finished)
                } else if Instant::now() >= deadline {
                    Some(Ending::TimedOut)
                } else {
                    None
                };

                if let Some(ending) = ending {
                    // Progress is only ever shown as the final state of each meter
                    for line in handle.progress_snapshot() {
                        emitted += 1;
                        progress_lines += 1;
                        yield line;
                    }

                    match ending {
                        Ending::Cancelled => {
                            info!(job_id = %id, "job cancelled");
                            sink.record(&LogRecord::info(&id, CANCELLED_MESSAGE));
                            yield format_line(&label, LineTag::Info, CANCELLED_MESSAGE);
                        }
                        Ending::TimedOut => {
                            let message = format!("process timed out ({timeout_secs}s)");
                            warn!(job_id = %id, timeout_secs, "job timed out");
                            sink.record(&LogRecord::error(&id, message.clone()));
                            yield format_line(&label, LineTag::Error, &message);
                        }
                        Ending::Finished => {}
                    }
                    break ending;
                }

                if !drained {
                    tokio::select! {
                        () = handle.notified() => {}
                        () = job_token.cancelled() => {}
                        () = sleep(poll) => {}
                    }

                    if !handle.all_done() && handle.child_exited() {
                        debug!(job_id = %id, "process exited, waiting for readers to drain");
                        sleep(settings.exit_settle()).await;
                    }
                }
            };

            if ending == Ending::Finished && emitted == 0 {
                sink.record(&LogRecord::info(&id, NO_OUTPUT_MESSAGE));
                yield format_line(&label, LineTag::Warning, NO_OUTPUT_MESSAGE);
            }

            // Teardown
            handle.deactivate();
            if let Some(pid) = teardown_group(ending, handle.pid()) {
                match terminator.terminate(pid).await {
                    Ok(result) => debug!(job_id = %id, pid, ?result, "process group terminated"),
                    Err(e) => {
                        warn!(job_id = %id, pid, error = %e, "failed to terminate process group");
                        sink.record(&LogRecord::error(&id, format!("termination failed: {e}")));
                    }
                }
            }
            if !handle.wait_all_done(settings.teardown_timeout()).await {
                warn!(job_id = %id, "readers still busy after teardown");
            }

            let exit_code = handle.exit_code();
            let state = match ending {
                Ending::Finished => JobState::Completed { exit_code: exit_code.unwrap_or(-1) },
                Ending::TimedOut => JobState::TimedOut { exit_code },
                Ending::Cancelled => JobState::Cancelled { exit_code },
            };
            let state = registry.finish(&id, state.clone()).unwrap_or(state);
            guard.disarm();

            info!(job_id = %id, state = %state, lines = emitted, "job finished");
            sink.record(&LogRecord::info(
                &id,
                format!(
                    "job finished: {state}, {emitted} lines ({progress_lines} progress, {error_lines} stderr)"
                ),
            ));

            let (stdout, stderr) = handle.captured();
            let _ = outcome.set(JobOutcome {
                job_id: id.clone(),
                label: label.clone(),
                pid: handle.pid(),
                state,
                stdout,
                stderr,
                started_at: handle.started_at(),
                ended_at: handle.ended_at().unwrap_or_else(Utc::now),
            });
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::logs::NoopLogSink;
    use crate::process::Termination;

    fn supervisor() -> ProcessSupervisor {
        ProcessSupervisor::new(
            Arc::new(JobRegistry::new()),
            Arc::new(EngineSettings::with_defaults()),
            Arc::new(NoopLogSink),
        )
    }

    #[tokio::test]
    async fn test_stream_is_lazy() {
        let supervisor = supervisor();
        let stream = supervisor.start_job(JobSpec::shell("T", "echo hi"));
        // Not polled yet: nothing registered
        assert!(supervisor.registry().get(stream.job_id()).is_none());
        assert!(stream.outcome().is_none());
    }

    #[tokio::test]
    async fn test_outcome_after_exhaustion() {
        let supervisor = supervisor();
        let mut stream = supervisor.start_job(JobSpec::shell("T", "echo one; echo two"));

        let first = stream.next().await;
        assert_eq!(first.as_deref(), Some("T [OUT]: one"));
        assert!(stream.outcome().is_none());

        while stream.next().await.is_some() {}
        let outcome = stream.outcome().unwrap();
        assert_eq!(outcome.exit_code(), Some(0));
        assert_eq!(outcome.stdout, "one\ntwo");
        assert!(outcome.pid.is_some());
    }

    #[tokio::test]
    async fn test_silent_process_warns() {
        let (lines, outcome) = supervisor()
            .start_job(JobSpec::shell("Quiet", "exit 0"))
            .into_lines()
            .await;
        assert_eq!(lines, vec!["Quiet [WARNING]: process produced no output"]);
        assert!(outcome.unwrap().is_success());
    }

    #[tokio::test]
    async fn test_signal_exit_is_negative() {
        let (_, outcome) = supervisor()
            .start_job(JobSpec::shell("Sig", "echo x; kill -9 $$"))
            .into_lines()
            .await;
        assert_eq!(outcome.unwrap().exit_code(), Some(-9));
    }

    fn spawn_group(script: &str) -> tokio::process::Child {
        tokio::process::Command::new("sh")
            .args(["-c", script])
            .process_group(0)
            .spawn()
            .expect("failed to spawn sh")
    }

    #[tokio::test]
    async fn test_teardown_skips_empty_group_after_exit() {
        let mut child = spawn_group("exit 0");
        let pid = child.id().unwrap();
        child.wait().await.unwrap();

        assert_eq!(teardown_group(Ending::Finished, Some(pid)), None);
        assert_eq!(teardown_group(Ending::Cancelled, Some(pid)), Some(pid));
        assert_eq!(teardown_group(Ending::TimedOut, Some(pid)), Some(pid));
        assert_eq!(teardown_group(Ending::Finished, None), None);
    }

    #[tokio::test]
    async fn test_teardown_reaches_leftover_group_members() {
        let mut child = spawn_group("sleep 30 & exit 0");
        let pid = child.id().unwrap();
        child.wait().await.unwrap();

        assert_eq!(teardown_group(Ending::Finished, Some(pid)), Some(pid));
        let result = TerminationController::new(std::time::Duration::from_millis(200))
            .terminate(pid)
            .await
            .unwrap();
        assert_ne!(result, Termination::AlreadyGone);
    }

    #[tokio::test]
    async fn test_dropped_stream_marks_job_cancelled() {
        let supervisor = supervisor();
        let mut stream = supervisor.start_job(JobSpec::shell("D", "echo go; exec sleep 30"));
        let id = stream.job_id().clone();

        assert_eq!(stream.next().await.as_deref(), Some("D [OUT]: go"));
        let pid = supervisor.registry().get(&id).unwrap().pid.unwrap();
        drop(stream);

        let status = supervisor.registry().get(&id).unwrap();
        assert!(!status.active);
        assert_eq!(status.state.name(), "cancelled");

        let mut gone = false;
        for _ in 0..40 {
            if !crate::process::process_group_alive(pid) {
                gone = true;
                break;
            }
            sleep(std::time::Duration::from_millis(50)).await;
        }
        assert!(gone, "process group {pid} survived a dropped stream");
    }
}
