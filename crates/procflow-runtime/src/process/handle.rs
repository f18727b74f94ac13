//! Shared state for one launched child process.
//!
//! A `ProcessHandle` is shared between the two stream readers and the
//! consumer loop. Every mutable field sits behind one mutex; the `Notify`
//! and the stop token are only used to wake tasks up.

use std::process::ExitStatus;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use procflow_core::{ClassifiedLine, JobId, StreamKind, progress_key};
use tokio::process::Child;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// One plain or error line waiting for the consumer.
///
/// Progress lines never enter the queue; they only update the progress
/// table, which is flushed once when the job ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct QueueItem {
    pub line: String,
    pub error: bool,
}

#[derive(Debug, Default)]
struct HandleState {
    active: bool,
    queue: Vec<QueueItem>,
    stdout_lines: Vec<String>,
    stderr_lines: Vec<String>,
    /// Latest formatted line per progress key, in first-seen key order.
    progress: IndexMap<String, String>,
    stdout_done: bool,
    stderr_done: bool,
    all_done: bool,
    exit_code: Option<i32>,
    ended_at: Option<DateTime<Utc>>,
}

pub(crate) struct ProcessHandle {
    id: JobId,
    label: String,
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    progress_key_len: usize,
    child: tokio::sync::Mutex<Child>,
    state: Mutex<HandleState>,
    wake: Notify,
    stop: CancellationToken,
}

impl ProcessHandle {
    pub fn new(
        id: JobId,
        label: String,
        child: Child,
        stop: CancellationToken,
        progress_key_len: usize,
    ) -> Arc<Self> {
        let pid = child.id();
        Arc::new(Self {
            id,
            label,
            pid,
            started_at: Utc::now(),
            progress_key_len,
            child: tokio::sync::Mutex::new(child),
            state: Mutex::new(HandleState {
                active: true,
                ..HandleState::default()
            }),
            wake: Notify::new(),
            stop,
        })
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn stop_token(&self) -> &CancellationToken {
        &self.stop
    }

    fn lock(&self) -> MutexGuard<'_, HandleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    /// Record one classified line read from `stream`.
    ///
    /// Returns `false` (and records nothing) once the handle is inactive.
    pub fn publish(&self, stream: StreamKind, raw: &str, line: &ClassifiedLine) -> bool {
        {
            let mut state = self.lock();
            if !state.active {
                return false;
            }

            if line.progress {
                let key = progress_key(raw, self.progress_key_len);
                state.progress.insert(key, line.formatted.clone());
            } else {
                match stream {
                    StreamKind::Stdout => state.stdout_lines.push(raw.to_string()),
                    StreamKind::Stderr => state.stderr_lines.push(raw.to_string()),
                }
                state.queue.push(QueueItem {
                    line: line.formatted.clone(),
                    error: stream.is_error(),
                });
            }
        }
        self.wake.notify_one();
        true
    }

    /// Mark `stream` as fully read.
    ///
    /// Returns `true` for exactly one caller: the one that observed both
    /// streams finished. That caller must then call [`Self::record_exit`].
    pub fn mark_stream_done(&self, stream: StreamKind) -> bool {
        let mut state = self.lock();
        let already_both = state.stdout_done && state.stderr_done;
        match stream {
            StreamKind::Stdout => state.stdout_done = true,
            StreamKind::Stderr => state.stderr_done = true,
        }
        !already_both && state.stdout_done && state.stderr_done
    }

    /// Wait for the child to exit and return its exit code.
    ///
    /// Signals are reported as the negated signal number.
    pub async fn wait_exit_code(&self) -> Option<i32> {
        let mut child = self.child.lock().await;
        child.wait().await.ok().map(exit_code_of)
    }

    /// Non-blocking check whether the OS reports the child as exited.
    pub fn child_exited(&self) -> bool {
        self.child
            .try_lock()
            .is_ok_and(|mut child| matches!(child.try_wait(), Ok(Some(_))))
    }

    /// Record the exit code and flag the job all-done. Only the first call counts.
    pub fn record_exit(&self, exit_code: Option<i32>) {
        {
            let mut state = self.lock();
            if state.all_done {
                return;
            }
            state.exit_code = exit_code;
            state.all_done = true;
            state.ended_at = Some(Utc::now());
        }
        self.wake.notify_one();
    }

    pub fn all_done(&self) -> bool {
        self.lock().all_done
    }

    /// Take everything queued so far, plus whether the job was all-done at
    /// the moment of the drain.
    pub fn drain(&self) -> (Vec<QueueItem>, bool) {
        let mut state = self.lock();
        (std::mem::take(&mut state.queue), state.all_done)
    }

    /// Latest line for every progress key.
    pub fn progress_snapshot(&self) -> Vec<String> {
        self.lock().progress.values().cloned().collect()
    }

    /// Stop accepting output and release both readers.
    pub fn deactivate(&self) {
        self.lock().active = false;
        self.stop.cancel();
        self.wake.notify_one();
    }

    /// Wait for the next publish/exit signal.
    pub async fn notified(&self) {
        self.wake.notified().await;
    }

    /// Wait until all-done, at most `limit`. Returns whether it happened.
    pub async fn wait_all_done(&self, limit: Duration) -> bool {
        let wait = async {
            while !self.all_done() {
                self.wake.notified().await;
            }
        };
        tokio::time::timeout(limit, wait).await.is_ok()
    }

    /// Exit code, only once all-done.
    pub fn exit_code(&self) -> Option<i32> {
        let state = self.lock();
        if state.all_done { state.exit_code } else { None }
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.lock().ended_at
    }

    /// Captured (stdout, stderr) text, non-progress lines joined by `\n`.
    pub fn captured(&self) -> (String, String) {
        let state = self.lock();
        (state.stdout_lines.join("\n"), state.stderr_lines.join("\n"))
    }
}

#[cfg(unix)]
fn exit_code_of(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    status
        .code()
        .or_else(|| status.signal().map(|signal| -signal))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code_of(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}
