//! Job registry: the single source of truth for job lifecycle state.
//!
//! The registry is an ordinary value shared through `Arc`; every engine,
//! supervisor and pipeline receives it explicitly. All reads and writes go
//! through one mutex, so "is this job still active" has exactly one answer
//! at any moment.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use procflow_core::{EngineError, JobId, JobState, JobStatus, RegistrySnapshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug)]
struct JobEntry {
    label: String,
    pid: Option<u32>,
    state: JobState,
    /// Cancelled by the first cancel request; readers hold child tokens.
    token: CancellationToken,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
}

impl JobEntry {
    fn new(label: &str, state: JobState) -> Self {
        Self {
            label: label.to_string(),
            pid: None,
            state,
            token: CancellationToken::new(),
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    fn status(&self, id: &JobId) -> JobStatus {
        JobStatus {
            id: id.clone(),
            label: self.label.clone(),
            active: self.state.is_active(),
            pid: self.pid,
            state: self.state.clone(),
            started_at: self.started_at,
            ended_at: self.ended_at,
            exit_code: self.state.exit_code(),
        }
    }
}

/// How a supervisor obtains the pending entry its child will run under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    /// Claim the id itself before spawning; an inactive entry is replaced.
    Fresh,
    /// The entry was pre-registered as pending by a pipeline.
    Reserved,
}

/// Result of a cancel request against a known job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelRequest {
    /// Process to terminate, if the job had a running child.
    pub pid: Option<u32>,
    /// `true` only for the request that moved the job out of an active state.
    pub first: bool,
}

/// Thread-safe table of jobs keyed by id.
#[derive(Debug)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<JobId, JobEntry>>,
    created: Instant,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            created: Instant::now(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, JobEntry>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `id` as pending before any process exists.
    ///
    /// Used by pipelines so a cancel issued before the first stage starts
    /// is honoured. Fails with [`EngineError::DuplicateJob`] if the id is
    /// already active.
    pub fn register_pending(&self, id: &JobId, label: &str) -> Result<(), EngineError> {
        let mut jobs = self.lock();
        if jobs.get(id).is_some_and(|entry| entry.state.is_active()) {
            return Err(EngineError::DuplicateJob(id.clone()));
        }
        jobs.insert(id.clone(), JobEntry::new(label, JobState::Pending));
        debug!(job_id = %id, "registered pending job");
        Ok(())
    }

    /// Move the pending entry `id` to running with `pid` and hand back its
    /// cancel token.
    ///
    /// Fails with [`EngineError::Cancelled`] if a cancel landed while the
    /// child was being spawned.
    pub(crate) fn begin(
        &self,
        id: &JobId,
        label: &str,
        pid: Option<u32>,
    ) -> Result<CancellationToken, EngineError> {
        let mut jobs = self.lock();
        let entry = jobs
            .get_mut(id)
            .ok_or_else(|| EngineError::JobNotFound(id.clone()))?;

        if entry.token.is_cancelled() || !matches!(entry.state, JobState::Pending) {
            return Err(EngineError::Cancelled(id.clone()));
        }
        entry.label = label.to_string();
        entry.pid = pid;
        entry.state = JobState::Running { pid };
        debug!(job_id = %id, ?pid, "job running");
        Ok(entry.token.clone())
    }

    /// Drop a pending claim whose process never started.
    pub(crate) fn discard_pending(&self, id: &JobId) {
        let mut jobs = self.lock();
        if jobs
            .get(id)
            .is_some_and(|entry| matches!(entry.state, JobState::Pending))
        {
            jobs.remove(id);
        }
    }

    /// Whether `id` is registered and still pending or running.
    pub fn is_active(&self, id: &JobId) -> bool {
        self.lock()
            .get(id)
            .is_some_and(|entry| entry.state.is_active())
    }

    /// Whether a cancel request has been made for `id`.
    pub fn is_cancelled(&self, id: &JobId) -> bool {
        self.lock()
            .get(id)
            .is_some_and(|entry| entry.token.is_cancelled())
    }

    /// Record the terminal state reported by the supervisor.
    ///
    /// A job already marked cancelled stays cancelled; only its exit code is
    /// filled in. Returns the state actually stored.
    pub(crate) fn finish(&self, id: &JobId, state: JobState) -> Option<JobState> {
        let mut jobs = self.lock();
        let entry = jobs.get_mut(id)?;

        entry.state = match entry.state {
            JobState::Cancelled { .. } => JobState::Cancelled {
                exit_code: state.exit_code(),
            },
            _ => state,
        };
        entry.ended_at = Some(Utc::now());
        debug!(job_id = %id, state = %entry.state, "job finished");
        Some(entry.state.clone())
    }

    /// Mark a pre-registered job as failed to start.
    pub(crate) fn fail(&self, id: &JobId, reason: impl Into<String>) {
        if let Some(entry) = self.lock().get_mut(id)
            && entry.state.is_active()
        {
            entry.state = JobState::Failed {
                reason: reason.into(),
            };
            entry.ended_at = Some(Utc::now());
        }
    }

    /// Return a finished entry to pending so the next pipeline stage can
    /// claim it.
    pub(crate) fn reopen(&self, id: &JobId) -> Result<(), EngineError> {
        let mut jobs = self.lock();
        let entry = jobs
            .get_mut(id)
            .ok_or_else(|| EngineError::JobNotFound(id.clone()))?;

        if entry.token.is_cancelled() || matches!(entry.state, JobState::Cancelled { .. }) {
            return Err(EngineError::Cancelled(id.clone()));
        }
        if matches!(entry.state, JobState::Running { .. }) {
            return Err(EngineError::StillActive(id.clone()));
        }

        entry.state = JobState::Pending;
        entry.pid = None;
        entry.ended_at = None;
        Ok(())
    }

    /// Flag `id` as cancelled.
    ///
    /// Cancels the job's token on every call; only the call that finds the
    /// job active changes its state. The caller is responsible for
    /// terminating the returned pid.
    pub fn request_cancel(&self, id: &JobId) -> Result<CancelRequest, EngineError> {
        let mut jobs = self.lock();
        let entry = jobs
            .get_mut(id)
            .ok_or_else(|| EngineError::JobNotFound(id.clone()))?;

        entry.token.cancel();

        let first = entry.state.is_active();
        let pid = match entry.state {
            JobState::Running { pid } => pid,
            _ => None,
        };
        if first {
            if matches!(entry.state, JobState::Pending) {
                entry.ended_at = Some(Utc::now());
            }
            entry.state = JobState::Cancelled { exit_code: None };
        }

        Ok(CancelRequest { pid, first })
    }

    /// Forget a finished job.
    pub fn remove(&self, id: &JobId) -> Result<JobStatus, EngineError> {
        let mut jobs = self.lock();
        match jobs.get(id) {
            None => Err(EngineError::JobNotFound(id.clone())),
            Some(entry) if entry.state.is_active() => Err(EngineError::StillActive(id.clone())),
            Some(_) => {
                let entry = jobs
                    .remove(id)
                    .ok_or_else(|| EngineError::JobNotFound(id.clone()))?;
                Ok(entry.status(id))
            }
        }
    }

    pub fn get(&self, id: &JobId) -> Option<JobStatus> {
        self.lock().get(id).map(|entry| entry.status(id))
    }

    /// Snapshot of all jobs, oldest first.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let jobs = self.lock();
        let mut statuses: Vec<JobStatus> = jobs.iter().map(|(id, e)| e.status(id)).collect();
        drop(jobs);

        statuses.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.id.as_str().cmp(b.id.as_str()))
        });

        RegistrySnapshot {
            uptime_secs: self.created.elapsed().as_secs_f64(),
            active_count: statuses.iter().filter(|s| s.active).count(),
            total: statuses.len(),
            jobs: statuses,
        }
    }

    /// Ids of all active jobs.
    pub fn active_ids(&self) -> Vec<JobId> {
        self.lock()
            .iter()
            .filter(|(_, entry)| entry.state.is_active())
            .map(|(id, _)| id.clone())
            .collect()
    }
}
