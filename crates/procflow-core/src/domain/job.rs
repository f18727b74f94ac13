//! Job identity and lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque job identifier, stable for the lifetime of a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generate a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Lifecycle of a job.
///
/// ```text
/// Pending ──> Running ──> Completed | Cancelled | TimedOut | Failed
///    └──────────────────> Cancelled | Failed
/// ```
///
/// Exit codes only exist on terminal variants; a running job has none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobState {
    /// Registered but no process launched yet (or between pipeline stages).
    Pending,
    /// Child process launched.
    Running { pid: Option<u32> },
    /// Child exited on its own and both streams were drained.
    Completed { exit_code: i32 },
    /// Stopped by an external cancel request.
    Cancelled { exit_code: Option<i32> },
    /// Stopped because the deadline passed.
    TimedOut { exit_code: Option<i32> },
    /// The process could not be started.
    Failed { reason: String },
}

impl JobState {
    /// Whether the job may still produce output.
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Running { .. })
    }

    pub const fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// Exit code recorded for a terminal state.
    pub const fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Completed { exit_code } => Some(*exit_code),
            Self::Cancelled { exit_code } | Self::TimedOut { exit_code } => *exit_code,
            Self::Pending | Self::Running { .. } | Self::Failed { .. } => None,
        }
    }

    /// Whether the job ran to completion with exit code zero.
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Completed { exit_code: 0 })
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running { .. } => "running",
            Self::Completed { .. } => "completed",
            Self::Cancelled { .. } => "cancelled",
            Self::TimedOut { .. } => "timed_out",
            Self::Failed { .. } => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.exit_code() {
            Some(code) => write!(f, "{} (exit code {code})", self.name()),
            None => f.write_str(self.name()),
        }
    }
}

/// Read-only view of one registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub id: JobId,
    pub label: String,
    pub active: bool,
    pub pid: Option<u32>,
    pub state: JobState,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
}

/// Snapshot of every job the registry knows about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    /// Seconds since the registry was created.
    pub uptime_secs: f64,
    pub active_count: usize,
    pub total: usize,
    pub jobs: Vec<JobStatus>,
}
