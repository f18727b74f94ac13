//! Log sink port for per-job output capture.
//!
//! This port abstracts the durable destination for job log events,
//! allowing different implementations for tests (noop / mock), the CLI
//! (tracing + daily files), and any future streaming adapter.

use crate::domain::JobId;

/// One event destined for the log sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub message: String,
    pub job_id: Option<JobId>,
    pub is_error: bool,
    pub is_progress: bool,
}

impl LogRecord {
    /// Informational event for a job.
    pub fn info(job_id: &JobId, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            job_id: Some(job_id.clone()),
            is_error: false,
            is_progress: false,
        }
    }

    /// Error event for a job.
    pub fn error(job_id: &JobId, message: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::info(job_id, message)
        }
    }

    /// Event not tied to any job.
    pub fn global(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            job_id: None,
            is_error: false,
            is_progress: false,
        }
    }

    #[must_use]
    pub const fn with_progress(mut self, progress: bool) -> Self {
        self.is_progress = progress;
        self
    }

    #[must_use]
    pub const fn with_error(mut self, error: bool) -> Self {
        self.is_error = error;
        self
    }
}

/// Port for durably recording job log events.
///
/// Implementations must be thread-safe and must never panic or block for
/// long: a failed write is the sink's problem, not the job's.
#[cfg_attr(test, mockall::automock)]
pub trait JobLogSink: Send + Sync {
    fn record(&self, record: &LogRecord);
}
