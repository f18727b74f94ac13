//! Port definitions (trait abstractions) for external collaborators.
//!
//! Ports define the interfaces the engine expects from infrastructure.
//! They contain no implementation details and use only domain types.

pub mod log_sink;

use std::io;
use thiserror::Error;

use crate::domain::JobId;

pub use log_sink::{JobLogSink, LogRecord};

/// Domain-specific errors for engine operations.
///
/// Failures that happen *inside* a running job (pipe read errors, signal
/// delivery) are logged and folded into the job's terminal state instead;
/// only request-level failures surface as this type.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The OS refused to create the process.
    #[error("failed to start process `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// No job with this id is registered.
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    /// A job with this id is already registered and active.
    #[error("Job already registered: {0}")]
    DuplicateJob(JobId),

    /// The job is still running and cannot be removed.
    #[error("Job still active: {0}")]
    StillActive(JobId),

    /// The job was cancelled before the requested transition.
    #[error("Job cancelled: {0}")]
    Cancelled(JobId),

    /// A start request carried no program to run.
    #[error("Empty command")]
    EmptyCommand,
}

impl EngineError {
    /// The underlying OS error for spawn failures.
    pub fn os_error(&self) -> Option<&io::Error> {
        match self {
            Self::Spawn { source, .. } => Some(source),
            _ => None,
        }
    }
}
