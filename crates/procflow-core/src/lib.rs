//! Core domain types and port definitions for procflow.
//!
//! This crate holds everything about a supervised job that does not touch
//! the operating system: job identity and lifecycle, output line
//! classification, engine settings, and the traits the runtime consumes
//! (the logging sink).
//!
//! Process spawning, pipe draining and signal delivery live in
//! `procflow-runtime`.

#![deny(unused_crate_dependencies)]

pub mod classify;
pub mod domain;
pub mod ports;
pub mod settings;

// Re-export commonly used types for convenience
pub use classify::{
    ClassifiedLine, LineTag, classify_line, format_line, is_progress_line, progress_key,
    strip_ansi,
};
pub use domain::{
    JobId, JobOutcome, JobState, JobStatus, PipelineOutcome, RegistrySnapshot, StreamKind,
};
pub use ports::{EngineError, JobLogSink, LogRecord};
pub use settings::{
    DEFAULT_EXIT_SETTLE_MS, DEFAULT_POLL_INTERVAL_MS, DEFAULT_PROGRESS_KEY_LEN,
    DEFAULT_TEARDOWN_TIMEOUT_SECS, DEFAULT_TERMINATION_GRACE_MS, DEFAULT_TIMEOUT_SECS,
    EngineSettings, SettingsError, validate_settings,
};

// Silence unused dev-dependency warnings for crates only used by some test modules
#[cfg(test)]
use serde_json as _;
