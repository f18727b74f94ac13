//! Process supervision runtime for procflow.
//!
//! Launches child processes in their own process groups, drains stdout and
//! stderr concurrently, and exposes each job as a lazy, cancellable stream
//! of classified lines.
//!
//! ```no_run
//! use std::sync::Arc;
//! use futures_util::StreamExt;
//! use procflow_core::EngineSettings;
//! use procflow_runtime::{JobSpec, ProcessEngine, TracingLogSink};
//!
//! # async fn demo() {
//! let engine = ProcessEngine::new(EngineSettings::with_defaults(), Arc::new(TracingLogSink));
//! let mut job = engine.start_job(JobSpec::shell("Build", "make all").with_timeout(600));
//! while let Some(line) = job.next().await {
//!     println!("{line}");
//! }
//! let exit_code = job.outcome().and_then(|o| o.exit_code());
//! # }
//! ```

#![deny(unsafe_code)]

mod engine;
pub mod logs;
mod pipeline;
pub mod process;
mod registry;

pub use engine::{CancelOutcome, ProcessEngine};
pub use logs::{FileLogSink, NoopLogSink, TeeLogSink, TracingLogSink, format_log_line};
pub use pipeline::{PIPELINE_FINISHED, Pipeline, PipelineStream, stage_header};
pub use process::{
    JobSpec, JobStream, ProcessSupervisor, Termination, TerminationController,
    process_group_alive, spawn_process,
};
pub use registry::{CancelRequest, JobRegistry};
