//! Domain types for supervised jobs.

mod job;
mod outcome;
mod stream;

pub use job::{JobId, JobState, JobStatus, RegistrySnapshot};
pub use outcome::{JobOutcome, PipelineOutcome};
pub use stream::StreamKind;
