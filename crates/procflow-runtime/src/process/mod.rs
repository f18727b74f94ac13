//! Process supervision for a single job.
//!
//! # Structure
//!
//! - `spawn` - `JobSpec` and child creation in its own process group
//! - `handle` - shared per-job state (queue, progress table, exit code)
//! - `reader` - per-stream workers draining stdout/stderr
//! - `supervisor` - the consumer loop behind `JobStream`
//! - `shutdown` - SIGTERM → SIGKILL escalation over the process group

mod handle;
mod reader;
pub mod shutdown;
mod spawn;
mod supervisor;

pub use shutdown::{Termination, TerminationController, process_group_alive};
pub use spawn::{JobSpec, spawn_process};
pub(crate) use supervisor::CANCELLED_MESSAGE;
pub use supervisor::{JobStream, ProcessSupervisor};
