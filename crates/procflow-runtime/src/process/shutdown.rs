//! Process-group termination with SIGTERM → SIGKILL escalation.
//!
//! Children are spawned as leaders of their own process group, so the
//! group id equals the child's pid and signalling the group also reaches
//! anything the child started.

use std::io;
use std::time::Duration;

#[cfg(unix)]
use nix::errno::Errno;
#[cfg(unix)]
use nix::sys::signal::{Signal, killpg};
#[cfg(unix)]
use nix::unistd::Pid;
#[cfg(unix)]
use tokio::time::{Instant, sleep};
use tracing::debug;

/// Interval between liveness checks inside the grace window.
#[cfg(unix)]
const GROUP_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// How a termination request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Nothing left to signal.
    AlreadyGone,
    /// The group exited within the grace window.
    Graceful,
    /// The group had to be killed.
    Forced,
}

/// Stops a child and its descendants.
///
/// # Strategy
/// 1. Send SIGTERM to the whole process group
/// 2. Poll for up to `grace` for the group to disappear
/// 3. If anything is left, send SIGKILL to the group
///
/// # Platform behavior
/// - Unix: group-wide signals via `killpg`
/// - Windows: `taskkill /F /T`, which force-kills the child's tree with no
///   graceful phase; descendants that already detached may survive
///
/// Safe to call any number of times; a group that is already gone is
/// reported as [`Termination::AlreadyGone`], never as an error.
#[derive(Debug, Clone, Copy)]
pub struct TerminationController {
    grace: Duration,
}

impl TerminationController {
    pub const fn new(grace: Duration) -> Self {
        Self { grace }
    }

    pub const fn grace(&self) -> Duration {
        self.grace
    }

    pub async fn terminate(&self, pid: u32) -> io::Result<Termination> {
        #[cfg(unix)]
        {
            self.terminate_unix(pid).await
        }

        #[cfg(not(unix))]
        {
            self.terminate_windows(pid).await
        }
    }

    #[cfg(unix)]
    async fn terminate_unix(&self, pid: u32) -> io::Result<Termination> {
        let pgid = group_pid(pid)?;

        // Phase 1: SIGTERM to the group
        match killpg(pgid, Signal::SIGTERM) {
            Ok(()) => debug!(pid, "sent SIGTERM to process group"),
            Err(Errno::ESRCH) => return Ok(Termination::AlreadyGone),
            Err(e) => return Err(io::Error::other(e)),
        }

        // Grace window, exiting early once the group is empty
        let deadline = Instant::now() + self.grace;
        while Instant::now() < deadline {
            sleep(GROUP_POLL_INTERVAL).await;
            if !group_alive(pgid) {
                return Ok(Termination::Graceful);
            }
        }

        // Phase 2: SIGKILL
        match killpg(pgid, Signal::SIGKILL) {
            Ok(()) => {
                debug!(pid, "sent SIGKILL to process group");
                Ok(Termination::Forced)
            }
            Err(Errno::ESRCH) => Ok(Termination::Graceful),
            Err(e) => Err(io::Error::other(e)),
        }
    }

    #[cfg(not(unix))]
    async fn terminate_windows(&self, pid: u32) -> io::Result<Termination> {
        let status = tokio::process::Command::new("taskkill")
            .args(["/F", "/T", "/PID", &pid.to_string()])
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .await?;

        if status.success() {
            debug!(pid, "taskkill terminated process tree");
            Ok(Termination::Forced)
        } else {
            // taskkill fails when the pid no longer exists
            Ok(Termination::AlreadyGone)
        }
    }
}

#[cfg(unix)]
fn group_pid(pid: u32) -> io::Result<Pid> {
    i32::try_from(pid)
        .map(Pid::from_raw)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, format!("pid {pid} out of range")))
}

#[cfg(unix)]
fn group_alive(pgid: Pid) -> bool {
    // Null signal: existence check only. EPERM still means "exists".
    !matches!(killpg(pgid, None), Err(Errno::ESRCH))
}

/// Whether any process still belongs to the group led by `pid`.
#[cfg(unix)]
pub fn process_group_alive(pid: u32) -> bool {
    group_pid(pid).is_ok_and(group_alive)
}

/// Whether any process still belongs to the group led by `pid`.
///
/// Without process groups this can only be answered by the OS tooling the
/// engine does not depend on, so it conservatively reports `false`.
#[cfg(not(unix))]
pub fn process_group_alive(_pid: u32) -> bool {
    false
}
