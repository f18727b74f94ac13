//! Job requests and child process creation.

use std::path::PathBuf;
use std::process::Stdio;

use procflow_core::{EngineError, JobId};
use serde::{Deserialize, Serialize};
use tokio::process::{Child, Command};
use tracing::debug;

/// A request to run one external command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Job id to run under; a fresh one is generated when absent.
    #[serde(default)]
    pub id: Option<JobId>,
    /// Tag prefixing every emitted line.
    pub label: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Extra environment variables on top of the inherited environment.
    #[serde(default)]
    pub envs: Vec<(String, String)>,
    /// Overrides the engine's default timeout.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl JobSpec {
    pub fn new(label: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            id: None,
            label: label.into(),
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            envs: Vec::new(),
            timeout_secs: None,
        }
    }

    /// Run `script` through `sh -c`.
    pub fn shell(label: impl Into<String>, script: impl Into<String>) -> Self {
        Self::new(label, "sh").with_args(["-c".to_string(), script.into()])
    }

    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    #[must_use]
    pub fn with_id(mut self, id: JobId) -> Self {
        self.id = Some(id);
        self
    }
}

/// Spawn the child described by `spec`.
///
/// The child gets:
/// - a null stdin and piped stdout/stderr
/// - its own process group (Unix) so termination reaches its descendants
/// - `kill_on_drop`, so an abandoned handle never leaks the direct child
///
/// # Errors
///
/// Returns [`EngineError::EmptyCommand`] for a blank program and
/// [`EngineError::Spawn`] when the OS refuses to create the process.
pub fn spawn_process(spec: &JobSpec) -> Result<Child, EngineError> {
    if spec.program.trim().is_empty() {
        return Err(EngineError::EmptyCommand);
    }

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(cwd) = &spec.cwd {
        cmd.current_dir(cwd);
    }
    for (key, value) in &spec.envs {
        cmd.env(key, value);
    }

    #[cfg(unix)]
    cmd.process_group(0);

    #[cfg(windows)]
    {
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
    }

    let child = cmd.spawn().map_err(|source| EngineError::Spawn {
        program: spec.program.clone(),
        source,
    })?;

    debug!(program = %spec.program, pid = ?child.id(), "spawned child process");
    Ok(child)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_spec_wraps_script() {
        let spec = JobSpec::shell("build", "make all").with_timeout(30);
        assert_eq!(spec.program, "sh");
        assert_eq!(spec.args, vec!["-c", "make all"]);
        assert_eq!(spec.timeout_secs, Some(30));
        assert!(spec.id.is_none());
    }

    #[test]
    fn test_empty_program_rejected() {
        let err = spawn_process(&JobSpec::new("x", "  ")).unwrap_err();
        assert!(matches!(err, EngineError::EmptyCommand));
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let spec = JobSpec::new("x", "/nonexistent/procflow-test-binary");
        let err = spawn_process(&spec).unwrap_err();
        assert!(err.os_error().is_some());
        assert!(err.to_string().contains("procflow-test-binary"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_child_leads_its_own_group() {
        let mut child = spawn_process(&JobSpec::shell("x", "exit 0")).unwrap();
        let pid = child.id().unwrap();
        let pgid = nix::unistd::getpgid(Some(nix::unistd::Pid::from_raw(pid as i32)));
        // The child may already have exited; only check when it's still around
        if let Ok(pgid) = pgid {
            assert_eq!(pgid.as_raw(), pid as i32);
        }
        child.wait().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cwd_and_env_applied() {
        use tokio::io::AsyncReadExt;

        let dir = tempfile::tempdir().unwrap();
        let spec = JobSpec::shell("x", "pwd; echo $PROCFLOW_TEST_VAR")
            .with_cwd(dir.path())
            .with_env("PROCFLOW_TEST_VAR", "hello");
        let mut child = spawn_process(&spec).unwrap();
        let mut out = String::new();
        child
            .stdout
            .take()
            .unwrap()
            .read_to_string(&mut out)
            .await
            .unwrap();
        child.wait().await.unwrap();

        let canonical = dir.path().canonicalize().unwrap();
        assert!(out.contains(canonical.to_str().unwrap()) || out.contains(dir.path().to_str().unwrap()));
        assert!(out.contains("hello"));
    }
}
