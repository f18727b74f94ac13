//! `procflow run`

use std::io::{self, Write};

use procflow_runtime::JobSpec;

use crate::bootstrap::CliContext;
use crate::commands::RunArgs;
use crate::error::CliError;
use crate::handlers::print_stream;
use crate::presentation::{exit_code_for, job_summary};

/// Build the job request for `args`.
pub fn job_spec(args: &RunArgs) -> JobSpec {
    let mut command = args.command.iter();
    let program = command.next().cloned().unwrap_or_default();

    let mut spec = JobSpec::new(args.label.clone(), program).with_args(command.cloned());
    if let Some(cwd) = &args.cwd {
        spec = spec.with_cwd(cwd.clone());
    }
    if let Some(secs) = args.timeout {
        spec = spec.with_timeout(secs);
    }
    for (key, value) in &args.envs {
        spec = spec.with_env(key.clone(), value.clone());
    }
    spec
}

pub async fn execute(ctx: &CliContext, args: RunArgs) -> Result<i32, CliError> {
    let mut job = ctx.engine.start_job(job_spec(&args));
    let id = job.job_id().clone();

    let stdout = io::stdout();
    let mut out = stdout.lock();
    print_stream(&ctx.engine, &id, &mut job, &mut out).await?;

    let Some(outcome) = job.outcome() else {
        return Ok(1);
    };

    if args.json {
        let json = serde_json::to_string_pretty(outcome).map_err(io::Error::other)?;
        writeln!(out, "{json}")?;
    } else {
        eprintln!("{}", job_summary(outcome));
    }

    // The registry entry is no longer needed once the outcome is in hand
    let _ = ctx.engine.registry().remove(&id);
    Ok(exit_code_for(&outcome.state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn args(command: &[&str]) -> RunArgs {
        RunArgs {
            label: "T".to_string(),
            timeout: Some(5),
            cwd: Some(PathBuf::from("/tmp")),
            envs: vec![("K".to_string(), "V".to_string())],
            json: false,
            command: command.iter().map(ToString::to_string).collect(),
        }
    }

    #[test]
    fn test_job_spec_from_args() {
        let spec = job_spec(&args(&["make", "-j4", "all"]));
        assert_eq!(spec.program, "make");
        assert_eq!(spec.args, vec!["-j4", "all"]);
        assert_eq!(spec.label, "T");
        assert_eq!(spec.timeout_secs, Some(5));
        assert_eq!(spec.cwd, Some(PathBuf::from("/tmp")));
        assert_eq!(spec.envs, vec![("K".to_string(), "V".to_string())]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_returns_child_exit_code() {
        let ctx = crate::bootstrap::bootstrap_with(
            procflow_core::EngineSettings::with_defaults(),
            crate::bootstrap::CliConfig::default(),
        )
        .unwrap();
        let mut run = args(&["sh", "-c", "exit 7"]);
        run.cwd = None;

        assert_eq!(execute(&ctx, run).await.unwrap(), 7);
        assert_eq!(ctx.engine.status().total, 0);
    }
}
