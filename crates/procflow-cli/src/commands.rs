//! Subcommands and their argument types.

use std::path::PathBuf;

use clap::{Args, Subcommand};

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run one command and stream its output
    Run(RunArgs),

    /// Run several shell commands in order as one job
    Pipeline(PipelineArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Tag prefixing every output line
    #[arg(short, long, default_value = "job")]
    pub label: String,

    /// Seconds before the job is stopped (defaults to the engine setting)
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Working directory for the command
    #[arg(long)]
    pub cwd: Option<PathBuf>,

    /// Extra environment variable, as KEY=VALUE (repeatable)
    #[arg(short, long = "env", value_parser = parse_key_value)]
    pub envs: Vec<(String, String)>,

    /// Print the final outcome as JSON
    #[arg(long)]
    pub json: bool,

    /// Program and arguments, after `--`
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

#[derive(Debug, Args)]
pub struct PipelineArgs {
    /// Stage as LABEL=SHELL_COMMAND, run through `sh -c` (repeatable, in order)
    #[arg(short, long = "stage", required = true, value_parser = parse_stage)]
    pub stages: Vec<StageArg>,

    /// Name recorded for the pipeline as a whole
    #[arg(short, long, default_value = "pipeline")]
    pub label: String,

    /// Per-stage timeout in seconds
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Working directory for every stage
    #[arg(long)]
    pub cwd: Option<PathBuf>,

    /// Print the final outcome as JSON
    #[arg(long)]
    pub json: bool,
}

/// One `--stage` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageArg {
    pub label: String,
    pub script: String,
}

/// Parse `LABEL=SHELL_COMMAND`.
pub fn parse_stage(value: &str) -> Result<StageArg, String> {
    let (label, script) = value
        .split_once('=')
        .ok_or_else(|| format!("expected LABEL=COMMAND, got {value:?}"))?;
    let label = label.trim();
    if label.is_empty() {
        return Err("stage label cannot be empty".to_string());
    }
    if script.trim().is_empty() {
        return Err(format!("stage {label:?} has no command"));
    }
    Ok(StageArg {
        label: label.to_string(),
        script: script.to_string(),
    })
}

/// Parse `KEY=VALUE`; the value may be empty or contain `=`.
pub fn parse_key_value(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((key, val)) if !key.is_empty() => Ok((key.to_string(), val.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {value:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Cli;
    use clap::Parser;

    #[test]
    fn test_parse_stage() {
        assert_eq!(
            parse_stage("Align=python align.py --fast").unwrap(),
            StageArg {
                label: "Align".to_string(),
                script: "python align.py --fast".to_string(),
            }
        );
        // Only the first '=' separates label from command
        assert_eq!(parse_stage("S=FOO=1 make").unwrap().script, "FOO=1 make");
        assert!(parse_stage("no-separator").is_err());
        assert!(parse_stage("=echo hi").is_err());
        assert!(parse_stage("Empty=  ").is_err());
    }

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("A=b=c").unwrap(),
            ("A".to_string(), "b=c".to_string())
        );
        assert_eq!(parse_key_value("EMPTY=").unwrap().1, "");
        assert!(parse_key_value("=x").is_err());
        assert!(parse_key_value("novalue").is_err());
    }

    #[test]
    fn test_run_keeps_hyphenated_child_args() {
        let cli = Cli::parse_from([
            "procflow", "run", "-l", "Build", "-t", "30", "--", "make", "-j4", "all",
        ]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.label, "Build");
        assert_eq!(args.timeout, Some(30));
        assert_eq!(args.command, vec!["make", "-j4", "all"]);
    }

    #[test]
    fn test_pipeline_stage_order() {
        let cli = Cli::parse_from([
            "procflow",
            "pipeline",
            "--stage",
            "A=echo a",
            "--stage",
            "B=echo b",
            "--json",
        ]);
        let Commands::Pipeline(args) = cli.command else {
            panic!("expected pipeline");
        };
        let labels: Vec<&str> = args.stages.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["A", "B"]);
        assert!(args.json);
    }
}
