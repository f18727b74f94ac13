//! Main CLI parser and top-level argument handling.

use std::path::PathBuf;

use clap::Parser;

use crate::commands::Commands;

/// Run external commands and stream their classified output.
#[derive(Debug, Parser)]
#[command(name = "procflow")]
#[command(about = "Supervise external processes and stream their output")]
#[command(version)]
pub struct Cli {
    /// Append job logs to daily files in this directory
    #[arg(long = "log-dir", env = "PROCFLOW_LOG_DIR", global = true)]
    pub log_dir: Option<PathBuf>,

    /// Enable verbose/debug output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parser_builds() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_args() {
        let cli = Cli::parse_from([
            "procflow",
            "--verbose",
            "--log-dir",
            "/tmp/procflow-logs",
            "run",
            "--",
            "true",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.log_dir, Some(PathBuf::from("/tmp/procflow-logs")));
    }
}
