//! CLI entry point - the composition root.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use procflow_cli::{Cli, CliConfig, Commands, bootstrap, handlers};

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables before clap reads its `env` fallbacks
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let ctx = match bootstrap(CliConfig {
        log_dir: cli.log_dir,
    }) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(e.exit_code());
        }
    };

    let result = match cli.command {
        Commands::Run(args) => handlers::run::execute(&ctx, args).await,
        Commands::Pipeline(args) => handlers::pipeline::execute(&ctx, args).await,
    };

    // Nothing may outlive the CLI
    let stopped = ctx.engine.shutdown_all().await;
    if stopped > 0 {
        tracing::warn!(stopped, "terminated jobs still running at exit");
    }

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(e.exit_code());
        }
    }
}
