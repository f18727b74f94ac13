//! `procflow pipeline`

use std::io::{self, Write};

use procflow_runtime::{JobSpec, Pipeline};

use crate::bootstrap::CliContext;
use crate::commands::PipelineArgs;
use crate::error::CliError;
use crate::handlers::print_stream;
use crate::presentation::{pipeline_exit_code, pipeline_summary};

/// Build the pipeline for `args`, one `sh -c` stage per `--stage`.
pub fn build_pipeline(args: &PipelineArgs) -> Pipeline {
    args.stages.iter().fold(Pipeline::new(args.label.clone()), |pipeline, stage| {
        let mut spec = JobSpec::shell(stage.label.clone(), stage.script.clone());
        if let Some(cwd) = &args.cwd {
            spec = spec.with_cwd(cwd.clone());
        }
        if let Some(secs) = args.timeout {
            spec = spec.with_timeout(secs);
        }
        pipeline.stage(spec)
    })
}

pub async fn execute(ctx: &CliContext, args: PipelineArgs) -> Result<i32, CliError> {
    let mut stream = ctx.engine.run_pipeline(build_pipeline(&args))?;
    let id = stream.job_id().clone();

    let stdout = io::stdout();
    let mut out = stdout.lock();
    print_stream(&ctx.engine, &id, &mut stream, &mut out).await?;

    let Some(outcome) = stream.outcome() else {
        return Ok(1);
    };

    if args.json {
        let json = serde_json::to_string_pretty(outcome).map_err(io::Error::other)?;
        writeln!(out, "{json}")?;
    } else {
        eprintln!("{}", pipeline_summary(outcome));
    }

    Ok(pipeline_exit_code(outcome))
}
