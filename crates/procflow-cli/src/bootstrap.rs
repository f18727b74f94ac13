//! CLI bootstrap - the composition root.
//!
//! The only place the engine, its settings and its log sinks are wired
//! together. Handlers receive a ready [`CliContext`].

use std::path::PathBuf;
use std::sync::Arc;

use procflow_core::{EngineSettings, JobLogSink, validate_settings};
use procflow_runtime::{FileLogSink, ProcessEngine, TeeLogSink, TracingLogSink};
use tracing::debug;

use crate::error::CliError;

/// Bootstrap configuration for the CLI.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    /// Overrides `PROCFLOW_LOG_DIR` when set.
    pub log_dir: Option<PathBuf>,
}

/// Fully composed context for CLI commands.
pub struct CliContext {
    pub engine: ProcessEngine,
    pub settings: EngineSettings,
}

/// Build the engine from the process environment plus `config`.
pub fn bootstrap(config: CliConfig) -> Result<CliContext, CliError> {
    let settings = EngineSettings::from_env()?;
    bootstrap_with(settings, config)
}

/// Build the engine from explicit base settings plus `config`.
pub fn bootstrap_with(
    mut settings: EngineSettings,
    config: CliConfig,
) -> Result<CliContext, CliError> {
    if config.log_dir.is_some() {
        settings.log_dir = config.log_dir;
    }
    validate_settings(&settings)?;

    let mut sink = TeeLogSink::default().with(Arc::new(TracingLogSink));
    if let Some(dir) = &settings.log_dir {
        debug!(dir = %dir.display(), "writing job logs to files");
        sink = sink.with(Arc::new(FileLogSink::new(dir)?));
    }
    let sink: Arc<dyn JobLogSink> = Arc::new(sink);

    Ok(CliContext {
        engine: ProcessEngine::new(settings.clone(), sink),
        settings,
    })
}
