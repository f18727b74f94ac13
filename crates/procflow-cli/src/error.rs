//! CLI-specific error types and exit code mapping.

use procflow_core::{EngineError, SettingsError};
use thiserror::Error;

/// CLI-specific error type.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid engine settings from flags or environment.
    #[error("Configuration error: {0}")]
    Config(#[from] SettingsError),

    /// The engine refused the request.
    #[error("{0}")]
    Engine(#[from] EngineError),

    /// IO error (log directory, stdout).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Map error to an exit code.
    ///
    /// 78 (EX_CONFIG) for configuration, 74 (EX_IOERR) for IO, 1 otherwise.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 78,
            Self::Io(_) => 74,
            Self::Engine(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(CliError::from(SettingsError::EmptyLogDir).exit_code(), 78);
        assert_eq!(CliError::from(EngineError::EmptyCommand).exit_code(), 1);
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(CliError::from(io).exit_code(), 74);
    }

    #[test]
    fn test_config_message() {
        let err = CliError::from(SettingsError::Zero("poll_interval_ms"));
        assert_eq!(
            err.to_string(),
            "Configuration error: poll_interval_ms must be greater than zero"
        );
    }
}
