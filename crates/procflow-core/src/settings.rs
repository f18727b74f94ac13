//! Engine settings and validation.
//!
//! All fields are optional so partial configuration (a config file, a few
//! environment variables) falls back to defaults field by field.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Job timeout when a request does not carry its own.
pub const DEFAULT_TIMEOUT_SECS: u64 = 3600;

/// Upper bound on one consumer wait for new output.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Pause when the child has exited but readers are still flushing.
pub const DEFAULT_EXIT_SETTLE_MS: u64 = 500;

/// Window between SIGTERM and SIGKILL.
pub const DEFAULT_TERMINATION_GRACE_MS: u64 = 500;

/// Longest wait for readers to finish after a forced teardown.
pub const DEFAULT_TEARDOWN_TIMEOUT_SECS: u64 = 5;

/// Number of leading characters identifying a progress meter.
pub const DEFAULT_PROGRESS_KEY_LEN: usize = 10;

const ENV_PREFIX: &str = "PROCFLOW_";

/// Engine settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineSettings {
    pub default_timeout_secs: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub exit_settle_ms: Option<u64>,
    pub termination_grace_ms: Option<u64>,
    pub teardown_timeout_secs: Option<u64>,
    pub progress_key_len: Option<usize>,
    /// Directory for daily job log files; `None` disables file logging.
    pub log_dir: Option<PathBuf>,
}

impl EngineSettings {
    /// Create settings with every default filled in.
    #[must_use]
    pub const fn with_defaults() -> Self {
        Self {
            default_timeout_secs: Some(DEFAULT_TIMEOUT_SECS),
            poll_interval_ms: Some(DEFAULT_POLL_INTERVAL_MS),
            exit_settle_ms: Some(DEFAULT_EXIT_SETTLE_MS),
            termination_grace_ms: Some(DEFAULT_TERMINATION_GRACE_MS),
            teardown_timeout_secs: Some(DEFAULT_TEARDOWN_TIMEOUT_SECS),
            progress_key_len: Some(DEFAULT_PROGRESS_KEY_LEN),
            log_dir: None,
        }
    }

    /// Overlay `PROCFLOW_*` values from the process environment.
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::with_defaults().overlay(|key| std::env::var(key).ok())
    }

    /// Overlay `PROCFLOW_*` values supplied by `lookup` on top of `self`.
    ///
    /// Keys are the upper-cased field names with the `PROCFLOW_` prefix,
    /// e.g. `PROCFLOW_DEFAULT_TIMEOUT_SECS`.
    pub fn overlay<F>(mut self, lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |field: &str| lookup(&format!("{ENV_PREFIX}{}", field.to_uppercase()));

        if let Some(v) = get("default_timeout_secs") {
            self.default_timeout_secs = Some(parse_number("default_timeout_secs", &v)?);
        }
        if let Some(v) = get("poll_interval_ms") {
            self.poll_interval_ms = Some(parse_number("poll_interval_ms", &v)?);
        }
        if let Some(v) = get("exit_settle_ms") {
            self.exit_settle_ms = Some(parse_number("exit_settle_ms", &v)?);
        }
        if let Some(v) = get("termination_grace_ms") {
            self.termination_grace_ms = Some(parse_number("termination_grace_ms", &v)?);
        }
        if let Some(v) = get("teardown_timeout_secs") {
            self.teardown_timeout_secs = Some(parse_number("teardown_timeout_secs", &v)?);
        }
        if let Some(v) = get("progress_key_len") {
            self.progress_key_len = Some(parse_number("progress_key_len", &v)?);
        }
        if let Some(v) = get("log_dir") {
            self.log_dir = if v.trim().is_empty() {
                None
            } else {
                Some(PathBuf::from(v))
            };
        }

        Ok(self)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS))
    }

    pub fn exit_settle(&self) -> Duration {
        Duration::from_millis(self.exit_settle_ms.unwrap_or(DEFAULT_EXIT_SETTLE_MS))
    }

    pub fn termination_grace(&self) -> Duration {
        Duration::from_millis(
            self.termination_grace_ms
                .unwrap_or(DEFAULT_TERMINATION_GRACE_MS),
        )
    }

    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_secs(
            self.teardown_timeout_secs
                .unwrap_or(DEFAULT_TEARDOWN_TIMEOUT_SECS),
        )
    }

    pub fn progress_key_len(&self) -> usize {
        self.progress_key_len.unwrap_or(DEFAULT_PROGRESS_KEY_LEN)
    }
}

fn parse_number<T: std::str::FromStr>(field: &'static str, value: &str) -> Result<T, SettingsError> {
    value
        .trim()
        .parse()
        .map_err(|_| SettingsError::InvalidNumber {
            field,
            value: value.to_string(),
        })
}

/// Settings validation error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    #[error("{field} must be a non-negative integer, got {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("Log directory cannot be empty")]
    EmptyLogDir,
}

/// Validate settings values.
pub fn validate_settings(settings: &EngineSettings) -> Result<(), SettingsError> {
    let non_zero = [
        ("default_timeout_secs", settings.default_timeout_secs),
        ("poll_interval_ms", settings.poll_interval_ms),
        ("termination_grace_ms", settings.termination_grace_ms),
        ("teardown_timeout_secs", settings.teardown_timeout_secs),
    ];
    for (field, value) in non_zero {
        if value == Some(0) {
            return Err(SettingsError::Zero(field));
        }
    }

    if settings.progress_key_len == Some(0) {
        return Err(SettingsError::Zero("progress_key_len"));
    }

    if settings
        .log_dir
        .as_ref()
        .is_some_and(|p| p.as_os_str().is_empty())
    {
        return Err(SettingsError::EmptyLogDir);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_settings() {
        let settings = EngineSettings::with_defaults();
        assert_eq!(settings.default_timeout(), Duration::from_secs(3600));
        assert_eq!(settings.poll_interval(), Duration::from_millis(100));
        assert_eq!(settings.termination_grace(), Duration::from_millis(500));
        assert_eq!(settings.progress_key_len(), 10);
        assert!(settings.log_dir.is_none());
    }

    #[test]
    fn test_empty_settings_fall_back_to_defaults() {
        let settings = EngineSettings::default();
        assert_eq!(settings.default_timeout(), Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert_eq!(settings.exit_settle(), Duration::from_millis(DEFAULT_EXIT_SETTLE_MS));
        assert_eq!(
            settings.teardown_timeout(),
            Duration::from_secs(DEFAULT_TEARDOWN_TIMEOUT_SECS)
        );
    }

    #[test]
    fn test_validate_settings_valid() {
        assert!(validate_settings(&EngineSettings::with_defaults()).is_ok());
        assert!(validate_settings(&EngineSettings::default()).is_ok());
    }

    #[test]
    fn test_validate_zero_timeout() {
        let settings = EngineSettings {
            default_timeout_secs: Some(0),
            ..Default::default()
        };
        assert_eq!(
            validate_settings(&settings),
            Err(SettingsError::Zero("default_timeout_secs"))
        );
    }

    #[test]
    fn test_validate_zero_key_len() {
        let settings = EngineSettings {
            progress_key_len: Some(0),
            ..Default::default()
        };
        assert_eq!(
            validate_settings(&settings),
            Err(SettingsError::Zero("progress_key_len"))
        );
    }

    #[test]
    fn test_validate_empty_log_dir() {
        let settings = EngineSettings {
            log_dir: Some(PathBuf::new()),
            ..Default::default()
        };
        assert_eq!(validate_settings(&settings), Err(SettingsError::EmptyLogDir));
    }

    #[test]
    fn test_overlay_reads_prefixed_keys() {
        let settings = EngineSettings::with_defaults()
            .overlay(lookup(&[
                ("PROCFLOW_DEFAULT_TIMEOUT_SECS", "1800"),
                ("PROCFLOW_PROGRESS_KEY_LEN", " 12 "),
                ("PROCFLOW_LOG_DIR", "/var/log/procflow"),
            ]))
            .unwrap();

        assert_eq!(settings.default_timeout_secs, Some(1800));
        assert_eq!(settings.progress_key_len, Some(12));
        assert_eq!(settings.log_dir, Some(PathBuf::from("/var/log/procflow")));
        // Untouched fields keep their defaults
        assert_eq!(settings.poll_interval_ms, Some(DEFAULT_POLL_INTERVAL_MS));
    }

    #[test]
    fn test_overlay_rejects_garbage_numbers() {
        let err = EngineSettings::default()
            .overlay(lookup(&[("PROCFLOW_POLL_INTERVAL_MS", "fast")]))
            .unwrap_err();
        assert_eq!(
            err,
            SettingsError::InvalidNumber {
                field: "poll_interval_ms",
                value: "fast".to_string()
            }
        );
    }

    #[test]
    fn test_overlay_blank_log_dir_disables_file_logging() {
        let settings = EngineSettings {
            log_dir: Some(PathBuf::from("/tmp/x")),
            ..Default::default()
        }
        .overlay(lookup(&[("PROCFLOW_LOG_DIR", "")]))
        .unwrap();
        assert!(settings.log_dir.is_none());
    }

    #[test]
    fn test_settings_deserialize_partial() {
        let settings: EngineSettings =
            serde_json::from_str(r#"{"default_timeout_secs": 60}"#).unwrap();
        assert_eq!(settings.default_timeout(), Duration::from_secs(60));
        assert_eq!(settings.poll_interval_ms, None);
    }
}
