//! Shared helpers for runtime integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use procflow_core::{EngineSettings, JobLogSink, LogRecord};
use procflow_runtime::{NoopLogSink, ProcessEngine};

/// Settings with short waits so failures surface quickly.
pub fn fast_settings() -> EngineSettings {
    EngineSettings {
        poll_interval_ms: Some(20),
        exit_settle_ms: Some(50),
        termination_grace_ms: Some(300),
        teardown_timeout_secs: Some(3),
        ..EngineSettings::with_defaults()
    }
}

pub fn engine() -> ProcessEngine {
    ProcessEngine::new(fast_settings(), Arc::new(NoopLogSink))
}

/// Sink that keeps every record for later inspection.
#[derive(Default)]
pub struct RecordingSink {
    records: Mutex<Vec<LogRecord>>,
}

impl RecordingSink {
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl JobLogSink for RecordingSink {
    fn record(&self, record: &LogRecord) {
        self.records.lock().unwrap().push(record.clone());
    }
}

/// Poll `check` every 20ms for up to `limit`.
pub async fn wait_until<F, Fut>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
