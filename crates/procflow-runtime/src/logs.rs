//! `JobLogSink` implementations.
//!
//! - [`NoopLogSink`] discards everything
//! - [`TracingLogSink`] forwards to `tracing`
//! - [`FileLogSink`] appends to one log file per local calendar day
//! - [`TeeLogSink`] fans out to several sinks

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Local, NaiveDate};
use procflow_core::{JobLogSink, LogRecord};
use tracing::{debug, info, warn};

/// A no-op log sink that discards all records.
///
/// Useful for tests and embedders that only care about the returned stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogSink;

impl JobLogSink for NoopLogSink {
    fn record(&self, _record: &LogRecord) {}
}

/// Forwards records to `tracing`: errors at `warn`, progress at `debug`,
/// everything else at `info`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogSink;

impl JobLogSink for TracingLogSink {
    fn record(&self, record: &LogRecord) {
        let job_id = record.job_id.as_ref().map_or("-", |id| id.as_str());
        if record.is_error {
            warn!(target: "procflow::job", job_id, "{}", record.message);
        } else if record.is_progress {
            debug!(target: "procflow::job", job_id, "{}", record.message);
        } else {
            info!(target: "procflow::job", job_id, "{}", record.message);
        }
    }
}

/// Render one record as a log file line (without the trailing newline).
///
/// `[2024-05-01 12:00:00] [PID:<job id>] [PROGRESS] message`; the job and
/// progress tags are omitted when they don't apply.
pub fn format_log_line(record: &LogRecord, at: &DateTime<Local>) -> String {
    let mut line = format!("[{}]", at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(id) = &record.job_id {
        line.push_str(&format!(" [PID:{id}]"));
    }
    if record.is_progress {
        line.push_str(" [PROGRESS]");
    }
    line.push(' ');
    line.push_str(&record.message);
    line
}

/// Appends records to `<dir>/server_<YYYY-MM-DD>.log`.
///
/// The current day's file stays open between records and is swapped for
/// the next day's file on the first record after midnight. Write failures
/// are reported through `tracing` and otherwise ignored; the file is
/// reopened on the next record.
#[derive(Debug)]
pub struct FileLogSink {
    dir: PathBuf,
    // Also serializes appends so concurrent readers never interleave a line
    current: Mutex<Option<DailyFile>>,
}

#[derive(Debug)]
struct DailyFile {
    day: NaiveDate,
    file: File,
}

impl FileLogSink {
    /// Create the sink, creating `dir` if needed.
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            current: Mutex::new(None),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the log file for the day of `at`.
    pub fn file_for(&self, at: &DateTime<Local>) -> PathBuf {
        self.dir
            .join(format!("server_{}.log", at.format("%Y-%m-%d")))
    }

    fn record_at(&self, record: &LogRecord, at: &DateTime<Local>) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = self.append(&mut current, at, &format_log_line(record, at)) {
            *current = None;
            warn!(path = %self.file_for(at).display(), error = %e, "failed to write job log file");
        }
    }

    fn append(
        &self,
        current: &mut Option<DailyFile>,
        at: &DateTime<Local>,
        line: &str,
    ) -> io::Result<()> {
        let day = at.date_naive();
        if current.as_ref().is_none_or(|daily| daily.day != day) {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.file_for(at))?;
            *current = Some(DailyFile { day, file });
        }
        match current {
            Some(daily) => writeln!(daily.file, "{line}"),
            None => Ok(()),
        }
    }
}

impl JobLogSink for FileLogSink {
    fn record(&self, record: &LogRecord) {
        self.record_at(record, &Local::now());
    }
}

/// Sends every record to each inner sink in order.
#[derive(Clone, Default)]
pub struct TeeLogSink {
    sinks: Vec<Arc<dyn JobLogSink>>,
}

impl TeeLogSink {
    pub fn new(sinks: Vec<Arc<dyn JobLogSink>>) -> Self {
        Self { sinks }
    }

    #[must_use]
    pub fn with(mut self, sink: Arc<dyn JobLogSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl JobLogSink for TeeLogSink {
    fn record(&self, record: &LogRecord) {
        for sink in &self.sinks {
            sink.record(record);
        }
    }
}
