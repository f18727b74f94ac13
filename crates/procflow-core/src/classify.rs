//! Output line classification.
//!
//! Every line a child writes is turned into `"<label> [<TYPE>]: <text>"`
//! before it reaches a consumer. Existing log consumers parse that shape,
//! so the escape-stripping and progress patterns here must stay exact.

use std::borrow::Cow;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::domain::StreamKind;

/// ESC followed by a single intermediate byte, or a full CSI sequence.
static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1B(?:[@-Z\\-_]|\[[0-?]*[ -/]*[@-~])").expect("valid ANSI escape pattern")
});

/// Percentages, fractions and iteration rates (tqdm-style meters).
static PROGRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+%|\d+/\d+|\d+\.\d+it/s)").expect("valid progress pattern")
});

/// Tag placed between the label and the text of an emitted line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineTag {
    /// Plain stdout line.
    Out,
    /// Plain stderr line.
    Err,
    /// Progress meter update (either stream).
    Progress,
    /// Synthetic engine error (spawn failure, timeout).
    Error,
    /// Synthetic informational notice (cancellation).
    Info,
    /// Synthetic warning (no output produced).
    Warning,
}

impl LineTag {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Out => "OUT",
            Self::Err => "ERR",
            Self::Progress => "PROGRESS",
            Self::Error => "ERROR",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
        }
    }
}

impl fmt::Display for LineTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of classifying one raw output line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedLine {
    /// `"<label> [<TYPE>]: <cleaned>"`
    pub formatted: String,
    /// Line with escapes removed and trailing whitespace trimmed.
    pub cleaned: String,
    /// Whether the cleaned line looks like a progress meter.
    pub progress: bool,
}

/// Remove ANSI/terminal escape sequences and trailing whitespace.
pub fn strip_ansi(line: &str) -> Cow<'_, str> {
    match ANSI_ESCAPE.replace_all(line, "") {
        Cow::Borrowed(s) => Cow::Borrowed(s.trim_end()),
        Cow::Owned(s) => Cow::Owned(s.trim_end().to_string()),
    }
}

/// Whether an already-cleaned line is a progress update.
///
/// Blank lines are never progress.
pub fn is_progress_line(cleaned: &str) -> bool {
    if cleaned.trim().is_empty() {
        return false;
    }
    PROGRESS.is_match(cleaned)
}

/// Format a line as `"<label> [<TYPE>]: <text>"`.
pub fn format_line(label: &str, tag: LineTag, text: &str) -> String {
    format!("{label} [{tag}]: {text}")
}

/// Classify a raw line read from `stream` of a job labelled `label`.
pub fn classify_line(raw: &str, label: &str, stream: StreamKind) -> ClassifiedLine {
    let cleaned = strip_ansi(raw).into_owned();
    let progress = is_progress_line(&cleaned);

    let tag = if progress {
        LineTag::Progress
    } else if stream == StreamKind::Stderr {
        LineTag::Err
    } else {
        LineTag::Out
    };

    ClassifiedLine {
        formatted: format_line(label, tag, &cleaned),
        cleaned,
        progress,
    }
}

/// Key identifying "the same meter": the first `len` characters of the raw line.
pub fn progress_key(raw: &str, len: usize) -> String {
    raw.chars().take(len).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tqdm_meter_is_progress() {
        let line = "57%|███| 10/20 [00:05<00:04, 2.10it/s]";
        assert!(is_progress_line(line));
    }

    #[test]
    fn test_plain_text_is_not_progress() {
        assert!(!is_progress_line("Loading model..."));
        assert!(!is_progress_line("step 3 of 7"));
    }

    #[test]
    fn test_each_progress_pattern_alone() {
        assert!(is_progress_line("done 100%"));
        assert!(is_progress_line("batch 3/12"));
        assert!(is_progress_line("speed 12.5it/s"));
        assert!(!is_progress_line("speed 12it/s"));
        assert!(!is_progress_line("ratio 3 / 4"));
    }

    #[test]
    fn test_blank_line_is_never_progress() {
        assert!(!is_progress_line(""));
        assert!(!is_progress_line("   "));
    }

    #[test]
    fn test_strip_ansi_removes_csi_and_trailing_space() {
        let raw = "\x1b[32mgreen\x1b[0m text  \t";
        assert_eq!(strip_ansi(raw), "green text");
    }

    #[test]
    fn test_strip_ansi_removes_single_byte_escape() {
        // ESC M: reverse line feed
        assert_eq!(strip_ansi("a\x1bMb"), "ab");
    }

    #[test]
    fn test_strip_ansi_borrows_clean_input() {
        assert!(matches!(strip_ansi("clean"), Cow::Borrowed("clean")));
    }

    #[test]
    fn test_progress_detected_after_stripping() {
        let raw = "\x1b[2K\r 45%|####      |";
        let line = classify_line(raw, "Align", StreamKind::Stderr);
        assert!(line.progress);
        assert!(line.formatted.starts_with("Align [PROGRESS]: "));
    }

    #[test]
    fn test_classify_formats_by_stream() {
        let out = classify_line("hello", "Stage", StreamKind::Stdout);
        assert_eq!(out.formatted, "Stage [OUT]: hello");
        assert!(!out.progress);

        let err = classify_line("boom", "Stage", StreamKind::Stderr);
        assert_eq!(err.formatted, "Stage [ERR]: boom");
    }

    #[test]
    fn test_progress_wins_over_stream() {
        let line = classify_line("3/10 done", "Stage", StreamKind::Stdout);
        assert_eq!(line.formatted, "Stage [PROGRESS]: 3/10 done");
    }

    #[test]
    fn test_progress_key_is_char_prefix() {
        assert_eq!(progress_key("Epoch 1: 10%|█", 10), "Epoch 1: 1");
        assert_eq!(progress_key("short", 10), "short");
        assert_eq!(progress_key("██████████████", 3), "███");
    }

    #[test]
    fn test_format_line_synthetic_tags() {
        assert_eq!(
            format_line("Job", LineTag::Error, "process timed out (1s)"),
            "Job [ERROR]: process timed out (1s)"
        );
        assert_eq!(format_line("Job", LineTag::Info, "x"), "Job [INFO]: x");
        assert_eq!(format_line("Job", LineTag::Warning, "x"), "Job [WARNING]: x");
    }
}
