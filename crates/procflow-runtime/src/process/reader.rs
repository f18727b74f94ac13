//! Per-stream output readers (non-UTF8-safe).
//!
//! Child tooling can emit non-UTF8 bytes, and progress meters redraw with a
//! bare `\r`. Lines are therefore split on either `\n` or `\r` at the byte
//! level and decoded lossily, so neither case can end a reader early.

use std::io;
use std::sync::Arc;

use procflow_core::{JobLogSink, LogRecord, StreamKind, classify_line};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::handle::ProcessHandle;

/// Longest line kept in memory; longer runs are emitted in pieces of this size.
pub(crate) const MAX_LINE_BYTES: usize = 64 * 1024;

/// Read one line into `buf`, splitting on `\n` or `\r`.
///
/// Returns `Ok(false)` at end of stream with nothing buffered. A `\r\n`
/// pair yields an empty line after the real one; callers skip empties.
/// Once `buf` holds `limit` bytes it is returned as a line of its own.
pub(crate) async fn read_line_lossy<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    limit: usize,
) -> io::Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(!buf.is_empty());
        }

        let room = limit.saturating_sub(buf.len());
        let window = &available[..available.len().min(room)];
        if let Some(pos) = window.iter().position(|b| *b == b'\n' || *b == b'\r') {
            buf.extend_from_slice(&window[..pos]);
            reader.consume(pos + 1);
            return Ok(true);
        }

        let len = window.len();
        buf.extend_from_slice(window);
        reader.consume(len);
        if buf.len() >= limit {
            return Ok(true);
        }
    }
}

/// Spawn a worker draining `stream` into `handle`.
///
/// The worker stops at end of stream, on a read error, or when the handle
/// is deactivated. Whichever of the two readers finishes second waits for
/// the child's exit status and flags the handle all-done.
pub(crate) fn spawn_output_reader<S>(
    stream: S,
    kind: StreamKind,
    handle: Arc<ProcessHandle>,
    sink: Arc<dyn JobLogSink>,
) -> JoinHandle<()>
where
    S: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let job_id = handle.id().clone();
        let stop = handle.stop_token().clone();
        sink.record(&LogRecord::info(&job_id, format!("{kind} reader started")));

        let mut reader = BufReader::new(stream);
        let mut buf: Vec<u8> = Vec::with_capacity(1024);

        loop {
            if !handle.is_active() {
                break;
            }

            buf.clear();
            let read = tokio::select! {
                result = read_line_lossy(&mut reader, &mut buf, MAX_LINE_BYTES) => result,
                () = stop.cancelled() => {
                    debug!(job_id = %job_id, stream = %kind, "reader stopped by cancellation");
                    break;
                }
            };

            match read {
                Ok(false) => {
                    sink.record(&LogRecord::info(&job_id, format!("{kind} reached end of stream")));
                    break;
                }
                Ok(true) => {
                    let line = String::from_utf8_lossy(&buf);
                    if line.trim_end().is_empty() {
                        continue;
                    }

                    let classified = classify_line(&line, handle.label(), kind);
                    if !handle.publish(kind, &line, &classified) {
                        break;
                    }
                    sink.record(
                        &LogRecord::info(&job_id, line.into_owned())
                            .with_error(kind.is_error())
                            .with_progress(classified.progress),
                    );
                }
                Err(e) => {
                    warn!(job_id = %job_id, stream = %kind, error = %e, "stream read failed");
                    sink.record(&LogRecord::error(&job_id, format!("{kind} read failed: {e}")));
                    break;
                }
            }
        }

        sink.record(&LogRecord::info(&job_id, format!("{kind} reader finished")));

        if handle.mark_stream_done(kind) {
            let exit_code = handle.wait_exit_code().await;
            sink.record(&LogRecord::info(
                &job_id,
                format!("all output read, exit code: {exit_code:?}"),
            ));
            handle.record_exit(exit_code);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    async fn lines_of(mock: tokio_test::io::Mock) -> Vec<String> {
        lines_limited(mock, MAX_LINE_BYTES).await
    }

    async fn lines_limited(mock: tokio_test::io::Mock, limit: usize) -> Vec<String> {
        let mut reader = BufReader::new(mock);
        let mut buf = Vec::new();
        let mut out = Vec::new();
        loop {
            buf.clear();
            if !read_line_lossy(&mut reader, &mut buf, limit).await.unwrap() {
                break;
            }
            out.push(String::from_utf8_lossy(&buf).into_owned());
        }
        out
    }

    #[tokio::test]
    async fn test_splits_on_newline_and_carriage_return() {
        let mock = Builder::new()
            .read(b"first\n 10%\r 20%\r")
            .read(b" 30%\nlast")
            .build();
        assert_eq!(
            lines_of(mock).await,
            vec!["first", " 10%", " 20%", " 30%", "last"]
        );
    }

    #[tokio::test]
    async fn test_crlf_yields_empty_line_after_content() {
        let mock = Builder::new().read(b"a\r\nb\r\n").build();
        assert_eq!(lines_of(mock).await, vec!["a", "", "b", ""]);
    }

    #[tokio::test]
    async fn test_line_split_across_reads() {
        let mock = Builder::new().read(b"hel").read(b"lo wor").read(b"ld\n").build();
        assert_eq!(lines_of(mock).await, vec!["hello world"]);
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_lossy_not_fatal() {
        let mock = Builder::new().read(b"ok \xff\xfe bytes\nnext\n").build();
        let lines = lines_of(mock).await;
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("ok "));
        assert!(lines[0].contains('\u{FFFD}'));
        assert_eq!(lines[1], "next");
    }

    #[tokio::test]
    async fn test_overlong_line_is_split_at_limit() {
        let mock = Builder::new().read(b"abcdef").read(b"ghij\nk\n").build();
        assert_eq!(
            lines_limited(mock, 4).await,
            vec!["abcd", "efgh", "ij", "k"]
        );
    }

    #[tokio::test]
    async fn test_unterminated_flood_stays_bounded() {
        let chunk = vec![b'x'; 1000];
        let mock = Builder::new().read(&chunk).read(&chunk).read(&chunk).build();
        let lines = lines_limited(mock, 1024).await;
        assert_eq!(lines.iter().map(String::len).collect::<Vec<_>>(), vec![1024, 1024, 952]);
    }

    #[tokio::test]
    async fn test_read_error_surfaces() {
        let mock = Builder::new()
            .read(b"partial")
            .read_error(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
            .build();
        let mut reader = BufReader::new(mock);
        let mut buf = Vec::new();
        let err = read_line_lossy(&mut reader, &mut buf, MAX_LINE_BYTES)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
