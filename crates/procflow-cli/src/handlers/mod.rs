//! Command handlers.
//!
//! Each handler drives an engine stream to the end, printing lines as they
//! arrive, and returns the process exit code.

pub mod pipeline;
pub mod run;

use std::io::Write;

use futures_util::{Stream, StreamExt};
use procflow_core::JobId;
use procflow_runtime::{CancelOutcome, ProcessEngine};
use tracing::warn;

/// Print every line of `stream` to `out`.
///
/// The first Ctrl-C cancels job `id` through the engine; the stream then
/// runs to its natural end so the cancellation line and outcome are kept.
pub(crate) async fn print_stream<S, W>(
    engine: &ProcessEngine,
    id: &JobId,
    stream: &mut S,
    out: &mut W,
) -> std::io::Result<()>
where
    S: Stream<Item = String> + Unpin,
    W: Write,
{
    let mut interrupted = false;
    loop {
        tokio::select! {
            line = stream.next() => match line {
                Some(line) => {
                    writeln!(out, "{line}")?;
                    out.flush()?;
                }
                None => break,
            },
            signal = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                if let Err(e) = signal {
                    warn!(error = %e, "failed to listen for interrupt");
                    continue;
                }
                eprintln!("interrupt received, cancelling job {id}");
                match engine.cancel(id).await {
                    Ok(CancelOutcome::Cancelled) => {}
                    Ok(CancelOutcome::AlreadyInactive) => eprintln!("job {id} already finished"),
                    Err(e) => warn!(job_id = %id, error = %e, "cancel failed"),
                }
            }
        }
    }
    Ok(())
}
