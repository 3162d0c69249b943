//! JSON-lines intake for the `ingest` command.

use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use trendcast_core::ObservationMessage;
use trendcast_engine::Accumulator;

#[derive(Debug, Default, PartialEq, Eq, Serialize)]
pub(crate) struct IngestSummary {
    pub messages: usize,
    pub malformed_lines: usize,
    pub applied: usize,
    pub duplicates: usize,
    pub rejected: usize,
    pub failed: usize,
}

/// Merge one message per non-blank line. Unparseable lines are logged and
/// counted, never fatal.
///
/// # Errors
///
/// Returns an error only if reading from `reader` fails.
pub(crate) async fn ingest_lines<R>(
    accumulator: &Accumulator,
    reader: R,
) -> anyhow::Result<IngestSummary>
where
    R: AsyncBufRead + Unpin,
{
    let mut summary = IngestSummary::default();
    let mut lines = reader.lines();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let message = match ObservationMessage::parse(line) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(line = line_no, error = %e, "ingest: skipping malformed line");
                summary.malformed_lines += 1;
                continue;
            }
        };

        summary.messages += 1;
        let report = accumulator
            .merge_message(message, trendcast_engine::unix_now())
            .await;
        summary.applied += report.applied;
        summary.duplicates += report.duplicates;
        summary.rejected += report.rejected;
        summary.failed += report.failed;
    }

    tracing::info!(
        messages = summary.messages,
        applied = summary.applied,
        malformed = summary.malformed_lines,
        "ingest: complete"
    );
    Ok(summary)
}
