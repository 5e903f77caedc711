//! Per-task span helpers.

use crate::model::TaskOutcome;
use tracing::Span;

/// Span covering one fetch-and-persist unit. `ingest.status` is filled in
/// by [`record_outcome`].
pub fn start_task_span(code: &str, ordinal: usize) -> Span {
    tracing::info_span!(
        "ingest.task",
        "ingest.code" = code,
        "ingest.ordinal" = ordinal,
        "ingest.status" = tracing::field::Empty,
    )
}

pub fn record_outcome(span: &Span, outcome: &TaskOutcome) {
    span.record("ingest.status", tracing::field::display(outcome.status));
    span.in_scope(|| match &outcome.error_detail {
        Some(detail) => tracing::warn!(
            attempts = outcome.attempts,
            error = %detail,
            "task failed"
        ),
        None => tracing::debug!(
            status = %outcome.status,
            attempts = outcome.attempts,
            records = outcome.records,
            "task finished"
        ),
    });
}
