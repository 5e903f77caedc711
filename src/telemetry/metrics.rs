//! Metric instruments for the ingestion run.
//!
//! Instruments come from the globally registered `MeterProvider`; without an
//! OTLP endpoint they are no-ops.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("statement-ingest")
}

/// Counter: tasks with a recorded outcome.
/// Labels: `status` ("success" | "failed" | "skipped").
pub fn tasks_finished() -> Counter<u64> {
    meter()
        .u64_counter("ingest.tasks.finished")
        .with_description("Tasks with a recorded outcome")
        .build()
}

/// Counter: individual fetch-and-store attempts.
/// Labels: `result` ("ok", or the failure kind).
pub fn fetch_attempts() -> Counter<u64> {
    meter()
        .u64_counter("ingest.fetch.attempts")
        .with_description("Fetch-and-store attempts")
        .build()
}

pub fn batch_pauses() -> Counter<u64> {
    meter()
        .u64_counter("ingest.batch.pauses")
        .with_description("Rate-limit pauses taken between batches")
        .build()
}

/// Histogram: wall time of one task, retries included.
pub fn task_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("ingest.task.duration_ms")
        .with_description("Task duration in milliseconds")
        .with_unit("ms")
        .build()
}
