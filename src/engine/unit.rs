//! Fetch-and-persist unit: one upstream fetch plus one repository write,
//! under a deadline, with retries.
//!
//! `execute` never fails; every failure mode ends up in the returned
//! [`TaskOutcome`].

use super::retry::RetryPolicy;
use crate::error::FetchError;
use crate::model::{StatementRecord, Task, TaskOutcome};
use crate::repository::Repository;
use crate::source::StatementSource;
use crate::telemetry::ingest::{record_outcome, start_task_span};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{Instrument, debug, warn};

/// What a successful attempt produced.
enum Attempt {
    Stored { records: usize },
    Empty,
}

pub struct FetchAndPersist<S, R> {
    source: Arc<S>,
    repository: Arc<R>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl<S, R> Clone for FetchAndPersist<S, R> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            repository: Arc::clone(&self.repository),
            timeout: self.timeout,
            retry: self.retry.clone(),
        }
    }
}

impl<S: StatementSource, R: Repository> FetchAndPersist<S, R> {
    pub fn new(source: Arc<S>, repository: Arc<R>, timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            source,
            repository,
            timeout,
            retry,
        }
    }

    /// Upper bound on how long `execute` can take.
    pub fn deadline(&self) -> Duration {
        // Each attempt may spend one timeout on the fetch and one on the write.
        self.timeout * 2 * self.retry.max_attempts() + self.retry.total_backoff()
    }

    /// Run the task to a terminal outcome.
    pub async fn execute(&self, task: &Task) -> TaskOutcome {
        let span = start_task_span(&task.code, task.ordinal);
        let outcome = self.run(task).instrument(span.clone()).await;
        record_outcome(&span, &outcome);
        outcome
    }

    async fn run(&self, task: &Task) -> TaskOutcome {
        let start = Instant::now();
        let max_attempts = self.retry.max_attempts();
        // Survives a failed write so the retry does not fetch again.
        let mut fetched: Option<Vec<StatementRecord>> = None;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = self.attempt(&task.code, &mut fetched).await;
            metrics::fetch_attempts().add(
                1,
                &[KeyValue::new(
                    "result",
                    match &result {
                        Ok(_) => "ok",
                        Err(e) => e.kind(),
                    },
                )],
            );

            let err = match result {
                Ok(Attempt::Stored { records }) => {
                    debug!(code = %task.code, attempt, records, "task stored");
                    return TaskOutcome::success(&task.code, records)
                        .attempts(attempt)
                        .duration_ms(elapsed_ms(start));
                }
                Ok(Attempt::Empty) => {
                    debug!(code = %task.code, attempt, "upstream has no statements");
                    return TaskOutcome::skipped(&task.code)
                        .attempts(attempt)
                        .duration_ms(elapsed_ms(start));
                }
                Err(e) => e,
            };

            if !err.is_retryable() || attempt >= max_attempts {
                return TaskOutcome::failed(&task.code, err.to_string())
                    .attempts(attempt)
                    .duration_ms(elapsed_ms(start));
            }

            let delay = self.retry.backoff(attempt);
            warn!(
                code = %task.code,
                attempt,
                max_attempts,
                error = %err,
                backoff_ms = delay.as_millis() as u64,
                "attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt(
        &self,
        code: &str,
        fetched: &mut Option<Vec<StatementRecord>>,
    ) -> Result<Attempt, FetchError> {
        if fetched.is_none() {
            let records = tokio::time::timeout(self.timeout, self.source.fetch(code))
                .await
                .map_err(|_| FetchError::Timeout)??;
            *fetched = Some(records);
        }

        let records = fetched.as_deref().unwrap_or_default();
        if records.is_empty() {
            return Ok(Attempt::Empty);
        }

        tokio::time::timeout(self.timeout, self.repository.upsert(code, records))
            .await
            .map_err(|_| FetchError::Storage("write timed out".to_string()))?
            .map_err(|e| FetchError::Storage(e.to_string()))?;

        Ok(Attempt::Stored {
            records: records.len(),
        })
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
