//! End-of-run summary.

use crate::model::{OutcomeStatus, TaskOutcome};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Codes left out of the queue because an earlier run completed them.
    pub already_completed: usize,
    /// Statement rows written in this run.
    pub records: usize,
    pub elapsed: Duration,
}

/// Count outcomes by status.
pub fn summarize(outcomes: &[TaskOutcome]) -> RunSummary {
    outcomes
        .iter()
        .fold(RunSummary::default(), |mut summary, outcome| {
            match outcome.status {
                OutcomeStatus::Success => summary.succeeded += 1,
                OutcomeStatus::Failed => summary.failed += 1,
                OutcomeStatus::Skipped => summary.skipped += 1,
            }
            summary.records += outcome.records;
            summary
        })
}

impl RunSummary {
    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    pub fn with_already_completed(mut self, already_completed: usize) -> Self {
        self.already_completed = already_completed;
        self
    }

    /// Outcomes recorded in this run.
    pub fn processed(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }

    /// Share of processed tasks that succeeded, in percent.
    pub fn success_rate(&self) -> f64 {
        match self.processed() {
            0 => 0.0,
            n => self.succeeded as f64 * 100.0 / n as f64,
        }
    }

    /// Average wall time per processed task, in seconds.
    pub fn average_secs(&self) -> f64 {
        match self.processed() {
            0 => 0.0,
            n => self.elapsed.as_secs_f64() / n as f64,
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "run summary")?;
        writeln!(f, "  processed:         {}", self.processed())?;
        writeln!(f, "  succeeded:         {}", self.succeeded)?;
        writeln!(f, "  failed:            {}", self.failed)?;
        writeln!(f, "  skipped (no data): {}", self.skipped)?;
        writeln!(f, "  already completed: {}", self.already_completed)?;
        writeln!(f, "  records written:   {}", self.records)?;
        writeln!(f, "  success rate:      {:.1}%", self.success_rate())?;
        writeln!(f, "  elapsed:           {:.1}s", self.elapsed.as_secs_f64())?;
        write!(f, "  per task:          {:.2}s", self.average_secs())
    }
}
