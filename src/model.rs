//! Core data model.
//!
//! A task is one entity code to refresh. Attempting it produces exactly one
//! outcome. Outcomes are folded into the progress state, which is what makes
//! a run resumable.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// One unit of ingestion work. Immutable once enumerated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Task {
    /// Entity code, market-prefixed (e.g. "SH600519").
    pub code: String,
    /// Position in the universe the queue was built from.
    pub ordinal: usize,
}

impl Task {
    pub fn new(code: impl Into<String>, ordinal: usize) -> Self {
        Self {
            code: code.into(),
            ordinal,
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Terminal status of an attempted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Fetched and written to the repository.
    Success,
    /// Retries exhausted or a permanent error.
    Failed,
    /// Upstream had nothing for this code; nothing was written.
    Skipped,
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OutcomeStatus::Success => "success",
            OutcomeStatus::Failed => "failed",
            OutcomeStatus::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

/// Result of one task, produced by the fetch-and-persist unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub code: String,
    pub status: OutcomeStatus,
    pub attempted_at: DateTime<Utc>,
    pub error_detail: Option<String>,
    /// Attempts spent, including the first.
    pub attempts: u32,
    /// Records handed to the repository.
    pub records: usize,
    pub duration_ms: u64,
}

impl TaskOutcome {
    pub fn success(code: impl Into<String>, records: usize) -> Self {
        Self::new(code, OutcomeStatus::Success, None).records(records)
    }

    pub fn failed(code: impl Into<String>, error: impl Into<String>) -> Self {
        Self::new(code, OutcomeStatus::Failed, Some(error.into()))
    }

    pub fn skipped(code: impl Into<String>) -> Self {
        Self::new(code, OutcomeStatus::Skipped, None)
    }

    fn new(code: impl Into<String>, status: OutcomeStatus, error_detail: Option<String>) -> Self {
        Self {
            code: code.into(),
            status,
            attempted_at: Utc::now(),
            error_detail,
            attempts: 1,
            records: 0,
            duration_ms: 0,
        }
    }

    pub fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn records(mut self, records: usize) -> Self {
        self.records = records;
        self
    }

    pub fn duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}

// ---------------------------------------------------------------------------
// Statement records
// ---------------------------------------------------------------------------

/// Which financial statement a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    BalanceSheet,
    IncomeStatement,
    CashFlowStatement,
}

impl StatementKind {
    pub const ALL: [StatementKind; 3] = [
        StatementKind::BalanceSheet,
        StatementKind::IncomeStatement,
        StatementKind::CashFlowStatement,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StatementKind::BalanceSheet => "balance_sheet",
            StatementKind::IncomeStatement => "income_statement",
            StatementKind::CashFlowStatement => "cash_flow_statement",
        }
    }
}

impl std::fmt::Display for StatementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StatementKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StatementKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown statement kind: {s}"))
    }
}

/// One validated statement row for one report date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementRecord {
    pub code: String,
    pub kind: StatementKind,
    pub report_date: NaiveDate,
    /// Line items by upstream field name.
    pub items: BTreeMap<String, f64>,
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Durable checkpoint of a run. Owned by `ProgressStore`.
///
/// Invariant: `completed` and the keys of `failed` are disjoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressState {
    #[serde(default)]
    pub completed: BTreeSet<String>,
    /// Failed codes with the last error detail.
    #[serde(default)]
    pub failed: BTreeMap<String, String>,
    #[serde(default)]
    pub total_planned: usize,
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
}

impl Default for ProgressState {
    fn default() -> Self {
        Self {
            completed: BTreeSet::new(),
            failed: BTreeMap::new(),
            total_planned: 0,
            last_updated: Utc::now(),
        }
    }
}

impl ProgressState {
    /// Fold one outcome into the state and stamp `last_updated`.
    pub fn apply(&mut self, outcome: &TaskOutcome) {
        match outcome.status {
            OutcomeStatus::Success => {
                self.failed.remove(&outcome.code);
                self.completed.insert(outcome.code.clone());
            }
            OutcomeStatus::Failed => {
                // A later failure never downgrades a committed success.
                if !self.completed.contains(&outcome.code) {
                    let detail = outcome
                        .error_detail
                        .clone()
                        .unwrap_or_else(|| "unknown error".to_string());
                    self.failed.insert(outcome.code.clone(), detail);
                }
            }
            OutcomeStatus::Skipped => {}
        }
        self.last_updated = Utc::now();
    }

    pub fn is_completed(&self, code: &str) -> bool {
        self.completed.contains(code)
    }
}
