//! In-memory fakes shared by the integration tests.

#![allow(dead_code)]

use chrono::NaiveDate;
use statement_ingest::error::{Error, FetchError, Result};
use statement_ingest::model::{StatementKind, StatementRecord};
use statement_ingest::repository::Repository;
use statement_ingest::source::StatementSource;
use statement_ingest::universe::{Listing, Universe};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// How the fake source answers for one code.
#[derive(Debug, Clone)]
pub enum Script {
    /// Return this many records.
    Records(usize),
    Empty,
    /// Fail this many calls, then return one record.
    FailThen { failures: u32, error: FetchError },
    /// Fail every call.
    Fail(FetchError),
    /// Never return.
    Hang,
    /// Return one record after a delay.
    Slow(Duration),
}

/// Scripted upstream. Codes without a script return one record.
pub struct FakeSource {
    scripts: HashMap<String, Script>,
    calls: Mutex<HashMap<String, u32>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeSource {
    pub fn new() -> Self {
        Self {
            scripts: HashMap::new(),
            calls: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with(mut self, code: &str, script: Script) -> Self {
        self.scripts.insert(code.to_string(), script);
        self
    }

    /// Same script for every listed code.
    pub fn with_all<'a>(mut self, codes: impl IntoIterator<Item = &'a str>, script: Script) -> Self {
        for code in codes {
            self.scripts.insert(code.to_string(), script.clone());
        }
        self
    }

    pub fn calls(&self, code: &str) -> u32 {
        self.calls.lock().unwrap().get(code).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl StatementSource for FakeSource {
    async fn fetch(&self, code: &str) -> std::result::Result<Vec<StatementRecord>, FetchError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.entry(code.to_string()).or_insert(0);
            *n += 1;
            *n
        };
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        match self.scripts.get(code).cloned().unwrap_or(Script::Records(1)) {
            Script::Records(n) => Ok(records(code, n)),
            Script::Empty => Ok(Vec::new()),
            Script::FailThen { failures, error } if call <= failures => Err(error),
            Script::FailThen { .. } => Ok(records(code, 1)),
            Script::Fail(error) => Err(error),
            Script::Hang => std::future::pending().await,
            Script::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok(records(code, 1))
            }
        }
    }
}

type Key = (String, StatementKind, NaiveDate);

/// Repository backed by a map, with optional injected write failures.
pub struct MemoryRepository {
    rows: Mutex<BTreeMap<Key, BTreeMap<String, f64>>>,
    failures: Mutex<HashMap<String, u32>>,
    writes: Mutex<HashMap<String, u32>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(BTreeMap::new()),
            failures: Mutex::new(HashMap::new()),
            writes: Mutex::new(HashMap::new()),
        }
    }

    /// Fail the next `n` writes for `code`.
    pub fn fail_writes(self, code: &str, n: u32) -> Self {
        self.failures.lock().unwrap().insert(code.to_string(), n);
        self
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn rows_for(&self, code: &str) -> usize {
        self.rows
            .lock()
            .unwrap()
            .keys()
            .filter(|(c, _, _)| c == code)
            .count()
    }

    /// Write attempts for `code`, failed ones included.
    pub fn writes(&self, code: &str) -> u32 {
        self.writes.lock().unwrap().get(code).copied().unwrap_or(0)
    }
}

impl Repository for MemoryRepository {
    async fn upsert(&self, code: &str, records: &[StatementRecord]) -> Result<u64> {
        *self.writes.lock().unwrap().entry(code.to_string()).or_insert(0) += 1;

        {
            let mut failures = self.failures.lock().unwrap();
            if let Some(left) = failures.get_mut(code).filter(|n| **n > 0) {
                *left -= 1;
                return Err(Error::Other("disk full".to_string()));
            }
        }

        let mut rows = self.rows.lock().unwrap();
        for record in records {
            rows.insert(
                (code.to_string(), record.kind, record.report_date),
                record.items.clone(),
            );
        }
        Ok(records.len() as u64)
    }
}

/// `n` balance-sheet records for `code`, one per year-end from 2020.
pub fn records(code: &str, n: usize) -> Vec<StatementRecord> {
    (0..n)
        .map(|i| StatementRecord {
            code: code.to_string(),
            kind: StatementKind::BalanceSheet,
            report_date: NaiveDate::from_ymd_opt(2020 + i as i32, 12, 31).unwrap(),
            items: BTreeMap::from([("TOTAL_ASSETS".to_string(), 1_000.0 * (i + 1) as f64)]),
        })
        .collect()
}

/// Universe of already-prefixed codes, in order.
pub fn universe(codes: &[&str]) -> Universe {
    Universe::new(codes.iter().map(|code| Listing {
        code: code.to_string(),
        name: String::new(),
    }))
}
