//! Structured events emitted while a run progresses.
//!
//! Consumers subscribe to the stream to drive progress displays or to assert
//! on run behavior in tests. Nobody has to listen: with no subscribers events
//! are simply dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::model::OutcomeStatus;

/// A structured event emitted by the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence number. Consumers can detect gaps.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    RunStarted {
        run_id: Uuid,
        planned: usize,
        already_completed: usize,
        workers: usize,
    },
    TaskStarted {
        code: String,
        ordinal: usize,
        worker: usize,
    },
    TaskFinished {
        code: String,
        status: OutcomeStatus,
        attempts: u32,
        /// Outcomes recorded so far in this run, this one included.
        recorded: usize,
    },
    PauseStarted {
        after: usize,
        seconds: u64,
    },
    PauseEnded {
        after: usize,
        /// True when a drain request cut the pause short.
        interrupted: bool,
    },
    Draining,
    RunStopped {
        run_id: Uuid,
        succeeded: usize,
        failed: usize,
        skipped: usize,
        drained: bool,
    },
}

/// Fan-out of run events. Events are delivered in `seq` order.
pub struct EventBus {
    tx: broadcast::Sender<Event>,
    /// Last assigned sequence number. Held across the send.
    seq: Mutex<u64>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            seq: Mutex::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn emit(&self, kind: EventKind) {
        let mut seq = self.seq.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *seq += 1;
        let event = Event {
            seq: *seq,
            timestamp: Utc::now(),
            kind,
        };
        // No receivers is fine.
        let _ = self.tx.send(event);
    }
}
