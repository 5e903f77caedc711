//! Batch throttle: after every `batch_size` recorded outcomes, hold all
//! workers for a fixed pause so the upstream rate limit is respected.
//!
//! Pausing is cooperative. Workers only wait at the gate between tasks, so
//! a unit call is never suspended halfway.

use super::shutdown::Shutdown;
use crate::event::{EventBus, EventKind};
use crate::telemetry::metrics;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

pub struct BatchThrottle {
    batch_size: usize,
    pause: Duration,
    planned: usize,
    recorded: AtomicUsize,
    pauses: AtomicUsize,
    /// Number of pauses in progress; the gate is open at zero.
    active: watch::Sender<usize>,
}

impl BatchThrottle {
    /// `planned` is the number of tasks in this run; no pause follows the
    /// last of them.
    pub fn new(batch_size: usize, pause: Duration, planned: usize) -> Self {
        let (active, _) = watch::channel(0);
        Self {
            batch_size,
            pause,
            planned,
            recorded: AtomicUsize::new(0),
            pauses: AtomicUsize::new(0),
            active,
        }
    }

    pub fn disabled() -> Self {
        Self::new(0, Duration::ZERO, 0)
    }

    pub fn is_enabled(&self) -> bool {
        self.batch_size > 0
    }

    /// Count one recorded outcome. Returns `(recorded, pause_due)`.
    ///
    /// When a pause is due the gate is closed here, before the caller does
    /// anything else, and the caller must follow up with [`Self::pause`].
    pub fn observe(&self) -> (usize, bool) {
        let n = self.recorded.fetch_add(1, Ordering::SeqCst) + 1;
        let due = self.is_enabled() && n % self.batch_size == 0 && n < self.planned;
        if due {
            self.active.send_modify(|active| *active += 1);
        }
        (n, due)
    }

    /// Hold the gate closed by `observe` for the configured pause, then
    /// reopen it. A drain request ends the pause early.
    pub async fn pause(&self, after: usize, shutdown: &Shutdown, events: &EventBus) {
        self.pauses.fetch_add(1, Ordering::SeqCst);
        metrics::batch_pauses().add(1, &[]);
        info!(
            after,
            seconds = self.pause.as_secs(),
            "batch complete, pausing to respect upstream rate limit"
        );
        events.emit(EventKind::PauseStarted {
            after,
            seconds: self.pause.as_secs(),
        });

        let interrupted = tokio::select! {
            _ = tokio::time::sleep(self.pause) => false,
            _ = shutdown.draining() => true,
        };

        self.active.send_modify(|n| *n = n.saturating_sub(1));
        info!(after, interrupted, "pause over");
        events.emit(EventKind::PauseEnded { after, interrupted });
    }

    /// Wait until no pause is in progress, or until the run starts draining.
    pub async fn wait_ready(&self, shutdown: &Shutdown) {
        let mut rx = self.active.subscribe();
        tokio::select! {
            _ = rx.wait_for(|n| *n == 0) => {}
            _ = shutdown.draining() => {}
        }
    }

    pub fn is_paused(&self) -> bool {
        *self.active.borrow() > 0
    }

    /// Pauses taken so far.
    pub fn pauses_taken(&self) -> usize {
        self.pauses.load(Ordering::SeqCst)
    }

    pub fn recorded(&self) -> usize {
        self.recorded.load(Ordering::SeqCst)
    }
}
