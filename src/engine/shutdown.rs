//! Shutdown coordinator: `Running → Draining → Stopped`.
//!
//! An interruption while running starts a drain: no new tasks are handed
//! out, in-flight tasks finish and are recorded. Further interruptions while
//! draining are ignored, so the checkpoint always ends consistent.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Draining,
    Stopped,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunState::Running => "running",
            RunState::Draining => "draining",
            RunState::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

/// Cloneable handle on the run state.
#[derive(Clone)]
pub struct Shutdown {
    state: Arc<watch::Sender<RunState>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(RunState::Running);
        Self {
            state: Arc::new(tx),
        }
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == RunState::Running
    }

    /// Drain on an operator interruption.
    pub fn request(&self) -> bool {
        self.drain("interruption received")
    }

    /// Ask the run to drain for `reason`. Returns true only for the request
    /// that moved the run out of `Running`.
    pub fn drain(&self, reason: &str) -> bool {
        let moved = self.state.send_if_modified(|state| {
            if *state == RunState::Running {
                *state = RunState::Draining;
                true
            } else {
                false
            }
        });
        if moved {
            info!(reason, "draining in-flight tasks");
        } else {
            warn!(reason, state = %self.state(), "drain request ignored");
        }
        moved
    }

    /// All workers are idle.
    pub fn mark_stopped(&self) {
        self.state.send_replace(RunState::Stopped);
    }

    /// Resolves once the run has left `Running`.
    pub async fn draining(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives as long as self, so this cannot fail.
        let _ = rx.wait_for(|state| *state != RunState::Running).await;
    }

    /// Turn SIGINT/SIGTERM into drain requests until the run stops.
    ///
    /// The listener stays installed after the first signal, which is what
    /// keeps a second Ctrl-C from killing the process mid-drain.
    pub fn listen_for_signals(&self) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut rx = this.state.subscribe();
            loop {
                tokio::select! {
                    _ = wait_for_signal() => {
                        this.request();
                    }
                    _ = rx.wait_for(|state| *state == RunState::Stopped) => return,
                }
            }
        })
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!("cannot install SIGTERM handler: {e}");
            ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    ctrl_c().await;
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("cannot listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
}
