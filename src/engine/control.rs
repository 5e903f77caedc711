//! Run control: build the queue from the latest checkpoint, run the worker
//! pool under throttle and shutdown control, then flush and summarize.

use super::pool::WorkerPool;
use super::retry::RetryPolicy;
use super::shutdown::{RunState, Shutdown};
use super::throttle::BatchThrottle;
use super::unit::FetchAndPersist;
use crate::config::RunConfig;
use crate::error::Result;
use crate::event::{Event, EventBus, EventKind};
use crate::model::TaskOutcome;
use crate::progress::ProgressStore;
use crate::queue::TaskQueue;
use crate::repository::Repository;
use crate::source::StatementSource;
use crate::summary::{RunSummary, summarize};
use crate::universe::Universe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Which part of the universe a run works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueMode {
    /// Skip codes the checkpoint already has as completed.
    #[default]
    Resume,
    /// Ignore the checkpoint when building the queue.
    Fresh,
    /// Only codes the checkpoint has as failed.
    OnlyFailed,
}

/// What a finished run reports back.
#[derive(Debug)]
pub struct RunReport {
    pub run_id: Uuid,
    pub summary: RunSummary,
    /// True when an interruption cut the run short.
    pub drained: bool,
    pub outcomes: Vec<TaskOutcome>,
}

/// Drives one ingestion run.
pub struct Ingestor<S, R> {
    source: Arc<S>,
    repository: Arc<R>,
    progress: Arc<ProgressStore>,
    config: RunConfig,
    shutdown: Shutdown,
    events: Arc<EventBus>,
}

impl<S: StatementSource, R: Repository> Ingestor<S, R> {
    pub fn new(
        source: Arc<S>,
        repository: Arc<R>,
        progress: Arc<ProgressStore>,
        config: RunConfig,
    ) -> Self {
        Self {
            source,
            repository,
            progress,
            config,
            shutdown: Shutdown::new(),
            events: Arc::new(EventBus::default()),
        }
    }

    /// Handle for requesting a drain (signal handlers, tests).
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Run to completion or until drained.
    ///
    /// Only checkpoint failures surface as errors; per-task failures are in
    /// the report.
    pub async fn run(&self, universe: &Universe, mode: QueueMode) -> Result<RunReport> {
        let started = Instant::now();
        let run_id = Uuid::new_v4();
        let snapshot = self.progress.snapshot().await;

        let queue = match mode {
            QueueMode::Resume => {
                TaskQueue::build(universe.codes(), &snapshot, self.config.limit)
            }
            QueueMode::Fresh => TaskQueue::build_all(universe.codes(), self.config.limit),
            QueueMode::OnlyFailed => TaskQueue::build(
                universe
                    .restrict(|code| snapshot.failed.contains_key(code))
                    .codes(),
                &snapshot,
                self.config.limit,
            ),
        };
        let planned = queue.planned();
        let already_completed = queue.already_completed();
        self.progress.set_total_planned(planned).await?;

        info!(
            %run_id,
            universe = universe.len(),
            planned,
            already_completed,
            workers = self.config.worker_count,
            batch_size = self.config.batch_size,
            batch_pause_seconds = self.config.batch_pause_seconds,
            "ingestion run started"
        );
        self.events.emit(EventKind::RunStarted {
            run_id,
            planned,
            already_completed,
            workers: self.config.worker_count,
        });

        let unit = FetchAndPersist::new(
            Arc::clone(&self.source),
            Arc::clone(&self.repository),
            self.config.per_call_timeout(),
            RetryPolicy::from_config(&self.config),
        );
        let throttle = Arc::new(BatchThrottle::new(
            self.config.batch_size,
            self.config.batch_pause(),
            planned,
        ));
        let pool = WorkerPool::new(
            unit,
            Arc::clone(&self.progress),
            throttle,
            self.shutdown.clone(),
            Arc::clone(&self.events),
            self.config.worker_count,
        );

        // Announce the drain as soon as it starts, not when the pool returns.
        let drain_watch = {
            let shutdown = self.shutdown.clone();
            let events = Arc::clone(&self.events);
            tokio::spawn(async move {
                shutdown.draining().await;
                if shutdown.state() == RunState::Draining {
                    events.emit(EventKind::Draining);
                }
            })
        };

        let result = pool.run(queue).await;
        let drained = self.shutdown.state() == RunState::Draining;
        self.shutdown.mark_stopped();
        drain_watch.abort();

        let outcomes = match result {
            Ok(outcomes) => outcomes,
            Err(e) => {
                error!(%run_id, error = %e, "ingestion run aborted");
                if let Err(flush_err) = self.progress.flush().await {
                    warn!(error = %flush_err, "final checkpoint flush failed");
                }
                return Err(e);
            }
        };

        self.progress.flush().await?;

        let summary = summarize(&outcomes)
            .with_already_completed(already_completed)
            .with_elapsed(started.elapsed());

        info!(
            %run_id,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            already_completed,
            elapsed_secs = summary.elapsed.as_secs_f64(),
            drained,
            "ingestion run stopped"
        );
        self.events.emit(EventKind::RunStopped {
            run_id,
            succeeded: summary.succeeded,
            failed: summary.failed,
            skipped: summary.skipped,
            drained,
        });

        Ok(RunReport {
            run_id,
            summary,
            drained,
            outcomes,
        })
    }
}
