//! Worker pool: N workers pulling tasks off one shared queue.
//!
//! A worker records each outcome in the progress store before it pulls its
//! next task, so an abrupt kill loses at most one outcome per worker. The
//! queue pop and the progress record are separate critical sections; neither
//! is held across the unit call.

use super::shutdown::Shutdown;
use super::throttle::BatchThrottle;
use super::unit::FetchAndPersist;
use crate::error::{Error, Result};
use crate::event::{EventBus, EventKind};
use crate::model::{Task, TaskOutcome};
use crate::progress::ProgressStore;
use crate::queue::TaskQueue;
use crate::repository::Repository;
use crate::source::StatementSource;
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error};

pub struct WorkerPool<S, R> {
    unit: FetchAndPersist<S, R>,
    progress: Arc<ProgressStore>,
    throttle: Arc<BatchThrottle>,
    shutdown: Shutdown,
    events: Arc<EventBus>,
    worker_count: usize,
}

impl<S, R> Clone for WorkerPool<S, R> {
    fn clone(&self) -> Self {
        Self {
            unit: self.unit.clone(),
            progress: Arc::clone(&self.progress),
            throttle: Arc::clone(&self.throttle),
            shutdown: self.shutdown.clone(),
            events: Arc::clone(&self.events),
            worker_count: self.worker_count,
        }
    }
}

/// State shared by the workers of one run.
struct Shared {
    queue: Mutex<TaskQueue>,
    /// Outcomes in completion order.
    outcomes: Mutex<Vec<TaskOutcome>>,
}

impl<S: StatementSource, R: Repository> WorkerPool<S, R> {
    pub fn new(
        unit: FetchAndPersist<S, R>,
        progress: Arc<ProgressStore>,
        throttle: Arc<BatchThrottle>,
        shutdown: Shutdown,
        events: Arc<EventBus>,
        worker_count: usize,
    ) -> Self {
        Self {
            unit,
            progress,
            throttle,
            shutdown,
            events,
            worker_count: worker_count.max(1),
        }
    }

    /// Drain the queue (or stop early on a drain request) and return every
    /// recorded outcome in completion order.
    ///
    /// A checkpoint failure in any worker drains the others and is returned
    /// once they are idle.
    pub async fn run(&self, queue: TaskQueue) -> Result<Vec<TaskOutcome>> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(queue),
            outcomes: Mutex::new(Vec::new()),
        });

        let mut workers = JoinSet::new();
        for worker in 0..self.worker_count {
            let pool = self.clone();
            let shared = Arc::clone(&shared);
            workers.spawn(async move { pool.worker_loop(worker, &shared).await });
        }

        let mut fatal: Option<Error> = None;
        while let Some(joined) = workers.join_next().await {
            let err = match joined {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e,
                Err(e) => Error::Other(format!("worker task failed: {e}")),
            };
            error!(error = %err, "worker stopped with a fatal error");
            self.shutdown.drain("checkpoint failure");
            fatal.get_or_insert(err);
        }

        if let Some(err) = fatal {
            return Err(err);
        }
        let outcomes = std::mem::take(&mut *shared.outcomes.lock().await);
        Ok(outcomes)
    }

    async fn worker_loop(&self, worker: usize, shared: &Shared) -> Result<()> {
        loop {
            self.throttle.wait_ready(&self.shutdown).await;

            let Some(task) = self.next_task(shared).await else {
                break;
            };

            self.events.emit(EventKind::TaskStarted {
                code: task.code.clone(),
                ordinal: task.ordinal,
                worker,
            });

            let outcome = self.unit.execute(&task).await;
            self.progress.record(&outcome).await?;

            metrics::tasks_finished().add(1, &[KeyValue::new("status", outcome.status.to_string())]);
            metrics::task_duration_ms().record(outcome.duration_ms as f64, &[]);

            let (recorded, pause_due) = self.throttle.observe();
            self.events.emit(EventKind::TaskFinished {
                code: outcome.code.clone(),
                status: outcome.status,
                attempts: outcome.attempts,
                recorded,
            });
            shared.outcomes.lock().await.push(outcome);

            if pause_due {
                self.throttle.pause(recorded, &self.shutdown, &self.events).await;
            }
        }

        debug!(worker, "worker idle");
        Ok(())
    }

    /// Pop the next task, or None when the queue is exhausted or the run is
    /// draining. A pause that started since the gate opened sends the worker
    /// back to the gate.
    async fn next_task(&self, shared: &Shared) -> Option<Task> {
        loop {
            {
                let mut queue = shared.queue.lock().await;
                if !self.shutdown.is_running() {
                    return None;
                }
                if !self.throttle.is_paused() {
                    return queue.pop();
                }
            }
            self.throttle.wait_ready(&self.shutdown).await;
        }
    }
}
