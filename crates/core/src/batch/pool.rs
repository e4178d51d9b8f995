//! Bounded pool of concurrently running tasks.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;

use crate::stage_log::{LogEntry, LogHandle};

use super::executor::CommandExecutor;
use super::types::{ConcurrencyLimit, Task, TaskOutcome};

/// A task together with its terminal outcome.
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub task: Task,
    pub outcome: TaskOutcome,
}

/// Runs at most `limit` tasks at a time on an executor.
///
/// [`submit`](Self::submit) waits for a free slot, which is the only
/// backpressure: nothing queues beyond the running tasks. Each task reports
/// exactly once through the channel returned by [`new`](Self::new).
pub struct WorkerPool<E: CommandExecutor + ?Sized> {
    stage: String,
    executor: Arc<E>,
    limit: ConcurrencyLimit,
    item_timeout: Option<Duration>,
    slots: Arc<Semaphore>,
    tasks: JoinSet<()>,
    reports: mpsc::UnboundedSender<TaskReport>,
    log: Option<LogHandle>,
}

impl<E: CommandExecutor + ?Sized + 'static> WorkerPool<E> {
    /// Creates a pool and the receiver its task reports arrive on.
    pub fn new(
        stage: impl Into<String>,
        executor: Arc<E>,
        limit: ConcurrencyLimit,
    ) -> (Self, mpsc::UnboundedReceiver<TaskReport>) {
        let (reports, rx) = mpsc::unbounded_channel();
        let pool = Self {
            stage: stage.into(),
            executor,
            limit,
            item_timeout: None,
            slots: Arc::new(Semaphore::new(limit.get())),
            tasks: JoinSet::new(),
            reports,
            log: None,
        };
        (pool, rx)
    }

    /// Sets the per-item timeout.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.item_timeout = timeout;
        self
    }

    /// Sends every task's captured output to the stage log.
    pub fn with_log(mut self, log: Option<LogHandle>) -> Self {
        self.log = log;
        self
    }

    pub fn limit(&self) -> ConcurrencyLimit {
        self.limit
    }

    /// Number of tasks currently holding a slot.
    pub fn active(&self) -> usize {
        self.limit.get() - self.slots.available_permits()
    }

    /// Starts a task once a slot is free.
    pub async fn submit(&mut self, task: Task) {
        let permit = match Arc::clone(&self.slots).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                // The semaphore is never closed while the pool is alive.
                let outcome = TaskOutcome::execution_error("Worker pool closed");
                let _ = self.reports.send(TaskReport { task, outcome });
                return;
            }
        };

        let executor = Arc::clone(&self.executor);
        let timeout = self.item_timeout;
        let reports = self.reports.clone();
        let log = self.log.clone();
        let stage = self.stage.clone();

        self.tasks.spawn(async move {
            let outcome = AssertUnwindSafe(executor.execute(&task, timeout))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| TaskOutcome::execution_error("Executor panicked"));
            drop(permit);

            tracing::debug!(
                stage = %stage,
                item = %task.item,
                outcome = %outcome.kind(),
                "Task finished"
            );
            if let Some(log) = log {
                log.emit(&stage, LogEntry::task(&task, &outcome)).await;
            }

            let _ = reports.send(TaskReport { task, outcome });
        });
    }

    /// Waits for every submitted task and closes the report channel.
    ///
    /// When this returns no child process started by the pool is running.
    pub async fn finish(mut self) {
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(stage = %self.stage, "Worker task ended abnormally: {}", e);
            }
        }
    }
}
