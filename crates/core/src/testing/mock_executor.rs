//! Mock executor for testing.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::batch::{CapturedOutput, CommandExecutor, Task, TaskOutcome};

/// A recorded execution for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedExecution {
    /// The task that was executed.
    pub task: Task,
    /// The outcome the mock produced.
    pub outcome: TaskOutcome,
}

#[derive(Debug, Clone)]
enum Scripted {
    Fail,
    ExecutionError,
    Panic,
    Delay(Duration),
}

/// Mock implementation of the CommandExecutor trait.
///
/// Provides controllable behavior for testing:
/// - Record every executed task
/// - Fail, refuse to launch, or panic for chosen items
/// - Simulate work with a delay, honouring the per-item timeout
/// - Track the highest number of simultaneous executions
#[derive(Debug, Default)]
pub struct MockExecutor {
    executions: Mutex<Vec<RecordedExecution>>,
    scripted: Mutex<HashMap<String, Scripted>>,
    touched: Mutex<HashSet<String>>,
    delay: Duration,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl MockExecutor {
    /// Create a mock executor where every task succeeds immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate `delay` of work per task.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Make the tool exit with status 1 for this item.
    pub fn fail_item(&self, item: impl Into<String>) {
        self.script(item, Scripted::Fail);
    }

    /// Make the launch itself fail for this item.
    pub fn refuse_item(&self, item: impl Into<String>) {
        self.script(item, Scripted::ExecutionError);
    }

    /// Panic while executing this item.
    pub fn panic_on_item(&self, item: impl Into<String>) {
        self.script(item, Scripted::Panic);
    }

    /// Override the delay for one item.
    pub fn delay_item(&self, item: impl Into<String>, delay: Duration) {
        self.script(item, Scripted::Delay(delay));
    }

    fn script(&self, item: impl Into<String>, behaviour: Scripted) {
        self.scripted
            .lock()
            .unwrap()
            .insert(item.into(), behaviour);
    }

    /// Get all recorded executions, in completion order.
    pub fn recorded_executions(&self) -> Vec<RecordedExecution> {
        self.executions.lock().unwrap().clone()
    }

    /// Items executed so far, sorted.
    pub fn executed_items(&self) -> Vec<String> {
        let mut items: Vec<String> = self
            .executions
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.task.item.clone())
            .collect();
        items.sort();
        items
    }

    /// Get the number of executions performed.
    pub fn call_count(&self) -> usize {
        self.executions.lock().unwrap().len()
    }

    /// Highest number of executions observed running at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Items whose output "file" exists, as an idempotent command would leave it.
    pub fn touched_items(&self) -> HashSet<String> {
        self.touched.lock().unwrap().clone()
    }
}

struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CommandExecutor for MockExecutor {
    fn name(&self) -> &str {
        "mock"
    }

    async fn execute(&self, task: &Task, timeout: Option<Duration>) -> TaskOutcome {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _guard = RunningGuard(&self.running);

        let scripted = self.scripted.lock().unwrap().get(&task.item).cloned();
        let delay = match scripted {
            Some(Scripted::Delay(delay)) => delay,
            _ => self.delay,
        };

        let finished = match timeout {
            Some(limit) => tokio::time::timeout(limit, tokio::time::sleep(delay))
                .await
                .is_ok(),
            None => {
                tokio::time::sleep(delay).await;
                true
            }
        };

        let outcome = if !finished {
            TaskOutcome::timed_out(CapturedOutput::default())
        } else {
            match scripted {
                Some(Scripted::Fail) => TaskOutcome::failed(
                    Some(1),
                    CapturedOutput::new("", format!("simulated failure for {}", task.item)),
                ),
                Some(Scripted::ExecutionError) => {
                    TaskOutcome::execution_error(format!("Program not found: {}", task.command.program))
                }
                Some(Scripted::Panic) => panic!("simulated executor panic for {}", task.item),
                _ => {
                    self.touched.lock().unwrap().insert(task.item.clone());
                    TaskOutcome::succeeded(0, CapturedOutput::new(task.command.display(), ""))
                }
            }
        };

        self.executions.lock().unwrap().push(RecordedExecution {
            task: task.clone(),
            outcome: outcome.clone(),
        });
        outcome
    }
}
