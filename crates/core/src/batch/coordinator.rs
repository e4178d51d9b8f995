//! Batch coordinator: runs one stage over an item list.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

use crate::stage_log::LogHandle;

use super::error::BatchError;
use super::executor::CommandExecutor;
use super::pool::{TaskReport, WorkerPool};
use super::template::CommandTemplate;
use super::types::{
    ConcurrencyLimit, CoordinatorState, ItemList, StageSummary, SummaryBuilder, Task, TaskOutcome,
};
use super::variables::{PathResolver, VariableResolver};

/// Everything needed to run one stage.
#[derive(Debug, Clone)]
pub struct StageSpec {
    pub name: String,
    pub template: CommandTemplate,
    pub concurrency: ConcurrencyLimit,
    /// Per-item timeout; `None` lets a hung tool hold its slot forever.
    pub item_timeout: Option<Duration>,
}

impl StageSpec {
    pub fn new(
        name: impl Into<String>,
        template: CommandTemplate,
        concurrency: ConcurrencyLimit,
    ) -> Self {
        Self {
            name: name.into(),
            template,
            concurrency,
            item_timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.item_timeout = timeout;
        self
    }
}

/// Drives resolution, expansion and submission for one stage at a time.
///
/// Every item produces exactly one terminal outcome, and `run_stage` only
/// returns once no task of the stage is still running.
pub struct BatchCoordinator<E: CommandExecutor + ?Sized> {
    executor: Arc<E>,
    resolver: Arc<dyn VariableResolver>,
    log: Option<LogHandle>,
    state: watch::Sender<CoordinatorState>,
}

impl<E: CommandExecutor + ?Sized + 'static> BatchCoordinator<E> {
    /// Creates a coordinator resolving items as paths.
    pub fn new(executor: Arc<E>) -> Self {
        let (state, _) = watch::channel(CoordinatorState::Idle);
        Self {
            executor,
            resolver: Arc::new(PathResolver),
            log: None,
            state,
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn VariableResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Sends per-item output to the stage log.
    pub fn with_log(mut self, log: Option<LogHandle>) -> Self {
        self.log = log;
        self
    }

    pub fn state(&self) -> CoordinatorState {
        *self.state.borrow()
    }

    /// Observes state transitions of the current and later runs.
    pub fn subscribe(&self) -> watch::Receiver<CoordinatorState> {
        self.state.subscribe()
    }

    /// Checks a stage against an item list without running anything.
    ///
    /// Rejects empty identifiers and placeholders the resolver cannot
    /// provide, then dry-runs expansion against the first item.
    pub fn validate(&self, stage: &StageSpec, items: &ItemList) -> Result<(), BatchError> {
        items.validate()?;
        stage.template.check_keys(self.resolver.keys())?;
        if let Some(sample) = items.iter().next() {
            let vars = self.resolver.resolve(sample)?;
            stage.template.expand(&vars)?;
        }
        Ok(())
    }

    /// Runs `stage` over every item and returns the finished summary.
    ///
    /// Configuration errors, including an item the resolver rejects, are
    /// returned before any process is spawned: every command is built up
    /// front. Per-item failures never abort the stage; they are counted in
    /// the summary.
    pub async fn run_stage(
        &mut self,
        stage: &StageSpec,
        items: &ItemList,
    ) -> Result<StageSummary, BatchError> {
        self.state.send_replace(CoordinatorState::Idle);
        self.validate(stage, items)?;
        let tasks = items
            .iter()
            .enumerate()
            .map(|(index, item)| self.build_task(stage, index, item))
            .collect::<Result<Vec<_>, _>>()?;

        let started = Instant::now();
        tracing::info!(
            stage = %stage.name,
            items = items.len(),
            concurrency = %stage.concurrency,
            template = %stage.template,
            "Stage starting"
        );

        let mut summary = SummaryBuilder::new(items.len());
        let mut reported = vec![false; items.len()];

        self.transition(CoordinatorState::Running);
        let (mut pool, mut reports) =
            WorkerPool::new(&stage.name, Arc::clone(&self.executor), stage.concurrency);
        pool = pool
            .with_timeout(stage.item_timeout)
            .with_log(self.log.clone());

        for task in tasks {
            pool.submit(task).await;

            while let Ok(report) = reports.try_recv() {
                record_report(&mut summary, &mut reported, &report);
            }
        }

        self.transition(CoordinatorState::Draining);
        tracing::debug!(
            stage = %stage.name,
            in_flight = pool.active(),
            "All items submitted, draining"
        );
        pool.finish().await;
        while let Some(report) = reports.recv().await {
            record_report(&mut summary, &mut reported, &report);
        }

        for (index, item) in items.iter().enumerate() {
            if !reported[index] {
                let outcome = TaskOutcome::execution_error("Task ended without reporting an outcome");
                record(&mut summary, &mut reported, index, item, &outcome);
            }
        }

        let summary = summary.finish();
        self.transition(CoordinatorState::Completed);
        tracing::debug!(
            stage = %stage.name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Stage completed"
        );
        Ok(summary)
    }

    fn build_task(&self, stage: &StageSpec, index: usize, item: &str) -> Result<Task, BatchError> {
        let vars = self.resolver.resolve(item)?;
        let command = stage.template.expand(&vars)?;
        Ok(Task {
            index,
            item: item.to_string(),
            command,
        })
    }

    fn transition(&self, next: CoordinatorState) {
        let current = self.state();
        debug_assert!(
            current.can_transition_to(next),
            "illegal transition {current:?} -> {next:?}"
        );
        tracing::debug!(from = ?current, to = ?next, "Coordinator state change");
        self.state.send_replace(next);
    }
}

fn record_report(summary: &mut SummaryBuilder, reported: &mut [bool], report: &TaskReport) {
    record(
        summary,
        reported,
        report.task.index,
        &report.task.item,
        &report.outcome,
    );
}

fn record(
    summary: &mut SummaryBuilder,
    reported: &mut [bool],
    index: usize,
    item: &str,
    outcome: &TaskOutcome,
) {
    match reported.get_mut(index) {
        Some(seen) if !*seen => {
            *seen = true;
            summary.record(index, item, outcome);
        }
        _ => tracing::error!(index, item = %item, "Duplicate or unknown task report ignored"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::variables::VariableSet;
    use crate::testing::MockExecutor;

    fn stage(template: &str, concurrency: i64) -> StageSpec {
        StageSpec::new(
            "test",
            CommandTemplate::parse(template).unwrap(),
            ConcurrencyLimit::new(concurrency).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_run_stage_example() {
        let executor = Arc::new(MockExecutor::new());
        executor.fail_item("b");
        let mut coordinator = BatchCoordinator::new(Arc::clone(&executor));

        let summary = coordinator
            .run_stage(
                &stage("touch {itemDir}/OUT.marker", 2),
                &ItemList::new(["a", "b", "c"]),
            )
            .await
            .unwrap();

        assert_eq!(summary.total, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.failed_items(), vec!["b"]);
        assert_eq!(coordinator.state(), CoordinatorState::Completed);
    }

    #[tokio::test]
    async fn test_unresolved_placeholder_spawns_nothing() {
        let executor = Arc::new(MockExecutor::new());
        let mut coordinator = BatchCoordinator::new(Arc::clone(&executor));

        let err = coordinator
            .run_stage(
                &stage("convert {itemPath} {pageNumber}.jpg", 2),
                &ItemList::new(["a", "b"]),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, BatchError::UnresolvedPlaceholder { .. }));
        assert_eq!(executor.call_count(), 0);
        assert_eq!(coordinator.state(), CoordinatorState::Idle);
    }

    #[tokio::test]
    async fn test_unresolved_placeholder_rejected_for_empty_list() {
        let executor = Arc::new(MockExecutor::new());
        let mut coordinator = BatchCoordinator::new(executor);
        let err = coordinator
            .run_stage(&stage("echo {nope}", 1), &ItemList::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::UnresolvedPlaceholder { .. }));
    }

    #[tokio::test]
    async fn test_empty_item_aborts_before_spawning() {
        let executor = Arc::new(MockExecutor::new());
        let mut coordinator = BatchCoordinator::new(Arc::clone(&executor));

        let err = coordinator
            .run_stage(&stage("echo {itemPath}", 2), &ItemList::new(["a", "b", ""]))
            .await
            .unwrap_err();

        assert_eq!(err, BatchError::EmptyItem { index: 2 });
        assert_eq!(executor.call_count(), 0);
    }

    #[tokio::test]
    async fn test_state_sequence_is_observable() {
        let executor = Arc::new(MockExecutor::new().with_delay(Duration::from_millis(10)));
        let mut coordinator = BatchCoordinator::new(executor);
        let mut states = coordinator.subscribe();
        assert_eq!(*states.borrow_and_update(), CoordinatorState::Idle);

        let watcher = tokio::spawn(async move {
            let mut seen = Vec::new();
            while states.changed().await.is_ok() {
                let state = *states.borrow_and_update();
                seen.push(state);
                if state == CoordinatorState::Completed {
                    break;
                }
            }
            seen
        });

        coordinator
            .run_stage(&stage("true", 1), &ItemList::new(["a", "b"]))
            .await
            .unwrap();
        let seen = watcher.await.unwrap();

        let rank = |s: &CoordinatorState| match s {
            CoordinatorState::Idle => 0,
            CoordinatorState::Running => 1,
            CoordinatorState::Draining => 2,
            CoordinatorState::Completed => 3,
        };
        assert_eq!(seen.last(), Some(&CoordinatorState::Completed));
        assert!(seen.windows(2).all(|w| rank(&w[0]) <= rank(&w[1])));
    }

    #[derive(Debug)]
    struct PageResolver;

    impl VariableResolver for PageResolver {
        fn keys(&self) -> &[&'static str] {
            &["page"]
        }

        fn resolve(&self, item: &str) -> Result<VariableSet, BatchError> {
            Ok(VariableSet::new().with("page", item.to_uppercase()))
        }
    }

    #[derive(Debug)]
    struct IssueResolver;

    impl VariableResolver for IssueResolver {
        fn keys(&self) -> &[&'static str] {
            &["issue"]
        }

        fn resolve(&self, item: &str) -> Result<VariableSet, BatchError> {
            match item.strip_prefix("issue-") {
                Some(issue) => Ok(VariableSet::new().with("issue", issue)),
                None => Err(BatchError::invalid_item(item, "not an issue folder")),
            }
        }
    }

    #[tokio::test]
    async fn test_resolver_rejection_aborts_before_spawning() {
        let executor = Arc::new(MockExecutor::new());
        let mut coordinator =
            BatchCoordinator::new(Arc::clone(&executor)).with_resolver(Arc::new(IssueResolver));

        let err = coordinator
            .run_stage(
                &stage("aggregate {issue}", 2),
                &ItemList::new(["issue-1", "issue-2", "misc", "issue-3"]),
            )
            .await
            .unwrap_err();

        assert_eq!(err, BatchError::invalid_item("misc", "not an issue folder"));
        assert_eq!(executor.call_count(), 0);
        assert_eq!(coordinator.state(), CoordinatorState::Idle);
    }

    #[tokio::test]
    async fn test_custom_resolver() {
        let executor = Arc::new(MockExecutor::new());
        let mut coordinator =
            BatchCoordinator::new(Arc::clone(&executor)).with_resolver(Arc::new(PageResolver));

        coordinator
            .run_stage(&stage("render {page}", 1), &ItemList::new(["p1"]))
            .await
            .unwrap();

        let executions = executor.recorded_executions();
        assert_eq!(executions[0].task.command.args, vec!["P1"]);
    }
}
