//! Core types for the batch engine.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::BatchError;
use super::template::ConcreteCommand;

/// Ordered, immutable list of opaque item identifiers for one stage.
///
/// Order only drives deterministic logging; execution may complete in any
/// order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemList(Vec<String>);

impl ItemList {
    /// Creates an item list from any sequence of identifiers.
    pub fn new<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(items.into_iter().map(Into::into).collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Rejects empty identifiers, reporting the first offending position.
    pub fn validate(&self) -> Result<(), BatchError> {
        match self.0.iter().position(|item| item.is_empty()) {
            Some(index) => Err(BatchError::EmptyItem { index }),
            None => Ok(()),
        }
    }
}

impl<S: Into<String>> FromIterator<S> for ItemList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter)
    }
}

/// Maximum number of tasks allowed in the running state at once.
///
/// There is no default: a missing or non-positive value is rejected so a
/// misconfigured stage can never fan out without bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ConcurrencyLimit(usize);

impl ConcurrencyLimit {
    /// Validates a raw configured value.
    pub fn new(value: i64) -> Result<Self, BatchError> {
        if value <= 0 {
            return Err(BatchError::InvalidConcurrency { value });
        }
        usize::try_from(value)
            .map(Self)
            .map_err(|_| BatchError::InvalidConcurrency { value })
    }

    pub fn get(self) -> usize {
        self.0
    }
}

impl TryFrom<i64> for ConcurrencyLimit {
    type Error = BatchError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl fmt::Display for ConcurrencyLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The unit of work: one item and the command expanded for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    /// Position of the item in its [`ItemList`].
    pub index: usize,
    /// The item identifier.
    pub item: String,
    /// The command to run for this item.
    pub command: ConcreteCommand,
}

/// Standard output and error captured from one child process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CapturedOutput {
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stdout.trim().is_empty() && self.stderr.trim().is_empty()
    }

    /// Diagnostic text for log lines: stderr first, then stdout.
    pub fn diagnostics(&self) -> String {
        let stderr = self.stderr.trim();
        let stdout = self.stdout.trim();
        match (stderr.is_empty(), stdout.is_empty()) {
            (true, true) => String::new(),
            (false, true) => stderr.to_string(),
            (true, false) => stdout.to_string(),
            (false, false) => format!("{stderr}\n{stdout}"),
        }
    }
}

/// Terminal outcome of a task.
///
/// A nonzero exit from the external tool is `Failed`; only an inability to
/// start the process at all is `ExecutionError`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The command ran and exited successfully.
    Succeeded {
        exit_code: i32,
        output: CapturedOutput,
    },

    /// The command ran and exited with an error status, was killed by a
    /// signal, or exceeded the per-item timeout.
    Failed {
        exit_code: Option<i32>,
        timed_out: bool,
        output: CapturedOutput,
    },

    /// The command could not be launched.
    ExecutionError { cause: String },
}

impl TaskOutcome {
    pub fn succeeded(exit_code: i32, output: CapturedOutput) -> Self {
        Self::Succeeded { exit_code, output }
    }

    pub fn failed(exit_code: Option<i32>, output: CapturedOutput) -> Self {
        Self::Failed {
            exit_code,
            timed_out: false,
            output,
        }
    }

    pub fn timed_out(output: CapturedOutput) -> Self {
        Self::Failed {
            exit_code: None,
            timed_out: true,
            output,
        }
    }

    pub fn execution_error(cause: impl Into<String>) -> Self {
        Self::ExecutionError {
            cause: cause.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::Succeeded { .. } => OutcomeKind::Succeeded,
            Self::Failed {
                timed_out: true, ..
            } => OutcomeKind::TimedOut,
            Self::Failed { .. } => OutcomeKind::ToolFailure,
            Self::ExecutionError { .. } => OutcomeKind::ExecutionError,
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Succeeded { exit_code, .. } => Some(*exit_code),
            Self::Failed { exit_code, .. } => *exit_code,
            Self::ExecutionError { .. } => None,
        }
    }

    /// Text describing why the task ended the way it did.
    pub fn diagnostics(&self) -> String {
        match self {
            Self::Succeeded { output, .. } => output.diagnostics(),
            Self::Failed {
                timed_out: true,
                output,
                ..
            } => {
                let captured = output.diagnostics();
                if captured.is_empty() {
                    "timed out".to_string()
                } else {
                    format!("timed out\n{captured}")
                }
            }
            Self::Failed { output, .. } => output.diagnostics(),
            Self::ExecutionError { cause } => cause.clone(),
        }
    }
}

/// Classification of a terminal outcome, for logs and summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Succeeded,
    ToolFailure,
    TimedOut,
    ExecutionError,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::ToolFailure => "tool_failure",
            Self::TimedOut => "timed_out",
            Self::ExecutionError => "execution_error",
        }
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed item as recorded in a [`StageSummary`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub index: usize,
    pub item: String,
    pub kind: OutcomeKind,
    pub exit_code: Option<i32>,
    pub diagnostics: String,
}

/// Aggregated outcome of one stage run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Failures in item-list order.
    pub failures: Vec<TaskFailure>,
}

impl StageSummary {
    /// Identifiers of the failed items, in item-list order.
    pub fn failed_items(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.item.as_str()).collect()
    }

    /// Fraction of items that failed, or `None` for an empty stage.
    pub fn failure_ratio(&self) -> Option<f64> {
        if self.total == 0 {
            None
        } else {
            Some(self.failed as f64 / self.total as f64)
        }
    }
}

/// Incrementally builds a [`StageSummary`] as task reports arrive.
#[derive(Debug)]
pub(crate) struct SummaryBuilder {
    summary: StageSummary,
}

impl SummaryBuilder {
    pub(crate) fn new(total: usize) -> Self {
        Self {
            summary: StageSummary {
                total,
                ..Default::default()
            },
        }
    }

    pub(crate) fn record(&mut self, index: usize, item: &str, outcome: &TaskOutcome) {
        if outcome.is_success() {
            self.summary.succeeded += 1;
        } else {
            self.summary.failed += 1;
            self.summary.failures.push(TaskFailure {
                index,
                item: item.to_string(),
                kind: outcome.kind(),
                exit_code: outcome.exit_code(),
                diagnostics: outcome.diagnostics(),
            });
        }
    }

    pub(crate) fn recorded(&self) -> usize {
        self.summary.succeeded + self.summary.failed
    }

    pub(crate) fn finish(mut self) -> StageSummary {
        self.summary.failures.sort_by_key(|f| f.index);
        self.summary
    }
}

/// Lifecycle of a coordinator running one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorState {
    /// Item list loaded, nothing submitted.
    Idle,
    /// Items are being resolved, expanded and submitted.
    Running,
    /// Everything is submitted; waiting for in-flight tasks.
    Draining,
    /// Terminal; the summary is final.
    Completed,
}

impl CoordinatorState {
    /// Whether `next` is a legal successor of this state.
    pub fn can_transition_to(&self, next: CoordinatorState) -> bool {
        use CoordinatorState::*;
        matches!(
            (self, next),
            (Idle, Running) | (Running, Draining) | (Draining, Completed)
        )
    }
}
