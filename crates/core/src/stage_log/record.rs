use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::batch::{OutcomeKind, StageSummary, StageVerdict, Task, TaskOutcome};

/// One line of a stage log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Identifies the invocation that produced the record.
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub stage: String,
    #[serde(flatten)]
    pub entry: LogEntry,
}

/// Payload of a [`LogRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogEntry {
    /// Terminal outcome of one item, with everything it printed.
    Task {
        index: usize,
        item: String,
        command: String,
        outcome: OutcomeKind,
        #[serde(skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        stdout: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        stderr: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        cause: Option<String>,
    },

    /// Aggregate counts and verdict for a finished stage.
    Summary {
        total: usize,
        succeeded: usize,
        failed: usize,
        acceptable: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        ratio: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        threshold: Option<f64>,
    },
}

impl LogEntry {
    /// Builds the record payload for a finished task.
    pub fn task(task: &Task, outcome: &TaskOutcome) -> Self {
        let (stdout, stderr, cause) = match outcome {
            TaskOutcome::Succeeded { output, .. } | TaskOutcome::Failed { output, .. } => {
                (output.stdout.clone(), output.stderr.clone(), None)
            }
            TaskOutcome::ExecutionError { cause } => {
                (String::new(), String::new(), Some(cause.clone()))
            }
        };
        Self::Task {
            index: task.index,
            item: task.item.clone(),
            command: task.command.display(),
            outcome: outcome.kind(),
            exit_code: outcome.exit_code(),
            stdout,
            stderr,
            cause,
        }
    }

    /// Builds the record payload for a finished stage.
    pub fn summary(summary: &StageSummary, verdict: &StageVerdict) -> Self {
        Self::Summary {
            total: summary.total,
            succeeded: summary.succeeded,
            failed: summary.failed,
            acceptable: verdict.acceptable,
            ratio: verdict.ratio,
            threshold: verdict.threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{CapturedOutput, ConcreteCommand};

    #[test]
    fn test_task_record_serializes_as_single_json_object() {
        let task = Task {
            index: 4,
            item: "issue/5/OBJ.tif".to_string(),
            command: ConcreteCommand::new("convert", vec!["issue/5/OBJ.tif".to_string()]),
        };
        let outcome = TaskOutcome::failed(Some(1), CapturedOutput::new("", "bad\nimage\n"));
        let record = LogRecord {
            run_id: Uuid::nil(),
            timestamp: Utc::now(),
            stage: "tn".to_string(),
            entry: LogEntry::task(&task, &outcome),
        };

        let line = serde_json::to_string(&record).unwrap();
        assert!(!line.contains('\n'));

        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["type"], "task");
        assert_eq!(value["stage"], "tn");
        assert_eq!(value["outcome"], "tool_failure");
        assert_eq!(value["exit_code"], 1);
        assert_eq!(value["stderr"], "bad\nimage\n");
        assert!(value.get("stdout").is_none());
    }

    #[test]
    fn test_execution_error_record_has_cause() {
        let task = Task {
            index: 0,
            item: "a".to_string(),
            command: ConcreteCommand::new("missing-tool", vec![]),
        };
        let entry = LogEntry::task(&task, &TaskOutcome::execution_error("Program not found"));
        match entry {
            LogEntry::Task { cause, outcome, .. } => {
                assert_eq!(cause.as_deref(), Some("Program not found"));
                assert_eq!(outcome, OutcomeKind::ExecutionError);
            }
            other => panic!("unexpected entry: {:?}", other),
        }
    }
}
