use chrono::Utc;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{LogEntry, LogRecord};

/// Handle for emitting stage log records.
///
/// Cheaply cloneable; every clone feeds the same writer.
#[derive(Debug, Clone)]
pub struct LogHandle {
    tx: mpsc::Sender<LogRecord>,
    run_id: Uuid,
}

impl LogHandle {
    /// Create a new log handle from a channel sender
    pub fn new(tx: mpsc::Sender<LogRecord>, run_id: Uuid) -> Self {
        Self { tx, run_id }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Emit a record, waiting for channel capacity.
    ///
    /// A closed channel is logged, never surfaced to the caller.
    pub async fn emit(&self, stage: &str, entry: LogEntry) {
        let record = LogRecord {
            run_id: self.run_id,
            timestamp: Utc::now(),
            stage: stage.to_string(),
            entry,
        };
        if let Err(e) = self.tx.send(record).await {
            tracing::error!("Failed to emit stage log record: {}", e);
        }
    }
}
