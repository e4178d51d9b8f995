//! In-memory log store for testing.

use std::sync::{Arc, Mutex};

use crate::stage_log::{LogEntry, LogRecord, LogSinkError, LogStore};

/// Log store that keeps records in memory.
///
/// Clones share the same buffer, so a test can hand one clone to the writer
/// and inspect another.
#[derive(Debug, Clone, Default)]
pub struct MemoryLogStore {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all stored records, in write order.
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().unwrap().clone()
    }

    /// Records for one stage.
    pub fn records_for(&self, stage: &str) -> Vec<LogRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.stage == stage)
            .collect()
    }

    /// Number of per-item records for one stage.
    pub fn task_count(&self, stage: &str) -> usize {
        self.records_for(stage)
            .iter()
            .filter(|r| matches!(r.entry, LogEntry::Task { .. }))
            .count()
    }
}

impl LogStore for MemoryLogStore {
    fn append(&mut self, record: &LogRecord) -> Result<(), LogSinkError> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}
