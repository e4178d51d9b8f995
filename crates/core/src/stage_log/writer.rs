use tokio::sync::mpsc;
use uuid::Uuid;

use super::{LogHandle, LogRecord, LogStore};

/// Background task that receives log records and writes them to a store
pub struct LogWriter {
    rx: mpsc::Receiver<LogRecord>,
    store: Box<dyn LogStore>,
}

impl LogWriter {
    pub fn new(rx: mpsc::Receiver<LogRecord>, store: Box<dyn LogStore>) -> Self {
        Self { rx, store }
    }

    /// Run the writer, consuming records until every handle is dropped
    ///
    /// This should be spawned as a background task.
    pub async fn run(mut self) {
        tracing::debug!("Stage log writer started");

        while let Some(record) = self.rx.recv().await {
            if let Err(e) = self.store.append(&record) {
                tracing::error!("Failed to write stage log record: {}", e);
            }
            // Flush once the burst is drained.
            if self.rx.is_empty() {
                if let Err(e) = self.store.flush() {
                    tracing::error!("Failed to flush stage log: {}", e);
                }
            }
        }

        if let Err(e) = self.store.flush() {
            tracing::error!("Failed to flush stage log: {}", e);
        }
        tracing::debug!("Stage log writer shutting down");
    }
}

/// Create a complete log sink
///
/// Returns:
/// - `LogHandle` - for emitting records (clone this to share across tasks)
/// - `LogWriter` - spawn this as a background task with `tokio::spawn(writer.run())`
///
/// Emitters wait when `buffer_size` records are pending.
pub fn create_log_sink(store: Box<dyn LogStore>, buffer_size: usize) -> (LogHandle, LogWriter) {
    let (tx, rx) = mpsc::channel(buffer_size.max(1));
    let handle = LogHandle::new(tx, Uuid::new_v4());
    let writer = LogWriter::new(rx, store);
    (handle, writer)
}
