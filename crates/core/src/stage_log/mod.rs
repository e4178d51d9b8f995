//! Serialized log sink for per-item stage output.
//!
//! Concurrent tasks emit whole [`LogRecord`]s through a cloneable
//! [`LogHandle`]; a single [`LogWriter`] task appends them to a
//! [`LogStore`]. Only the writer touches the store, so captured output from
//! two items can never be interleaved into one record.
//!
//! # Example
//!
//! ```ignore
//! use pagebatch_core::stage_log::{create_log_sink, DirectoryStore};
//!
//! let store = DirectoryStore::new("logs", |stage| format!("{stage}.log"));
//! let (handle, writer) = create_log_sink(Box::new(store), 256);
//! let writer_task = tokio::spawn(writer.run());
//!
//! // ... pass handle clones to the coordinator ...
//!
//! drop(handle);
//! writer_task.await?;
//! ```

mod handle;
mod record;
mod store;
mod writer;

pub use handle::LogHandle;
pub use record::{LogEntry, LogRecord};
pub use store::{DirectoryStore, LogSinkError, LogStore};
pub use writer::{create_log_sink, LogWriter};
