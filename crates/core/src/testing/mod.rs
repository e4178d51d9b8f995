//! Test doubles for the batch engine.
//!
//! # Example
//!
//! ```rust,ignore
//! use pagebatch_core::testing::MockExecutor;
//!
//! let executor = Arc::new(MockExecutor::new().with_delay(Duration::from_millis(20)));
//! executor.fail_item("b");
//!
//! let summary = coordinator.run_stage(&stage, &items).await?;
//! assert!(executor.peak_concurrency() <= 2);
//! ```

mod memory_log_store;
mod mock_executor;

pub use memory_log_store::MemoryLogStore;
pub use mock_executor::{MockExecutor, RecordedExecution};
