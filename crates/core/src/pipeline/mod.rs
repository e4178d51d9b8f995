//! Sequential pipeline driver.
//!
//! Runs configured stages one after another over a batch folder. Each stage
//! rediscovers its items, since earlier stages create files later stages
//! read, and no stage starts before the previous one has completed.
//!
//! # Example
//!
//! ```ignore
//! use pagebatch_core::{load_config, Pipeline, ProcessExecutor};
//!
//! let config = load_config(Path::new("pipeline.toml"))?;
//! let mut pipeline = Pipeline::new(config, Arc::new(ProcessExecutor::new()))?;
//! let report = pipeline.run(Path::new("Y-Teen Scene-original-batched"), &[]).await?;
//! if !report.all_acceptable() {
//!     // warn or halt
//! }
//! ```

mod runner;
mod types;

pub use runner::{Pipeline, PipelineError};
pub use types::{PipelineReport, StageReport};
