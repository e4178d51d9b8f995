//! Batch command execution engine.
//!
//! One stage applies one [`CommandTemplate`] to every item of an
//! [`ItemList`]:
//!
//! - a [`VariableResolver`] turns each item into a [`VariableSet`]
//! - the template expands that set into a [`ConcreteCommand`]
//! - a [`WorkerPool`] runs at most N commands at once on a
//!   [`CommandExecutor`]
//! - the [`BatchCoordinator`] collects every outcome into a
//!   [`StageSummary`]
//! - the [`OutcomeReporter`] logs the summary and evaluates an
//!   [`AcceptabilityPolicy`] into a [`StageVerdict`]
//!
//! The engine knows nothing about page images; items are opaque strings.
//!
//! # Example
//!
//! ```ignore
//! use pagebatch_core::batch::{
//!     BatchCoordinator, CommandTemplate, ConcurrencyLimit, ItemList, OutcomeReporter,
//!     ProcessExecutor, RatioThreshold, StageSpec,
//! };
//!
//! let stage = StageSpec::new(
//!     "tn",
//!     CommandTemplate::parse(r#"convert -resize 256x256 {itemPath} {itemDir}/TN.jpg"#)?,
//!     ConcurrencyLimit::new(4)?,
//! );
//! let items = ItemList::new(["issue-1/1/OBJ.tif", "issue-1/2/OBJ.tif"]);
//!
//! let mut coordinator = BatchCoordinator::new(Arc::new(ProcessExecutor::new()));
//! let summary = coordinator.run_stage(&stage, &items).await?;
//!
//! let verdict = OutcomeReporter::new()
//!     .report(&stage.name, &summary, &RatioThreshold::max_failure_ratio(0.1))
//!     .await;
//! ```

mod coordinator;
mod error;
mod executor;
mod pool;
mod report;
mod template;
mod types;
mod variables;

pub use coordinator::{BatchCoordinator, StageSpec};
pub use error::BatchError;
pub use executor::{CommandExecutor, ProcessExecutor};
pub use pool::{TaskReport, WorkerPool};
pub use report::{
    AcceptabilityPolicy, AlwaysAcceptable, FailureRatio, OutcomeReporter, RatioMetric,
    RatioThreshold, StageVerdict,
};
pub use template::{escape_braces, CommandTemplate, ConcreteCommand, TemplateMode};
pub use types::{
    CapturedOutput, ConcurrencyLimit, CoordinatorState, ItemList, OutcomeKind, StageSummary,
    Task, TaskFailure, TaskOutcome,
};
pub use variables::{
    PathResolver, VariableResolver, VariableSet, ITEM_DIR, ITEM_EXT, ITEM_NAME, ITEM_PATH,
    ITEM_STEM,
};
