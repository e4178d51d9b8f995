pub mod batch;
pub mod config;
pub mod discovery;
pub mod ocr_check;
pub mod pipeline;
pub mod stage_log;
pub mod testing;

pub use batch::{
    AcceptabilityPolicy, BatchCoordinator, BatchError, CommandExecutor, CommandTemplate,
    ConcreteCommand, ConcurrencyLimit, ItemList, OutcomeKind, OutcomeReporter, ProcessExecutor,
    StageSpec, StageSummary, StageVerdict, TaskOutcome, TemplateMode,
};
pub use config::{
    load_config, load_config_from_str, validate_config, AcceptabilityConfig, Config, ConfigError,
    OnUnacceptable, StageConfig,
};
pub use discovery::{discover_items, DiscoveryError, ItemKind};
pub use ocr_check::{audit_stage, check_page, PageCheck};
pub use pipeline::{Pipeline, PipelineError, PipelineReport, StageReport};
pub use stage_log::{create_log_sink, DirectoryStore, LogHandle, LogSinkError, LogWriter};
