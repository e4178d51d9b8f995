use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::ConfigError;
use crate::batch::{
    AcceptabilityPolicy, AlwaysAcceptable, BatchError, CommandTemplate, ConcurrencyLimit,
    RatioThreshold, StageSpec, TemplateMode,
};
use crate::discovery::ItemKind;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub stages: Vec<StageConfig>,
}

impl Config {
    /// Looks up a stage by name.
    pub fn stage(&self, name: &str) -> Option<&StageConfig> {
        self.stages.iter().find(|s| s.name == name)
    }
}

/// Settings shared by every stage
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Concurrency limit; required, either a positive integer or `"auto"`.
    #[serde(default)]
    pub concurrency: Option<ConcurrencySetting>,
    /// Default per-item timeout in seconds (unset: no timeout)
    #[serde(default)]
    pub item_timeout_secs: Option<u64>,
    /// Shell used by stages with `mode = "shell"`
    #[serde(default = "default_shell")]
    pub shell: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: None,
            item_timeout_secs: None,
            shell: default_shell(),
        }
    }
}

fn default_shell() -> String {
    "/bin/sh".to_string()
}

/// A configured concurrency limit
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ConcurrencySetting {
    Fixed(i64),
    /// Only `"auto"` is accepted: one slot per available CPU.
    Keyword(String),
}

impl ConcurrencySetting {
    pub fn resolve(&self) -> Result<ConcurrencyLimit, ConfigError> {
        match self {
            Self::Fixed(value) => ConcurrencyLimit::new(*value)
                .map_err(|e| ConfigError::ValidationError(format!("engine.concurrency: {e}"))),
            Self::Keyword(word) if word == "auto" => {
                let cpus = std::thread::available_parallelism().map_err(|e| {
                    ConfigError::ValidationError(format!("Cannot determine CPU count: {e}"))
                })?;
                ConcurrencyLimit::new(cpus.get() as i64)
                    .map_err(|e| ConfigError::ValidationError(e.to_string()))
            }
            Self::Keyword(word) => Err(ConfigError::ValidationError(format!(
                "engine.concurrency must be a positive integer or \"auto\", got {word:?}"
            ))),
        }
    }
}

/// Item discovery configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscoveryConfig {
    /// File-name glob identifying master images
    #[serde(default = "default_pattern")]
    pub pattern: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            pattern: default_pattern(),
        }
    }
}

fn default_pattern() -> String {
    "OBJ.*".to_string()
}

/// Stage log configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
        }
    }
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

/// One pipeline stage
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StageConfig {
    pub name: String,
    pub template: String,
    #[serde(default)]
    pub mode: TemplateMode,
    /// Overrides `engine.concurrency` for this stage
    #[serde(default)]
    pub concurrency: Option<i64>,
    /// Overrides `engine.item_timeout_secs` for this stage
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub items: ItemKind,
    /// Overrides `discovery.pattern` for this stage
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub acceptability: AcceptabilityConfig,
    #[serde(default)]
    pub on_unacceptable: OnUnacceptable,
}

impl StageConfig {
    /// Creates a direct-mode stage with default policies.
    pub fn new(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            template: template.into(),
            mode: TemplateMode::Direct,
            concurrency: None,
            timeout_secs: None,
            items: ItemKind::Files,
            pattern: None,
            acceptability: AcceptabilityConfig::Always,
            on_unacceptable: OnUnacceptable::Warn,
        }
    }

    pub fn concurrency_limit(&self, engine: &EngineConfig) -> Result<ConcurrencyLimit, ConfigError> {
        match (self.concurrency, &engine.concurrency) {
            (Some(value), _) => ConcurrencyLimit::new(value)
                .map_err(|e| ConfigError::stage(&self.name, e)),
            (None, Some(setting)) => setting.resolve(),
            (None, None) => Err(ConfigError::stage(
                &self.name,
                BatchError::InvalidConcurrency { value: 0 },
            )),
        }
    }

    pub fn item_timeout(&self, engine: &EngineConfig) -> Option<Duration> {
        self.timeout_secs
            .or(engine.item_timeout_secs)
            .map(Duration::from_secs)
    }

    /// Parses the template and resolves limits into a runnable stage.
    pub fn to_spec(&self, engine: &EngineConfig) -> Result<StageSpec, ConfigError> {
        let template = CommandTemplate::with_mode(&self.template, self.mode, &engine.shell)
            .map_err(|e| ConfigError::stage(&self.name, e))?;
        let concurrency = self.concurrency_limit(engine)?;
        Ok(StageSpec::new(&self.name, template, concurrency).with_timeout(self.item_timeout(engine)))
    }

    pub fn pattern<'a>(&'a self, discovery: &'a DiscoveryConfig) -> &'a str {
        self.pattern.as_deref().unwrap_or(&discovery.pattern)
    }
}

/// Which acceptability policy a stage uses
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum AcceptabilityConfig {
    /// Failures are logged, never fatal
    #[default]
    Always,
    /// Any failure makes the stage unacceptable
    NoFailures,
    /// At most `threshold` (0.0 to 1.0) of the items may fail
    MaxFailureRatio { threshold: f64 },
}

impl AcceptabilityConfig {
    pub fn build(&self) -> Box<dyn AcceptabilityPolicy> {
        match self {
            Self::Always => Box::new(AlwaysAcceptable),
            Self::NoFailures => Box::new(RatioThreshold::no_failures()),
            Self::MaxFailureRatio { threshold } => {
                Box::new(RatioThreshold::max_failure_ratio(*threshold))
            }
        }
    }
}

/// What the pipeline does after an unacceptable stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OnUnacceptable {
    /// Log the verdict and continue with the next stage
    #[default]
    Warn,
    /// Stop the run after this stage
    Halt,
}
