mod loader;
mod types;
mod validate;

pub use loader::{load_config, load_config_from_str};
pub use types::*;
pub use validate::validate_config;

use thiserror::Error;

use crate::batch::BatchError;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    #[error("Invalid stage {stage:?}: {source}")]
    Stage {
        stage: String,
        #[source]
        source: BatchError,
    },
}

impl ConfigError {
    pub fn stage(stage: impl Into<String>, source: BatchError) -> Self {
        Self::Stage {
            stage: stage.into(),
            source,
        }
    }
}
