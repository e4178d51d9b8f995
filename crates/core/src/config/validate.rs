use std::collections::HashSet;

use crate::batch::{PathResolver, VariableResolver};

use super::{types::Config, AcceptabilityConfig, ConfigError};

/// Validate configuration
///
/// Checks:
/// - At least one stage, with unique names usable as file names
/// - Every template parses in its mode and only uses known placeholders
/// - Every stage resolves to a positive concurrency limit
/// - Timeouts are positive and thresholds lie within [0, 1]
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.stages.is_empty() {
        return Err(ConfigError::ValidationError(
            "at least one [[stages]] entry is required".to_string(),
        ));
    }

    if config.engine.item_timeout_secs == Some(0) {
        return Err(ConfigError::ValidationError(
            "engine.item_timeout_secs cannot be 0".to_string(),
        ));
    }

    let mut names = HashSet::new();
    for stage in &config.stages {
        let name = stage.name.trim();
        if name.is_empty() {
            return Err(ConfigError::ValidationError(
                "stage name cannot be empty".to_string(),
            ));
        }
        if name.contains('/') || name.contains('\\') || name.starts_with('.') {
            return Err(ConfigError::ValidationError(format!(
                "stage name {:?} cannot contain path separators or start with '.'",
                stage.name
            )));
        }
        if !names.insert(name) {
            return Err(ConfigError::ValidationError(format!(
                "duplicate stage name {:?}",
                stage.name
            )));
        }

        if stage.timeout_secs == Some(0) {
            return Err(ConfigError::ValidationError(format!(
                "stage {:?}: timeout_secs cannot be 0",
                stage.name
            )));
        }

        if let AcceptabilityConfig::MaxFailureRatio { threshold } = stage.acceptability {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(ConfigError::ValidationError(format!(
                    "stage {:?}: threshold {} must be between 0 and 1",
                    stage.name, threshold
                )));
            }
        }

        let spec = stage.to_spec(&config.engine)?;
        spec.template
            .check_keys(PathResolver.keys())
            .map_err(|e| ConfigError::stage(&stage.name, e))?;
    }

    Ok(())
}
