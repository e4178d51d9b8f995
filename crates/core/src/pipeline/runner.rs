//! Pipeline runner implementation.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crate::batch::{BatchCoordinator, BatchError, CommandExecutor, OutcomeReporter};
use crate::config::{validate_config, Config, ConfigError, OnUnacceptable, StageConfig};
use crate::discovery::{discover_items, DiscoveryError};
use crate::stage_log::LogHandle;

use super::types::{PipelineReport, StageReport};

/// Error type for pipeline operations.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Items for a stage could not be discovered.
    #[error("Discovery failed for stage {stage:?}: {source}")]
    Discovery {
        stage: String,
        #[source]
        source: DiscoveryError,
    },

    /// A stage was rejected before anything ran.
    #[error("Stage {stage:?} aborted: {source}")]
    Stage {
        stage: String,
        #[source]
        source: BatchError,
    },

    /// A requested stage is not configured.
    #[error("Unknown stage: {0}")]
    UnknownStage(String),
}

/// Runs configured stages in order over a batch folder.
pub struct Pipeline<E: CommandExecutor + ?Sized> {
    config: Config,
    coordinator: BatchCoordinator<E>,
    reporter: OutcomeReporter,
}

impl<E: CommandExecutor + ?Sized + 'static> Pipeline<E> {
    /// Creates a pipeline after validating the configuration.
    pub fn new(config: Config, executor: Arc<E>) -> Result<Self, PipelineError> {
        validate_config(&config)?;
        Ok(Self {
            config,
            coordinator: BatchCoordinator::new(executor),
            reporter: OutcomeReporter::new(),
        })
    }

    /// Sends per-item output and stage summaries to the stage log.
    pub fn with_log(mut self, log: Option<LogHandle>) -> Self {
        self.coordinator = self.coordinator.with_log(log.clone());
        self.reporter = self.reporter.with_log(log);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs the named stages, or all of them when `only` is empty.
    ///
    /// Stages always run in configuration order. A configuration or
    /// discovery error stops the run with an error; an unacceptable verdict
    /// stops it only for stages configured to halt.
    pub async fn run(&mut self, root: &Path, only: &[String]) -> Result<PipelineReport, PipelineError> {
        let stages = self.select_stages(only)?;
        let mut report = PipelineReport::default();

        for stage in stages {
            let stage_report = self.run_stage(root, &stage).await?;
            let acceptable = stage_report.verdict.acceptable;
            report.stages.push(stage_report);

            if !acceptable {
                match stage.on_unacceptable {
                    OnUnacceptable::Halt => {
                        tracing::error!(stage = %stage.name, "Halting pipeline");
                        report.halted_at = Some(stage.name.clone());
                        break;
                    }
                    OnUnacceptable::Warn => {
                        tracing::warn!(stage = %stage.name, "Continuing after unacceptable stage");
                    }
                }
            }
        }

        tracing::info!(
            stages = report.stages.len(),
            unacceptable = report.unacceptable_stages().len(),
            halted = report.halted(),
            "Pipeline finished"
        );
        Ok(report)
    }

    async fn run_stage(&mut self, root: &Path, stage: &StageConfig) -> Result<StageReport, PipelineError> {
        let started = Instant::now();
        let spec = stage.to_spec(&self.config.engine)?;
        let pattern = stage.pattern(&self.config.discovery);

        tracing::info!(stage = %stage.name, "Generating {} derivatives", stage.name);
        let items = discover_items(root, pattern, stage.items).map_err(|source| {
            PipelineError::Discovery {
                stage: stage.name.clone(),
                source,
            }
        })?;

        let summary = self
            .coordinator
            .run_stage(&spec, &items)
            .await
            .map_err(|source| PipelineError::Stage {
                stage: stage.name.clone(),
                source,
            })?;

        let policy = stage.acceptability.build();
        let verdict = self
            .reporter
            .report(&stage.name, &summary, policy.as_ref())
            .await;

        Ok(StageReport {
            name: stage.name.clone(),
            summary,
            verdict,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    fn select_stages(&self, only: &[String]) -> Result<Vec<StageConfig>, PipelineError> {
        if let Some(unknown) = only.iter().find(|name| self.config.stage(name).is_none()) {
            return Err(PipelineError::UnknownStage(unknown.clone()));
        }
        Ok(self
            .config
            .stages
            .iter()
            .filter(|s| only.is_empty() || only.contains(&s.name))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AcceptabilityConfig, ConcurrencySetting};
    use crate::discovery::ItemKind;
    use crate::testing::MockExecutor;
    use std::fs;

    fn batch_tree(pages: usize) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..pages {
            let page = dir.path().join(format!("issue/{i}"));
            fs::create_dir_all(&page).unwrap();
            fs::write(page.join("OBJ.tif"), b"tiff").unwrap();
        }
        dir
    }

    fn config(stages: Vec<StageConfig>) -> Config {
        let mut config = Config {
            stages,
            ..Default::default()
        };
        config.engine.concurrency = Some(ConcurrencySetting::Fixed(2));
        config
    }

    fn strict(name: &str, on_unacceptable: OnUnacceptable) -> StageConfig {
        StageConfig {
            acceptability: AcceptabilityConfig::NoFailures,
            on_unacceptable,
            ..StageConfig::new(name, "convert {itemPath} {itemDir}/OUT.jpg")
        }
    }

    #[tokio::test]
    async fn test_stages_run_in_order_over_discovered_items() {
        let root = batch_tree(3);
        let executor = Arc::new(MockExecutor::new());
        let mut pipeline = Pipeline::new(
            config(vec![
                StageConfig::new("tn", "convert {itemPath} {itemDir}/TN.jpg"),
                StageConfig {
                    items: ItemKind::Dirs,
                    ..StageConfig::new("check", "check-page {itemPath}")
                },
            ]),
            Arc::clone(&executor),
        )
        .unwrap();

        let report = pipeline.run(root.path(), &[]).await.unwrap();

        assert_eq!(report.stages.len(), 2);
        assert_eq!(report.stages[0].name, "tn");
        assert_eq!(report.stages[0].summary.total, 3);
        assert_eq!(report.stages[1].summary.total, 3);
        assert!(report.all_acceptable());
        assert_eq!(executor.call_count(), 6);

        // every tn task finished before the first check task started
        let executions = executor.recorded_executions();
        let programs: Vec<&str> = executions
            .iter()
            .map(|e| e.task.command.program.as_str())
            .collect();
        assert_eq!(&programs[..3], &["convert", "convert", "convert"]);
        assert_eq!(&programs[3..], &["check-page", "check-page", "check-page"]);
    }

    #[tokio::test]
    async fn test_halt_stops_later_stages() {
        let root = batch_tree(2);
        let executor = Arc::new(MockExecutor::new());
        let failing = root.path().join("issue/0/OBJ.tif");
        executor.fail_item(failing.to_string_lossy());

        let mut pipeline = Pipeline::new(
            config(vec![
                strict("tn", OnUnacceptable::Halt),
                StageConfig::new("jpg", "convert {itemPath} {itemDir}/JPG.jpg"),
            ]),
            Arc::clone(&executor),
        )
        .unwrap();

        let report = pipeline.run(root.path(), &[]).await.unwrap();
        assert_eq!(report.halted_at.as_deref(), Some("tn"));
        assert_eq!(report.stages.len(), 1);
        assert_eq!(report.unacceptable_stages(), vec!["tn"]);
        assert_eq!(executor.call_count(), 2);
    }

    #[tokio::test]
    async fn test_warn_continues() {
        let root = batch_tree(2);
        let executor = Arc::new(MockExecutor::new());
        executor.fail_item(root.path().join("issue/1/OBJ.tif").to_string_lossy());

        let mut pipeline = Pipeline::new(
            config(vec![
                strict("tn", OnUnacceptable::Warn),
                StageConfig::new("jpg", "convert {itemPath} {itemDir}/JPG.jpg"),
            ]),
            Arc::clone(&executor),
        )
        .unwrap();

        let report = pipeline.run(root.path(), &[]).await.unwrap();
        assert!(!report.halted());
        assert_eq!(report.stages.len(), 2);
        assert!(!report.all_acceptable());
        assert_eq!(executor.call_count(), 4);
    }

    #[tokio::test]
    async fn test_stage_filter() {
        let root = batch_tree(1);
        let executor = Arc::new(MockExecutor::new());
        let mut pipeline = Pipeline::new(
            config(vec![
                StageConfig::new("tn", "convert {itemPath} {itemDir}/TN.jpg"),
                StageConfig::new("jpg", "convert {itemPath} {itemDir}/JPG.jpg"),
            ]),
            Arc::clone(&executor),
        )
        .unwrap();

        let report = pipeline.run(root.path(), &["jpg".to_string()]).await.unwrap();
        assert_eq!(report.stages.len(), 1);
        assert_eq!(report.stages[0].name, "jpg");

        let err = pipeline
            .run(root.path(), &["large_jpg".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::UnknownStage(_)));
    }

    #[tokio::test]
    async fn test_missing_root_is_discovery_error() {
        let executor = Arc::new(MockExecutor::new());
        let mut pipeline = Pipeline::new(
            config(vec![StageConfig::new("tn", "true")]),
            executor,
        )
        .unwrap();

        let err = pipeline
            .run(Path::new("/nonexistent/batch"), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Discovery { .. }));
    }

    #[test]
    fn test_invalid_config_is_rejected_up_front() {
        let mut cfg = config(vec![StageConfig::new("tn", "true")]);
        cfg.engine.concurrency = Some(ConcurrencySetting::Fixed(0));
        let result = Pipeline::new(cfg, Arc::new(MockExecutor::new()));
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }
}
