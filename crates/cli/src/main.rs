mod cli;

use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pagebatch_core::config::ConcurrencySetting;
use pagebatch_core::{
    audit_stage, check_page, create_log_sink, load_config, Config, DirectoryStore, Pipeline,
    PipelineReport, ProcessExecutor,
};

use cli::{Cli, Command};

/// Buffer size for the stage log channel
const LOG_BUFFER_SIZE: usize = 1000;

/// Exit status when a stage verdict was unacceptable
const EXIT_UNACCEPTABLE: i32 = 2;

/// Exit status of `check-page` for a page without text
const EXIT_TEXTLESS: i32 = 1;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.json);

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("Fatal error: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);

    // stdout carries the report; stderr of check-page ends up in stage logs
    let ansi = std::io::stderr().is_terminal();
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(ansi)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

async fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Run {
            root,
            config,
            stages,
        } => {
            info!("Loading configuration from {:?}", config);
            let config = load_config(&config)
                .with_context(|| format!("Failed to load config from {:?}", config))?;
            let report = run_pipeline(config, &root, &stages).await?;
            print_report(&report, cli.json)?;
            Ok(exit_code(&report))
        }
        Command::CheckOcr {
            root,
            concurrency,
            log_dir,
        } => {
            let program = std::env::current_exe().context("Cannot locate pagebatch executable")?;
            let mut config = Config::default();
            config.engine.concurrency = Some(match concurrency {
                Some(n) => ConcurrencySetting::Fixed(n),
                None => ConcurrencySetting::Keyword("auto".to_string()),
            });
            config.logging.log_dir = log_dir;
            config.stages = vec![audit_stage(&program.to_string_lossy())];

            let report = run_pipeline(config, &root, &[]).await?;
            print_report(&report, cli.json)?;
            Ok(exit_code(&report))
        }
        Command::CheckPage { dir } => {
            let check = check_page(&dir);
            if cli.json {
                println!("{}", serde_json::to_string(&check)?);
            }
            Ok(if check.is_textless() { EXIT_TEXTLESS } else { 0 })
        }
    }
}

async fn run_pipeline(config: Config, root: &Path, stages: &[String]) -> Result<PipelineReport> {
    let store = DirectoryStore::new(config.logging.log_dir.clone(), |stage| {
        format!("{stage}.log")
    });
    let (log, writer) = create_log_sink(Box::new(store), LOG_BUFFER_SIZE);
    let writer_task = tokio::spawn(writer.run());
    info!("Stage logs: {:?} (run {})", config.logging.log_dir, log.run_id());

    let executor = Arc::new(ProcessExecutor::new());
    let result = match Pipeline::new(config, executor) {
        Ok(pipeline) => {
            let mut pipeline = pipeline.with_log(Some(log));
            let report = pipeline.run(root, stages).await;
            report
        }
        Err(e) => {
            drop(log);
            Err(e)
        }
    };

    // The writer exits once every handle is gone.
    writer_task.await.context("Stage log writer failed")?;
    Ok(result?)
}

fn exit_code(report: &PipelineReport) -> i32 {
    if report.all_acceptable() {
        0
    } else {
        EXIT_UNACCEPTABLE
    }
}

fn print_report(report: &PipelineReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    for stage in &report.stages {
        let summary = &stage.summary;
        println!(
            "{:<12} {:>5} total {:>5} ok {:>5} failed  {}",
            stage.name,
            summary.total,
            summary.succeeded,
            summary.failed,
            if stage.verdict.acceptable {
                "acceptable"
            } else {
                "UNACCEPTABLE"
            }
        );
        for failure in &summary.failures {
            println!("    {} ({})", failure.item, failure.kind);
        }
    }
    if let Some(stage) = &report.halted_at {
        println!("Halted after stage {stage}");
    }
    Ok(())
}
