use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Generate derivatives for a batch of scanned pages.
#[derive(Debug, Parser)]
#[command(name = "pagebatch", version, about)]
pub struct Cli {
    /// Emit JSON logs and a JSON report
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the configured stages over a batch folder
    Run {
        /// Batch folder holding the master images
        root: PathBuf,

        /// Pipeline configuration file
        #[arg(short, long, default_value = "pipeline.toml")]
        config: PathBuf,

        /// Only run the named stage (repeatable); configuration order is kept
        #[arg(short, long = "stage", value_name = "NAME")]
        stages: Vec<String>,
    },

    /// Audit OCR output of every page under a batch folder
    CheckOcr {
        root: PathBuf,

        /// Pages checked at once (defaults to one per CPU)
        #[arg(short = 'j', long)]
        concurrency: Option<i64>,

        /// Directory for the audit's stage log
        #[arg(long, default_value = "logs")]
        log_dir: PathBuf,
    },

    /// Check the OCR output of one page directory; exits 1 when it has no text
    CheckPage { dir: PathBuf },
}
