//! Command line arguments.

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about)]
pub struct CliArgs {
    /// Path to the configuration file
    #[arg(short, long)]
    pub config: PathBuf,

    /// Run only this pipeline
    #[arg(short, long)]
    pub pipeline: Option<String>,

    /// Reuse a run id, e.g. to retry a specific staging location
    #[arg(long)]
    pub run_id: Option<String>,

    /// Validate the configuration and exit
    #[arg(long)]
    pub dry_run: bool,

    /// Keep running on the configured interval instead of exiting after one run
    #[arg(long)]
    pub schedule: bool,
}
