//! tidewater CLI: batch ETL from PostgreSQL and MongoDB into Redshift.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use tidewater::{
    CliArgs, Config, RunId, Runner, init_metrics, init_tracing, run_schedule, shutdown_token,
};

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let args = CliArgs::parse();

    let config = match Config::from_file(&args.config.to_string_lossy()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };

    let run_id = match args.run_id.as_deref().map(RunId::new).transpose() {
        Ok(run_id) => run_id,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let selected = match config.select(args.pipeline.as_deref()) {
        Ok(selected) => selected,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    for (key, pipeline) in &selected {
        info!(
            "  Pipeline: {} ({} -> {})",
            key,
            pipeline.source.kind(),
            pipeline.target.qualified_name()
        );
    }

    if args.dry_run {
        info!(pipelines = selected.len(), "Configuration is valid");
        return ExitCode::SUCCESS;
    }

    let mut runner =
        match Runner::from_config(&config, args.pipeline.as_deref(), run_id).await {
            Ok(runner) => runner,
            Err(e) => {
                error!(error = %e, "Failed to initialize");
                return ExitCode::FAILURE;
            }
        };

    if !args.schedule {
        let summary = runner.run_once().await;
        return if summary.all_succeeded() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        };
    }

    match config.metrics.socket_addr() {
        Ok(Some(addr)) => {
            if let Err(e) = init_metrics(addr) {
                error!(error = %e, "Failed to start metrics server");
                return ExitCode::FAILURE;
            }
            info!(address = %addr, "Serving metrics");
        }
        Ok(None) => {}
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    }

    info!(
        interval_secs = config.schedule.interval_secs,
        "Starting scheduled mode"
    );
    let shutdown = shutdown_token();
    match run_schedule(
        &mut runner,
        config.schedule.interval(),
        config.schedule.jitter_secs,
        shutdown,
        "tidewater",
    )
    .await
    {
        Ok(()) => ExitCode::SUCCESS,
        Err(never) => match never {},
    }
}
