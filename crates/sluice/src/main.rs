//! sluice CLI: batch CSV ingestion into partitioned BigQuery tables.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sluice::batch::SourceLayout;
use sluice::run::max_parallel;
use sluice::{
    CliArgs, Command, Config, PipelineError, PreflightGuard, RunArgs, RunSummary, StorageProvider,
    TaskOutcome, init_metrics, init_tracing, render, run_pipeline, shutdown_signal,
};

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let args = CliArgs::parse();

    let paths = args.config_paths();
    if paths.is_empty() {
        eprintln!("Error: no config files or directories specified");
        return ExitCode::FAILURE;
    }

    info!("Loading config from {} source(s)", paths.len());

    let config = match Config::from_paths(&paths) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_metrics(&config.metrics) {
        eprintln!("Failed to initialize metrics: {e}");
        return ExitCode::FAILURE;
    }

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    match execute(&config, args.command, shutdown).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Pipeline failed: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn execute(
    config: &Config,
    command: Command,
    shutdown: CancellationToken,
) -> Result<bool, PipelineError> {
    match command {
        Command::Run(args) => {
            let report = run_pipeline(config, &args.pipeline, &args.batch_dates, shutdown).await?;
            for summary in &report.summaries {
                print_summary(summary);
            }
            for failure in &report.failures {
                println!("{}: failed: {}", failure.run, failure.error);
            }
            for run in &report.cancelled {
                println!("{run}: cancelled before start");
            }
            Ok(report.is_success())
        }
        Command::Plan(args) => {
            let (key, pipeline) = config.pipeline(&args.pipeline)?;
            for batch in batch_dates(config, &args)? {
                print!(
                    "{}",
                    render::plan(key, pipeline, &batch, max_parallel(config, pipeline))?
                );
            }
            Ok(true)
        }
        Command::Render(args) => {
            let (_, pipeline) = config.pipeline(&args.pipeline)?;
            for batch in batch_dates(config, &args)? {
                println!("{}", render::jobs(pipeline, &batch)?);
            }
            Ok(true)
        }
        Command::Check(args) => {
            let (_, pipeline) = config.pipeline(&args.pipeline)?;
            let storage = Arc::new(StorageProvider::for_url(&pipeline.source.bucket_url)?);
            let layout = SourceLayout::new(&pipeline.source.bucket_url, &pipeline.source.base_path);
            let guard = PreflightGuard::new(storage, layout, &pipeline.tables);
            for batch in batch_dates(config, &args)? {
                let report = guard.check(&batch).await?;
                println!(
                    "{}: {} expected files present",
                    report.prefix,
                    report.present.len()
                );
                for uri in &report.unexpected {
                    println!("  unexpected: {uri}");
                }
            }
            Ok(true)
        }
    }
}

fn batch_dates(
    config: &Config,
    args: &RunArgs,
) -> Result<Vec<sluice::BatchDate>, PipelineError> {
    let (key, pipeline) = config.pipeline(&args.pipeline)?;
    let (dates, overridden) = pipeline.resolve_batch_dates(&args.batch_dates);
    if overridden {
        warn!(
            pipeline = %key,
            batch_date = %dates[0],
            "Pipeline has a fixed batch date, ignoring requested dates"
        );
    }
    Ok(dates)
}

fn print_summary(summary: &RunSummary) {
    let status = if summary.is_success() { "success" } else { "failed" };
    println!(
        "{}@{}: {status} in {:.1}s",
        summary.pipeline,
        summary.batch,
        summary.report.duration().as_secs_f64()
    );
    for (task, outcome) in summary.report.outcomes() {
        let detail = match outcome {
            TaskOutcome::Success { output, attempts, .. } => format!(
                "success after {attempts} attempt(s){}",
                output
                    .message
                    .as_deref()
                    .map(|m| format!(": {m}"))
                    .unwrap_or_default()
            ),
            TaskOutcome::Failed { error, attempts, .. } => {
                format!("failed after {attempts} attempt(s): {error}")
            }
            TaskOutcome::UpstreamFailed { upstream } => format!("skipped, {upstream} failed"),
            TaskOutcome::Cancelled => "cancelled".to_string(),
        };
        println!("  {task}: {detail}");
    }
    for (table, state) in &summary.tables {
        println!("  table {table}: {state}");
    }
}
