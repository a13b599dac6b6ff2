//! Command line interface.

use clap::{Args, Parser, Subcommand};

use sluice_core::ConfigPath;

use crate::batch::BatchDate;
use crate::config::ConfigArgs;

#[derive(Parser, Debug)]
#[command(version, about = "Load batch CSV folders into partitioned BigQuery tables")]
pub struct CliArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    #[command(subcommand)]
    pub command: Command,
}

impl CliArgs {
    pub fn config_paths(&self) -> Vec<ConfigPath> {
        self.config.config_paths()
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a pipeline for one or more batch dates
    Run(RunArgs),
    /// Print the task graph of a pipeline run without running it
    Plan(RunArgs),
    /// Print the job configurations and merge SQL of a pipeline run
    Render(RunArgs),
    /// Only check that the source files of a batch are present
    Check(RunArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Pipeline id from the configuration
    #[arg(short, long)]
    pub pipeline: String,

    /// Batch date (YYYY-MM-DD), may be repeated. Defaults to today (UTC).
    #[arg(short = 'd', long = "batch-date")]
    pub batch_dates: Vec<BatchDate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let args = CliArgs::try_parse_from([
            "sluice",
            "run",
            "-c",
            "config/01_olist_raw_ingestion.yaml",
            "--pipeline",
            "01_olist_raw_ingestion",
            "-d",
            "2018-10-01",
            "--batch-date",
            "2018-10-02",
        ])
        .unwrap();

        assert_eq!(args.config_paths().len(), 1);
        let Command::Run(run) = args.command else {
            panic!("expected run");
        };
        assert_eq!(run.pipeline, "01_olist_raw_ingestion");
        assert_eq!(
            run.batch_dates,
            vec![
                "2018-10-01".parse::<BatchDate>().unwrap(),
                "2018-10-02".parse().unwrap()
            ]
        );
    }

    #[test]
    fn test_parse_config_dir_after_subcommand() {
        let args =
            CliArgs::try_parse_from(["sluice", "plan", "-p", "x", "-C", "config"]).unwrap();
        assert_eq!(args.config.config_dirs.len(), 1);
        assert!(matches!(args.command, Command::Plan(RunArgs { ref batch_dates, .. }) if batch_dates.is_empty()));
    }

    #[test]
    fn test_invalid_batch_date_rejected() {
        let err = CliArgs::try_parse_from(["sluice", "check", "-p", "x", "-d", "01/10/2018"])
            .unwrap_err();
        assert!(err.to_string().contains("expected YYYY-MM-DD"));
    }
}
