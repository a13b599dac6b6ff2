//! sluice: batch CSV ingestion from object storage into partitioned BigQuery
//! tables.
//!
//! For every batch date a pipeline:
//! - optionally checks that every expected source file is present
//! - ensures the raw and staging datasets exist
//! - truncate-loads each CSV file into its staging table
//! - replaces the batch's `load_date` partition of each destination table
//!
//! Task graphs are built by `dag` and executed by the `sluice-core` graph
//! executor. Warehouse access goes through the `warehouse::Warehouse` trait.

pub mod batch;
pub mod cli;
pub mod config;
pub mod dag;
pub mod error;
pub mod jobs;
pub mod preflight;
pub mod render;
pub mod run;
pub mod state;
pub mod steps;
pub mod warehouse;

// Re-export commonly used items
pub use batch::{BatchDate, SourceLayout};
pub use cli::{CliArgs, Command, RunArgs};
pub use config::{Config, PipelineConfig, PipelineKey, Policy};
pub use dag::{Step, build_graph};
pub use error::PipelineError;
pub use preflight::{PreflightGuard, PreflightReport};
pub use run::{PipelineReport, RunFailure, RunSummary, run_pipeline, run_pipeline_with};

pub use sluice_core::{
    SlotPools, SlotPoolsRef, StorageProvider, StorageProviderRef, TaskOutcome, init_metrics,
    init_tracing, shutdown_signal,
};
