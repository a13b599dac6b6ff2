//! Error types for the sluice ingestion pipelines.

use snafu::prelude::*;

use crate::state::TableState;

// Re-export common errors
pub use sluice_core::error::{ConfigError, GraphError, MetricsError, StorageError};

/// A batch date string could not be parsed.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
#[snafu(display("Invalid batch date '{value}', expected YYYY-MM-DD: {source}"))]
pub struct BatchDateError {
    pub value: String,
    pub source: chrono::ParseError,
}

/// Errors raised by the source file guard.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PreflightError {
    /// Nothing exists under the batch prefix.
    #[snafu(display("No objects found under {prefix}"))]
    EmptyBatch { prefix: String },

    /// Some expected files are absent.
    #[snafu(display(
        "Missing {} expected source file(s): {}",
        missing.len(),
        missing.join(", ")
    ))]
    MissingFiles { missing: Vec<String> },

    /// The batch prefix could not be listed.
    #[snafu(display("Failed to list {prefix}: {source}"))]
    Listing {
        prefix: String,
        source: StorageError,
    },
}

/// Errors raised by warehouse backends.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum WarehouseError {
    /// HTTP transport failure.
    #[snafu(display("Warehouse request failed: {source}"))]
    Http { source: reqwest::Error },

    /// The API answered with a non-success status.
    #[snafu(display("Warehouse API returned {status} for {operation}: {message}"))]
    Api {
        operation: String,
        status: u16,
        message: String,
    },

    /// A submitted job finished with an error result.
    #[snafu(display("Job {job_id} failed ({reason}): {message}"))]
    JobFailed {
        job_id: String,
        reason: String,
        message: String,
    },

    /// No access token could be obtained.
    #[snafu(display("Failed to obtain access token: {message}"))]
    Auth { message: String },

    /// Reading a source object failed.
    #[snafu(display("Failed to read {uri}: {source}"))]
    Source { uri: String, source: StorageError },

    /// A source object is not valid CSV.
    #[snafu(display("Failed to parse CSV {uri}: {source}"))]
    Csv { uri: String, source: csv::Error },

    /// A CSV row has a different number of fields than the header.
    #[snafu(display(
        "Jagged row in {uri} at line {line}: expected {expected} fields, found {found}"
    ))]
    JaggedRow {
        uri: String,
        line: u64,
        expected: usize,
        found: usize,
    },

    /// A dataset or table does not exist.
    #[snafu(display("Not found: {what}"))]
    NotFound { what: String },

    /// Staging and destination columns disagree.
    #[snafu(display("Schema mismatch for {table}: {message}"))]
    SchemaMismatch { table: String, message: String },
}

/// Invalid table lifecycle transitions.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StateError {
    #[snafu(display("Table '{table}' cannot move from {from} to {to}"))]
    InvalidTransition {
        table: String,
        from: TableState,
        to: TableState,
    },

    #[snafu(display("Table '{table}' is not tracked"))]
    UnknownTable { table: String },
}

/// Top-level pipeline errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    /// Configuration error.
    #[snafu(display("Configuration error: {source}"))]
    Config { source: ConfigError },

    /// Storage error.
    #[snafu(display("Storage error: {source}"))]
    Storage { source: StorageError },

    /// Task graph error.
    #[snafu(display("Task graph error: {source}"))]
    Graph { source: GraphError },

    /// Source file guard error.
    #[snafu(display("Preflight check failed: {source}"))]
    Preflight { source: PreflightError },

    /// Warehouse error.
    #[snafu(display("Warehouse error: {source}"))]
    Warehouse { source: WarehouseError },

    /// Metrics error.
    #[snafu(display("Metrics error: {source}"))]
    Metrics { source: MetricsError },

    /// Failed to serialize a job configuration.
    #[snafu(display("Failed to serialize job configuration: {source}"))]
    Serialize { source: serde_json::Error },

    /// A run panicked.
    #[snafu(display("Run {key} panicked: {message}"))]
    RunPanicked { key: String, message: String },
}

impl From<ConfigError> for PipelineError {
    fn from(source: ConfigError) -> Self {
        PipelineError::Config { source }
    }
}

impl From<StorageError> for PipelineError {
    fn from(source: StorageError) -> Self {
        PipelineError::Storage { source }
    }
}

impl From<GraphError> for PipelineError {
    fn from(source: GraphError) -> Self {
        PipelineError::Graph { source }
    }
}

impl From<PreflightError> for PipelineError {
    fn from(source: PreflightError) -> Self {
        PipelineError::Preflight { source }
    }
}

impl From<WarehouseError> for PipelineError {
    fn from(source: WarehouseError) -> Self {
        PipelineError::Warehouse { source }
    }
}

impl From<MetricsError> for PipelineError {
    fn from(source: MetricsError) -> Self {
        PipelineError::Metrics { source }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(source: serde_json::Error) -> Self {
        PipelineError::Serialize { source }
    }
}
