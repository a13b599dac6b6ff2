//! Warehouse backends.
//!
//! - `bigquery`: BigQuery REST API (datasets.insert, jobs.insert, jobs.get)
//! - `memory`: in-process stand-in with the same job semantics

mod auth;
mod bigquery;
mod memory;

pub use auth::TokenProvider;
pub use bigquery::BigQueryWarehouse;
pub use memory::{MemTable, MemoryWarehouse, Mutation};

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use sluice_core::StorageProviderRef;

use crate::config::{WarehouseBackend, WarehouseConfig};
use crate::error::WarehouseError;
use crate::jobs::{DatasetRef, Job};

/// Result of ensuring a dataset exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetStatus {
    Created,
    AlreadyExists,
}

impl fmt::Display for DatasetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetStatus::Created => write!(f, "created"),
            DatasetStatus::AlreadyExists => write!(f, "already exists"),
        }
    }
}

/// What a finished job reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSummary {
    pub job_id: String,
    /// Rows written, when the backend reports it.
    pub rows: Option<u64>,
}

/// A warehouse that can host datasets and run load and query jobs.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Short backend name for logs and metrics.
    fn backend(&self) -> &'static str;

    /// Create the dataset unless it already exists.
    async fn ensure_dataset(&self, dataset: &DatasetRef) -> Result<DatasetStatus, WarehouseError>;

    /// Submit `job` under `job_id` and wait for it to finish.
    async fn run_job(&self, job_id: &str, job: &Job) -> Result<JobSummary, WarehouseError>;
}

pub type WarehouseRef = Arc<dyn Warehouse>;

/// Build the configured backend. `storage` serves source objects to the
/// in-memory backend.
pub fn from_config(
    config: &WarehouseConfig,
    storage: StorageProviderRef,
) -> Result<WarehouseRef, WarehouseError> {
    match config.backend {
        WarehouseBackend::BigQuery => Ok(Arc::new(BigQueryWarehouse::new(config)?)),
        WarehouseBackend::Memory => Ok(Arc::new(MemoryWarehouse::new(storage))),
    }
}
