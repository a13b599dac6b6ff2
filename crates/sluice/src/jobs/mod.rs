//! Typed warehouse jobs.
//!
//! Jobs are plain values built from configuration. They render to the
//! BigQuery `JobConfiguration` JSON and carry enough structure for the
//! in-memory warehouse to execute the same semantics without parsing SQL.

mod load;
mod merge;

pub use load::{CreateDisposition, LoadConfiguration, LoadJob, SourceFormat, WriteDisposition};
pub use merge::{MergeJob, QueryConfiguration, METADATA_COLUMNS};

use serde::Serialize;
use std::fmt;

use crate::config::WarehouseConfig;

/// A dataset in a project and location.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatasetRef {
    pub project: String,
    pub dataset: String,
    pub location: String,
}

impl DatasetRef {
    pub fn raw(warehouse: &WarehouseConfig) -> Self {
        Self {
            project: warehouse.project.clone(),
            dataset: warehouse.raw_dataset.clone(),
            location: warehouse.location.clone(),
        }
    }

    pub fn staging(warehouse: &WarehouseConfig) -> Self {
        Self {
            project: warehouse.project.clone(),
            dataset: warehouse.staging_dataset.clone(),
            location: warehouse.location.clone(),
        }
    }
}

impl fmt::Display for DatasetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.project, self.dataset)
    }
}

/// A fully qualified table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableRef {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    /// Staging table for a logical table name.
    pub fn staging(warehouse: &WarehouseConfig, table: &str) -> Self {
        Self {
            project: warehouse.project.clone(),
            dataset: warehouse.staging_dataset.clone(),
            table: format!("{table}{}", warehouse.staging_suffix),
        }
    }

    /// Destination table for a logical table name.
    pub fn destination(warehouse: &WarehouseConfig, table: &str) -> Self {
        Self {
            project: warehouse.project.clone(),
            dataset: warehouse.raw_dataset.clone(),
            table: table.to_string(),
        }
    }

    /// Back-quoted reference for use in standard SQL.
    pub fn quoted(&self) -> String {
        format!("`{self}`")
    }

    pub fn reference(&self) -> TableReference {
        TableReference {
            project_id: self.project.clone(),
            dataset_id: self.dataset.clone(),
            table_id: self.table.clone(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

/// `TableReference` as it appears in the REST API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableReference {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
}

/// The `configuration` object of a BigQuery job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum JobConfiguration {
    Load(LoadConfiguration),
    Query(QueryConfiguration),
}

/// A job submitted to the warehouse.
#[derive(Debug, Clone, PartialEq)]
pub enum Job {
    Load(LoadJob),
    Merge(MergeJob),
}

impl Job {
    /// Logical table the job belongs to.
    pub fn table(&self) -> &str {
        match self {
            Job::Load(job) => &job.table,
            Job::Merge(job) => &job.table,
        }
    }

    pub fn destination(&self) -> &TableRef {
        match self {
            Job::Load(job) => &job.destination,
            Job::Merge(job) => &job.destination,
        }
    }

    pub fn configuration(&self) -> JobConfiguration {
        match self {
            Job::Load(job) => JobConfiguration::Load(job.configuration()),
            Job::Merge(job) => JobConfiguration::Query(job.configuration()),
        }
    }
}

/// Escape a value for use inside a single-quoted SQL string literal.
pub fn escape_literal(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\'' => escaped.push_str("\\'"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Unique job id for one attempt of a task.
///
/// BigQuery job ids may only contain letters, digits, `_` and `-`.
pub fn job_id(task: &str) -> String {
    let task: String = task
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("sluice_{task}_{}", uuid::Uuid::new_v4().simple())
}
