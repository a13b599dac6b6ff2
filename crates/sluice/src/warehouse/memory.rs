//! In-process warehouse.
//!
//! Reads source CSV objects through the storage provider and applies load and
//! merge jobs to tables held in memory, recording every mutation. Used for
//! dry runs against local batch folders and by the test suites.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use indexmap::IndexMap;
use snafu::ResultExt;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;
use tracing::{debug, info};

use sluice_core::StorageProviderRef;
use sluice_core::emit;
use sluice_core::metrics::events::{
    RequestStatus, WarehouseJob, WarehouseJobDuration, WarehouseOperation,
};

use crate::batch::BatchDate;
use crate::error::{CsvSnafu, SourceSnafu, WarehouseError};
use crate::jobs::{DatasetRef, Job, LoadJob, METADATA_COLUMNS, MergeJob, TableRef};

use super::{DatasetStatus, JobSummary, Warehouse};

const BACKEND: &str = "memory";

/// A table held by [`MemoryWarehouse`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub partition_column: Option<String>,
}

impl MemTable {
    fn partition_index(&self) -> Option<usize> {
        let column = self.partition_column.as_deref()?;
        self.columns.iter().position(|c| c == column)
    }
}

/// A change applied to the warehouse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    CreateDataset { dataset: String },
    TruncateLoad { table: TableRef, rows: usize },
    CreateTable { table: TableRef },
    DeletePartition { table: TableRef, partition: BatchDate, rows: usize },
    InsertPartition { table: TableRef, partition: BatchDate, rows: usize },
}

#[derive(Debug, Default)]
struct State {
    datasets: IndexMap<String, String>,
    tables: IndexMap<TableRef, MemTable>,
    mutations: Vec<Mutation>,
    failures: HashMap<TableRef, u32>,
    insert_failures: HashMap<TableRef, u32>,
}

fn consume(failures: &mut HashMap<TableRef, u32>, table: &TableRef) -> bool {
    match failures.get_mut(table) {
        Some(remaining) if *remaining > 0 => {
            *remaining -= 1;
            true
        }
        _ => false,
    }
}

fn injected(job_id: &str, message: String) -> WarehouseError {
    WarehouseError::JobFailed {
        job_id: job_id.to_string(),
        reason: "backendError".to_string(),
        message,
    }
}

impl State {
    fn require_dataset(&self, project: &str, dataset: &str) -> Result<(), WarehouseError> {
        let key = format!("{project}.{dataset}");
        if self.datasets.contains_key(&key) {
            Ok(())
        } else {
            Err(WarehouseError::NotFound {
                what: format!("dataset {key}"),
            })
        }
    }

    fn take_failure(&mut self, table: &TableRef, job_id: &str) -> Result<(), WarehouseError> {
        if consume(&mut self.failures, table) {
            return Err(injected(job_id, format!("injected failure for {table}")));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct MemoryWarehouse {
    storage: StorageProviderRef,
    state: Mutex<State>,
}

impl MemoryWarehouse {
    pub fn new(storage: StorageProviderRef) -> Self {
        Self {
            storage,
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make the next `times` jobs writing to `table` fail.
    pub fn fail_jobs_for(&self, table: &TableRef, times: u32) {
        self.state().failures.insert(table.clone(), times);
    }

    /// Make the next `times` merges into `table` fail after the partition
    /// DELETE. Atomic merges roll the DELETE back; plain ones leave the
    /// partition empty.
    pub fn fail_inserts_for(&self, table: &TableRef, times: u32) {
        self.state().insert_failures.insert(table.clone(), times);
    }

    pub fn dataset_exists(&self, dataset: &DatasetRef) -> bool {
        self.state().datasets.contains_key(&dataset.to_string())
    }

    pub fn table(&self, table: &TableRef) -> Option<MemTable> {
        self.state().tables.get(table).cloned()
    }

    /// Rows of `table` whose partition column equals `partition`.
    pub fn partition_rows(&self, table: &TableRef, partition: &BatchDate) -> Vec<Vec<String>> {
        let state = self.state();
        let Some(mem) = state.tables.get(table) else {
            return Vec::new();
        };
        let Some(index) = mem.partition_index() else {
            return Vec::new();
        };
        let value = partition.to_string();
        mem.rows
            .iter()
            .filter(|row| row[index] == value)
            .cloned()
            .collect()
    }

    /// Distinct partitions present in `table`, ascending.
    pub fn partitions(&self, table: &TableRef) -> Vec<BatchDate> {
        let state = self.state();
        let Some(mem) = state.tables.get(table) else {
            return Vec::new();
        };
        let Some(index) = mem.partition_index() else {
            return Vec::new();
        };
        mem.rows
            .iter()
            .filter_map(|row| row[index].parse().ok())
            .collect::<BTreeSet<BatchDate>>()
            .into_iter()
            .collect()
    }

    pub fn mutations(&self) -> Vec<Mutation> {
        self.state().mutations.clone()
    }

    async fn read_csv(&self, job: &LoadJob) -> Result<MemTable, WarehouseError> {
        let bytes = self
            .storage
            .get(&job.object)
            .await
            .context(SourceSnafu { uri: job.uri.clone() })?;

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(bytes.as_ref());
        let columns: Vec<String> = reader
            .headers()
            .context(CsvSnafu { uri: job.uri.clone() })?
            .iter()
            .map(|c| c.trim().to_string())
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.context(CsvSnafu { uri: job.uri.clone() })?;
            if record.len() != columns.len() {
                return Err(WarehouseError::JaggedRow {
                    uri: job.uri.clone(),
                    line: record.position().map(|p| p.line()).unwrap_or_default(),
                    expected: columns.len(),
                    found: record.len(),
                });
            }
            rows.push(record.iter().map(str::to_string).collect());
        }

        Ok(MemTable {
            columns,
            rows,
            partition_column: None,
        })
    }

    async fn load(&self, job_id: &str, job: &LoadJob) -> Result<JobSummary, WarehouseError> {
        {
            let mut state = self.state();
            state.require_dataset(&job.destination.project, &job.destination.dataset)?;
            state.take_failure(&job.destination, job_id)?;
        }

        let table = self.read_csv(job).await?;
        let rows = table.rows.len();

        let mut state = self.state();
        state.tables.insert(job.destination.clone(), table);
        state.mutations.push(Mutation::TruncateLoad {
            table: job.destination.clone(),
            rows,
        });
        debug!(table = %job.destination, rows, "Truncate-loaded staging table");

        Ok(JobSummary {
            job_id: job_id.to_string(),
            rows: Some(rows as u64),
        })
    }

    fn merge(&self, job_id: &str, job: &MergeJob) -> Result<JobSummary, WarehouseError> {
        let mut state = self.state();
        state.require_dataset(&job.destination.project, &job.destination.dataset)?;
        state.take_failure(&job.destination, job_id)?;

        let staging = state
            .tables
            .get(&job.staging)
            .cloned()
            .ok_or_else(|| WarehouseError::NotFound {
                what: format!("table {}", job.staging),
            })?;

        let mut expected = staging.columns.clone();
        expected.extend(METADATA_COLUMNS.iter().map(|c| c.to_string()));

        if !state.tables.contains_key(&job.destination) {
            state.tables.insert(
                job.destination.clone(),
                MemTable {
                    columns: expected.clone(),
                    rows: Vec::new(),
                    partition_column: Some(job.partition_column().to_string()),
                },
            );
            state.mutations.push(Mutation::CreateTable {
                table: job.destination.clone(),
            });
            info!(table = %job.destination, "Created partitioned table");
        }

        let partition = job.batch.to_string();
        let ingestion_ts = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        let inserted: Vec<Vec<String>> = staging
            .rows
            .iter()
            .map(|row| {
                let mut row = row.clone();
                row.extend([
                    partition.clone(),
                    ingestion_ts.clone(),
                    job.source_file.clone(),
                    job.source_uri.clone(),
                ]);
                row
            })
            .collect();
        let inserted_count = inserted.len();
        let insert_fails = consume(&mut state.insert_failures, &job.destination);

        let destination = state
            .tables
            .get_mut(&job.destination)
            .ok_or_else(|| WarehouseError::NotFound {
                what: format!("table {}", job.destination),
            })?;
        if destination.columns != expected {
            return Err(WarehouseError::SchemaMismatch {
                table: job.destination.to_string(),
                message: format!(
                    "expected columns {:?}, found {:?}",
                    expected, destination.columns
                ),
            });
        }
        let index = destination.partition_index().ok_or_else(|| {
            WarehouseError::SchemaMismatch {
                table: job.destination.to_string(),
                message: format!("not partitioned by {}", job.partition_column()),
            }
        })?;

        let before = destination.rows.len();
        let deleted = if job.atomic {
            if insert_fails {
                return Err(injected(
                    job_id,
                    format!("injected INSERT failure for {}, transaction rolled back", job.destination),
                ));
            }
            let mut rows: Vec<Vec<String>> = destination
                .rows
                .iter()
                .filter(|row| row[index] != partition)
                .cloned()
                .collect();
            let deleted = before - rows.len();
            rows.extend(inserted);
            destination.rows = rows;
            deleted
        } else {
            destination.rows.retain(|row| row[index] != partition);
            let deleted = before - destination.rows.len();
            if insert_fails {
                state.mutations.push(Mutation::DeletePartition {
                    table: job.destination.clone(),
                    partition: job.batch,
                    rows: deleted,
                });
                return Err(injected(
                    job_id,
                    format!("injected INSERT failure for {}", job.destination),
                ));
            }
            destination.rows.extend(inserted);
            deleted
        };

        state.mutations.push(Mutation::DeletePartition {
            table: job.destination.clone(),
            partition: job.batch,
            rows: deleted,
        });
        state.mutations.push(Mutation::InsertPartition {
            table: job.destination.clone(),
            partition: job.batch,
            rows: inserted_count,
        });
        debug!(
            table = %job.destination,
            partition = %job.batch,
            deleted,
            inserted = inserted_count,
            "Replaced partition"
        );

        Ok(JobSummary {
            job_id: job_id.to_string(),
            rows: Some(inserted_count as u64),
        })
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn ensure_dataset(&self, dataset: &DatasetRef) -> Result<DatasetStatus, WarehouseError> {
        let mut state = self.state();
        let key = dataset.to_string();
        let status = if state.datasets.contains_key(&key) {
            DatasetStatus::AlreadyExists
        } else {
            state.datasets.insert(key.clone(), dataset.location.clone());
            state.mutations.push(Mutation::CreateDataset { dataset: key });
            DatasetStatus::Created
        };
        emit!(WarehouseJob {
            operation: WarehouseOperation::EnsureDataset,
            status: RequestStatus::Success,
            backend: BACKEND,
        });
        info!(dataset = %dataset, status = %status, "Ensured dataset");
        Ok(status)
    }

    async fn run_job(&self, job_id: &str, job: &Job) -> Result<JobSummary, WarehouseError> {
        let start = Instant::now();
        let (operation, result) = match job {
            Job::Load(load) => (WarehouseOperation::Load, self.load(job_id, load).await),
            Job::Merge(merge) => (WarehouseOperation::Query, self.merge(job_id, merge)),
        };
        emit!(WarehouseJob {
            operation,
            status: RequestStatus::of(&result),
            backend: BACKEND,
        });
        emit!(WarehouseJobDuration {
            operation,
            duration: start.elapsed(),
        });
        result
    }
}
