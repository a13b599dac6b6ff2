//! Task graphs for the ingestion pipelines.
//!
//! `build_graph` is pure: it only decides which steps exist and how they are
//! ordered. Running them is left to [`crate::steps::StepContext`].
//!
//! Parallel policy:
//!
//! ```text
//! ensure_raw_dataset -> ensure_tmp_dataset -+-> bq_load_tmp__customers -> bq_upsert_partition__customers
//!                                           +-> bq_load_tmp__orders    -> bq_upsert_partition__orders
//!                                           +-> ...
//! ```
//!
//! Serial policy runs `check_source_files` first and chains every table's
//! merge into the next table's load, so the graph is a single line.

use std::fmt;

use sluice_core::{GraphError, TaskGraph};

use crate::batch::{BatchDate, SourceLayout};
use crate::config::{PipelineConfig, Policy, TableMapping};
use crate::jobs::{DatasetRef, Job, LoadJob, MergeJob};

pub const CHECK_SOURCE_FILES: &str = "check_source_files";
pub const ENSURE_RAW_DATASET: &str = "ensure_raw_dataset";
pub const ENSURE_TMP_DATASET: &str = "ensure_tmp_dataset";
const TABLE_GROUP: &str = "load_all_tables";

pub fn load_task_id(table: &str) -> String {
    format!("{TABLE_GROUP}.bq_load_tmp__{table}")
}

pub fn merge_task_id(table: &str) -> String {
    format!("{TABLE_GROUP}.bq_upsert_partition__{table}")
}

/// What a task does when it runs.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    CheckSourceFiles(BatchDate),
    EnsureDataset(DatasetRef),
    Job(Job),
}

impl Step {
    /// Table the step works on, if any.
    pub fn table(&self) -> Option<&str> {
        match self {
            Step::Job(job) => Some(job.table()),
            _ => None,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::CheckSourceFiles(batch) => write!(f, "check source files for {}", batch.folder()),
            Step::EnsureDataset(dataset) => {
                write!(f, "ensure dataset {dataset} ({})", dataset.location)
            }
            Step::Job(Job::Load(job)) => {
                write!(f, "load {} into {} (truncate)", job.uri, job.destination)
            }
            Step::Job(Job::Merge(job)) => write!(
                f,
                "replace partition load_date={} of {} from {}",
                job.batch, job.destination, job.staging
            ),
        }
    }
}

/// Build the task graph of `config` for one batch.
pub fn build_graph(config: &PipelineConfig, batch: &BatchDate) -> Result<TaskGraph<Step>, GraphError> {
    let layout = SourceLayout::new(&config.source.bucket_url, &config.source.base_path);
    let warehouse = &config.warehouse;
    let mut graph = TaskGraph::new();

    let mut previous = match config.policy {
        Policy::Serial => {
            graph.add_task(CHECK_SOURCE_FILES, Step::CheckSourceFiles(*batch))?;
            Some(CHECK_SOURCE_FILES.to_string())
        }
        Policy::Parallel => None,
    };

    graph.add_task(
        ENSURE_RAW_DATASET,
        Step::EnsureDataset(DatasetRef::raw(warehouse)),
    )?;
    graph.add_task(
        ENSURE_TMP_DATASET,
        Step::EnsureDataset(DatasetRef::staging(warehouse)),
    )?;
    if let Some(check) = &previous {
        graph.add_edge(check, ENSURE_RAW_DATASET)?;
    }
    graph.add_edge(ENSURE_RAW_DATASET, ENSURE_TMP_DATASET)?;
    previous = Some(ENSURE_TMP_DATASET.to_string());

    for mapping in &config.tables {
        let (load, merge) = add_table(&mut graph, &layout, config, mapping, batch)?;
        if let Some(upstream) = &previous {
            graph.add_edge(upstream, &load)?;
        }
        previous = match config.policy {
            Policy::Serial => Some(merge),
            Policy::Parallel => Some(ENSURE_TMP_DATASET.to_string()),
        };
    }

    Ok(graph)
}

fn add_table(
    graph: &mut TaskGraph<Step>,
    layout: &SourceLayout,
    config: &PipelineConfig,
    mapping: &TableMapping,
    batch: &BatchDate,
) -> Result<(String, String), GraphError> {
    let load = load_task_id(&mapping.table);
    let merge = merge_task_id(&mapping.table);
    graph.add_task(
        load.as_str(),
        Step::Job(Job::Load(LoadJob::new(layout, &config.warehouse, mapping, batch))),
    )?;
    graph.add_task(
        merge.as_str(),
        Step::Job(Job::Merge(MergeJob::new(layout, &config.warehouse, mapping, batch))),
    )?;
    graph.chain(&[&load, &merge])?;
    Ok((load, merge))
}
