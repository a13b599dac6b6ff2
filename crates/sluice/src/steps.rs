//! Side effects behind each graph step.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use sluice_core::{StepRunner, TaskError, TaskId, TaskOutput, TaskResult};

use crate::dag::Step;
use crate::jobs::{self, Job};
use crate::preflight::PreflightGuard;
use crate::state::{TableState, TableTracker};
use crate::warehouse::WarehouseRef;

/// Everything a step needs to run, shared by all tasks of one graph run.
pub struct StepContext {
    warehouse: WarehouseRef,
    guard: PreflightGuard,
    tracker: Arc<TableTracker>,
    retries: u32,
}

impl StepContext {
    pub fn new(
        warehouse: WarehouseRef,
        guard: PreflightGuard,
        tracker: Arc<TableTracker>,
        retries: u32,
    ) -> Self {
        Self {
            warehouse,
            guard,
            tracker,
            retries,
        }
    }

    pub fn tracker(&self) -> &Arc<TableTracker> {
        &self.tracker
    }

    async fn run_job(&self, id: &TaskId, job: &Job, attempt: u32) -> TaskResult {
        let table = job.table();
        let (running, done) = match job {
            Job::Load(_) => (TableState::Loading, TableState::Loaded),
            Job::Merge(_) => (TableState::Merging, TableState::Merged),
        };
        self.tracker
            .transition(table, running)
            .map_err(TaskError::failed)?;

        let job_id = jobs::job_id(id.as_str());
        match self.warehouse.run_job(&job_id, job).await {
            Ok(summary) => {
                self.tracker
                    .transition(table, done)
                    .map_err(TaskError::failed)?;
                let rows = summary
                    .rows
                    .map(|rows| format!("{rows} rows"))
                    .unwrap_or_else(|| "done".to_string());
                Ok(TaskOutput::with_message(format!(
                    "{} {} ({rows})",
                    summary.job_id,
                    job.destination()
                )))
            }
            Err(err) => {
                if attempt > self.retries {
                    if let Err(e) = self.tracker.transition(table, TableState::Failed) {
                        warn!(table, error = %e, "Could not mark table failed");
                    }
                }
                Err(TaskError::failed(err))
            }
        }
    }
}

#[async_trait]
impl StepRunner<Step> for StepContext {
    async fn run(&self, id: &TaskId, step: &Step, attempt: u32) -> TaskResult {
        match step {
            Step::CheckSourceFiles(batch) => {
                let report = self.guard.check(batch).await.map_err(TaskError::failed)?;
                Ok(TaskOutput::with_message(format!(
                    "{} files present under {}",
                    report.present.len(),
                    report.prefix
                )))
            }
            Step::EnsureDataset(dataset) => {
                let status = self
                    .warehouse
                    .ensure_dataset(dataset)
                    .await
                    .map_err(TaskError::failed)?;
                Ok(TaskOutput::with_message(format!("{dataset} {status}")))
            }
            Step::Job(job) => {
                info!(task = %id, table = job.table(), backend = self.warehouse.backend(), "Running job");
                self.run_job(id, job, attempt).await
            }
        }
    }
}
