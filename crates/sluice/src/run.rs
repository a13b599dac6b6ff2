//! Run orchestration: one graph run per batch date.

use indexmap::IndexMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use sluice_core::{
    ExecutorConfig, GraphExecutor, GraphReport, Pipeline, PipelineRunner, RunOutcome, SlotPools,
    SlotPoolsRef, StorageProvider, StorageProviderRef,
};

use crate::batch::{BatchDate, SourceLayout};
use crate::config::{Config, PipelineConfig, PipelineKey};
use crate::dag::build_graph;
use crate::error::PipelineError;
use crate::preflight::PreflightGuard;
use crate::state::{TableState, TableTracker};
use crate::steps::StepContext;
use crate::warehouse::{self, WarehouseRef};

/// Result of one pipeline run for one batch date.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub pipeline: PipelineKey,
    pub batch: BatchDate,
    pub report: GraphReport,
    pub tables: IndexMap<String, TableState>,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.report.is_success()
    }
}

/// A run that ended without a summary.
#[derive(Debug)]
pub struct RunFailure {
    pub run: String,
    pub error: PipelineError,
}

/// Every run of one pipeline invocation.
#[derive(Debug, Default)]
pub struct PipelineReport {
    /// Runs that executed their graph, in batch date order.
    pub summaries: Vec<RunSummary>,
    /// Runs that could not execute their graph.
    pub failures: Vec<RunFailure>,
    /// Runs cancelled before they started.
    pub cancelled: Vec<String>,
}

impl PipelineReport {
    /// Add the outcome of one run.
    pub fn record(&mut self, run: String, outcome: RunOutcome<RunSummary, PipelineError>) {
        match outcome {
            RunOutcome::Completed(summary) => self.summaries.push(summary),
            RunOutcome::Failed(e) => {
                error!(target = %run, error = %e, "Run failed");
                self.failures.push(RunFailure { run, error: e });
            }
            RunOutcome::Cancelled => {
                warn!(target = %run, "Run cancelled before start");
                self.cancelled.push(run);
            }
            RunOutcome::Panicked(message) => {
                error!(target = %run, message = %message, "Run panicked");
                let error = PipelineError::RunPanicked {
                    key: run.clone(),
                    message,
                };
                self.failures.push(RunFailure { run, error });
            }
        }
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
            && self.cancelled.is_empty()
            && !self.summaries.is_empty()
            && self.summaries.iter().all(RunSummary::is_success)
    }
}

/// One pipeline run, keyed `<pipeline>@<date>`.
pub struct PipelineRun {
    key: String,
    pipeline: PipelineKey,
    config: Arc<PipelineConfig>,
    batch: BatchDate,
    storage: StorageProviderRef,
    warehouse: WarehouseRef,
    pools: SlotPoolsRef,
    shutdown: CancellationToken,
}

impl PipelineRun {
    pub fn new(
        pipeline: PipelineKey,
        config: Arc<PipelineConfig>,
        batch: BatchDate,
        storage: StorageProviderRef,
        warehouse: WarehouseRef,
        pools: SlotPoolsRef,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            key: format!("{pipeline}@{batch}"),
            pipeline,
            config,
            batch,
            storage,
            warehouse,
            pools,
            shutdown,
        }
    }

    fn executor_config(&self) -> ExecutorConfig {
        let pool = self
            .config
            .effective_pool()
            .map(|pool| self.pools.pool(&pool.name, pool.slots));
        ExecutorConfig::new(self.key.clone())
            .with_pool(pool)
            .with_global_limit(self.pools.global())
            .with_retries(self.config.retries, self.config.retry_delay())
            .with_retry_jitter(self.config.retry_jitter_secs)
    }
}

impl Pipeline for PipelineRun {
    type Key = String;
    type Output = RunSummary;
    type Error = PipelineError;

    fn key(&self) -> &String {
        &self.key
    }

    async fn run(self) -> Result<RunSummary, PipelineError> {
        let graph = build_graph(&self.config, &self.batch)?;
        let layout = SourceLayout::new(&self.config.source.bucket_url, &self.config.source.base_path);
        let tracker = Arc::new(TableTracker::new(
            self.config.tables.iter().map(|m| m.table.as_str()),
        ));
        let context = Arc::new(StepContext::new(
            self.warehouse.clone(),
            PreflightGuard::new(self.storage.clone(), layout, &self.config.tables),
            tracker.clone(),
            self.config.retries,
        ));

        if let Some(description) = self.config.render_description(&self.batch) {
            info!(target = %self.key, description = %description, "Starting run");
        }

        let executor = GraphExecutor::new(self.executor_config(), self.shutdown.clone());
        let report = executor.run(graph, context).await?;

        Ok(RunSummary {
            pipeline: self.pipeline,
            batch: self.batch,
            report,
            tables: tracker.snapshot(),
        })
    }
}

/// Upper bound on the tasks of one graph run running at once: the pipeline's
/// pool capped by the global limit. Other runs sharing either lower it further.
pub fn max_parallel(config: &Config, pipeline: &PipelineConfig) -> Option<usize> {
    let pool = pipeline.effective_pool().map(|pool| pool.slots);
    match (pool, config.global.total_concurrency) {
        (Some(pool), Some(total)) => Some(pool.min(total)),
        (pool, total) => pool.or(total),
    }
}

/// Run pipeline `id` for the requested batch dates.
///
/// Fixed-date pipelines ignore `requested` and process their configured date.
/// Without requested dates a trigger-dated pipeline processes today.
pub async fn run_pipeline(
    config: &Config,
    id: &str,
    requested: &[BatchDate],
    shutdown: CancellationToken,
) -> Result<PipelineReport, PipelineError> {
    let (key, pipeline) = config.pipeline(id)?;
    let storage: StorageProviderRef = Arc::new(StorageProvider::for_url(&pipeline.source.bucket_url)?);
    let warehouse = warehouse::from_config(&pipeline.warehouse, storage.clone())?;
    let pools = Arc::new(SlotPools::new(config.global.total_concurrency));
    run_pipeline_with(key, pipeline, requested, storage, warehouse, &pools, shutdown).await
}

/// Like [`run_pipeline`], with explicit storage, warehouse and task slots.
///
/// Pipelines given the same `pools` share their named pools and the global
/// limit.
pub async fn run_pipeline_with(
    key: &PipelineKey,
    pipeline: &PipelineConfig,
    requested: &[BatchDate],
    storage: StorageProviderRef,
    warehouse: WarehouseRef,
    pools: &SlotPoolsRef,
    shutdown: CancellationToken,
) -> Result<PipelineReport, PipelineError> {
    let (dates, overridden) = pipeline.resolve_batch_dates(requested);
    if overridden {
        warn!(
            pipeline = %key,
            requested = ?requested.iter().map(ToString::to_string).collect::<Vec<_>>(),
            batch_date = %dates[0],
            "Pipeline has a fixed batch date, ignoring requested dates"
        );
    }

    let shared = Arc::new(pipeline.clone());
    info!(
        pipeline = %key,
        policy = %pipeline.policy,
        backend = warehouse.backend(),
        pool = ?pipeline.effective_pool().map(|p| p.name),
        global_slots = ?pools.global().map(|s| s.available_permits()),
        runs = dates.len(),
        "Starting pipeline"
    );

    let runs: Vec<PipelineRun> = dates
        .into_iter()
        .map(|batch| {
            PipelineRun::new(
                key.clone(),
                shared.clone(),
                batch,
                storage.clone(),
                warehouse.clone(),
                pools.clone(),
                shutdown.clone(),
            )
        })
        .collect();

    let outcomes = PipelineRunner::new(runs, shutdown, "run")
        .with_max_active(Some(pipeline.effective_max_active_runs()))
        .run()
        .await;

    let mut report = PipelineReport::default();
    for (run, outcome) in outcomes {
        report.record(run, outcome);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Policy, PoolConfig};
    use sluice_core::GlobalConfig;

    fn config(total: Option<usize>) -> Config {
        Config {
            global: GlobalConfig {
                total_concurrency: total,
            },
            ..Config::default()
        }
    }

    #[test]
    fn test_max_parallel() {
        let parallel = PipelineConfig::default();
        let serial = PipelineConfig {
            policy: Policy::Serial,
            ..PipelineConfig::default()
        };

        assert_eq!(max_parallel(&config(None), &parallel), None);
        assert_eq!(max_parallel(&config(Some(4)), &parallel), Some(4));
        assert_eq!(max_parallel(&config(None), &serial), Some(1));
        assert_eq!(max_parallel(&config(Some(4)), &serial), Some(1));

        let pooled = PipelineConfig {
            pool: Some(PoolConfig {
                name: "bq".to_string(),
                slots: 8,
            }),
            ..PipelineConfig::default()
        };
        assert_eq!(max_parallel(&config(Some(3)), &pooled), Some(3));
    }

    #[test]
    fn test_run_key() {
        let run = PipelineRun::new(
            PipelineKey::new("01_olist_raw_ingestion"),
            Arc::new(PipelineConfig::default()),
            "2018-10-01".parse().unwrap(),
            Arc::new(StorageProvider::for_url("/tmp").unwrap()),
            Arc::new(crate::warehouse::MemoryWarehouse::new(Arc::new(
                StorageProvider::for_url("/tmp").unwrap(),
            ))),
            Arc::new(SlotPools::new(None)),
            CancellationToken::new(),
        );
        assert_eq!(run.key(), "01_olist_raw_ingestion@2018-10-01");
        let executor = run.executor_config();
        assert_eq!(executor.retries, 1);
        assert!(executor.pool.is_none());
        assert!(executor.global.is_none());
    }

    #[test]
    fn test_runs_share_pool_and_global_slots() {
        let pools: SlotPoolsRef = Arc::new(SlotPools::new(Some(3)));
        let serial = Arc::new(PipelineConfig {
            policy: Policy::Serial,
            ..PipelineConfig::default()
        });
        let storage: StorageProviderRef = Arc::new(StorageProvider::for_url("/tmp").unwrap());
        let warehouse: WarehouseRef =
            Arc::new(crate::warehouse::MemoryWarehouse::new(storage.clone()));
        let run = |batch: &str| {
            PipelineRun::new(
                PipelineKey::new("02_olist_raw_ingestion_serial"),
                serial.clone(),
                batch.parse().unwrap(),
                storage.clone(),
                warehouse.clone(),
                pools.clone(),
                CancellationToken::new(),
            )
            .executor_config()
        };

        let first = run("2018-10-01");
        let second = run("2018-10-02");
        assert!(Arc::ptr_eq(
            first.pool.as_ref().unwrap(),
            second.pool.as_ref().unwrap()
        ));
        assert!(Arc::ptr_eq(
            first.global.as_ref().unwrap(),
            second.global.as_ref().unwrap()
        ));
        assert_eq!(first.pool.unwrap().available_permits(), 1);
        assert_eq!(first.global.unwrap().available_permits(), 3);
    }

    #[tokio::test]
    async fn test_report_keeps_completed_runs_next_to_failures() {
        let storage: StorageProviderRef = Arc::new(StorageProvider::for_url("/tmp").unwrap());
        let run = PipelineRun::new(
            PipelineKey::new("p"),
            Arc::new(PipelineConfig {
                tables: Vec::new(),
                ..PipelineConfig::default()
            }),
            "2018-10-01".parse().unwrap(),
            storage.clone(),
            Arc::new(crate::warehouse::MemoryWarehouse::new(storage)),
            Arc::new(SlotPools::new(None)),
            CancellationToken::new(),
        );
        let summary = run.run().await.unwrap();
        assert!(summary.is_success());

        let mut report = PipelineReport::default();
        assert!(!report.is_success());
        report.record("p@2018-10-01".to_string(), RunOutcome::Completed(summary));
        assert!(report.is_success());

        report.record(
            "p@2018-10-02".to_string(),
            RunOutcome::Failed(PipelineError::RunPanicked {
                key: "p@2018-10-02".to_string(),
                message: "boom".to_string(),
            }),
        );
        report.record("p@2018-10-03".to_string(), RunOutcome::Panicked("oops".to_string()));
        report.record("p@2018-10-04".to_string(), RunOutcome::Cancelled);

        assert!(!report.is_success());
        assert_eq!(report.summaries.len(), 1);
        assert_eq!(report.summaries[0].batch, "2018-10-01".parse().unwrap());
        let failed: Vec<&str> = report.failures.iter().map(|f| f.run.as_str()).collect();
        assert_eq!(failed, vec!["p@2018-10-02", "p@2018-10-03"]);
        assert_eq!(
            report.failures[1].error.to_string(),
            "Run p@2018-10-03 panicked: oops"
        );
        assert_eq!(report.cancelled, vec!["p@2018-10-04"]);
    }
}
