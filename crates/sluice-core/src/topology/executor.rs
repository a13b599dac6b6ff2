//! In-process graph executor.
//!
//! Runs the tasks of a `TaskGraph` respecting its edges. A task starts once
//! every upstream task succeeded. Independent tasks run concurrently, bounded
//! by the pool and global slots they share with other runs. Failed attempts
//! are retried up to the configured count; once a task fails for good,
//! everything downstream of it is marked `UpstreamFailed` and never started.

use indexmap::IndexMap;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::emit;
use crate::error::GraphError;
use crate::metrics::events::{TaskCompleted, TaskDuration, TaskRetried, TaskStatus};

use super::graph::TaskGraph;
use super::runner::random_jitter;
use super::slots::acquire;
use super::task::{StepRunner, TaskError, TaskId, TaskOutput};

/// Execution settings for one graph run.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Label used in logs and metrics.
    pub pipeline: String,
    /// Pool slots, shared with every run of the same pool.
    pub pool: Option<Arc<Semaphore>>,
    /// Process-wide task slots.
    pub global: Option<Arc<Semaphore>>,
    /// Additional attempts after a failed one.
    pub retries: u32,
    /// Pause between attempts of the same task.
    pub retry_delay: Duration,
    /// Maximum random jitter in seconds added to `retry_delay`.
    pub retry_jitter_secs: u64,
}

impl ExecutorConfig {
    pub fn new(pipeline: impl Into<String>) -> Self {
        Self {
            pipeline: pipeline.into(),
            pool: None,
            global: None,
            retries: 0,
            retry_delay: Duration::ZERO,
            retry_jitter_secs: 0,
        }
    }

    pub fn with_pool(mut self, pool: Option<Arc<Semaphore>>) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_global_limit(mut self, global: Option<Arc<Semaphore>>) -> Self {
        self.global = global;
        self
    }

    /// Private pool of `max_parallel` slots for this run only.
    pub fn with_max_parallel(self, max_parallel: Option<usize>) -> Self {
        self.with_pool(max_parallel.map(|n| Arc::new(Semaphore::new(n.max(1)))))
    }

    pub fn with_retries(mut self, retries: u32, retry_delay: Duration) -> Self {
        self.retries = retries;
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_retry_jitter(mut self, secs: u64) -> Self {
        self.retry_jitter_secs = secs;
        self
    }
}

/// Final state of one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Success {
        output: TaskOutput,
        attempts: u32,
        duration: Duration,
    },
    Failed {
        error: String,
        attempts: u32,
        duration: Duration,
    },
    /// Never started because `upstream` failed.
    UpstreamFailed { upstream: TaskId },
    Cancelled,
}

impl TaskOutcome {
    pub fn status(&self) -> TaskStatus {
        match self {
            TaskOutcome::Success { .. } => TaskStatus::Success,
            TaskOutcome::Failed { .. } => TaskStatus::Failed,
            TaskOutcome::UpstreamFailed { .. } => TaskStatus::UpstreamFailed,
            TaskOutcome::Cancelled => TaskStatus::Cancelled,
        }
    }

    /// Number of attempts made; zero for tasks that never started.
    pub fn attempts(&self) -> u32 {
        match self {
            TaskOutcome::Success { attempts, .. } | TaskOutcome::Failed { attempts, .. } => {
                *attempts
            }
            _ => 0,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Success { .. })
    }
}

/// Outcome of every task of a graph run.
#[derive(Debug, Clone)]
pub struct GraphReport {
    outcomes: IndexMap<TaskId, TaskOutcome>,
    completion_order: Vec<TaskId>,
    duration: Duration,
}

impl GraphReport {
    /// Outcome of a single task.
    pub fn outcome(&self, id: &str) -> Option<&TaskOutcome> {
        self.outcomes.get(id)
    }

    /// All outcomes in task registration order.
    pub fn outcomes(&self) -> impl Iterator<Item = (&TaskId, &TaskOutcome)> {
        self.outcomes.iter()
    }

    /// Task ids in the order they reached a final state.
    pub fn completion_order(&self) -> &[TaskId] {
        &self.completion_order
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Whether every task succeeded.
    pub fn is_success(&self) -> bool {
        self.outcomes.values().all(TaskOutcome::is_success)
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.outcomes
            .values()
            .filter(|outcome| outcome.status() == status)
            .count()
    }

    /// Tasks that ran and failed.
    pub fn failed(&self) -> Vec<&TaskId> {
        self.with_status(TaskStatus::Failed)
    }

    /// Tasks that never ran because an upstream failed.
    pub fn skipped(&self) -> Vec<&TaskId> {
        self.with_status(TaskStatus::UpstreamFailed)
    }

    fn with_status(&self, status: TaskStatus) -> Vec<&TaskId> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| outcome.status() == status)
            .map(|(id, _)| id)
            .collect()
    }
}

/// Runs task graphs against a `StepRunner`.
pub struct GraphExecutor {
    config: Arc<ExecutorConfig>,
    shutdown: CancellationToken,
}

impl GraphExecutor {
    pub fn new(config: ExecutorConfig, shutdown: CancellationToken) -> Self {
        Self {
            config: Arc::new(config),
            shutdown,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run every task of `graph` to a final state.
    ///
    /// Only structural problems (cycles) are returned as errors; task failures
    /// are reported through the returned `GraphReport`.
    pub async fn run<T, R>(
        &self,
        graph: TaskGraph<T>,
        runner: Arc<R>,
    ) -> Result<GraphReport, GraphError>
    where
        T: Send + Sync + 'static,
        R: StepRunner<T>,
    {
        let started = Instant::now();
        let plan = graph.into_plan()?;
        let pipeline = self.config.pipeline.clone();

        let mut payloads = Vec::with_capacity(plan.len());
        let mut state = RunState::new(plan.len(), pipeline.clone());
        for task in plan {
            state.remaining.push(task.upstream.len());
            state.downstream.push(task.downstream);
            state.ids.push(task.id);
            payloads.push(Arc::new(task.payload));
        }
        state.seed_ready();

        let mut running: JoinSet<TaskOutcome> = JoinSet::new();
        let mut spawned: HashMap<tokio::task::Id, usize> = HashMap::new();

        info!(
            pipeline = %pipeline,
            tasks = state.ids.len(),
            pool_slots = ?self.config.pool.as_ref().map(|s| s.available_permits()),
            global_slots = ?self.config.global.as_ref().map(|s| s.available_permits()),
            "Starting graph run"
        );

        loop {
            while let Some(Reverse(idx)) = state.ready.pop() {
                if self.shutdown.is_cancelled() {
                    state.settle(idx, TaskOutcome::Cancelled);
                    continue;
                }
                let handle = running.spawn(run_task(
                    state.ids[idx].clone(),
                    Arc::clone(&payloads[idx]),
                    Arc::clone(&runner),
                    Arc::clone(&self.config),
                    self.shutdown.clone(),
                ));
                spawned.insert(handle.id(), idx);
            }

            let Some(joined) = running.join_next_with_id().await else {
                break;
            };
            let (task_id, outcome) = match joined {
                Ok((task_id, outcome)) => (task_id, outcome),
                Err(e) => {
                    error!(pipeline = %pipeline, error = %e, "Task panicked");
                    let outcome = TaskOutcome::Failed {
                        error: TaskError::Panicked(e.to_string()).to_string(),
                        attempts: 1,
                        duration: Duration::ZERO,
                    };
                    (e.id(), outcome)
                }
            };
            let Some(idx) = spawned.remove(&task_id) else {
                continue;
            };
            state.settle(idx, outcome);
        }

        let report = state.into_report(started.elapsed());
        info!(
            pipeline = %pipeline,
            succeeded = report.count(TaskStatus::Success),
            failed = report.count(TaskStatus::Failed),
            upstream_failed = report.count(TaskStatus::UpstreamFailed),
            cancelled = report.count(TaskStatus::Cancelled),
            duration_ms = report.duration.as_millis() as u64,
            "Graph run finished"
        );
        Ok(report)
    }
}

/// Bookkeeping for a single graph run, indexed by plan position.
struct RunState {
    pipeline: String,
    ids: Vec<TaskId>,
    downstream: Vec<Vec<usize>>,
    remaining: Vec<usize>,
    outcomes: Vec<Option<TaskOutcome>>,
    completion_order: Vec<TaskId>,
    ready: BinaryHeap<Reverse<usize>>,
}

impl RunState {
    fn new(len: usize, pipeline: String) -> Self {
        Self {
            pipeline,
            ids: Vec::with_capacity(len),
            downstream: Vec::with_capacity(len),
            remaining: Vec::with_capacity(len),
            outcomes: (0..len).map(|_| None).collect(),
            completion_order: Vec::with_capacity(len),
            ready: BinaryHeap::new(),
        }
    }

    fn seed_ready(&mut self) {
        self.ready = (0..self.ids.len())
            .filter(|idx| self.remaining[*idx] == 0)
            .map(Reverse)
            .collect();
    }

    fn settle(&mut self, idx: usize, outcome: TaskOutcome) {
        if self.outcomes[idx].is_some() {
            return;
        }

        match &outcome {
            TaskOutcome::Success { duration, .. } => {
                emit!(TaskDuration {
                    duration: *duration,
                    pipeline: self.pipeline.clone(),
                });
                for next in self.downstream[idx].clone() {
                    self.remaining[next] -= 1;
                    if self.remaining[next] == 0 && self.outcomes[next].is_none() {
                        self.ready.push(Reverse(next));
                    }
                }
            }
            TaskOutcome::Failed { duration, .. } => {
                emit!(TaskDuration {
                    duration: *duration,
                    pipeline: self.pipeline.clone(),
                });
                let upstream = self.ids[idx].clone();
                self.settle_descendants(idx, || TaskOutcome::UpstreamFailed {
                    upstream: upstream.clone(),
                });
            }
            TaskOutcome::UpstreamFailed { .. } => {}
            TaskOutcome::Cancelled => self.settle_descendants(idx, || TaskOutcome::Cancelled),
        }

        self.record(idx, outcome);
    }

    fn settle_descendants(&mut self, idx: usize, outcome: impl Fn() -> TaskOutcome) {
        let mut stack = self.downstream[idx].clone();
        while let Some(next) = stack.pop() {
            if self.outcomes[next].is_some() {
                continue;
            }
            let outcome = outcome();
            if let TaskOutcome::UpstreamFailed { upstream } = &outcome {
                warn!(
                    pipeline = %self.pipeline,
                    task = %self.ids[next],
                    upstream = %upstream,
                    "Skipping task, upstream failed"
                );
            }
            self.record(next, outcome);
            stack.extend(self.downstream[next].iter().copied());
        }
    }

    fn record(&mut self, idx: usize, outcome: TaskOutcome) {
        emit!(TaskCompleted {
            status: outcome.status(),
            pipeline: self.pipeline.clone(),
        });
        self.completion_order.push(self.ids[idx].clone());
        self.outcomes[idx] = Some(outcome);
    }

    fn into_report(self, duration: Duration) -> GraphReport {
        let outcomes = self
            .ids
            .into_iter()
            .zip(self.outcomes)
            .map(|(id, outcome)| (id, outcome.unwrap_or(TaskOutcome::Cancelled)))
            .collect();
        GraphReport {
            outcomes,
            completion_order: self.completion_order,
            duration,
        }
    }
}

fn describe(err: &TaskError) -> String {
    match err {
        TaskError::Failed(inner) => inner.to_string(),
        other => other.to_string(),
    }
}

/// Run a single task with its retry loop.
async fn run_task<T, R>(
    id: TaskId,
    payload: Arc<T>,
    runner: Arc<R>,
    config: Arc<ExecutorConfig>,
    shutdown: CancellationToken,
) -> TaskOutcome
where
    T: Send + Sync + 'static,
    R: StepRunner<T>,
{
    let Some(_slot) = acquire(config.pool.clone(), config.global.clone(), &shutdown).await else {
        return TaskOutcome::Cancelled;
    };

    let start = Instant::now();
    let max_attempts = config.retries + 1;
    let mut attempt = 1;

    loop {
        info!(
            pipeline = %config.pipeline,
            task = %id,
            attempt,
            max_attempts,
            "Running task"
        );

        let result = shutdown
            .run_until_cancelled(runner.run(&id, &*payload, attempt))
            .await
            .unwrap_or(Err(TaskError::Cancelled));

        match result {
            Ok(output) => {
                info!(
                    pipeline = %config.pipeline,
                    task = %id,
                    attempt,
                    duration_ms = start.elapsed().as_millis() as u64,
                    message = output.message.as_deref().unwrap_or(""),
                    "Task succeeded"
                );
                return TaskOutcome::Success {
                    output,
                    attempts: attempt,
                    duration: start.elapsed(),
                };
            }
            Err(TaskError::Cancelled) => {
                warn!(pipeline = %config.pipeline, task = %id, "Task cancelled");
                return TaskOutcome::Cancelled;
            }
            Err(e) if attempt < max_attempts => {
                let delay = config.retry_delay + random_jitter(config.retry_jitter_secs);
                warn!(
                    pipeline = %config.pipeline,
                    task = %id,
                    attempt,
                    error = %e,
                    retry_in_ms = delay.as_millis() as u64,
                    "Task attempt failed, retrying"
                );
                emit!(TaskRetried {
                    pipeline: config.pipeline.clone(),
                });
                if shutdown
                    .run_until_cancelled(tokio::time::sleep(delay))
                    .await
                    .is_none()
                {
                    return TaskOutcome::Cancelled;
                }
                attempt += 1;
            }
            Err(e) => {
                error!(
                    pipeline = %config.pipeline,
                    task = %id,
                    attempts = attempt,
                    error = %e,
                    "Task failed"
                );
                return TaskOutcome::Failed {
                    error: describe(&e),
                    attempts: attempt,
                    duration: start.elapsed(),
                };
            }
        }
    }
}
