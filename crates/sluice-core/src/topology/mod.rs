//! Task graphs and their execution.

mod executor;
mod graph;
mod runner;
mod slots;
mod task;

pub use executor::{ExecutorConfig, GraphExecutor, GraphReport, TaskOutcome};
pub use graph::TaskGraph;
pub use runner::{Pipeline, PipelineRunner, RunOutcome, random_jitter};
pub use slots::{SlotPools, SlotPoolsRef};
pub use task::{StepRunner, TaskError, TaskId, TaskOutput, TaskResult};
