//! Task identifiers, results and the step runner seam.
//!
//! A task graph carries inert payloads; a `StepRunner` gives them meaning
//! when the executor decides a task may run.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type for task execution.
pub type TaskResult = Result<TaskOutput, TaskError>;

/// Identifier of a task within one graph (e.g. `ensure_raw_dataset`).
#[derive(Debug, Clone, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::borrow::Borrow<str> for TaskId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Successful output from a task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskOutput {
    /// Optional message describing what the task accomplished.
    pub message: Option<String>,
}

impl TaskOutput {
    /// Create an empty task output.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a task output with a message.
    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
        }
    }
}

/// Error type for task execution.
#[derive(Debug)]
pub enum TaskError {
    /// Task was cancelled via shutdown signal.
    Cancelled,
    /// Task panicked during execution.
    Panicked(String),
    /// Task failed with an error.
    Failed(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => write!(f, "task cancelled"),
            Self::Panicked(msg) => write!(f, "task panicked: {msg}"),
            Self::Failed(err) => write!(f, "task failed: {err}"),
        }
    }
}

impl std::error::Error for TaskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Failed(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl TaskError {
    /// Create a Failed error from any error type.
    pub fn failed<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Failed(Box::new(err))
    }

    /// Check if this is a cancellation error.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Executes the side effects behind a task payload.
///
/// `attempt` starts at 1 and increases on each retry of the same task.
#[async_trait]
pub trait StepRunner<T>: Send + Sync + 'static {
    async fn run(&self, id: &TaskId, payload: &T, attempt: u32) -> TaskResult;
}
