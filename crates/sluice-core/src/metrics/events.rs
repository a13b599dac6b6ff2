//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable occurrence in a sluice run.
//! Events implement the `InternalEvent` trait which records the corresponding
//! Prometheus metric. Task-level events carry a `pipeline` label.

use metrics::{counter, gauge, histogram};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

// ============================================================================
// Storage events
// ============================================================================

/// Storage operation type.
#[derive(Debug, Clone, Copy)]
pub enum StorageOperation {
    List,
    Get,
}

impl StorageOperation {
    fn as_str(&self) -> &'static str {
        match self {
            StorageOperation::List => "list",
            StorageOperation::Get => "get",
        }
    }
}

/// Outcome of a remote request.
#[derive(Debug, Clone, Copy)]
pub enum RequestStatus {
    Success,
    Error,
}

impl RequestStatus {
    fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Success => "success",
            RequestStatus::Error => "error",
        }
    }

    /// Status for a `Result`.
    pub fn of<T, E>(result: &Result<T, E>) -> Self {
        if result.is_ok() {
            RequestStatus::Success
        } else {
            RequestStatus::Error
        }
    }
}

/// Event emitted for every object storage request.
pub struct StorageRequest {
    pub operation: StorageOperation,
    pub status: RequestStatus,
}

impl InternalEvent for StorageRequest {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            status = self.status.as_str(),
            "Storage request"
        );
        counter!(
            "sluice_storage_requests_total",
            "operation" => self.operation.as_str(),
            "status" => self.status.as_str()
        )
        .increment(1);
    }
}

/// Event emitted with the latency of a storage request.
pub struct StorageRequestDuration {
    pub operation: StorageOperation,
    pub duration: Duration,
}

impl InternalEvent for StorageRequestDuration {
    fn emit(self) {
        histogram!(
            "sluice_storage_request_duration_seconds",
            "operation" => self.operation.as_str()
        )
        .record(self.duration.as_secs_f64());
    }
}

// ============================================================================
// Task events
// ============================================================================

/// Final state of a task in a graph run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Success,
    Failed,
    UpstreamFailed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Success => "success",
            TaskStatus::Failed => "failed",
            TaskStatus::UpstreamFailed => "upstream_failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

/// Event emitted when a task reaches a final state.
pub struct TaskCompleted {
    pub status: TaskStatus,
    pub pipeline: String,
}

impl InternalEvent for TaskCompleted {
    fn emit(self) {
        trace!(status = self.status.as_str(), pipeline = %self.pipeline, "Task completed");
        counter!(
            "sluice_tasks_total",
            "status" => self.status.as_str(),
            "pipeline" => self.pipeline
        )
        .increment(1);
    }
}

/// Event emitted when a task attempt failed and will be retried.
pub struct TaskRetried {
    pub pipeline: String,
}

impl InternalEvent for TaskRetried {
    fn emit(self) {
        trace!(pipeline = %self.pipeline, "Task retried");
        counter!("sluice_task_retries_total", "pipeline" => self.pipeline).increment(1);
    }
}

/// Event emitted with the wall-clock duration of a finished task.
pub struct TaskDuration {
    pub duration: Duration,
    pub pipeline: String,
}

impl InternalEvent for TaskDuration {
    fn emit(self) {
        histogram!("sluice_task_duration_seconds", "pipeline" => self.pipeline)
            .record(self.duration.as_secs_f64());
    }
}

// ============================================================================
// Warehouse events
// ============================================================================

/// Kind of warehouse request.
#[derive(Debug, Clone, Copy)]
pub enum WarehouseOperation {
    EnsureDataset,
    Load,
    Query,
}

impl WarehouseOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarehouseOperation::EnsureDataset => "ensure_dataset",
            WarehouseOperation::Load => "load",
            WarehouseOperation::Query => "query",
        }
    }
}

/// Event emitted when a warehouse request or job finishes.
pub struct WarehouseJob {
    pub operation: WarehouseOperation,
    pub status: RequestStatus,
    pub backend: &'static str,
}

impl InternalEvent for WarehouseJob {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            status = self.status.as_str(),
            backend = self.backend,
            "Warehouse job"
        );
        counter!(
            "sluice_warehouse_jobs_total",
            "operation" => self.operation.as_str(),
            "status" => self.status.as_str(),
            "backend" => self.backend
        )
        .increment(1);
    }
}

/// Event emitted with the wall-clock duration of a warehouse job.
pub struct WarehouseJobDuration {
    pub operation: WarehouseOperation,
    pub duration: Duration,
}

impl InternalEvent for WarehouseJobDuration {
    fn emit(self) {
        histogram!(
            "sluice_warehouse_job_duration_seconds",
            "operation" => self.operation.as_str()
        )
        .record(self.duration.as_secs_f64());
    }
}

// ============================================================================
// Preflight events
// ============================================================================

/// Event emitted after the source files of a batch were checked.
pub struct PreflightChecked {
    pub passed: bool,
    pub missing: usize,
}

impl InternalEvent for PreflightChecked {
    fn emit(self) {
        let status = if self.passed { "passed" } else { "failed" };
        trace!(status, missing = self.missing, "Preflight checked");
        counter!("sluice_preflight_checks_total", "status" => status).increment(1);
        gauge!("sluice_preflight_missing_files").set(self.missing as f64);
    }
}
