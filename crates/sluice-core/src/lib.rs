//! sluice-core: Shared components for the sluice ingestion pipelines.
//!
//! This crate contains the domain-agnostic plumbing used by the `sluice` crate:
//!
//! - `storage/` - Object storage abstraction (GCS, local)
//! - `config/` - Config file loading, merging and environment variable interpolation
//! - `topology/` - Task graph construction and the in-process graph executor
//! - `metrics/` - Metric events and the optional Prometheus push gateway
//! - `signal` - Signal handling for graceful shutdown
//! - `tracing` - Log subscriber initialization
//! - `error` - Common error types

pub mod config;
pub mod error;
pub mod metrics;
pub mod signal;
pub mod storage;
pub mod topology;
pub mod tracing;

// Re-export commonly used items
pub use config::{ComponentKey, ConfigArgs, ConfigPath, GlobalConfig, Mergeable, MetricsConfig};
pub use error::{ConfigError, GraphError, MetricsError, StorageError};
pub use metrics::init as init_metrics;
pub use signal::shutdown_signal;
pub use storage::{StorageProvider, StorageProviderRef};
pub use topology::{
    ExecutorConfig, GraphExecutor, GraphReport, Pipeline, PipelineRunner, RunOutcome, SlotPools,
    SlotPoolsRef, StepRunner, TaskError, TaskGraph, TaskId, TaskOutcome, TaskOutput, TaskResult,
    random_jitter,
};
pub use tracing::init_tracing;
