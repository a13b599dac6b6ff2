//! Common error types shared across sluice crates.
//!
//! This module defines error types for storage, configuration, task graph and
//! metrics operations.

use snafu::prelude::*;

// ============ Storage Errors ============

/// Errors that can occur during storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// Invalid storage URL format.
    #[snafu(display("Invalid storage URL: {url}"))]
    InvalidUrl { url: String },

    /// Object store operation failed.
    #[snafu(display("Storage operation failed: {source}"))]
    ObjectStore { source: object_store::Error },

    /// IO error during storage operations.
    #[snafu(display("IO error: {source}"))]
    Io { source: std::io::Error },

    /// GCS configuration error.
    #[snafu(display("GCS configuration error: {source}"))]
    GcsConfig { source: object_store::Error },
}

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML: {source}"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file: {source}"))]
    ReadFile { source: std::io::Error },

    /// Duplicate component keys found across config files.
    #[snafu(display("Duplicate component keys: {}", keys.join(", ")))]
    DuplicateComponents { keys: Vec<String> },

    /// Unsupported config file format.
    #[snafu(display("Unsupported config format for {}: only .yaml/.yml supported", path.display()))]
    UnsupportedFormat { path: std::path::PathBuf },

    /// Failed to read configuration directory.
    #[snafu(display("Failed to read directory {}", path.display()))]
    ReadDir {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    /// A named component was requested but is not configured.
    #[snafu(display("Unknown {kind} '{key}' (configured: {})", known.join(", ")))]
    UnknownComponent {
        kind: &'static str,
        key: String,
        known: Vec<String>,
    },

    /// A field failed validation.
    #[snafu(display("{component}: {message}"))]
    Invalid { component: String, message: String },

    /// Multiple configuration errors occurred.
    #[snafu(display("Multiple config errors:\n{}", errors.join("\n")))]
    MultipleErrors { errors: Vec<String> },
}

// ============ Task Graph Errors ============

/// Errors raised while building or validating a task graph.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum GraphError {
    /// A task id was registered twice.
    #[snafu(display("Duplicate task id: {id}"))]
    DuplicateTask { id: String },

    /// An edge references a task that was never added.
    #[snafu(display("Edge {upstream} >> {downstream} references unknown task '{missing}'"))]
    UnknownTask {
        upstream: String,
        downstream: String,
        missing: String,
    },

    /// A task depends on itself.
    #[snafu(display("Task '{id}' cannot depend on itself"))]
    SelfDependency { id: String },

    /// The graph contains a cycle.
    #[snafu(display("Dependency cycle detected at task '{id}'"))]
    Cycle { id: String },
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to build the Prometheus exporter.
    #[snafu(display("Failed to initialize Prometheus exporter"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },

    /// Metrics exporter already initialized (double-init attempted).
    #[snafu(display("Metrics exporter already initialized"))]
    AlreadyInitialized,
}
