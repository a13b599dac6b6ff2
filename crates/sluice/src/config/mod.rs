//! Configuration for sluice pipelines.
//!
//! A config file declares one or more named pipelines:
//!
//! ```yaml
//! pipelines:
//!   01_olist_raw_ingestion:
//!     policy: parallel
//!     source:
//!       bucket_url: gs://olist-data-lake-nagela
//!     warehouse:
//!       project: olist-batch-data-platform
//! ```
//!
//! Several files (or directories of files) can be merged; pipeline ids must be
//! unique across all of them.

mod pipeline_key;
mod tables;

pub use pipeline_key::PipelineKey;
pub use tables::{TableMapping, default_tables, is_identifier, validate_tables};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sluice_core::config::load_from_paths;
use sluice_core::storage::BackendConfig;
use std::fmt;
use std::time::Duration;

use crate::batch::BatchDate;
use crate::error::ConfigError;

pub use sluice_core::config::{ConfigArgs, ConfigPath, GlobalConfig, Mergeable, MetricsConfig};

/// Default BigQuery REST endpoint.
pub const DEFAULT_API_BASE: &str = "https://bigquery.googleapis.com/bigquery/v2";

/// How the per-table steps of a pipeline are sequenced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    /// Tables load and merge independently of each other.
    #[default]
    Parallel,
    /// Every step runs after the previous one, behind a source file check.
    Serial,
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Policy::Parallel => write!(f, "parallel"),
            Policy::Serial => write!(f, "serial"),
        }
    }
}

/// Which batch date a run processes.
///
/// In YAML either the word `trigger` or a `YYYY-MM-DD` date.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BatchDateMode {
    /// Use the date supplied by the trigger (CLI), or today.
    #[default]
    Trigger,
    /// Always process this date, whatever the trigger says.
    Fixed(BatchDate),
}

impl TryFrom<String> for BatchDateMode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.eq_ignore_ascii_case("trigger") {
            return Ok(BatchDateMode::Trigger);
        }
        value
            .parse()
            .map(BatchDateMode::Fixed)
            .map_err(|e| format!("batch_date must be 'trigger' or a date: {e}"))
    }
}

impl From<BatchDateMode> for String {
    fn from(mode: BatchDateMode) -> Self {
        match mode {
            BatchDateMode::Trigger => "trigger".to_string(),
            BatchDateMode::Fixed(date) => date.to_string(),
        }
    }
}

/// A named execution slot limit shared by the tasks of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolConfig {
    pub name: String,
    pub slots: usize,
}

/// Where the batch folders live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    /// Bucket URL (`gs://bucket`), or a local path for development.
    #[serde(default = "default_bucket_url")]
    pub bucket_url: String,
    /// Folder holding the `dt=<date>` batch folders.
    #[serde(default = "default_base_path")]
    pub base_path: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            bucket_url: default_bucket_url(),
            base_path: default_base_path(),
        }
    }
}

fn default_bucket_url() -> String {
    "gs://olist-data-lake-nagela".to_string()
}

fn default_base_path() -> String {
    "olist/raw".to_string()
}

/// Warehouse implementation used to run jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarehouseBackend {
    #[default]
    BigQuery,
    /// In-process stand-in, for dry runs and tests.
    Memory,
}

/// Target warehouse settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WarehouseConfig {
    #[serde(default)]
    pub backend: WarehouseBackend,
    #[serde(default = "default_project")]
    pub project: String,
    #[serde(default = "default_location")]
    pub location: String,
    /// Dataset holding the partitioned destination tables.
    #[serde(default = "default_raw_dataset")]
    pub raw_dataset: String,
    /// Dataset holding the staging tables.
    #[serde(default = "default_staging_dataset")]
    pub staging_dataset: String,
    /// Appended to the table name to form the staging table name.
    #[serde(default = "default_staging_suffix")]
    pub staging_suffix: String,
    /// Wrap the partition delete and insert in a transaction.
    #[serde(default = "default_atomic_merge")]
    pub atomic_merge: bool,
    /// How often to poll a running job.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Override of the REST endpoint, e.g. for an emulator.
    #[serde(default)]
    pub api_base: Option<String>,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            backend: WarehouseBackend::default(),
            project: default_project(),
            location: default_location(),
            raw_dataset: default_raw_dataset(),
            staging_dataset: default_staging_dataset(),
            staging_suffix: default_staging_suffix(),
            atomic_merge: default_atomic_merge(),
            poll_interval_secs: default_poll_interval(),
            api_base: None,
        }
    }
}

impl WarehouseConfig {
    pub fn api_base(&self) -> &str {
        self.api_base
            .as_deref()
            .unwrap_or(DEFAULT_API_BASE)
            .trim_end_matches('/')
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

fn default_project() -> String {
    "olist-batch-data-platform".to_string()
}

fn default_location() -> String {
    "EU".to_string()
}

fn default_raw_dataset() -> String {
    "olist_raw".to_string()
}

fn default_staging_dataset() -> String {
    "olist_raw_tmp".to_string()
}

fn default_staging_suffix() -> String {
    "__tmp".to_string()
}

fn default_atomic_merge() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    2
}

/// Configuration for a single pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Free text; `{ds}` is replaced by the batch date.
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_owner")]
    pub owner: String,
    #[serde(default = "default_tags")]
    pub tags: Vec<String>,
    /// Extra attempts for a failed step.
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
    #[serde(default)]
    pub retry_jitter_secs: u64,
    #[serde(default)]
    pub policy: Policy,
    #[serde(default)]
    pub batch_date: BatchDateMode,
    /// Maximum number of batch dates processed at once. Runs of one pipeline
    /// share its staging tables, so only 1 is accepted.
    #[serde(default)]
    pub max_active_runs: Option<usize>,
    #[serde(default)]
    pub pool: Option<PoolConfig>,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub warehouse: WarehouseConfig,
    #[serde(default = "default_tables")]
    pub tables: Vec<TableMapping>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            description: None,
            owner: default_owner(),
            tags: default_tags(),
            retries: default_retries(),
            retry_delay_secs: default_retry_delay(),
            retry_jitter_secs: 0,
            policy: Policy::default(),
            batch_date: BatchDateMode::default(),
            max_active_runs: None,
            pool: None,
            source: SourceConfig::default(),
            warehouse: WarehouseConfig::default(),
            tables: default_tables(),
        }
    }
}

fn default_owner() -> String {
    "data-platform".to_string()
}

fn default_tags() -> Vec<String> {
    ["olist", "raw", "batch", "bigquery"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_retries() -> u32 {
    1
}

fn default_retry_delay() -> u64 {
    300
}

impl PipelineConfig {
    /// Pool the pipeline's tasks run in. Serial pipelines get a single slot
    /// pool unless one is configured.
    pub fn effective_pool(&self) -> Option<PoolConfig> {
        match (&self.pool, self.policy) {
            (Some(pool), _) => Some(pool.clone()),
            (None, Policy::Serial) => Some(PoolConfig {
                name: "bigquery_serial".to_string(),
                slots: 1,
            }),
            (None, Policy::Parallel) => None,
        }
    }

    pub fn effective_max_active_runs(&self) -> usize {
        self.max_active_runs.unwrap_or(1)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    /// Description with `{ds}` rendered for `batch`.
    pub fn render_description(&self, batch: &BatchDate) -> Option<String> {
        self.description
            .as_ref()
            .map(|d| d.replace("{ds}", &batch.to_string()))
    }

    /// Resolve which batch dates a run processes.
    ///
    /// Returns the dates plus whether requested dates were overridden by a
    /// fixed date.
    pub fn resolve_batch_dates(&self, requested: &[BatchDate]) -> (Vec<BatchDate>, bool) {
        match self.batch_date {
            BatchDateMode::Fixed(date) => {
                let overridden = requested.iter().any(|d| *d != date);
                (vec![date], overridden)
            }
            BatchDateMode::Trigger if requested.is_empty() => (vec![BatchDate::today()], false),
            BatchDateMode::Trigger => {
                let mut dates = Vec::with_capacity(requested.len());
                for date in requested {
                    if !dates.contains(date) {
                        dates.push(*date);
                    }
                }
                (dates, false)
            }
        }
    }

    fn validate(&self) -> Vec<String> {
        let mut errors = validate_tables(&self.tables);

        let warehouse = &self.warehouse;
        for (field, value) in [
            ("warehouse.raw_dataset", &warehouse.raw_dataset),
            ("warehouse.staging_dataset", &warehouse.staging_dataset),
        ] {
            if !is_identifier(value) {
                errors.push(format!("{field} '{value}' is not a valid dataset name"));
            }
        }
        if warehouse.raw_dataset == warehouse.staging_dataset && warehouse.staging_suffix.is_empty()
        {
            errors.push(
                "warehouse.staging_suffix must not be empty when staging and raw datasets are the same"
                    .to_string(),
            );
        }
        if !warehouse.staging_suffix.is_empty()
            && !warehouse
                .staging_suffix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            errors.push(format!(
                "warehouse.staging_suffix '{}' may only contain letters, digits and '_'",
                warehouse.staging_suffix
            ));
        }
        if warehouse.project.trim().is_empty() {
            errors.push("warehouse.project must not be empty".to_string());
        }
        if warehouse.location.trim().is_empty() {
            errors.push("warehouse.location must not be empty".to_string());
        }
        if warehouse.poll_interval_secs == 0 {
            errors.push("warehouse.poll_interval_secs must be at least 1".to_string());
        }

        if let Err(e) = BackendConfig::parse_url(&self.source.bucket_url) {
            errors.push(format!("source.bucket_url: {e}"));
        }

        if let Some(pool) = &self.pool {
            if pool.name.trim().is_empty() {
                errors.push("pool.name must not be empty".to_string());
            }
            if pool.slots == 0 {
                errors.push("pool.slots must be at least 1".to_string());
            }
            if self.policy == Policy::Serial && pool.slots != 1 {
                errors.push(format!(
                    "serial pipelines run in a single slot pool, got {} slots",
                    pool.slots
                ));
            }
        }
        match self.max_active_runs {
            Some(0) => errors.push("max_active_runs must be at least 1".to_string()),
            Some(n) if n > 1 => errors.push(format!(
                "max_active_runs must be 1, runs for different batch dates share the staging tables (got {n})"
            )),
            _ => {}
        }
        errors
    }
}

/// Top-level configuration: every configured pipeline plus shared settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub pipelines: IndexMap<PipelineKey, PipelineConfig>,
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Mergeable for Config {
    type Key = PipelineKey;
    type Component = PipelineConfig;

    fn components(&self) -> &IndexMap<PipelineKey, PipelineConfig> {
        &self.pipelines
    }

    fn components_mut(&mut self) -> &mut IndexMap<PipelineKey, PipelineConfig> {
        &mut self.pipelines
    }

    fn global_mut(&mut self) -> &mut GlobalConfig {
        &mut self.global
    }

    fn metrics_mut(&mut self) -> &mut MetricsConfig {
        &mut self.metrics
    }

    fn parse_yaml(contents: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(contents).map_err(|source| ConfigError::YamlParse { source })
    }
}

impl Config {
    /// Load, merge and validate configuration from files and directories.
    pub fn from_paths(paths: &[ConfigPath]) -> Result<Self, ConfigError> {
        let config: Config = load_from_paths(paths)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a single YAML document (no env interpolation).
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config = Self::parse_yaml(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every pipeline, collecting all problems.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        if self.pipelines.is_empty() {
            errors.push("no pipelines configured".to_string());
        }
        if self.global.total_concurrency == Some(0) {
            errors.push("global.total_concurrency must be at least 1".to_string());
        }
        for (key, pipeline) in &self.pipelines {
            errors.extend(
                pipeline
                    .validate()
                    .into_iter()
                    .map(|message| format!("pipeline '{key}': {message}")),
            );
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(ConfigError::Invalid {
                component: "config".to_string(),
                message: errors.remove(0),
            }),
            _ => Err(ConfigError::MultipleErrors { errors }),
        }
    }

    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    pub fn pipelines(&self) -> impl Iterator<Item = (&PipelineKey, &PipelineConfig)> {
        self.pipelines.iter()
    }

    /// Look up a pipeline by id.
    pub fn pipeline(&self, id: &str) -> Result<(&PipelineKey, &PipelineConfig), ConfigError> {
        self.pipelines
            .get_key_value(id)
            .ok_or_else(|| ConfigError::UnknownComponent {
                kind: "pipeline",
                key: id.to_string(),
                known: self.pipelines.keys().map(|k| k.to_string()).collect(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARALLEL: &str = r#"
pipelines:
  01_olist_raw_ingestion:
    description: "Olist batch (dt={ds})"
"#;

    const SERIAL: &str = r#"
pipelines:
  02_olist_raw_ingestion_serial:
    policy: serial
    batch_date: 2018-10-01
    pool:
      name: bigquery_serial
      slots: 1
    warehouse:
      backend: memory
      atomic_merge: false
"#;

    #[test]
    fn test_defaults_follow_olist_layout() {
        let config = Config::parse(PARALLEL).unwrap();
        let (key, pipeline) = config.pipeline("01_olist_raw_ingestion").unwrap();

        assert_eq!(key.id(), "01_olist_raw_ingestion");
        assert_eq!(pipeline.owner, "data-platform");
        assert_eq!(pipeline.tags, vec!["olist", "raw", "batch", "bigquery"]);
        assert_eq!(pipeline.retries, 1);
        assert_eq!(pipeline.policy, Policy::Parallel);
        assert_eq!(pipeline.batch_date, BatchDateMode::Trigger);
        assert_eq!(pipeline.tables.len(), 9);
        assert_eq!(pipeline.source.bucket_url, "gs://olist-data-lake-nagela");
        assert_eq!(pipeline.source.base_path, "olist/raw");
        assert_eq!(pipeline.warehouse.project, "olist-batch-data-platform");
        assert_eq!(pipeline.warehouse.location, "EU");
        assert_eq!(pipeline.warehouse.raw_dataset, "olist_raw");
        assert_eq!(pipeline.warehouse.staging_dataset, "olist_raw_tmp");
        assert_eq!(pipeline.warehouse.staging_suffix, "__tmp");
        assert!(pipeline.warehouse.atomic_merge);
        assert_eq!(pipeline.warehouse.api_base(), DEFAULT_API_BASE);
        assert_eq!(pipeline.effective_pool(), None);
        assert_eq!(pipeline.effective_max_active_runs(), 1);
    }

    #[test]
    fn test_serial_pipeline() {
        let config = Config::parse(SERIAL).unwrap();
        let (_, pipeline) = config.pipeline("02_olist_raw_ingestion_serial").unwrap();

        assert_eq!(pipeline.policy, Policy::Serial);
        assert_eq!(
            pipeline.batch_date,
            BatchDateMode::Fixed("2018-10-01".parse().unwrap())
        );
        assert_eq!(pipeline.effective_pool().unwrap().slots, 1);
        assert_eq!(pipeline.effective_max_active_runs(), 1);
        assert_eq!(pipeline.warehouse.backend, WarehouseBackend::Memory);
        assert!(!pipeline.warehouse.atomic_merge);
    }

    #[test]
    fn test_serial_pool_defaults_to_single_slot() {
        let config = Config::parse("pipelines:\n  s:\n    policy: serial\n").unwrap();
        let pool = config.pipelines["s"].effective_pool().unwrap();
        assert_eq!(pool.name, "bigquery_serial");
        assert_eq!(pool.slots, 1);
    }

    #[test]
    fn test_fixed_date_ignores_trigger() {
        let config = Config::parse(SERIAL).unwrap();
        let (_, pipeline) = config.pipeline("02_olist_raw_ingestion_serial").unwrap();

        let requested: Vec<BatchDate> = vec!["2018-11-05".parse().unwrap()];
        let (dates, overridden) = pipeline.resolve_batch_dates(&requested);
        assert_eq!(dates, vec!["2018-10-01".parse::<BatchDate>().unwrap()]);
        assert!(overridden);

        let (_, overridden) = pipeline.resolve_batch_dates(&[]);
        assert!(!overridden);
    }

    #[test]
    fn test_trigger_dates_deduplicated() {
        let pipeline = PipelineConfig::default();
        let a: BatchDate = "2018-10-01".parse().unwrap();
        let b: BatchDate = "2018-10-02".parse().unwrap();
        let (dates, overridden) = pipeline.resolve_batch_dates(&[a, b, a]);
        assert_eq!(dates, vec![a, b]);
        assert!(!overridden);

        let (dates, _) = pipeline.resolve_batch_dates(&[]);
        assert_eq!(dates, vec![BatchDate::today()]);
    }

    #[test]
    fn test_render_description() {
        let config = Config::parse(PARALLEL).unwrap();
        let pipeline = &config.pipelines["01_olist_raw_ingestion"];
        let batch: BatchDate = "2018-10-01".parse().unwrap();
        assert_eq!(
            pipeline.render_description(&batch).as_deref(),
            Some("Olist batch (dt=2018-10-01)")
        );
    }

    #[test]
    fn test_unknown_pipeline() {
        let config = Config::parse(PARALLEL).unwrap();
        let err = config.pipeline("nope").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Unknown pipeline 'nope'"));
        assert!(message.contains("01_olist_raw_ingestion"));
    }

    #[test]
    fn test_invalid_batch_date_mode() {
        let err = Config::parse("pipelines:\n  p:\n    batch_date: yesterday\n").unwrap_err();
        assert!(err.to_string().contains("batch_date must be 'trigger' or a date"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = Config::parse("pipelines:\n  p:\n    retires: 3\n").unwrap_err();
        assert!(matches!(err, ConfigError::YamlParse { .. }));
    }

    #[test]
    fn test_validation_collects_errors() {
        let yaml = r#"
pipelines:
  bad:
    policy: serial
    pool:
      name: serial
      slots: 2
    source:
      bucket_url: "s3://not-supported"
    warehouse:
      raw_dataset: "olist-raw"
    tables:
      - file: a.csv
        table: orders
      - file: b.csv
        table: orders
"#;
        let err = Config::parse(yaml).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("single slot pool"), "{message}");
        assert!(message.contains("source.bucket_url"), "{message}");
        assert!(message.contains("'olist-raw' is not a valid dataset name"), "{message}");
        assert!(message.contains("table 'orders' is mapped more than once"), "{message}");
    }

    #[test]
    fn test_concurrent_runs_rejected() {
        let err = Config::parse("pipelines:\n  p:\n    max_active_runs: 16\n").unwrap_err();
        assert!(
            err.to_string()
                .contains("max_active_runs must be 1, runs for different batch dates share the staging tables (got 16)"),
            "{err}"
        );

        let config = Config::parse("pipelines:\n  p:\n    max_active_runs: 1\n").unwrap();
        assert_eq!(config.pipelines["p"].effective_max_active_runs(), 1);
    }

    #[test]
    fn test_empty_config_rejected() {
        let err = Config::parse("{}").unwrap_err();
        assert!(err.to_string().contains("no pipelines configured"));
    }

    #[test]
    fn test_custom_tables() {
        let yaml = r#"
pipelines:
  small:
    tables:
      - file: olist_orders_dataset.csv
        table: orders
"#;
        let config = Config::parse(yaml).unwrap();
        assert_eq!(
            config.pipelines["small"].tables,
            vec![TableMapping::new("olist_orders_dataset.csv", "orders")]
        );
    }
}
