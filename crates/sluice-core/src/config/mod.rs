//! Common configuration types shared by sluice components.

mod component_key;
mod loader;
mod path;
mod vars;

pub use component_key::ComponentKey;
pub use loader::{Mergeable, load_from_paths};
pub use path::{ConfigArgs, ConfigPath, is_yaml_file};
pub use vars::{InterpolationResult, interpolate};

use serde::{Deserialize, Serialize};

/// Process-wide options that apply across all pipelines.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalConfig {
    /// Executor capacity: the maximum number of tasks running at once across a
    /// run. `None` leaves parallel pipelines unbounded.
    #[serde(default)]
    pub total_concurrency: Option<usize>,
}

impl GlobalConfig {
    /// Merge values from another GlobalConfig (last-write-wins).
    pub fn merge_from(&mut self, other: Self) {
        if other.total_concurrency.is_some() {
            self.total_concurrency = other.total_concurrency;
        }
    }
}

/// Metrics export configuration.
///
/// Runs are short-lived, so metrics are pushed to a Prometheus push gateway
/// instead of being scraped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Push gateway endpoint, e.g. `http://pushgateway:9091/metrics/job/sluice`.
    #[serde(default)]
    pub push_gateway: Option<String>,
    /// Push interval in seconds.
    #[serde(default = "default_push_interval")]
    pub push_interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            push_gateway: None,
            push_interval_secs: default_push_interval(),
        }
    }
}

impl MetricsConfig {
    /// Merge values from another MetricsConfig (last-write-wins).
    pub fn merge_from(&mut self, other: Self) {
        if other.push_gateway.is_some() {
            self.push_gateway = other.push_gateway;
        }
        if other.push_interval_secs != default_push_interval() {
            self.push_interval_secs = other.push_interval_secs;
        }
    }
}

fn default_push_interval() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_yaml_empty() {
        let config: GlobalConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.total_concurrency, None);
    }

    #[test]
    fn test_global_merge_last_write_wins() {
        let mut base = GlobalConfig {
            total_concurrency: Some(4),
        };
        base.merge_from(GlobalConfig::default());
        assert_eq!(base.total_concurrency, Some(4));

        base.merge_from(GlobalConfig {
            total_concurrency: Some(2),
        });
        assert_eq!(base.total_concurrency, Some(2));
    }

    #[test]
    fn test_metrics_defaults() {
        let config: MetricsConfig = serde_yaml::from_str("{}").unwrap();
        assert!(config.push_gateway.is_none());
        assert_eq!(config.push_interval_secs, 10);
    }

    #[test]
    fn test_metrics_rejects_unknown_fields() {
        let result: Result<MetricsConfig, _> = serde_yaml::from_str("address: 0.0.0.0:9090");
        assert!(result.is_err());
    }
}
