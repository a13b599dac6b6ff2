//! Prometheus exporter initialization.
//!
//! A sluice run is a short-lived batch job, so instead of serving a scrape
//! endpoint the exporter pushes to a Prometheus push gateway. Without a
//! configured gateway no recorder is installed and metric events are no-ops.

use metrics_exporter_prometheus::PrometheusBuilder;
use snafu::prelude::*;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::info;

use crate::config::MetricsConfig;
use crate::error::{AlreadyInitializedSnafu, MetricsError, PrometheusInitSnafu};

/// Histogram buckets for duration metrics (in seconds). Warehouse jobs run
/// for seconds to minutes.
const DURATION_BUCKETS: &[f64] = &[
    0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0,
];

static INITIALIZED: OnceLock<()> = OnceLock::new();

/// Install the push gateway exporter if one is configured.
///
/// Must be called from within a tokio runtime.
pub fn init(config: &MetricsConfig) -> Result<(), MetricsError> {
    let Some(endpoint) = config.push_gateway.as_deref() else {
        return Ok(());
    };

    INITIALIZED
        .set(())
        .map_err(|_| AlreadyInitializedSnafu.build())?;

    PrometheusBuilder::new()
        .set_buckets(DURATION_BUCKETS)
        .context(PrometheusInitSnafu)?
        .with_push_gateway(
            endpoint,
            Duration::from_secs(config.push_interval_secs),
            None,
            None,
        )
        .context(PrometheusInitSnafu)?
        .install()
        .context(PrometheusInitSnafu)?;

    info!(%endpoint, "Metrics push gateway configured");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_without_gateway_is_noop() {
        let config = MetricsConfig::default();
        assert!(init(&config).is_ok());
        // No gateway means nothing was installed, so a second call is fine too.
        assert!(init(&config).is_ok());
    }
}
