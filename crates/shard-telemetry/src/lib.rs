//! # Shard Telemetry
//!
//! Logging and metrics for the deal migration layer.
//!
//! ## Components
//!
//! - **Logging**: `tracing-subscriber` with an env filter, pretty or JSON output
//! - **Metrics**: Prometheus counters and histograms for migration runs
//!
//! ## Usage
//!
//! ```rust,ignore
//! use shard_telemetry::{init_logging, register_metrics, TelemetryConfig};
//!
//! let _metrics = register_metrics()?;
//! init_logging(&TelemetryConfig::from_env())?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `DM_SERVICE_NAME` | `deal-migration` | Service name in logs |
//! | `DM_LOG_LEVEL` | `info` | Log level filter |
//! | `DM_JSON_LOGS` | `false` | JSON log output |

#![warn(missing_docs)]

mod config;
mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use logging::{build_env_filter, init_logging};
pub use metrics::{
    encode_metrics, register_metrics, HistogramTimer, MetricsHandle, DEALS_PROCESSED,
    DEAL_FAILURES, MIGRATIONS_CANCELLED, MIGRATION_DURATION, SHARDS_REGISTERED,
    SHARD_RECOVERIES, UNSEALS_STARTED,
};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// The global tracing subscriber could not be installed.
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    /// A metric could not be registered or encoded.
    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),
}

/// Convenience macro for recording a metric increment.
#[macro_export]
macro_rules! metric_inc {
    ($metric:expr) => {
        $metric.inc()
    };
    ($metric:expr, $labels:expr) => {
        $metric.with_label_values($labels).inc()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_inc_macro() {
        metric_inc!(MIGRATIONS_CANCELLED);
        metric_inc!(DEALS_PROCESSED, &["ineligible"]);
        assert!(MIGRATIONS_CANCELLED.get() >= 1.0);
    }

    #[test]
    fn test_error_display() {
        let err = TelemetryError::LoggingInit("already set".to_string());
        assert!(err.to_string().contains("already set"));
    }
}
