//! Structured logging setup.
//!
//! Logs are emitted through `tracing`. JSON output carries consistent fields
//! that log shippers can parse:
//! - `timestamp`, `level`, `target`
//! - `subsystem`: always `dm-01` for the migration core
//! - `piece` / `sector`: attached by the `log_piece_event!` macro

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{TelemetryConfig, TelemetryError};

/// Build the env filter, preferring `RUST_LOG` over the configured level.
pub fn build_env_filter(config: &TelemetryConfig) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| TelemetryError::LoggingInit(e.to_string()))
}

/// Install the global tracing subscriber.
///
/// Fails with `TelemetryError::LoggingInit` if a global subscriber is already
/// set, so callers (and tests) can invoke it more than once.
pub fn init_logging(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = build_env_filter(config)?;

    if config.json_logs {
        let json_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(config.source_locations)
            .with_line_number(config.source_locations);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(json_layer)
            .try_init()
            .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(config.source_locations)
            .with_line_number(config.source_locations)
            .with_ansi(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;
    }

    tracing::info!(
        service = %config.service_name,
        json_logs = config.json_logs,
        "Logging initialized"
    );

    Ok(())
}

/// Log a piece-related event with standard fields.
#[macro_export]
macro_rules! log_piece_event {
    ($level:ident, $msg:expr, $piece:expr, $sector:expr $(, $($field:tt)*)?) => {
        tracing::$level!(
            subsystem = "dm-01",
            piece = %$piece,
            sector = $sector,
            $($($field)*,)?
            $msg
        )
    };
}
