//! # Bus Telemetry
//!
//! Observability for applications embedding the event bus.
//!
//! ## Components
//!
//! - **Logging**: `tracing-subscriber` with `EnvFilter`, pretty or JSON output
//! - **Metrics**: Prometheus gauges mirrored from `EventBus::metrics()`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bus_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _guard = init_telemetry(TelemetryConfig::from_env())?;
//! let bus = event_bus::EventBus::new(event_bus::EventBusConfig::from_env())?;
//!
//! // Periodically, or from a status command
//! bus_telemetry::record_bus(&bus);
//! println!("{}", bus_telemetry::gather_text()?);
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `BUS_SERVICE_NAME` | `event-bus` | Service name in log records |
//! | `BUS_LOG_LEVEL` / `RUST_LOG` | `info` | Log level filter |
//! | `BUS_CONSOLE_OUTPUT` | `true` | Write logs to the console |
//! | `BUS_JSON_LOGS` | `false` (`true` in containers) | JSON log format |

mod config;
mod logging;
mod metrics;

pub use config::TelemetryConfig;
pub use logging::{env_filter, init_logging};
pub use metrics::{
    gather_text, record_handler_errors, record_snapshot, register_metrics, ACTIVE_HANDLERS,
    AVERAGE_PROCESSING_TIME, EVENTS_FAILED, EVENTS_PROCESSED, EVENTS_PUBLISHED, GLOBAL_FILTERS,
    HANDLERS_REGISTERED, HANDLER_ERRORS, HISTORY_SIZE, REGISTRY,
};

use event_bus::EventBus;
use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Initialize logging and register metrics.
///
/// Returns a guard that should be held for the lifetime of the application.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    // Metrics first, so failures to install logging still leave them usable
    register_metrics()?;
    init_logging(&config)?;

    Ok(TelemetryGuard {
        service_name: config.service_name,
    })
}

/// Copy the bus's aggregate and per-handler counters into the exported
/// metrics.
pub fn record_bus(bus: &EventBus) {
    record_snapshot(&bus.metrics());
    let statistics = bus.handler_statistics();
    record_handler_errors(statistics.values());
}

/// Guard that keeps telemetry active. Logs on drop.
pub struct TelemetryGuard {
    service_name: String,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!(service = %self.service_name, "Shutting down telemetry");
    }
}
