//! Prometheus export of bus metrics.
//!
//! All metrics follow the naming convention: `bus_<metric>[_<unit>]`.
//! The bus keeps its own counters; `record_snapshot` mirrors a
//! `MetricsSnapshot` into these gauges so a scrape always sees the latest
//! values.

use event_bus::MetricsSnapshot;
use lazy_static::lazy_static;
use prometheus::{Encoder, Gauge, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::TelemetryError;

lazy_static! {
    /// Registry holding every bus metric
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref EVENTS_PUBLISHED: IntGauge = IntGauge::new(
        "bus_events_published_total",
        "Events accepted by publish"
    ).expect("metric creation failed");

    pub static ref EVENTS_PROCESSED: IntGauge = IntGauge::new(
        "bus_events_processed_total",
        "Events whose dispatch completed"
    ).expect("metric creation failed");

    pub static ref EVENTS_FAILED: IntGauge = IntGauge::new(
        "bus_events_failed_total",
        "Events whose dispatch failed"
    ).expect("metric creation failed");

    pub static ref HANDLERS_REGISTERED: IntGauge = IntGauge::new(
        "bus_handlers_registered_total",
        "Handler registrations made"
    ).expect("metric creation failed");

    /// Rolling mean over the configured processing window
    pub static ref AVERAGE_PROCESSING_TIME: Gauge = Gauge::new(
        "bus_processing_time_average_seconds",
        "Mean dispatch time over the processing window"
    ).expect("metric creation failed");

    pub static ref HISTORY_SIZE: IntGauge = IntGauge::new(
        "bus_history_events",
        "Events currently retained in history"
    ).expect("metric creation failed");

    pub static ref ACTIVE_HANDLERS: IntGauge = IntGauge::new(
        "bus_handlers_active",
        "Handler invocations currently in flight"
    ).expect("metric creation failed");

    pub static ref GLOBAL_FILTERS: IntGauge = IntGauge::new(
        "bus_global_filters",
        "Installed global filters"
    ).expect("metric creation failed");

    /// Per-handler error counts, labelled by handler name
    pub static ref HANDLER_ERRORS: IntGaugeVec = IntGaugeVec::new(
        Opts::new("bus_handler_errors_total", "Failed handler attempts"),
        &["handler"]
    ).expect("metric creation failed");
}

/// Register all bus metrics with `REGISTRY`.
///
/// Calling it again is a no-op.
pub fn register_metrics() -> Result<(), TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(EVENTS_PUBLISHED.clone()),
        Box::new(EVENTS_PROCESSED.clone()),
        Box::new(EVENTS_FAILED.clone()),
        Box::new(HANDLERS_REGISTERED.clone()),
        Box::new(AVERAGE_PROCESSING_TIME.clone()),
        Box::new(HISTORY_SIZE.clone()),
        Box::new(ACTIVE_HANDLERS.clone()),
        Box::new(GLOBAL_FILTERS.clone()),
        Box::new(HANDLER_ERRORS.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }
    Ok(())
}

/// Mirror `snapshot` into the exported gauges.
pub fn record_snapshot(snapshot: &MetricsSnapshot) {
    EVENTS_PUBLISHED.set(saturating_i64(snapshot.events_published));
    EVENTS_PROCESSED.set(saturating_i64(snapshot.events_processed));
    EVENTS_FAILED.set(saturating_i64(snapshot.events_failed));
    HANDLERS_REGISTERED.set(saturating_i64(snapshot.handlers_registered));
    AVERAGE_PROCESSING_TIME.set(snapshot.average_processing_time_seconds);
    HISTORY_SIZE.set(saturating_i64(snapshot.history_size as u64));
    ACTIVE_HANDLERS.set(saturating_i64(snapshot.active_handler_count as u64));
    GLOBAL_FILTERS.set(saturating_i64(snapshot.global_filter_count as u64));
}

/// Mirror per-handler error counts, labelled by handler name.
pub fn record_handler_errors<'a, I>(handlers: I)
where
    I: IntoIterator<Item = &'a event_bus::HandlerStatistics>,
{
    for stats in handlers {
        HANDLER_ERRORS
            .with_label_values(&[stats.name.as_str()])
            .set(saturating_i64(stats.total_errors));
    }
}

/// Encode all bus metrics in the Prometheus text exposition format.
pub fn gather_text() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
