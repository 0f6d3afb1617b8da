//! # Bus Metrics
//!
//! Aggregate counters and a rolling window of per-event processing time.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Samples kept for the rolling average by default.
pub const DEFAULT_PROCESSING_WINDOW: usize = 1000;

pub struct BusMetrics {
    enabled: AtomicBool,
    events_published: AtomicU64,
    events_processed: AtomicU64,
    events_failed: AtomicU64,
    handlers_registered: AtomicU64,
    processing_times: Mutex<VecDeque<Duration>>,
    window: usize,
}

impl BusMetrics {
    #[must_use]
    pub fn new(enabled: bool, window: usize) -> Self {
        let window = window.max(1);
        Self {
            enabled: AtomicBool::new(enabled),
            events_published: AtomicU64::new(0),
            events_processed: AtomicU64::new(0),
            events_failed: AtomicU64::new(0),
            handlers_registered: AtomicU64::new(0),
            processing_times: Mutex::new(VecDeque::with_capacity(window)),
            window,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub(crate) fn record_published(&self) {
        if self.is_enabled() {
            self.events_published.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_handler_registered(&self) {
        if self.is_enabled() {
            self.handlers_registered.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a dispatch that reached a terminal status.
    pub(crate) fn record_dispatch(&self, succeeded: bool, elapsed: Duration) {
        if !self.is_enabled() {
            return;
        }
        if succeeded {
            self.events_processed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.events_failed.fetch_add(1, Ordering::Relaxed);
        }

        let mut times = self.processing_times.lock();
        while times.len() >= self.window {
            times.pop_front();
        }
        times.push_back(elapsed);
    }

    /// Mean of the processing-time window, in seconds.
    pub fn average_processing_time(&self) -> f64 {
        let times = self.processing_times.lock();
        if times.is_empty() {
            return 0.0;
        }
        let total: Duration = times.iter().sum();
        total.as_secs_f64() / times.len() as f64
    }

    pub fn events_published(&self) -> u64 {
        self.events_published.load(Ordering::Relaxed)
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed.load(Ordering::Relaxed)
    }

    pub fn events_failed(&self) -> u64 {
        self.events_failed.load(Ordering::Relaxed)
    }

    pub fn handlers_registered(&self) -> u64 {
        self.handlers_registered.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.events_published.store(0, Ordering::Relaxed);
        self.events_processed.store(0, Ordering::Relaxed);
        self.events_failed.store(0, Ordering::Relaxed);
        self.handlers_registered.store(0, Ordering::Relaxed);
        self.processing_times.lock().clear();
    }
}

/// Introspection view returned by `EventBus::metrics`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub events_published: u64,
    pub events_processed: u64,
    pub events_failed: u64,
    pub handlers_registered: u64,
    pub average_processing_time_seconds: f64,
    pub history_size: usize,
    pub active_handler_count: usize,
    pub global_filter_count: usize,
}
