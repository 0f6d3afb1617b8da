//! Event bus construction parameters.

use crate::error::ConfigError;
use crate::handler::SaturationPolicy;
use crate::metrics::DEFAULT_PROCESSING_WINDOW;
use std::env;
use std::time::Duration;

/// Default size of the worker pool for synchronous handlers.
pub const DEFAULT_MAX_WORKERS: usize = 10;

/// Default capacity of the event history ring.
pub const DEFAULT_HISTORY_SIZE: usize = 1000;

/// Default base delay of the linear retry backoff.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Configuration for an `EventBus`.
#[derive(Debug, Clone, PartialEq)]
pub struct EventBusConfig {
    /// Worker pool size for synchronous handlers.
    pub max_workers: usize,

    /// Capacity of the history ring.
    pub event_history_size: usize,

    /// Whether counters are collected.
    pub enable_metrics: bool,

    /// Retry `n` sleeps `retry_backoff * n` before running.
    pub retry_backoff: Duration,

    /// Samples in the rolling processing-time window.
    pub processing_window: usize,

    /// Behaviour when a registration is at its concurrency cap.
    pub saturation_policy: SaturationPolicy,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            event_history_size: DEFAULT_HISTORY_SIZE,
            enable_metrics: true,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            processing_window: DEFAULT_PROCESSING_WINDOW,
            saturation_policy: SaturationPolicy::Wait,
        }
    }
}

impl EventBusConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `EVENT_BUS_MAX_WORKERS`: Worker pool size (default: 10)
    /// - `EVENT_BUS_HISTORY_SIZE`: History capacity (default: 1000)
    /// - `EVENT_BUS_ENABLE_METRICS`: Collect counters (default: true)
    /// - `EVENT_BUS_RETRY_BACKOFF_MS`: Backoff base in ms (default: 100)
    /// - `EVENT_BUS_PROCESSING_WINDOW`: Rolling window samples (default: 1000)
    /// - `EVENT_BUS_SATURATION`: `wait` or `skip` (default: wait)
    ///
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            max_workers: parse_env("EVENT_BUS_MAX_WORKERS").unwrap_or(defaults.max_workers),

            event_history_size: parse_env("EVENT_BUS_HISTORY_SIZE")
                .unwrap_or(defaults.event_history_size),

            enable_metrics: env::var("EVENT_BUS_ENABLE_METRICS")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(defaults.enable_metrics),

            retry_backoff: parse_env("EVENT_BUS_RETRY_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_backoff),

            processing_window: parse_env("EVENT_BUS_PROCESSING_WINDOW")
                .unwrap_or(defaults.processing_window),

            saturation_policy: env::var("EVENT_BUS_SATURATION")
                .ok()
                .and_then(|v| parse_saturation(&v).ok())
                .unwrap_or(defaults.saturation_policy),
        }
    }

    #[must_use]
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    #[must_use]
    pub fn with_history_size(mut self, event_history_size: usize) -> Self {
        self.event_history_size = event_history_size;
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, enable_metrics: bool) -> Self {
        self.enable_metrics = enable_metrics;
        self
    }

    #[must_use]
    pub fn with_retry_backoff(mut self, retry_backoff: Duration) -> Self {
        self.retry_backoff = retry_backoff;
        self
    }

    #[must_use]
    pub fn with_processing_window(mut self, processing_window: usize) -> Self {
        self.processing_window = processing_window;
        self
    }

    #[must_use]
    pub fn with_saturation_policy(mut self, policy: SaturationPolicy) -> Self {
        self.saturation_policy = policy;
        self
    }

    /// Reject parameters the bus cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if self.event_history_size == 0 {
            return Err(ConfigError::ZeroHistory);
        }
        if self.processing_window == 0 {
            return Err(ConfigError::ZeroProcessingWindow);
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Parse a saturation policy name.
pub fn parse_saturation(value: &str) -> Result<SaturationPolicy, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "wait" => Ok(SaturationPolicy::Wait),
        "skip" => Ok(SaturationPolicy::Skip),
        _ => Err(ConfigError::InvalidValue {
            key: "EVENT_BUS_SATURATION".to_string(),
            value: value.to_string(),
        }),
    }
}
