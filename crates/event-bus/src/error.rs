//! # Bus Errors
//!
//! Error taxonomy of the event bus.
//!
//! Only `BusError` ever reaches a publisher. Handler and filter failures are
//! contained: they are logged and recorded against the registration, but the
//! publish call still returns the successful results.

use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced to callers of the bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// Publish attempted after `shutdown()`.
    #[error("Event bus is shut down")]
    Shutdown,

    /// The coordinator itself failed; the event was marked `Failed`.
    #[error("Dispatch of event {event_id} failed: {reason}")]
    DispatchFailure { event_id: Uuid, reason: String },

    /// `publish_blocking` was called from inside an async runtime.
    #[error("Blocking publish called from within an async runtime; use `publish().await`")]
    BlockingInAsyncContext,

    /// A private runtime for blocking publish could not be built.
    #[error("Failed to start runtime for blocking publish: {0}")]
    Runtime(String),

    /// Construction parameters were rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Why a single handler invocation did not produce a result.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvocationError {
    /// The invocation exceeded its deadline.
    #[error("Handler timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// The handler returned an error.
    #[error("Handler execution failed: {0}")]
    Execution(String),

    /// The handler panicked.
    #[error("Handler panicked: {0}")]
    Panicked(String),
}

impl InvocationError {
    /// Short class name used in logs and statistics.
    #[must_use]
    pub fn class(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Execution(_) => "execution",
            Self::Panicked(_) => "panic",
        }
    }
}

/// A filter predicate failed to evaluate. The filter is treated as failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("Filter '{filter}' failed to evaluate: {reason}")]
    Evaluation { filter: String, reason: String },
}

/// Invalid bus construction parameters.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_workers must be at least 1")]
    ZeroWorkers,

    #[error("event_history_size must be at least 1")]
    ZeroHistory,

    #[error("processing_window must be at least 1")]
    ZeroProcessingWindow,

    #[error("Invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },
}

/// Returned by a handler to report that a required downstream system failed.
///
/// Unlike ordinary handler errors this is not retried or contained: the
/// whole publish fails with `BusError::DispatchFailure`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Fatal: {reason}")]
pub struct FatalError {
    pub reason: String,
}

impl FatalError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Result alias for bus operations.
pub type BusResult<T> = Result<T, BusError>;
