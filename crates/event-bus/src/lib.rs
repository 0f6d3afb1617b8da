//! # Event Bus - Priority-Aware Publish/Subscribe Dispatcher
//!
//! Decouples producers of events from the handlers that react to them.
//!
//! ## Flow
//!
//! ```text
//! ┌──────────────┐  publish()   ┌──────────────┐  handlers_for()  ┌──────────────┐
//! │   Producer   │ ───────────► │  Event Bus   │ ───────────────► │   Registry   │
//! └──────────────┘              │              │                  └──────────────┘
//!                               │ global       │
//!                               │ filters      │   priority groups
//!                               │              │ ───────────────► ┌──────────────┐
//!                               │ history      │                  │  Dispatcher  │
//!                               │ metrics      │ ◄─────────────── │ caps/timeout │
//!                               └──────────────┘     results      │ retry/panics │
//!                                                                 └──────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - Handlers of a higher priority group finish before the next group starts
//! - A failing, panicking or timed-out handler never fails the publish
//! - Per-registration concurrency caps hold across concurrent publishes
//! - History and processing-time windows are bounded

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod bus;
pub mod config;
mod dispatch;
pub mod error;
pub mod events;
pub mod filters;
pub mod global;
pub mod handler;
pub mod history;
pub mod metrics;
pub mod registry;

// Re-export main types
pub use bus::{EmitOptions, EventBus};
pub use config::EventBusConfig;
pub use error::{BusError, BusResult, ConfigError, FatalError, FilterError, InvocationError};
pub use events::{Event, EventMetadata, EventPriority, EventStatus, EventType};
pub use filters::Filter;
pub use global::{global_bus, set_global_bus, take_global_bus};
pub use handler::{
    AsyncHandler, Handler, HandlerOptions, HandlerResult, HandlerStatistics, RegistrationId,
    SaturationPolicy, SyncHandler,
};
pub use metrics::MetricsSnapshot;

/// Retries granted to an event unless overridden.
pub use events::DEFAULT_MAX_RETRIES;
