//! # Event Handlers
//!
//! Consumers of the bus. A handler is either synchronous (runs on the bus
//! worker pool) or asynchronous (runs on the async scheduler and may suspend).
//! The kind is fixed when the handler value is built and never inspected at
//! runtime.

use crate::events::{Event, EventPriority, EventType};
use crate::filters::Filter;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use uuid::Uuid;

/// Outcome of one handler invocation.
pub type HandlerResult = anyhow::Result<serde_json::Value>;

/// Handler whose body blocks the calling thread.
pub trait SyncHandler: Send + Sync {
    fn handle(&self, event: &Event) -> HandlerResult;
}

impl<F> SyncHandler for F
where
    F: Fn(&Event) -> HandlerResult + Send + Sync,
{
    fn handle(&self, event: &Event) -> HandlerResult {
        self(event)
    }
}

/// Handler whose body may suspend.
#[async_trait]
pub trait AsyncHandler: Send + Sync {
    async fn handle(&self, event: &Event) -> HandlerResult;
}

/// Adapter turning an async closure into an `AsyncHandler`.
struct AsyncFn<F>(F);

#[async_trait]
impl<F, Fut> AsyncHandler for AsyncFn<F>
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    async fn handle(&self, event: &Event) -> HandlerResult {
        (self.0)(event.clone()).await
    }
}

/// A handler tagged with its execution kind.
///
/// Cloning shares the underlying handler; `unregister_handler` matches on
/// that shared identity.
#[derive(Clone)]
pub enum Handler {
    Sync(Arc<dyn SyncHandler>),
    Async(Arc<dyn AsyncHandler>),
}

impl Handler {
    /// Wrap a blocking closure.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(f))
    }

    /// Wrap an async closure. The closure receives an owned copy of the event.
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self::Async(Arc::new(AsyncFn(f)))
    }

    #[must_use]
    pub fn is_async(&self) -> bool {
        matches!(self, Self::Async(_))
    }

    /// Whether `self` and `other` wrap the same handler instance.
    #[must_use]
    pub fn same_as(&self, other: &Handler) -> bool {
        self.data_ptr() == other.data_ptr()
    }

    fn data_ptr(&self) -> *const () {
        match self {
            Self::Sync(h) => Arc::as_ptr(h) as *const (),
            Self::Async(h) => Arc::as_ptr(h) as *const (),
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_async() { "async" } else { "sync" };
        f.debug_tuple("Handler").field(&kind).finish()
    }
}

/// What to do when a registration is already at its concurrency cap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaturationPolicy {
    /// Wait for an in-flight invocation to finish.
    #[default]
    Wait,
    /// Skip the registration for this event.
    Skip,
}

/// Execution policy supplied at registration time.
#[derive(Debug, Clone)]
pub struct HandlerOptions {
    /// Order among handlers competing for the same event.
    pub priority: EventPriority,
    /// All must pass for the handler to fire.
    pub filters: Vec<Filter>,
    /// Simultaneous invocations allowed for this registration.
    pub max_concurrent: usize,
    /// Per-invocation deadline.
    pub timeout: Option<Duration>,
    /// Retry failed invocations within the event's retry budget.
    pub retry_on_failure: bool,
    /// Label used in logs and statistics.
    pub name: Option<String>,
}

impl Default for HandlerOptions {
    fn default() -> Self {
        Self {
            priority: EventPriority::Normal,
            filters: Vec::new(),
            max_concurrent: 1,
            timeout: None,
            retry_on_failure: true,
            name: None,
        }
    }
}

impl HandlerOptions {
    #[must_use]
    pub fn priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    #[must_use]
    pub fn max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn retry_on_failure(mut self, retry: bool) -> Self {
        self.retry_on_failure = retry;
        self
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Opaque id returned by `register_handler`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RegistrationId(Uuid);

impl RegistrationId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A handler bound to event types with its execution policy and live
/// counters. Counters are only written by the dispatch engine.
pub struct HandlerRegistration {
    pub(crate) id: RegistrationId,
    pub(crate) name: String,
    pub(crate) handler: Handler,
    pub(crate) event_types: Vec<EventType>,
    pub(crate) priority: EventPriority,
    pub(crate) filters: Vec<Filter>,
    pub(crate) max_concurrent: usize,
    pub(crate) timeout: Option<Duration>,
    pub(crate) retry_on_failure: bool,
    /// Registration order; breaks priority ties.
    pub(crate) sequence: u64,
    pub(crate) slots: Semaphore,
    pub(crate) active_count: AtomicUsize,
    pub(crate) total_processed: AtomicU64,
    pub(crate) total_errors: AtomicU64,
    pub(crate) total_timeouts: AtomicU64,
    pub(crate) last_executed_at: Mutex<Option<DateTime<Utc>>>,
    pub(crate) last_error: Mutex<Option<String>>,
}

impl HandlerRegistration {
    pub(crate) fn new(
        handler: Handler,
        event_types: Vec<EventType>,
        options: HandlerOptions,
        sequence: u64,
    ) -> Self {
        let id = RegistrationId::new();
        let max_concurrent = options.max_concurrent.max(1);
        Self {
            id,
            name: options.name.unwrap_or_else(|| format!("handler-{sequence}")),
            handler,
            event_types,
            priority: options.priority,
            filters: options.filters,
            max_concurrent,
            timeout: options.timeout,
            retry_on_failure: options.retry_on_failure,
            sequence,
            slots: Semaphore::new(max_concurrent),
            active_count: AtomicUsize::new(0),
            total_processed: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            total_timeouts: AtomicU64::new(0),
            last_executed_at: Mutex::new(None),
            last_error: Mutex::new(None),
        }
    }

    pub fn id(&self) -> RegistrationId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> EventPriority {
        self.priority
    }

    pub fn is_async(&self) -> bool {
        self.handler.is_async()
    }

    pub fn active_count(&self) -> usize {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Point-in-time copy of the counters.
    pub fn statistics(&self) -> HandlerStatistics {
        let total_processed = self.total_processed.load(Ordering::SeqCst);
        let total_errors = self.total_errors.load(Ordering::SeqCst);
        let error_rate = if total_processed == 0 {
            0.0
        } else {
            total_errors as f64 / total_processed as f64
        };

        HandlerStatistics {
            id: self.id,
            name: self.name.clone(),
            event_types: self.event_types.clone(),
            priority: self.priority,
            is_async: self.is_async(),
            max_concurrent: self.max_concurrent,
            active_count: self.active_count(),
            total_processed,
            total_errors,
            total_timeouts: self.total_timeouts.load(Ordering::SeqCst),
            error_rate,
            last_executed_at: *self.last_executed_at.lock(),
            last_error: self.last_error.lock().clone(),
        }
    }
}

impl fmt::Debug for HandlerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistration")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("event_types", &self.event_types)
            .field("priority", &self.priority)
            .field("max_concurrent", &self.max_concurrent)
            .field("timeout", &self.timeout)
            .field("retry_on_failure", &self.retry_on_failure)
            .finish_non_exhaustive()
    }
}

/// Snapshot of one registration's counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandlerStatistics {
    pub id: RegistrationId,
    pub name: String,
    pub event_types: Vec<EventType>,
    pub priority: EventPriority,
    pub is_async: bool,
    pub max_concurrent: usize,
    pub active_count: usize,
    /// Invocation attempts, retries included.
    pub total_processed: u64,
    /// Failed attempts, timeouts included.
    pub total_errors: u64,
    pub total_timeouts: u64,
    /// `total_errors / total_processed`, 0 when nothing ran.
    pub error_rate: f64,
    pub last_executed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}
