//! # Event Bus
//!
//! The publish/subscribe façade: owns the handler registry, global filters,
//! history and metrics, and drives the dispatch engine.
//!
//! `EventBus` is a cheap handle (`Clone` shares the same bus), so it can be
//! injected into every collaborator from the application's composition root.

use crate::config::EventBusConfig;
use crate::dispatch::Dispatcher;
use crate::error::{BusError, BusResult};
use crate::events::{Event, EventPriority, EventStatus, EventType};
use crate::filters::{passes_all, Filter};
use crate::handler::{Handler, HandlerOptions, HandlerStatistics, RegistrationId};
use crate::history::EventHistory;
use crate::metrics::{BusMetrics, MetricsSnapshot};
use crate::registry::HandlerRegistry;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How often `shutdown` re-checks in-flight invocations.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Optional arguments of `EventBus::emit`.
#[derive(Debug, Clone, Default)]
pub struct EmitOptions {
    pub priority: EventPriority,
    pub correlation_id: Option<String>,
    pub tags: BTreeSet<String>,
    pub source: Option<String>,
}

impl EmitOptions {
    #[must_use]
    pub fn priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    #[must_use]
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    fn build(self, event_type: EventType, payload: HashMap<String, serde_json::Value>) -> Event {
        let mut event = Event::new(event_type)
            .with_payload(payload)
            .with_priority(self.priority)
            .with_tags(self.tags);
        if let Some(correlation_id) = self.correlation_id {
            event = event.with_correlation_id(correlation_id);
        }
        if let Some(source) = self.source {
            event = event.with_source(source);
        }
        event
    }
}

struct BusInner {
    config: EventBusConfig,
    registry: HandlerRegistry,
    global_filters: RwLock<Vec<Filter>>,
    history: EventHistory,
    metrics: BusMetrics,
    dispatcher: Dispatcher,
    shutdown: AtomicBool,
}

/// Priority-aware, filterable publish/subscribe dispatcher.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a bus after validating `config`.
    pub fn new(config: EventBusConfig) -> BusResult<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    /// Create a bus with the default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::build(EventBusConfig::default())
    }

    fn build(config: EventBusConfig) -> Self {
        debug!(
            max_workers = config.max_workers,
            history_size = config.event_history_size,
            metrics = config.enable_metrics,
            "Event bus created"
        );

        Self {
            inner: Arc::new(BusInner {
                registry: HandlerRegistry::new(),
                global_filters: RwLock::new(Vec::new()),
                history: EventHistory::new(config.event_history_size),
                metrics: BusMetrics::new(config.enable_metrics, config.processing_window),
                dispatcher: Dispatcher::new(
                    config.max_workers,
                    config.retry_backoff,
                    config.saturation_policy,
                ),
                shutdown: AtomicBool::new(false),
                config,
            }),
        }
    }

    pub fn config(&self) -> &EventBusConfig {
        &self.inner.config
    }

    // =========================================================================
    // PUBLISHING
    // =========================================================================

    /// Publish an event and wait for every applicable handler.
    ///
    /// Returns the results of the handlers that succeeded, in priority-group
    /// order. Handler failures and timeouts are contained and only show up in
    /// `handler_statistics`.
    ///
    /// # Errors
    ///
    /// - `BusError::Shutdown` - the bus was shut down; no handler ran
    /// - `BusError::DispatchFailure` - the dispatch itself failed; the event is
    ///   recorded in history as `Failed`
    pub async fn publish(&self, event: Event) -> BusResult<Vec<serde_json::Value>> {
        let inner = &self.inner;
        if self.is_shutdown() {
            warn!(event_id = %event.id(), event_type = %event.event_type(), "Publish rejected, bus is shut down");
            return Err(BusError::Shutdown);
        }

        inner.metrics.record_published();
        let started = Instant::now();
        let event = event.with_status(EventStatus::Processing);

        let global_filters = inner.global_filters.read().clone();
        if !passes_all(&global_filters, &event) {
            debug!(event_id = %event.id(), event_type = %event.event_type(), "Event rejected by global filter");
            return Ok(Vec::new());
        }

        let registrations = inner.registry.handlers_for(event.event_type());
        if registrations.is_empty() {
            debug!(event_id = %event.id(), event_type = %event.event_type(), "No handlers for event type");
            return Ok(Vec::new());
        }

        match inner.dispatcher.dispatch(&event, &registrations).await {
            Ok(results) => {
                inner.history.push(event.with_status(EventStatus::Completed));
                inner.metrics.record_dispatch(true, started.elapsed());
                debug!(
                    event_id = %event.id(),
                    event_type = %event.event_type(),
                    results = results.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Event processed"
                );
                Ok(results)
            }
            Err(fault) => {
                inner.history.push(event.with_status(EventStatus::Failed));
                inner.metrics.record_dispatch(false, started.elapsed());
                error!(
                    event_id = %event.id(),
                    event_type = %event.event_type(),
                    reason = %fault.reason,
                    "Event dispatch failed"
                );
                Err(BusError::DispatchFailure {
                    event_id: event.id(),
                    reason: fault.reason,
                })
            }
        }
    }

    /// Build an event from its parts and publish it.
    pub async fn emit(
        &self,
        event_type: EventType,
        payload: HashMap<String, serde_json::Value>,
        options: EmitOptions,
    ) -> BusResult<Vec<serde_json::Value>> {
        self.publish(options.build(event_type, payload)).await
    }

    /// Publish in the background and return a handle to the pending result.
    ///
    /// # Errors
    ///
    /// `BusError::Runtime` when called outside a Tokio runtime.
    pub fn spawn_publish(
        &self,
        event: Event,
    ) -> BusResult<JoinHandle<BusResult<Vec<serde_json::Value>>>> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| BusError::Runtime(e.to_string()))?;
        let bus = self.clone();
        Ok(handle.spawn(async move { bus.publish(event).await }))
    }

    /// Publish from synchronous code and block until dispatch completes.
    ///
    /// Drives the dispatch on a private current-thread runtime.
    ///
    /// # Errors
    ///
    /// `BusError::BlockingInAsyncContext` when called from inside a Tokio
    /// runtime, where blocking would stall the scheduler; use `publish`
    /// there. Otherwise the same errors as `publish`.
    pub fn publish_blocking(&self, event: Event) -> BusResult<Vec<serde_json::Value>> {
        if self.is_shutdown() {
            return Err(BusError::Shutdown);
        }
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(BusError::BlockingInAsyncContext);
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| BusError::Runtime(e.to_string()))?;
        runtime.block_on(self.publish(event))
    }

    /// Blocking counterpart of `emit`.
    pub fn emit_blocking(
        &self,
        event_type: EventType,
        payload: HashMap<String, serde_json::Value>,
        options: EmitOptions,
    ) -> BusResult<Vec<serde_json::Value>> {
        self.publish_blocking(options.build(event_type, payload))
    }

    // =========================================================================
    // HANDLERS & FILTERS
    // =========================================================================

    /// Register `handler` for `event_types` with the given execution policy.
    pub fn register_handler<I>(
        &self,
        handler: Handler,
        event_types: I,
        options: HandlerOptions,
    ) -> RegistrationId
    where
        I: IntoIterator<Item = EventType>,
    {
        let registration =
            self.inner
                .registry
                .register(handler, event_types.into_iter().collect(), options);
        self.inner.metrics.record_handler_registered();
        registration.id()
    }

    /// Remove every registration of this handler instance.
    ///
    /// Returns `false` if nothing was registered.
    pub fn unregister_handler(&self, handler: &Handler) -> bool {
        self.inner.registry.unregister_handler(handler)
    }

    /// Remove one registration by id.
    pub fn unregister(&self, id: RegistrationId) -> bool {
        self.inner.registry.unregister(id)
    }

    /// Add a filter every event must pass before handler lookup.
    pub fn add_global_filter(&self, filter: Filter) {
        debug!(filter = %filter.name(), "Global filter added");
        self.inner.global_filters.write().push(filter);
    }

    /// Remove a global filter by identity.
    pub fn remove_global_filter(&self, filter: &Filter) -> bool {
        let mut filters = self.inner.global_filters.write();
        match filters.iter().position(|f| f.same_as(filter)) {
            Some(index) => {
                filters.remove(index);
                true
            }
            None => false,
        }
    }

    // =========================================================================
    // INTROSPECTION
    // =========================================================================

    /// Per-registration counters.
    pub fn handler_statistics(&self) -> HashMap<RegistrationId, HandlerStatistics> {
        self.inner.registry.statistics()
    }

    /// Aggregate counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        let inner = &self.inner;
        MetricsSnapshot {
            events_published: inner.metrics.events_published(),
            events_processed: inner.metrics.events_processed(),
            events_failed: inner.metrics.events_failed(),
            handlers_registered: inner.metrics.handlers_registered(),
            average_processing_time_seconds: inner.metrics.average_processing_time(),
            history_size: inner.history.len(),
            active_handler_count: inner.registry.active_count(),
            global_filter_count: inner.global_filters.read().len(),
        }
    }

    pub fn reset_metrics(&self) {
        self.inner.metrics.reset();
    }

    /// Recently dispatched events, oldest first.
    ///
    /// Restricted to `event_type` when given, and to the `limit` most recent.
    pub fn event_history(&self, event_type: Option<&EventType>, limit: Option<usize>) -> Vec<Event> {
        self.inner.history.query(event_type, limit)
    }

    pub fn clear_history(&self) {
        self.inner.history.clear();
    }

    /// Event types with at least one registered handler.
    pub fn registered_event_types(&self) -> Vec<EventType> {
        self.inner.registry.event_types()
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::SeqCst)
    }

    /// Stop accepting events and wait up to `timeout` for in-flight
    /// publishes to finish, then release the worker pool.
    ///
    /// A publish counts as in flight for as long as its handlers are being
    /// dispatched, so invocations still queued for a concurrency slot are
    /// drained too. Returns `true` if everything drained in time. Work still
    /// running afterwards is abandoned.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        if self.inner.shutdown.swap(true, Ordering::SeqCst) {
            debug!("Event bus already shut down");
        }
        info!(timeout_ms = timeout.as_millis() as u64, "Shutting down event bus");

        let deadline = Instant::now() + timeout;
        let drained = loop {
            let active = self.inner.dispatcher.in_flight();
            if active == 0 {
                break true;
            }
            if Instant::now() >= deadline {
                warn!(active, "Shutdown timed out with publishes still in flight");
                break false;
            }
            tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
        };

        self.inner.dispatcher.close();
        info!(drained, "Event bus shut down");
        drained
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("config", &self.inner.config)
            .field("handlers", &self.inner.registry.registration_count())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}
