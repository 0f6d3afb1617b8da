//! # Handler Registry
//!
//! Maps event types to priority-ordered handler registrations.
//!
//! A registration listening to several types is shared (`Arc`) between the
//! per-type lists, so its concurrency cap and counters are global to it.

use crate::events::EventType;
use crate::handler::{Handler, HandlerOptions, HandlerRegistration, HandlerStatistics, RegistrationId};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Concurrent-safe registry of handler registrations.
#[derive(Default)]
pub struct HandlerRegistry {
    by_type: RwLock<HashMap<EventType, Vec<Arc<HandlerRegistration>>>>,
    next_sequence: AtomicU64,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for every type in `event_types`.
    ///
    /// Each affected list is re-sorted by priority; equal priorities keep
    /// registration order.
    pub fn register(
        &self,
        handler: Handler,
        event_types: Vec<EventType>,
        options: HandlerOptions,
    ) -> Arc<HandlerRegistration> {
        let mut event_types = event_types;
        let mut seen = HashSet::new();
        event_types.retain(|t| seen.insert(t.clone()));

        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        let registration = Arc::new(HandlerRegistration::new(
            handler,
            event_types.clone(),
            options,
            sequence,
        ));

        let mut by_type = self.by_type.write();
        for event_type in &event_types {
            let list = by_type.entry(event_type.clone()).or_default();
            list.push(Arc::clone(&registration));
            list.sort_by_key(|r| (r.priority, r.sequence));
        }
        drop(by_type);

        debug!(
            registration = %registration.id,
            name = %registration.name,
            priority = ?registration.priority,
            event_types = ?event_types,
            is_async = registration.is_async(),
            "Handler registered"
        );

        registration
    }

    /// Remove one registration from every type. Returns whether it existed.
    pub fn unregister(&self, id: RegistrationId) -> bool {
        self.remove_where(|r| r.id == id)
    }

    /// Remove every registration wrapping `handler`.
    pub fn unregister_handler(&self, handler: &Handler) -> bool {
        self.remove_where(|r| r.handler.same_as(handler))
    }

    fn remove_where<P>(&self, predicate: P) -> bool
    where
        P: Fn(&HandlerRegistration) -> bool,
    {
        let mut by_type = self.by_type.write();
        let mut removed = false;

        for list in by_type.values_mut() {
            let before = list.len();
            list.retain(|r| !predicate(r));
            removed |= list.len() != before;
        }
        by_type.retain(|_, list| !list.is_empty());

        if removed {
            debug!("Handler unregistered");
        }
        removed
    }

    /// Ordered snapshot of the registrations for `event_type`.
    pub fn handlers_for(&self, event_type: &EventType) -> Vec<Arc<HandlerRegistration>> {
        self.by_type
            .read()
            .get(event_type)
            .cloned()
            .unwrap_or_default()
    }

    /// Each registration once, in registration order.
    pub fn registrations(&self) -> Vec<Arc<HandlerRegistration>> {
        let by_type = self.by_type.read();
        let mut seen = HashSet::new();
        let mut all: Vec<Arc<HandlerRegistration>> = by_type
            .values()
            .flatten()
            .filter(|r| seen.insert(r.id))
            .cloned()
            .collect();
        all.sort_by_key(|r| r.sequence);
        all
    }

    /// Counters of every registration keyed by id.
    pub fn statistics(&self) -> HashMap<RegistrationId, HandlerStatistics> {
        self.registrations()
            .into_iter()
            .map(|r| (r.id, r.statistics()))
            .collect()
    }

    /// In-flight invocations across all registrations.
    pub fn active_count(&self) -> usize {
        self.registrations().iter().map(|r| r.active_count()).sum()
    }

    pub fn registration_count(&self) -> usize {
        self.registrations().len()
    }

    /// Event types that currently have at least one handler.
    pub fn event_types(&self) -> Vec<EventType> {
        let mut types: Vec<EventType> = self.by_type.read().keys().cloned().collect();
        types.sort();
        types
    }

    pub fn clear(&self) {
        self.by_type.write().clear();
    }
}
