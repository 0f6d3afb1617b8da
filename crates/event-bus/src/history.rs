//! # Event History
//!
//! Bounded FIFO of recently dispatched events, kept for inspection only.
//! When full, the oldest entry is evicted.

use crate::events::{Event, EventType};
use parking_lot::Mutex;
use std::collections::VecDeque;

pub struct EventHistory {
    entries: Mutex<VecDeque<Event>>,
    capacity: usize,
}

impl EventHistory {
    /// Create a history holding at most `capacity` events (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn push(&self, event: Event) {
        let mut entries = self.entries.lock();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(event);
    }

    /// All retained events, oldest first.
    pub fn snapshot(&self) -> Vec<Event> {
        self.entries.lock().iter().cloned().collect()
    }

    /// The `limit` most recent events, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<Event> {
        self.query(None, Some(limit))
    }

    /// Retained events of `event_type` (all types if `None`), keeping the
    /// `limit` most recent. Oldest first.
    pub fn query(&self, event_type: Option<&EventType>, limit: Option<usize>) -> Vec<Event> {
        let entries = self.entries.lock();
        let matching: Vec<&Event> = entries
            .iter()
            .filter(|e| event_type.map_or(true, |t| e.event_type() == t))
            .collect();
        let skip = limit.map_or(0, |l| matching.len().saturating_sub(l));
        matching.into_iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
