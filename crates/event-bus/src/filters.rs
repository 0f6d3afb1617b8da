//! # Event Filters
//!
//! Named predicates that gate whether the bus (globally) or a single handler
//! registration processes an event.
//!
//! A filter that errors or panics fails closed: the event does not pass and
//! the failure is reported as a `FilterError`, never propagated to the
//! publisher.

use crate::error::FilterError;
use crate::events::{Event, EventPriority, EventType};
use std::collections::BTreeSet;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

type Predicate = dyn Fn(&Event) -> Result<bool, String> + Send + Sync;

/// A named predicate over events.
///
/// Cloning shares the predicate; identity (for removal) follows the clone.
#[derive(Clone)]
pub struct Filter {
    name: Arc<str>,
    predicate: Arc<Predicate>,
}

impl Filter {
    /// Wrap an infallible predicate.
    pub fn new<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        Self::try_new(name, move |event| Ok(predicate(event)))
    }

    /// Wrap a predicate that may fail to evaluate.
    pub fn try_new<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Event) -> Result<bool, String> + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name.into()),
            predicate: Arc::new(predicate),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Evaluate against `event`. Errors and panics become `FilterError`.
    pub fn evaluate(&self, event: &Event) -> Result<bool, FilterError> {
        match catch_unwind(AssertUnwindSafe(|| (self.predicate)(event))) {
            Ok(Ok(passed)) => Ok(passed),
            Ok(Err(reason)) => Err(FilterError::Evaluation {
                filter: self.name.to_string(),
                reason,
            }),
            Err(panic) => Err(FilterError::Evaluation {
                filter: self.name.to_string(),
                reason: panic_message(panic.as_ref()),
            }),
        }
    }

    /// Whether `self` and `other` are the same filter instance.
    #[must_use]
    pub fn same_as(&self, other: &Filter) -> bool {
        Arc::ptr_eq(&self.predicate, &other.predicate)
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter").field("name", &self.name).finish()
    }
}

/// Evaluate a filter chain with AND semantics.
///
/// Stops at the first filter that rejects or fails; a failure is logged and
/// counts as a rejection.
pub fn passes_all(filters: &[Filter], event: &Event) -> bool {
    filters.iter().all(|filter| match filter.evaluate(event) {
        Ok(passed) => passed,
        Err(e) => {
            tracing::warn!(event_id = %event.id(), error = %e, "Filter failed closed");
            false
        }
    })
}

/// Passes events at least as urgent as `threshold`.
pub fn priority_filter(threshold: EventPriority) -> Filter {
    Filter::new(format!("priority<={threshold:?}"), move |event| {
        event.priority().rank() <= threshold.rank()
    })
}

/// Passes events carrying every tag in `required`. An empty set always passes.
pub fn tag_filter<I, S>(required: I) -> Filter
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let required: BTreeSet<String> = required.into_iter().map(Into::into).collect();
    Filter::new(format!("tags{required:?}"), move |event| {
        required.is_subset(event.tags())
    })
}

/// Passes events whose source is allowed. An empty allowlist passes everything.
pub fn source_filter<I, S>(allowed: I) -> Filter
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let allowed: BTreeSet<String> = allowed.into_iter().map(Into::into).collect();
    Filter::new(format!("sources{allowed:?}"), move |event| {
        allowed.is_empty() || event.source().is_some_and(|s| allowed.contains(s))
    })
}

/// Passes events with exactly this correlation id.
pub fn correlation_filter(correlation_id: impl Into<String>) -> Filter {
    let expected = correlation_id.into();
    Filter::new(format!("correlation={expected}"), move |event| {
        event.correlation_id() == Some(expected.as_str())
    })
}

/// Passes events of the listed types.
pub fn event_type_filter<I>(types: I) -> Filter
where
    I: IntoIterator<Item = EventType>,
{
    let types: BTreeSet<EventType> = types.into_iter().collect();
    Filter::new(format!("types{types:?}"), move |event| {
        types.contains(event.event_type())
    })
}

/// Combine filters into one that passes only when all of them pass.
pub fn all_of(filters: Vec<Filter>) -> Filter {
    let name = filters
        .iter()
        .map(Filter::name)
        .collect::<Vec<_>>()
        .join(" && ");
    Filter::try_new(name, move |event| {
        for filter in &filters {
            if !filter.evaluate(event).map_err(|e| e.to_string())? {
                return Ok(false);
            }
        }
        Ok(true)
    })
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
