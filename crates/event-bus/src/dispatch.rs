//! # Dispatch Engine
//!
//! Runs the handlers of one event.
//!
//! ## Ordering
//!
//! ```text
//!  handlers (sorted by priority, then registration order)
//!  ┌──────────┬──────────┬─────────────────────┐
//!  │ Critical │   High   │       Normal        │   ... priority groups
//!  └────┬─────┴────┬─────┴──────────┬──────────┘
//!       │ fan-out  │                │
//!       ▼          ▼                ▼
//!   [h1]        [h2 h3]        [h4 h5 h6]        concurrent within a group
//!       │ fan-in   │                │
//!       └────────► └──────────────► └──► results
//! ```
//!
//! A group (retries included) finishes before the next one starts.
//! Synchronous handlers run on the blocking pool behind a semaphore sized
//! `max_workers`; asynchronous handlers run on the caller's task.
//!
//! ## Re-entrant publishes
//!
//! A handler may publish while it runs. Registrations already running
//! further up the same call chain are skipped for the nested event, so a
//! handler never waits on its own concurrency slot.

use crate::error::{FatalError, InvocationError};
use crate::events::Event;
use crate::filters::{panic_message, passes_all};
use crate::handler::{Handler, HandlerRegistration, RegistrationId, SaturationPolicy};
use chrono::Utc;
use futures::future::join_all;
use futures::FutureExt;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, warn};

tokio::task_local! {
    /// Registrations whose handler future is being polled by this call chain.
    static RUNNING: HashSet<RegistrationId>;
}

/// A fault of the coordinator, not attributable to a contained handler
/// failure. Fails the whole publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DispatchFault {
    pub reason: String,
}

/// Result of running one registration (all attempts) for one event.
#[derive(Debug)]
enum Outcome {
    Success(serde_json::Value),
    Failed,
    Skipped,
    Fatal(String),
}

/// Why a single attempt did not succeed.
enum AttemptError {
    Invocation(InvocationError),
    Fatal(String),
}

/// Holds one unit of an in-flight counter.
struct ActiveGuard<'a>(&'a AtomicUsize);

impl<'a> ActiveGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub(crate) struct Dispatcher {
    workers: Arc<Semaphore>,
    /// Dispatches in progress, including invocations queued for a slot.
    in_flight: AtomicUsize,
    retry_backoff: Duration,
    saturation: SaturationPolicy,
}

impl Dispatcher {
    pub(crate) fn new(
        max_workers: usize,
        retry_backoff: Duration,
        saturation: SaturationPolicy,
    ) -> Self {
        Self {
            workers: Arc::new(Semaphore::new(max_workers.max(1))),
            in_flight: AtomicUsize::new(0),
            retry_backoff,
            saturation,
        }
    }

    /// Stop handing out worker slots. Pending sync invocations fail.
    pub(crate) fn close(&self) {
        self.workers.close();
    }

    /// Number of `dispatch` calls that have not returned yet.
    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Run `registrations` (already priority-ordered) against `event`.
    ///
    /// Returns the successful results in group order. Contained handler
    /// failures are left out of the list; a fatal failure aborts after the
    /// current group has drained.
    pub(crate) async fn dispatch(
        &self,
        event: &Event,
        registrations: &[Arc<HandlerRegistration>],
    ) -> Result<Vec<serde_json::Value>, DispatchFault> {
        let _in_flight = ActiveGuard::enter(&self.in_flight);
        let mut results = Vec::new();

        for group in registrations.chunk_by(|a, b| a.priority == b.priority) {
            let runnable: Vec<&Arc<HandlerRegistration>> = group
                .iter()
                .filter(|r| passes_all(&r.filters, event))
                .collect();

            if runnable.is_empty() {
                continue;
            }

            debug!(
                event_id = %event.id(),
                priority = ?group[0].priority,
                handlers = runnable.len(),
                "Dispatching priority group"
            );

            let outcomes = join_all(runnable.iter().map(|r| self.run(r, event))).await;

            let mut fatal = None;
            for outcome in outcomes {
                match outcome {
                    Outcome::Success(value) => results.push(value),
                    Outcome::Failed | Outcome::Skipped => {}
                    Outcome::Fatal(reason) => {
                        fatal.get_or_insert(reason);
                    }
                }
            }

            if let Some(reason) = fatal {
                return Err(DispatchFault { reason });
            }
        }

        Ok(results)
    }

    /// Run one registration, retrying failed attempts with linear backoff.
    async fn run(&self, registration: &HandlerRegistration, event: &Event) -> Outcome {
        let reentrant = RUNNING
            .try_with(|running| running.contains(&registration.id))
            .unwrap_or(false);
        if reentrant {
            debug!(
                registration = %registration.id,
                event_id = %event.id(),
                "Handler already running in this call chain, skipped"
            );
            return Outcome::Skipped;
        }

        let _slot = match self.acquire_slot(registration).await {
            Some(slot) => slot,
            None => {
                debug!(
                    registration = %registration.id,
                    event_id = %event.id(),
                    "Handler at concurrency cap, skipped"
                );
                return Outcome::Skipped;
            }
        };
        let _active = ActiveGuard::enter(&registration.active_count);

        let mut running = RUNNING.try_with(Clone::clone).unwrap_or_default();
        running.insert(registration.id);
        RUNNING
            .scope(running, self.run_attempts(registration, event))
            .await
    }

    async fn run_attempts(&self, registration: &HandlerRegistration, event: &Event) -> Outcome {
        let max_retries = event.max_retries();
        let mut retry_count = event.retry_count();
        let mut attempt = event.clone();

        loop {
            let result = self.attempt(registration, &attempt).await;
            registration.total_processed.fetch_add(1, Ordering::SeqCst);
            *registration.last_executed_at.lock() = Some(Utc::now());

            let error = match result {
                Ok(value) => return Outcome::Success(value),
                Err(AttemptError::Fatal(reason)) => {
                    registration.total_errors.fetch_add(1, Ordering::SeqCst);
                    *registration.last_error.lock() = Some(reason.clone());
                    warn!(
                        registration = %registration.id,
                        name = %registration.name,
                        event_id = %event.id(),
                        reason = %reason,
                        "Handler reported fatal failure"
                    );
                    return Outcome::Fatal(reason);
                }
                Err(AttemptError::Invocation(error)) => error,
            };

            registration.total_errors.fetch_add(1, Ordering::SeqCst);
            if matches!(error, InvocationError::Timeout { .. }) {
                registration.total_timeouts.fetch_add(1, Ordering::SeqCst);
            }
            *registration.last_error.lock() = Some(error.to_string());

            if !registration.retry_on_failure || retry_count >= max_retries {
                warn!(
                    registration = %registration.id,
                    name = %registration.name,
                    event_id = %event.id(),
                    class = error.class(),
                    error = %error,
                    retries = retry_count,
                    "Handler failed"
                );
                return Outcome::Failed;
            }

            retry_count += 1;
            let delay = self.retry_backoff * retry_count;
            warn!(
                registration = %registration.id,
                name = %registration.name,
                event_id = %event.id(),
                class = error.class(),
                error = %error,
                attempt = retry_count,
                max_retries,
                delay_ms = delay.as_millis() as u64,
                "Handler failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt = event.with_retry_count(retry_count);
        }
    }

    async fn acquire_slot<'a>(
        &self,
        registration: &'a HandlerRegistration,
    ) -> Option<SemaphorePermit<'a>> {
        match self.saturation {
            // Registration semaphores are never closed.
            SaturationPolicy::Wait => registration.slots.acquire().await.ok(),
            SaturationPolicy::Skip => registration.slots.try_acquire().ok(),
        }
    }

    /// One invocation under the registration's (or the event's) deadline.
    async fn attempt(
        &self,
        registration: &HandlerRegistration,
        event: &Event,
    ) -> Result<serde_json::Value, AttemptError> {
        let deadline = registration.timeout.or(event.metadata().timeout);
        let invocation = self.invoke(&registration.handler, event);

        match deadline {
            Some(timeout) => tokio::time::timeout(timeout, invocation)
                .await
                .unwrap_or_else(|_| {
                    Err(AttemptError::Invocation(InvocationError::Timeout { timeout }))
                }),
            None => invocation.await,
        }
    }

    async fn invoke(
        &self,
        handler: &Handler,
        event: &Event,
    ) -> Result<serde_json::Value, AttemptError> {
        let result = match handler {
            Handler::Async(h) => match AssertUnwindSafe(h.handle(event)).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => {
                    return Err(AttemptError::Invocation(InvocationError::Panicked(
                        panic_message(panic.as_ref()),
                    )))
                }
            },
            Handler::Sync(h) => {
                let permit = Arc::clone(&self.workers)
                    .acquire_owned()
                    .await
                    .map_err(|_| AttemptError::Fatal("worker pool is closed".to_string()))?;
                let h = Arc::clone(h);
                let event = event.clone();

                // The permit travels with the job: an abandoned (timed out)
                // job still occupies its worker until it returns.
                let job = tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    h.handle(&event)
                });

                match job.await {
                    Ok(result) => result,
                    Err(join_error) if join_error.is_panic() => {
                        let panic = join_error.into_panic();
                        return Err(AttemptError::Invocation(InvocationError::Panicked(
                            panic_message(panic.as_ref()),
                        )));
                    }
                    Err(join_error) => {
                        return Err(AttemptError::Fatal(format!(
                            "worker job cancelled: {join_error}"
                        )))
                    }
                }
            }
        };

        result.map_err(|error| match error.downcast_ref::<FatalError>() {
            Some(fatal) => AttemptError::Fatal(fatal.reason.clone()),
            None => AttemptError::Invocation(InvocationError::Execution(format!("{error:#}"))),
        })
    }
}
