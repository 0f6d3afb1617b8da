//! # Concurrency Caps
//!
//! A registration never exceeds `max_concurrent` in-flight invocations, even
//! across events published concurrently. A handler publishing from inside
//! its own invocation never waits on its own slot.

#[cfg(test)]
mod tests {
    use crate::fixtures::{fast_bus, fast_bus_with, recording_async, Journal};
    use event_bus::{
        Event, EventBus, EventBusConfig, EventType, Handler, HandlerOptions, SaturationPolicy,
    };
    use futures::future::join;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn sleeper(journal: &Journal, in_flight: &Arc<AtomicUsize>, peak: &Arc<AtomicUsize>) -> Handler {
        let journal = journal.clone();
        let in_flight = Arc::clone(in_flight);
        let peak = Arc::clone(peak);
        Handler::from_async(move |event: Event| {
            let journal = journal.clone();
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            async move {
                let n = event.field("n").cloned().unwrap_or_default();
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                journal.record(format!("start {n}"));
                tokio::time::sleep(Duration::from_millis(50)).await;
                journal.record(format!("end {n}"));
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(json!(n))
            }
        })
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cap_of_one_serializes_concurrent_publishes() {
        let bus = fast_bus();
        let journal = Journal::new();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let t = EventType::custom("render.page");

        bus.register_handler(
            sleeper(&journal, &in_flight, &peak),
            [t.clone()],
            HandlerOptions::default().max_concurrent(1),
        );

        let (first, second) = join(
            bus.publish(Event::new(t.clone()).with_field("n", json!(1))),
            bus.publish(Event::new(t).with_field("n", json!(2))),
        )
        .await;

        assert_eq!(first.unwrap().len(), 1);
        assert_eq!(second.unwrap().len(), 1);
        assert_eq!(peak.load(Ordering::SeqCst), 1);

        // Whichever ran first ended before the other started.
        let entries = journal.entries();
        assert_eq!(entries.len(), 4);
        assert!(entries[0].starts_with("start"));
        assert!(entries[1].starts_with("end"));
        assert!(entries[2].starts_with("start"));

        let stats = bus.handler_statistics();
        let stats = stats.values().next().unwrap();
        assert_eq!(stats.active_count, 0);
        assert_eq!(stats.total_processed, 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cap_of_two_allows_overlap() {
        let bus = fast_bus();
        let journal = Journal::new();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let t = EventType::custom("render.page");

        bus.register_handler(
            sleeper(&journal, &in_flight, &peak),
            [t.clone()],
            HandlerOptions::default().max_concurrent(2),
        );

        let publishes = (0..4).map(|n| bus.publish(Event::new(t.clone()).with_field("n", json!(n))));
        let results = futures::future::join_all(publishes).await;

        assert!(results.iter().all(|r| matches!(r, Ok(v) if v.len() == 1)));
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    /// With `Skip`, a saturated registration sits out instead of waiting.
    #[tokio::test(flavor = "multi_thread")]
    async fn test_skip_policy_drops_saturated_registration() {
        let bus = fast_bus_with(
            EventBusConfig::default().with_saturation_policy(SaturationPolicy::Skip),
        );
        let journal = Journal::new();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let t = EventType::custom("render.page");

        bus.register_handler(
            sleeper(&journal, &in_flight, &peak),
            [t.clone()],
            HandlerOptions::default().max_concurrent(1),
        );

        let (first, second) = join(
            bus.publish(Event::new(t.clone()).with_field("n", json!(1))),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                bus.publish(Event::new(t.clone()).with_field("n", json!(2))).await
            },
        )
        .await;

        assert_eq!(first.unwrap(), vec![json!(1)]);
        assert!(second.unwrap().is_empty());
        assert_eq!(journal.len(), 2);
    }

    /// Sync handlers share the worker pool; a pool of one runs them one at a time.
    #[tokio::test(flavor = "multi_thread")]
    async fn test_worker_pool_bounds_sync_handlers() {
        let bus = fast_bus_with(EventBusConfig::default().with_max_workers(1));
        let t = EventType::custom("compile");
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            bus.register_handler(
                Handler::sync(move |_| {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(json!(null))
                }),
                [t.clone()],
                HandlerOptions::default(),
            );
        }

        let results = bus.publish(Event::new(t)).await.unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    /// Handler that, on `trigger`, publishes `nested` through `bus` and
    /// returns the nested results.
    fn republisher(bus: &EventBus, journal: &Journal, trigger: EventType, nested: EventType) -> Handler {
        let bus = bus.clone();
        let journal = journal.clone();
        Handler::from_async(move |event: Event| {
            let bus = bus.clone();
            let journal = journal.clone();
            let trigger = trigger.clone();
            let nested = nested.clone();
            async move {
                journal.record(format!("republisher {}", event.event_type()));
                if *event.event_type() != trigger {
                    return Ok(json!("direct"));
                }
                let results = bus.publish(Event::new(nested)).await?;
                Ok(json!(results))
            }
        })
    }

    /// A registration for two types publishing its second type from the first
    /// skips itself for the nested event; other registrations still run.
    #[tokio::test(flavor = "multi_thread")]
    async fn test_nested_publish_of_sibling_type_skips_running_registration() {
        let bus = fast_bus();
        let journal = Journal::new();
        let saved = EventType::TemplateUpdated;
        let cached = EventType::TemplateCached;

        let id = bus.register_handler(
            republisher(&bus, &journal, saved.clone(), cached.clone()),
            [saved.clone(), cached.clone()],
            HandlerOptions::default().max_concurrent(1),
        );
        bus.register_handler(
            recording_async(&journal, "cache-listener"),
            [cached.clone()],
            HandlerOptions::default(),
        );

        let results = tokio::time::timeout(Duration::from_secs(2), bus.publish(Event::new(saved)))
            .await
            .expect("nested publish must not wait on its own slot")
            .unwrap();

        assert_eq!(results, vec![json!([json!("cache-listener")])]);
        assert_eq!(
            journal.entries(),
            vec!["republisher template.updated", "cache-listener"]
        );

        let stats = bus.handler_statistics();
        let stats = &stats[&id];
        assert_eq!(stats.total_processed, 1);
        assert_eq!(stats.active_count, 0);

        // Outside a handler the same registration takes the sibling type as usual.
        let direct = bus.publish(Event::new(cached)).await.unwrap();
        assert_eq!(direct.len(), 2);
    }

    #[tokio::test]
    async fn test_handler_reemitting_its_own_type_completes() {
        let bus = fast_bus();
        let journal = Journal::new();
        let t = EventType::ConfigChanged;

        bus.register_handler(
            republisher(&bus, &journal, t.clone(), t.clone()),
            [t.clone()],
            HandlerOptions::default().max_concurrent(1),
        );

        let results = tokio::time::timeout(Duration::from_secs(2), bus.publish(Event::new(t)))
            .await
            .expect("re-emit must not wait on its own slot")
            .unwrap();

        assert_eq!(results, vec![json!([])]);
        assert_eq!(journal.len(), 1);
        assert_eq!(bus.event_history(None, None).len(), 2);
    }
}
