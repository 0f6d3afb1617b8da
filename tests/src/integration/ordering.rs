//! # Priority Ordering
//!
//! Priority groups run strictly in order; handlers within a group run
//! concurrently.

#[cfg(test)]
mod tests {
    use crate::fixtures::{fast_bus, recording_async, recording_sync, Journal};
    use event_bus::filters::tag_filter;
    use event_bus::{Event, EventPriority, EventType, Handler, HandlerOptions};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_groups_run_in_priority_order_regardless_of_registration() {
        let bus = fast_bus();
        let journal = Journal::new();
        let t = EventType::TemplateCreated;

        bus.register_handler(
            recording_sync(&journal, "normal"),
            [t.clone()],
            HandlerOptions::default(),
        );
        bus.register_handler(
            recording_async(&journal, "high"),
            [t.clone()],
            HandlerOptions::default().priority(EventPriority::High),
        );
        bus.register_handler(
            recording_sync(&journal, "critical"),
            [t.clone()],
            HandlerOptions::default().priority(EventPriority::Critical),
        );

        bus.publish(Event::new(t)).await.unwrap();

        assert_eq!(journal.entries(), vec!["critical", "high", "normal"]);
    }

    /// A slow high-priority handler still finishes before any normal one starts.
    #[tokio::test(flavor = "multi_thread")]
    async fn test_lower_group_waits_for_slow_higher_group() {
        let bus = fast_bus();
        let journal = Journal::new();
        let t = EventType::CommandStarted;

        let slow = {
            let journal = journal.clone();
            Handler::from_async(move |_| {
                let journal = journal.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    journal.record("slow-high");
                    Ok(json!(null))
                }
            })
        };
        bus.register_handler(
            slow,
            [t.clone()],
            HandlerOptions::default().priority(EventPriority::High),
        );
        bus.register_handler(
            recording_sync(&journal, "normal"),
            [t.clone()],
            HandlerOptions::default(),
        );

        bus.publish(Event::new(t)).await.unwrap();

        assert_eq!(journal.entries(), vec!["slow-high", "normal"]);
    }

    /// Two handlers sleeping 100ms in the same group overlap.
    #[tokio::test(flavor = "multi_thread")]
    async fn test_same_group_runs_concurrently() {
        let bus = fast_bus();
        let t = EventType::custom("batch.ready");
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            bus.register_handler(
                Handler::from_async(move |_| {
                    let in_flight = Arc::clone(&in_flight);
                    let peak = Arc::clone(&peak);
                    async move {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        Ok(json!(null))
                    }
                }),
                [t.clone()],
                HandlerOptions::default(),
            );
        }

        let results = bus.publish(Event::new(t)).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    /// Normal sync handler A, High async handler B with tag filter {"x"}.
    #[tokio::test(flavor = "multi_thread")]
    async fn test_config_changed_scenario() {
        let bus = fast_bus();
        let journal = Journal::new();
        let t = EventType::ConfigChanged;

        bus.register_handler(
            recording_sync(&journal, "A"),
            [t.clone()],
            HandlerOptions::default(),
        );
        bus.register_handler(
            recording_async(&journal, "B"),
            [t.clone()],
            HandlerOptions::default()
                .priority(EventPriority::High)
                .filter(tag_filter(["x"])),
        );

        let results = bus.publish(Event::new(t).with_tags(["x"])).await.unwrap();

        assert_eq!(journal.entries(), vec!["B", "A"]);
        assert_eq!(results, vec![json!("B"), json!("A")]);

        let metrics = bus.metrics();
        assert_eq!(metrics.events_processed, 1);
        assert_eq!(metrics.events_failed, 0);
        assert_eq!(metrics.events_published, 1);
        assert_eq!(metrics.handlers_registered, 2);
    }
}
