//! # Telemetry Export
//!
//! Bus counters mirrored into the Prometheus registry.

#[cfg(test)]
mod tests {
    use crate::fixtures::{fast_bus, flaky, recording_async, Journal};
    use bus_telemetry::{gather_text, record_bus, register_metrics, EVENTS_PROCESSED};
    use event_bus::{Event, EventType, HandlerOptions};

    #[tokio::test]
    async fn test_status_report_reflects_bus() {
        register_metrics().unwrap();
        let bus = fast_bus();
        let journal = Journal::new();
        let t = EventType::custom("report.tick");

        bus.register_handler(
            recording_async(&journal, "ok"),
            [t.clone()],
            HandlerOptions::default(),
        );
        bus.register_handler(
            flaky(u32::MAX),
            [t.clone()],
            HandlerOptions::default()
                .retry_on_failure(false)
                .name("always-failing"),
        );

        for _ in 0..3 {
            bus.publish(Event::new(t.clone())).await.unwrap();
        }
        record_bus(&bus);

        assert_eq!(EVENTS_PROCESSED.get(), 3);
        let text = gather_text().unwrap();
        assert!(text.contains("bus_events_published_total 3"));
        assert!(text.contains("bus_handlers_registered_total 2"));
        assert!(text.contains("bus_handler_errors_total{handler=\"always-failing\"} 3"));
    }
}
