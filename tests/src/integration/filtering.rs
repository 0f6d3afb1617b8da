//! # Filtering
//!
//! Per-registration filters select handlers; global filters gate the whole
//! publish. Filters that error or panic fail closed.

#[cfg(test)]
mod tests {
    use crate::fixtures::{fast_bus, recording_async, recording_sync, Journal};
    use event_bus::filters::{all_of, correlation_filter, priority_filter, tag_filter};
    use event_bus::{Event, EventPriority, EventType, Filter, HandlerOptions};

    #[tokio::test]
    async fn test_tag_filter_selects_events() {
        let bus = fast_bus();
        let journal = Journal::new();
        let t = EventType::HandlerRegistered;

        bus.register_handler(
            recording_async(&journal, "important"),
            [t.clone()],
            HandlerOptions::default().filter(tag_filter(["important"])),
        );

        let skipped = bus
            .publish(Event::new(t.clone()).with_tags(["normal"]))
            .await
            .unwrap();
        let handled = bus
            .publish(Event::new(t).with_tags(["important", "extra"]))
            .await
            .unwrap();

        assert!(skipped.is_empty());
        assert_eq!(handled.len(), 1);
        assert_eq!(journal.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_filters_on_one_registration_are_anded() {
        let bus = fast_bus();
        let journal = Journal::new();
        let t = EventType::CommandFailed;

        bus.register_handler(
            recording_sync(&journal, "urgent-request"),
            [t.clone()],
            HandlerOptions::default()
                .filter(priority_filter(EventPriority::High))
                .filter(correlation_filter("req-7")),
        );

        bus.publish(Event::new(t.clone()).with_priority(EventPriority::Critical))
            .await
            .unwrap();
        bus.publish(
            Event::new(t.clone())
                .with_priority(EventPriority::Low)
                .with_correlation_id("req-7"),
        )
        .await
        .unwrap();
        bus.publish(
            Event::new(t)
                .with_priority(EventPriority::High)
                .with_correlation_id("req-7"),
        )
        .await
        .unwrap();

        assert_eq!(journal.entries(), vec!["urgent-request"]);
    }

    #[tokio::test]
    async fn test_failing_filter_excludes_only_its_handler() {
        let bus = fast_bus();
        let journal = Journal::new();
        let t = EventType::TemplateDeleted;

        let broken = Filter::try_new("broken", |_| Err("lookup unavailable".to_string()));
        let panicking = Filter::new("panicking", |_| panic!("predicate bug"));

        bus.register_handler(
            recording_async(&journal, "guarded"),
            [t.clone()],
            HandlerOptions::default().filter(all_of(vec![broken])),
        );
        bus.register_handler(
            recording_async(&journal, "panicky"),
            [t.clone()],
            HandlerOptions::default().filter(panicking),
        );
        bus.register_handler(
            recording_async(&journal, "open"),
            [t.clone()],
            HandlerOptions::default(),
        );

        let results = bus.publish(Event::new(t)).await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(journal.entries(), vec!["open"]);
    }

    #[tokio::test]
    async fn test_global_filter_gates_every_type() {
        let bus = fast_bus();
        let journal = Journal::new();

        bus.register_handler(
            recording_async(&journal, "any"),
            [EventType::ConfigLoaded, EventType::TemplateRendered],
            HandlerOptions::default(),
        );
        let only_tagged = tag_filter(["audited"]);
        bus.add_global_filter(only_tagged.clone());

        bus.publish(Event::new(EventType::ConfigLoaded)).await.unwrap();
        bus.publish(Event::new(EventType::TemplateRendered)).await.unwrap();
        assert!(journal.is_empty());
        assert!(bus.event_history(None, None).is_empty());
        assert_eq!(bus.metrics().events_published, 2);

        bus.publish(Event::new(EventType::TemplateRendered).with_tags(["audited"]))
            .await
            .unwrap();
        assert_eq!(journal.len(), 1);

        assert!(bus.remove_global_filter(&only_tagged));
        bus.publish(Event::new(EventType::ConfigLoaded)).await.unwrap();
        assert_eq!(journal.len(), 2);
    }
}
