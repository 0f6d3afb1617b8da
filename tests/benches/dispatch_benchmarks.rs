//! # Event Bus Dispatch Benchmarks
//!
//! | Scenario | What it measures |
//! |----------|------------------|
//! | fan-out | One event, N async handlers in one priority group |
//! | priority groups | One event, one handler per priority level |
//! | sync pool | One event, N sync handlers on the worker pool |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use event_bus::{Event, EventBus, EventPriority, EventType, Handler, HandlerOptions};
use serde_json::json;
use std::time::Duration;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("runtime")
}

fn bench_fan_out(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("fan-out");
    group.measurement_time(Duration::from_secs(5));

    for handlers in [1usize, 10, 100] {
        let bus = EventBus::with_defaults();
        let t = EventType::custom("bench.fan_out");
        for _ in 0..handlers {
            bus.register_handler(
                Handler::from_async(|_| async { Ok(json!(1)) }),
                [t.clone()],
                HandlerOptions::default().max_concurrent(64),
            );
        }

        group.throughput(Throughput::Elements(handlers as u64));
        group.bench_with_input(BenchmarkId::from_parameter(handlers), &handlers, |b, _| {
            b.iter(|| {
                let results = rt.block_on(bus.publish(Event::new(t.clone()))).expect("publish");
                black_box(results)
            })
        });
    }
    group.finish();
}

fn bench_priority_groups(c: &mut Criterion) {
    let rt = runtime();
    let bus = EventBus::with_defaults();
    let t = EventType::custom("bench.priorities");
    for priority in EventPriority::ALL {
        bus.register_handler(
            Handler::from_async(|_| async { Ok(json!(null)) }),
            [t.clone()],
            HandlerOptions::default().priority(priority),
        );
    }

    c.bench_function("priority-groups", |b| {
        b.iter(|| black_box(rt.block_on(bus.publish(Event::new(t.clone())))))
    });
}

fn bench_sync_pool(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("sync-pool");

    for handlers in [1usize, 10] {
        let bus = EventBus::with_defaults();
        let t = EventType::custom("bench.sync");
        for _ in 0..handlers {
            bus.register_handler(
                Handler::sync(|event| Ok(json!(event.payload().len()))),
                [t.clone()],
                HandlerOptions::default(),
            );
        }

        group.bench_with_input(BenchmarkId::from_parameter(handlers), &handlers, |b, _| {
            b.iter(|| black_box(rt.block_on(bus.publish(Event::new(t.clone())))))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_fan_out, bench_priority_groups, bench_sync_pool);
criterion_main!(benches);
