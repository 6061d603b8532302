use std::hint::black_box;
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use parking_lot::{Mutex, RwLock};

use logjam_metrics::{
    Collector, EventKind, MetricEvent, Options, Props, Resources, StreamDefinition, classify,
};

fn collector(resources: Resources) -> Collector {
    let stream = StreamDefinition {
        app: "a".to_owned(),
        env: "b".to_owned(),
        ignored_request_uri: Some("/_".to_owned()),
        ..Default::default()
    };
    let options = Options {
        datacenters: vec!["a".to_owned(), "b".to_owned()],
        clean_after: 60,
        resources,
        ..Default::default()
    };

    Collector::new(stream.app_env().unwrap(), &stream, Arc::new(options))
}

fn event(action: &str) -> MetricEvent {
    let props = Props::from_map([
        ("app", "a"),
        ("env", "b"),
        ("metric", "http"),
        ("code", "200"),
        ("method", "GET"),
        ("cluster", "c"),
        ("dc", "d"),
        ("action", action),
    ]);

    let mut event = MetricEvent::new(EventKind::Log, props, 5.7);
    event.time_metrics.insert("db_time".to_owned(), 1.45);
    event.counter_metrics.insert("db_calls".to_owned(), 1.0);
    event
}

/// Uncontended lock round trips, to compare against the cost of recording.
fn bench_locking(c: &mut Criterion) {
    let mut group = c.benchmark_group("locking");

    let mutex = Mutex::new(0u64);
    group.bench_function("mutex", |b| {
        b.iter(|| {
            let mut value = mutex.lock();
            *value = black_box(*value + 1);
        })
    });

    let rwlock = RwLock::new(0u64);
    group.bench_function("rwlock_read", |b| b.iter(|| black_box(*rwlock.read() + 1)));

    group.finish();
}

fn bench_record(c: &mut Criterion) {
    let mut group = c.benchmark_group("record");

    let plain = collector(Resources::default());
    let event_without_resources = MetricEvent {
        time_metrics: Default::default(),
        counter_metrics: Default::default(),
        ..event("murks")
    };
    group.bench_function("existing_series", |b| {
        b.iter(|| plain.record(black_box(&event_without_resources)))
    });

    let with_resources = collector(Resources {
        time_resources: ["db_time".to_owned()].into(),
        call_resources: ["db_calls".to_owned()].into(),
    });
    let event_with_resources = event("murks");
    group.bench_function("existing_series_with_resources", |b| {
        b.iter(|| with_resources.record(black_box(&event_with_resources)))
    });

    for actions in [10, 1000] {
        let many = collector(Resources::default());
        let events: Vec<_> = (0..actions).map(|i| event(&format!("C#a{i}"))).collect();
        group.bench_with_input(BenchmarkId::new("actions", actions), &events, |b, events| {
            let mut i = 0;
            b.iter(|| {
                i = (i + 1) % events.len();
                many.record(&events[i])
            })
        });
    }

    group.finish();
}

fn bench_classify(c: &mut Criterion) {
    c.bench_function("classify", |b| {
        b.iter(|| classify(black_box("logjam:action:db_time_distribution_seconds")))
    });
}

criterion_group!(benches, bench_locking, bench_record, bench_classify);
criterion_main!(benches);
