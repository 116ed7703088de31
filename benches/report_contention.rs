//! Reporting gate benchmarks.
//!
//! The interesting number is the cost of a call that does not report: the
//! throttled and contended paths sit on every bundle.

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use throttled_telemetry::{
    ManualClock, MetricName, MetricRegistry, MetricsContainer, ReportingGate,
    REQUEST_LATENCY_BUCKETS,
};

fn populated_container() -> MetricsContainer {
    let container = MetricsContainer::new();
    for i in 0..16 {
        container
            .counter(&MetricName::new("user:elements").with_label("step", format!("s{i}")))
            .increment(i);
    }
    if let Ok(histogram) = container.histogram(
        &MetricName::new("io:latency").with_label("service", "storage"),
        REQUEST_LATENCY_BUCKETS,
    ) {
        for v in 0..1_000 {
            histogram.update(v as f64);
        }
    }
    container
}

fn bench_throttled_call(c: &mut Criterion) {
    let clock = Arc::new(ManualClock::new(0));
    let gate = ReportingGate::with_clock(Arc::new(|_: &str| {}), clock);
    let container = populated_container();

    c.bench_function("try_report_throttled", |b| {
        b.iter(|| {
            black_box(gate.try_report(
                &container,
                "Metrics:\n",
                "",
                "",
                Duration::from_secs(60),
                false,
            ))
        })
    });
}

fn bench_reporting_call(c: &mut Criterion) {
    let clock = Arc::new(ManualClock::new(0));
    let gate = ReportingGate::with_clock(Arc::new(|line: &str| {
        black_box(line.len());
    }), Arc::clone(&clock));
    let container = populated_container();

    c.bench_function("try_report_emits", |b| {
        b.iter(|| {
            clock.advance(1);
            black_box(gate.try_report(&container, "Metrics:\n", "", "", Duration::ZERO, false))
        })
    });
}

criterion_group!(benches, bench_throttled_call, bench_reporting_call);
criterion_main!(benches);
