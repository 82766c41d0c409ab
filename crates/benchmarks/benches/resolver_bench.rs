//! Benchmarks for conflict classification, policy lookup and bus fan-out

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dae_bus::{MessageBus, SubscriptionFilter};
use dae_core::{Decision, InboundEnvelope, SourceId};
use dae_policy::default_commerce;
use dae_resolver::ConflictResolver;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn resolver() -> ConflictResolver {
    ConflictResolver::new(
        Arc::new(default_commerce()),
        SourceId::new("arbitration"),
        Duration::from_millis(500),
        Duration::from_millis(5000),
        10_000,
    )
}

fn decision(source: &str, subject: &str, action: &str) -> Decision {
    Decision::new(source, subject, action, json!({ "new_price": 10 }), 5)
}

/// Benchmark the governing-rule lookup across the default policy
fn bench_policy_lookup(c: &mut Criterion) {
    let policy = default_commerce();
    let a = SourceId::new("pricing-adjuster");
    let b = SourceId::new("anomaly-detector");
    let gap_a = SourceId::new("authority");
    let gap_b = SourceId::new("anomaly-detector");

    let mut group = c.benchmark_group("PolicyLookup");
    group.bench_function("governing_rule", |bench| {
        bench.iter(|| black_box(policy.conflict_rule(&a, &b)));
    });
    group.bench_function("policy_gap", |bench| {
        bench.iter(|| black_box(policy.conflict_rule(&gap_a, &gap_b)));
    });
    group.finish();
}

/// Benchmark conflict classification paths
fn bench_classification(c: &mut Criterion) {
    let resolver = resolver();

    let contradiction_a = decision("resource-distributor", "s1", "reallocate");
    let contradiction_b = decision("authority", "s1", "redirect");

    let mut contention_a = decision("resource-distributor", "s2", "allocate");
    contention_a.payload = json!({ "exclusive_resource": "truck-1" });
    let mut contention_b = decision("authority", "s2", "allocate");
    contention_b.payload = json!({ "exclusive_resource": "truck-1" });

    let veto_a = decision("pricing-adjuster", "s3", "adjust_price");
    let veto_b = decision("authority", "s3", "reject");

    let mut group = c.benchmark_group("Classification");
    group.bench_function("contradiction", |bench| {
        bench.iter(|| black_box(resolver.classify(&contradiction_a, &contradiction_b)));
    });
    group.bench_function("resource_contention", |bench| {
        bench.iter(|| black_box(resolver.classify(&contention_a, &contention_b)));
    });
    group.bench_function("validation_failure", |bench| {
        bench.iter(|| black_box(resolver.classify(&veto_a, &veto_b)));
    });
    group.finish();
}

/// Benchmark registry registration across many subjects
fn bench_registry(c: &mut Criterion) {
    c.bench_function("register_across_subjects", |bench| {
        let resolver = resolver();
        let decisions: Vec<Decision> = (0..1024)
            .map(|i| decision("pricing-adjuster", &format!("subject-{i}"), "adjust_price"))
            .collect();
        let mut i = 0;
        bench.iter(|| {
            let d = decisions[i % decisions.len()].clone();
            i += 1;
            black_box(resolver.register(d))
        });
    });
}

/// Benchmark bus publication fan-out over subscriber counts
fn bench_bus_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("BusFanout");
    for subscribers in [1usize, 10, 100] {
        group.bench_with_input(
            BenchmarkId::new("publish", subscribers),
            &subscribers,
            |bench, &subscribers| {
                let bus = MessageBus::new(1024);
                let subs: Vec<_> = (0..subscribers)
                    .map(|i| bus.subscribe(format!("sub-{i}"), SubscriptionFilter::all()))
                    .collect();
                let envelope = InboundEnvelope::heartbeat("pricing-adjuster");
                bench.iter(|| {
                    bus.publish(black_box(envelope.clone()));
                    // Drain so queues never hit the eviction path.
                    for sub in &subs {
                        let _ = sub.try_recv();
                    }
                });
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_policy_lookup,
    bench_classification,
    bench_registry,
    bench_bus_fanout
);
criterion_main!(benches);
