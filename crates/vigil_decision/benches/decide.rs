//! Decision engine throughput over growing option sets.
//!
//! Run: cargo bench -p vigil_decision --bench decide

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use vigil_decision::{DecisionConfig, DecisionContext, DecisionEngine, DecisionOption};

fn options(count: usize) -> Vec<DecisionOption> {
    (0..count)
        .map(|i| {
            let f = (i % 10) as f64 / 10.0;
            DecisionOption::new(format!("option-{i}"), "benchmark option")
                .with_outcome("revenue", f - 0.5)
                .with_outcome("efficiency", 0.5 - f / 2.0)
                .with_resource("cpu", 5.0 + f * 20.0)
                .with_risk(f)
                .with_confidence(1.0 - f / 2.0)
                .with_complexity(f)
        })
        .collect()
}

fn bench_decide(c: &mut Criterion) {
    let mut group = c.benchmark_group("decision/decide");
    let context = DecisionContext::new()
        .with_health_factor("overall_health", 0.8)
        .with_resource("cpu", 60.0);

    for &count in &[2usize, 16, 128] {
        let engine = DecisionEngine::new(DecisionConfig::default().with_history_capacity(16));
        let candidates = options(count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &candidates, |b, candidates| {
            b.iter(|| engine.decide(&context, candidates.clone()));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_decide);
criterion_main!(benches);
