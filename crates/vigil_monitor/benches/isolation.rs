//! Isolation forest fit and score cost at the detector's slice sizes.
//!
//! Run: cargo bench -p vigil_monitor --bench isolation

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use vigil_monitor::{ForestConfig, IsolationForest};
use vigil_monitor::isolation::standardize;

fn series(len: usize) -> Vec<f64> {
    (0..len)
        .map(|i| 50.0 + ((i * 37) % 11) as f64 + if i % 97 == 0 { 400.0 } else { 0.0 })
        .collect()
}

fn bench_fit_predict(c: &mut Criterion) {
    let mut group = c.benchmark_group("isolation/fit_predict");
    group.sample_size(20);
    let config = ForestConfig::default();

    for &len in &[50usize, 256, 1_000] {
        let data = standardize(&series(len));
        group.bench_with_input(BenchmarkId::from_parameter(len), &data, |b, data| {
            b.iter(|| IsolationForest::fit_predict(data, &config));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_fit_predict);
criterion_main!(benches);
