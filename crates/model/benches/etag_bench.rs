use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use model::{blueprint_etag, Blueprint, DatasetRef, Dimension};
use std::hint::black_box;

fn blueprint_with(dimensions: usize, options: usize) -> Blueprint {
    let dims = (0..dimensions)
        .map(|d| Dimension::new(format!("dim-{d}"), (0..options).map(|o| format!("opt-{o}"))))
        .collect();
    Blueprint::new("filter-bench", DatasetRef::new("cpih01", "time-series", 3), "inst", dims)
}

/// ETag computation runs once per write, so it scales with blueprint size.
fn bench_blueprint_etag(c: &mut Criterion) {
    let mut group = c.benchmark_group("blueprint_etag");

    for (dimensions, options) in [(1, 10), (5, 100), (10, 1000)] {
        let blueprint = blueprint_with(dimensions, options);
        group.throughput(Throughput::Elements((dimensions * options) as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{dimensions}x{options}")),
            &blueprint,
            |b, bp| b.iter(|| blueprint_etag(black_box(bp))),
        );
    }

    group.finish();
}

criterion_group!(benches, bench_blueprint_etag);
criterion_main!(benches);
