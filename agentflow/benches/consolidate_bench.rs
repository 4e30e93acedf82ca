//! Benchmarks for consolidation and batch formatting.

use agentflow::consolidate::Consolidator;
use agentflow::workflows::leads::format_leads;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::{json, Value};

fn analyses(n: usize) -> Vec<Value> {
    (0..n)
        .map(|i| {
            #[allow(clippy::cast_precision_loss)]
            let x = (i % 97) as f64 / 97.0;
            json!({
                "name": format!("company-{i}"),
                "is_valid": i % 10 != 0,
                "validation_score": x,
                "match_score": 1.0 - x,
                "recommendation_score": (x * 3.0) % 1.0,
            })
        })
        .collect()
}

fn consolidate_benchmark(c: &mut Criterion) {
    let consolidator = Consolidator::default();
    let mut group = c.benchmark_group("consolidate");
    for size in [100, 1_000, 10_000] {
        let batch = analyses(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &batch, |b, batch| {
            b.iter(|| consolidator.consolidate(black_box(batch.clone())));
        });
    }
    group.finish();
}

fn format_benchmark(c: &mut Criterion) {
    let raw: Vec<Value> = (0..5_000)
        .map(|i| json!({ "name": format!("Company {}", i % 4_000), "industry": "software" }))
        .collect();
    let patterns = vec!["p1".to_string(), "p2".to_string(), "p3".to_string()];

    c.bench_function("format_leads_5000", |b| {
        b.iter(|| format_leads(black_box(&raw), &patterns));
    });
}

criterion_group!(benches, consolidate_benchmark, format_benchmark);
criterion_main!(benches);
