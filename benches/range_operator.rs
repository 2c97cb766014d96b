//! Range Operator Benchmarks
//!
//! Benchmarks for step-wise range-vector evaluation, measuring throughput
//! of incremental window selection, window functions and sharded execution.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use kuba_rangevec::query::{
    execute_sharded, window_function, ExecutionContext, ExecutorConfig, ParallelConfig,
    QueryResult, RangeVectorOperator, RangeVectorParams, SeriesSelector, VectorOperator,
};
use kuba_rangevec::storage::MemoryStorage;
use kuba_rangevec::types::{Labels, Point};
use std::hint::black_box;
use std::sync::Arc;

// =============================================================================
// Test Data Generators
// =============================================================================

const SCRAPE_INTERVAL_MS: i64 = 15_000;

/// Create a storage with `series_count` counters scraped every 15s
fn create_storage(series_count: usize, points_per_series: usize) -> Arc<MemoryStorage> {
    let storage = MemoryStorage::new();
    for s in 0..series_count {
        let labels = Labels::from_pairs([
            ("__name__", "http_requests_total".to_string()),
            ("instance", format!("host-{:04}", s)),
        ]);
        let points: Vec<Point> = (0..points_per_series)
            .map(|i| {
                Point::new(
                    i as i64 * SCRAPE_INTERVAL_MS,
                    (i * (s % 7 + 1)) as f64 + (i as f64 * 0.1).sin(),
                )
            })
            .collect();
        storage
            .append_points(labels, &points)
            .expect("strictly increasing timestamps");
    }
    Arc::new(storage)
}

fn drain(op: &mut dyn VectorOperator) -> usize {
    let mut ctx = ExecutionContext::new(&ExecutorConfig::default().with_max_samples(0));
    let mut samples = 0;
    while let Some(vector) = op.next(&mut ctx).expect("step") {
        samples += vector.len();
    }
    samples
}

// =============================================================================
// Benchmarks
// =============================================================================

/// Full range query over 1000 series, varying window length
fn bench_window_length(c: &mut Criterion) {
    let storage = create_storage(1000, 2000);
    let mut group = c.benchmark_group("range_operator/window_length");

    for range_minutes in [1i64, 5, 30, 120] {
        let params = RangeVectorParams::new(3_600_000, 28_800_000, 60_000)
            .with_range(range_minutes * 60_000);
        group.throughput(Throughput::Elements(params.step_count() as u64 * 1000));
        group.bench_with_input(
            BenchmarkId::new("rate", format!("{}m", range_minutes)),
            &params,
            |b, params| {
                b.iter(|| {
                    let selector = Arc::new(SeriesSelector::new(storage.clone(), vec![]));
                    let rate = window_function("rate", params.select_range).expect("rate");
                    let mut op = RangeVectorOperator::new(selector, rate, *params).expect("params");
                    black_box(drain(&mut op))
                })
            },
        );
    }
    group.finish();
}

/// Same query with different window functions
fn bench_functions(c: &mut Criterion) {
    let storage = create_storage(200, 2000);
    let params = RangeVectorParams::new(600_000, 28_800_000, 30_000).with_range(300_000);
    let mut group = c.benchmark_group("range_operator/function");
    group.throughput(Throughput::Elements(params.step_count() as u64 * 200));

    for func in ["rate", "sum_over_time", "avg_over_time", "stddev_over_time", "last_over_time"] {
        group.bench_function(func, |b| {
            b.iter(|| {
                let selector = Arc::new(SeriesSelector::new(storage.clone(), vec![]));
                let function = window_function(func, params.select_range).expect("function");
                let mut op = RangeVectorOperator::new(selector, function, params).expect("params");
                black_box(drain(&mut op))
            })
        });
    }
    group.finish();
}

/// Sharded execution with an increasing number of shards
fn bench_sharding(c: &mut Criterion) {
    let storage = create_storage(2000, 1000);
    let params = RangeVectorParams::new(600_000, 14_400_000, 60_000).with_range(300_000);
    let exec_config = ExecutorConfig::default().with_max_samples(0);
    let mut group = c.benchmark_group("range_operator/shards");
    group.sample_size(20);

    for shards in [1usize, 2, 4, 8] {
        group.bench_with_input(BenchmarkId::from_parameter(shards), &shards, |b, &shards| {
            b.iter(|| {
                let selector = Arc::new(SeriesSelector::new(storage.clone(), vec![]));
                let ctx = ExecutionContext::new(&exec_config);
                let result = execute_sharded(
                    &ParallelConfig::default().with_shards(shards),
                    &exec_config,
                    &ctx,
                    |shard, num_shards| -> QueryResult<Box<dyn VectorOperator>> {
                        let rate = window_function("rate", params.select_range).expect("rate");
                        Ok(Box::new(RangeVectorOperator::new(
                            selector.clone(),
                            rate,
                            params.with_shard(shard, num_shards),
                        )?))
                    },
                )
                .expect("query");
                black_box(result.sample_count())
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_window_length, bench_functions, bench_sharding);
criterion_main!(benches);
