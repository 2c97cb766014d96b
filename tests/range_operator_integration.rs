//! Range Operator Integration Tests
//!
//! End-to-end tests driving range-vector and instant-vector operators through
//! the executor against in-memory storage loaded with `load` notation.

use kuba_rangevec::config::Config;
use kuba_rangevec::error::StorageError;
use kuba_rangevec::query::{
    execute_sharded, window_function, CancelHandle, ExecutionContext, ExecutorConfig,
    LabelMatcher, ParallelConfig, QueryErrorKind, QueryExecutor, QueryResult, RangeVectorOperator,
    RangeVectorParams, SeriesSelector, SeriesSource, ShardSeries, VectorOperator, VectorSelector,
    WindowFunction,
};
use kuba_rangevec::storage::{load, MemoryStorage, SampleIterator};
use kuba_rangevec::types::{Labels, Point};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// =============================================================================
// Helpers
// =============================================================================

const REQUESTS: &str = r#"
    load 30s
        http_requests_total{job="api", instance="0"} 0+30x40
        http_requests_total{job="api", instance="1"} 0+60x40
        http_requests_total{job="web", instance="0"} 0+15x20 0+15x19
        http_requests_total{job="batch", instance="0"} 0 _x20 stale 5+5x18
        node_load1{instance="0"} 1 2 3 4 5 4 3 2 1
"#;

fn storage() -> Arc<MemoryStorage> {
    Arc::new(load(REQUESTS).expect("load"))
}

fn selector(storage: Arc<MemoryStorage>, matchers: Vec<LabelMatcher>) -> Arc<SeriesSelector> {
    Arc::new(SeriesSelector::new(storage, matchers))
}

fn range_op(
    source: Arc<dyn SeriesSource>,
    func: &str,
    params: RangeVectorParams,
) -> RangeVectorOperator {
    let function = window_function(func, params.select_range).expect("known function");
    RangeVectorOperator::new(source, function, params).expect("valid params")
}

fn requests() -> Vec<LabelMatcher> {
    vec![LabelMatcher::equal("__name__", "http_requests_total")]
}

fn run(op: &mut dyn VectorOperator) -> QueryResult<Vec<(i64, Vec<(Labels, f64)>)>> {
    let mut executor = QueryExecutor::new();
    let mut ctx = executor.context();
    let result = executor.execute_range(op, &mut ctx)?;
    Ok(result
        .steps
        .into_iter()
        .map(|step| {
            let samples = step
                .samples
                .into_iter()
                .map(|s| (s.labels, s.point.value))
                .collect();
            (step.timestamp, samples)
        })
        .collect())
}

// =============================================================================
// Selector Scenarios
// =============================================================================

#[test]
fn test_vector_selector_scenarios() {
    for (interval, expected) in [
        ("30s", [0.0, 10.0, 1000.0]),
        ("29s", [0.0, 10.0, 1000.0]),
        ("31s", [0.0, 1.0, 100.0]),
    ] {
        let storage = Arc::new(load(&format!("load {}\n  bar 0 1 10 100 1000", interval)).unwrap());
        let params = RangeVectorParams::new(0, 120_000, 60_000);
        let mut op = VectorSelector::new(selector(storage, vec![]), params, 300_000).unwrap();

        let steps = run(&mut op).unwrap();
        let got: Vec<(i64, f64)> = steps.iter().map(|(t, s)| (*t, s[0].1)).collect();
        assert_eq!(
            got,
            vec![(0, expected[0]), (60_000, expected[1]), (120_000, expected[2])],
            "interval {}",
            interval
        );
    }
}

#[test]
fn test_rate_per_series() {
    let params = RangeVectorParams::new(300_000, 600_000, 60_000).with_range(120_000);
    let mut op = range_op(selector(storage(), requests()), "rate", params);

    let steps = run(&mut op).unwrap();
    assert_eq!(steps.len(), 6);
    for (_, samples) in &steps {
        for (labels, value) in samples {
            let expected = match (labels.get("job"), labels.get("instance")) {
                (Some("api"), Some("0")) => 1.0,
                (Some("api"), Some("1")) => 2.0,
                (Some("web"), _) => 0.5,
                (Some("batch"), _) => continue,
                _ => panic!("unexpected series {}", labels),
            };
            assert!((value - expected).abs() < 1e-9, "{} = {}", labels, value);
        }
    }
}

#[test]
fn test_counter_reset_handled_by_increase() {
    // job="web" climbs to 300 at 600s and restarts from 0 at 630s
    let params = RangeVectorParams::instant(660_000).with_range(120_000);
    let matchers = vec![LabelMatcher::equal("job", "web")];
    let mut op = range_op(selector(storage(), matchers), "increase", params);

    let steps = run(&mut op).unwrap();
    let (_, samples) = &steps[0];
    assert_eq!(samples.len(), 1);
    // 270 -> 285 -> 300 -> reset -> 0 -> 15
    assert!((samples[0].1 - 45.0).abs() < 1e-9);
}

#[test]
fn test_regex_matcher_and_over_time() {
    let params = RangeVectorParams::new(0, 240_000, 120_000).with_range(120_000);
    let matchers = vec![
        LabelMatcher::regex("__name__", "node_.*").unwrap(),
        LabelMatcher::not_equal("instance", "1"),
    ];
    let mut op = range_op(selector(storage(), matchers), "max_over_time", params);

    let got: Vec<(i64, f64)> = run(&mut op)
        .unwrap()
        .into_iter()
        .map(|(t, s)| (t, s[0].1))
        .collect();
    assert_eq!(got, vec![(0, 1.0), (120_000, 5.0), (240_000, 5.0)]);
}

#[test]
fn test_stale_marker_never_selected() {
    // job="batch" has a stale marker at 630s
    let params = RangeVectorParams::new(600_000, 690_000, 30_000).with_range(60_000);
    let matchers = vec![LabelMatcher::equal("job", "batch")];
    let mut op = range_op(selector(storage(), matchers), "count_over_time", params);

    let counts: Vec<(i64, usize)> = run(&mut op)
        .unwrap()
        .into_iter()
        .map(|(t, s)| (t, s.first().map_or(0, |(_, v)| *v as usize)))
        .collect();
    assert_eq!(
        counts,
        vec![(600_000, 0), (630_000, 0), (660_000, 1), (690_000, 2)]
    );
}

#[test]
fn test_matrix_output() {
    let params = RangeVectorParams::new(60_000, 180_000, 60_000).with_range(60_000);
    let matchers = vec![LabelMatcher::equal("job", "api")];
    let mut op = range_op(selector(storage(), matchers), "last_over_time", params);

    let mut executor = QueryExecutor::new();
    let mut ctx = executor.context();
    let matrix = executor.execute_range(&mut op, &mut ctx).unwrap().into_matrix();

    assert_eq!(matrix.len(), 2);
    assert_eq!(matrix[0].labels.get("instance"), Some("0"));
    assert_eq!(
        matrix[0].points,
        vec![
            Point::new(60_000, 60.0),
            Point::new(120_000, 120.0),
            Point::new(180_000, 180.0)
        ]
    );
    assert_eq!(executor.stats().steps_evaluated, 3);
    assert_eq!(executor.stats().samples_returned, 6);
}

// =============================================================================
// Lifecycle and Failure Handling
// =============================================================================

#[test]
fn test_exhaustion_is_idempotent() {
    let params = RangeVectorParams::new(0, 60_000, 30_000).with_range(30_000);
    let mut op = range_op(selector(storage(), requests()), "sum_over_time", params);
    let mut ctx = ExecutionContext::new(&ExecutorConfig::default());

    let mut steps = 0;
    while op.next(&mut ctx).unwrap().is_some() {
        steps += 1;
    }
    assert_eq!(steps, 3);
    assert!(op.is_exhausted());
    for _ in 0..5 {
        assert!(op.next(&mut ctx).unwrap().is_none());
    }
}

#[test]
fn test_lazy_initialization_runs_once() {
    struct CountingSource {
        inner: Arc<SeriesSelector>,
        calls: AtomicUsize,
    }

    impl SeriesSource for CountingSource {
        fn resolve(&self, shard: usize, num_shards: usize) -> Result<Vec<ShardSeries>, StorageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.resolve(shard, num_shards)
        }
    }

    let source = Arc::new(CountingSource {
        inner: selector(storage(), requests()),
        calls: AtomicUsize::new(0),
    });
    let params = RangeVectorParams::new(0, 600_000, 15_000).with_range(60_000);
    let mut op = range_op(source.clone(), "rate", params);

    // Nothing is resolved before the first pull
    assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    run(&mut op).unwrap();
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    assert_eq!(op.series_count(), Some(4));
}

#[test]
fn test_resolution_failure_is_fatal() {
    struct Unavailable;

    impl SeriesSource for Unavailable {
        fn resolve(&self, _: usize, _: usize) -> Result<Vec<ShardSeries>, StorageError> {
            Err(StorageError::SeriesResolution("index offline".into()))
        }
    }

    let mut op = range_op(Arc::new(Unavailable), "rate", RangeVectorParams::new(0, 10, 1));
    let mut ctx = ExecutionContext::new(&ExecutorConfig::default());

    for _ in 0..3 {
        let err = op.next(&mut ctx).unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::SeriesResolution);
        assert!(err.message.contains("index offline"));
    }
}

#[test]
fn test_storage_iteration_failure_surfaces() {
    struct CorruptIterator(i64);

    impl SampleIterator for CorruptIterator {
        fn next(&mut self) -> Result<Option<Point>, StorageError> {
            self.0 += 1_000;
            if self.0 > 5_000 {
                return Err(StorageError::InvalidData("bad xor block".into()));
            }
            Ok(Some(Point::new(self.0, 1.0)))
        }

        fn seek(&mut self, t: i64) -> Result<Option<Point>, StorageError> {
            while self.0 < t {
                self.next()?;
            }
            Ok(Some(Point::new(self.0, 1.0)))
        }
    }

    struct CorruptSource;

    impl SeriesSource for CorruptSource {
        fn resolve(&self, _: usize, _: usize) -> Result<Vec<ShardSeries>, StorageError> {
            Ok(vec![(
                Labels::from_pairs([("__name__", "corrupt")]),
                Box::new(CorruptIterator(0)),
            )])
        }
    }

    let params = RangeVectorParams::new(1_000, 10_000, 1_000).with_range(2_000);
    let mut op = range_op(Arc::new(CorruptSource), "count_over_time", params);

    let err = run(&mut op).unwrap_err();
    assert_eq!(err.kind, QueryErrorKind::Storage);
    assert!(err.message.contains("bad xor block"));
}

/// Window function that cancels the query the first time it is called
#[derive(Debug)]
struct CancelOnCall(CancelHandle);

impl WindowFunction for CancelOnCall {
    fn name(&self) -> &'static str {
        "cancel_on_call"
    }

    fn call(&self, points: &[Point], eval_time: i64) -> Option<Point> {
        self.0.cancel();
        points.last().map(|p| Point::new(eval_time, p.value))
    }
}

#[test]
fn test_cancellation_inside_series_loop() {
    let mut ctx = ExecutionContext::new(&ExecutorConfig::default());
    let params = RangeVectorParams::new(0, 600_000, 60_000).with_range(60_000);
    let mut op = RangeVectorOperator::new(
        selector(storage(), requests()),
        Arc::new(CancelOnCall(ctx.cancel_handle())),
        params,
    )
    .unwrap();

    let err = op.next(&mut ctx).unwrap_err();
    assert_eq!(err.kind, QueryErrorKind::Cancelled);
    assert!(err.is_interrupt());
    // The aborted operator does not resume
    assert_eq!(op.next(&mut ctx).unwrap_err().kind, QueryErrorKind::Cancelled);
}

#[test]
fn test_sample_limit_from_config() {
    let config = Config::from_toml("[query]\nmax_samples = 8").unwrap();
    let exec_config = ExecutorConfig::from(&config.query);
    let params = RangeVectorParams::new(0, 300_000, 60_000).with_range(60_000);
    let mut op = range_op(selector(storage(), requests()), "sum_over_time", params);

    let mut executor = QueryExecutor::with_config(exec_config);
    let mut ctx = executor.context();
    let err = executor.execute_range(&mut op, &mut ctx).unwrap_err();
    assert_eq!(err.kind, QueryErrorKind::ResourceLimit);
    assert_eq!(executor.stats().failed_queries, 1);
}

// =============================================================================
// Sharded Execution
// =============================================================================

#[test]
fn test_sharded_matches_unsharded() {
    let storage = storage();
    let params = RangeVectorParams::new(0, 1_200_000, 45_000).with_range(150_000);
    let exec_config = ExecutorConfig::default();

    let mut single = range_op(selector(storage.clone(), requests()), "increase", params);
    let mut executor = QueryExecutor::new();
    let mut ctx = executor.context();
    let expected = executor.execute_range(&mut single, &mut ctx).unwrap();

    for shards in 1..=6 {
        let shared = selector(storage.clone(), requests());
        let ctx = ExecutionContext::new(&exec_config);
        let got = execute_sharded(
            &ParallelConfig::default().with_shards(shards),
            &exec_config,
            &ctx,
            |shard, num_shards| -> QueryResult<Box<dyn VectorOperator>> {
                Ok(Box::new(range_op(
                    shared.clone(),
                    "increase",
                    params.with_shard(shard, num_shards),
                )))
            },
        )
        .unwrap();
        assert_eq!(got, expected, "{} shards", shards);
        assert!(shared.is_resolved());
    }
}

#[test]
fn test_metrics_exported() {
    let params = RangeVectorParams::new(0, 120_000, 60_000).with_range(60_000);
    let mut op = range_op(selector(storage(), requests()), "rate", params);
    run(&mut op).unwrap();

    let text = kuba_rangevec::metrics::gather_metrics().unwrap();
    assert!(text.contains("rangevec_steps_total"));
    assert!(text.contains("rangevec_points_selected_total"));
    assert!(text.contains("rangevec_series_initialized_total"));
}
