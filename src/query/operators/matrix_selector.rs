//! Range-vector operator
//!
//! Evaluates a window function over a trailing window of every series in a
//! shard, one evaluation step per pull.
//!
//! # Incremental windows
//!
//! Consecutive windows of a range query usually overlap:
//!
//! ```text
//!   step k      [mint_k ─────────────── maxt_k]
//!   step k+1               [mint_k+1 ─────────────── maxt_k+1]
//!                          └─ carried over ─┘└ scanned ┘
//! ```
//!
//! Each series keeps the points selected for its last successful step. The
//! next window drops the carried points that fell out on the left and only
//! reads samples newer than the last carried point from storage. The result is
//! identical to scanning `[mint, maxt]` from scratch.
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized ──first step──► Running ──error──► Failed (sticky)
//!       │
//!       └──resolution error──► Failed (sticky)
//! ```
//!
//! Exhaustion is read off the step clock and is reported before any
//! initialization or cancellation check, so it never errors.

use crate::error::StorageError;
use crate::metrics;
use crate::query::error::{QueryError, QueryResult};
use crate::query::executor::{ExecutionContext, ExecutorConfig};
use crate::query::functions::WindowFunction;
use crate::query::operators::VectorOperator;
use crate::query::series_selector::SeriesSource;
use crate::storage::{BufferedSeriesIterator, SelectHints};
use crate::types::{InstantVector, Labels, Point, Sample};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace, warn};

const OPERATOR_NAME: &str = "range_vector";

// ============================================================================
// Parameters
// ============================================================================

/// Evaluation parameters fixed for an operator's lifetime
///
/// All times are in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeVectorParams {
    /// First evaluation timestamp
    pub start: i64,
    /// Last evaluation timestamp (inclusive)
    pub end: i64,
    /// Distance between evaluation timestamps
    pub step: i64,
    /// Window length looking back from each evaluation timestamp
    pub select_range: i64,
    /// Shard index of this operator
    pub shard: usize,
    /// Total number of shards
    pub num_shards: usize,
}

impl RangeVectorParams {
    /// Parameters for a single-shard query with an empty window
    pub fn new(start: i64, end: i64, step: i64) -> Self {
        Self {
            start,
            end,
            step,
            select_range: 0,
            shard: 0,
            num_shards: 1,
        }
    }

    /// Parameters evaluating exactly one timestamp
    pub fn instant(time: i64) -> Self {
        Self::new(time, time, 1)
    }

    /// Set the window length
    pub fn with_range(mut self, select_range: i64) -> Self {
        self.select_range = select_range;
        self
    }

    /// Evaluate shard `shard` of `num_shards`
    pub fn with_shard(mut self, shard: usize, num_shards: usize) -> Self {
        self.shard = shard;
        self.num_shards = num_shards;
        self
    }

    /// Check parameter consistency
    pub fn validate(&self) -> QueryResult<()> {
        if self.step <= 0 {
            return Err(QueryError::validation(format!(
                "Step must be positive, got {}",
                self.step
            )));
        }
        if self.start > self.end {
            return Err(QueryError::validation(format!(
                "Start {} is after end {}",
                self.start, self.end
            )));
        }
        if self.select_range < 0 {
            return Err(QueryError::validation(format!(
                "Range must not be negative, got {}",
                self.select_range
            )));
        }
        if self.num_shards == 0 || self.shard >= self.num_shards {
            return Err(QueryError::validation(format!(
                "Shard {} out of range for {} shards",
                self.shard, self.num_shards
            )));
        }
        Ok(())
    }

    /// Number of evaluation steps
    pub fn step_count(&self) -> usize {
        if self.step <= 0 || self.start > self.end {
            return 0;
        }
        ((self.end as i128 - self.start as i128) / self.step as i128 + 1) as usize
    }

    /// Storage hints covering every sample any window can reach
    pub fn select_hints(&self) -> SelectHints {
        SelectHints::for_range_query(self.start, self.end, self.step, self.select_range)
    }
}

// ============================================================================
// Window Selection
// ============================================================================

/// Select the non-stale points of `[mint, maxt]`, reusing `previous`
///
/// `previous` is the selection of an earlier window over the same iterator.
/// Points still inside the new window are kept; only newer samples are read
/// from `it`. Returns the selection, built in the allocation of `previous`.
pub fn select_points(
    it: &mut BufferedSeriesIterator,
    mint: i64,
    maxt: i64,
    mut previous: Vec<Point>,
) -> Result<Vec<Point>, StorageError> {
    let (drop, floor) = overlap(&previous, mint);
    previous.drain(..drop);
    fill_window(it, maxt, floor, &mut previous)?;
    Ok(previous)
}

/// [`select_points`] writing into `out`; returns how many points were reused
fn select_points_into(
    it: &mut BufferedSeriesIterator,
    mint: i64,
    maxt: i64,
    previous: &[Point],
    out: &mut Vec<Point>,
) -> Result<usize, StorageError> {
    let (drop, floor) = overlap(previous, mint);
    out.clear();
    out.extend_from_slice(&previous[drop..]);
    let reused = out.len();
    fill_window(it, maxt, floor, out)?;
    Ok(reused)
}

/// Length of the prefix of `previous` outside the window, and the lowest
/// timestamp still to be read from storage
fn overlap(previous: &[Point], mint: i64) -> (usize, i64) {
    match previous.last() {
        Some(last) if last.timestamp >= mint => (
            previous.iter().take_while(|p| p.timestamp < mint).count(),
            last.timestamp.saturating_add(1),
        ),
        _ => (previous.len(), mint),
    }
}

/// Append the non-stale samples in `[floor, maxt]` to `out`
fn fill_window(
    it: &mut BufferedSeriesIterator,
    maxt: i64,
    floor: i64,
    out: &mut Vec<Point>,
) -> Result<(), StorageError> {
    let hit = it.seek(maxt)?;
    out.extend(it.buffer().filter(|p| !p.is_stale() && p.timestamp >= floor));

    if hit {
        if let Some(p) = it.at() {
            if p.timestamp == maxt && !p.is_stale() && p.timestamp >= floor {
                out.push(p);
            }
        }
    }
    Ok(())
}

// ============================================================================
// Range Vector Operator
// ============================================================================

/// Per-series state kept across steps
struct SeriesScan {
    labels: Labels,
    /// Points of the last window that produced a result
    carry: Vec<Point>,
    iter: BufferedSeriesIterator,
}

enum ScanState {
    Uninitialized,
    Running(Vec<SeriesScan>),
    Failed(QueryError),
}

/// Windowed function evaluation over one shard of a series set
///
/// # Example
///
/// ```rust
/// use kuba_rangevec::query::{
///     window_function, ExecutionContext, ExecutorConfig, RangeVectorOperator,
///     RangeVectorParams, SeriesSelector, VectorOperator,
/// };
/// use kuba_rangevec::storage::load;
/// use std::sync::Arc;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let storage = Arc::new(load("load 15s\n  requests 0+15x20")?);
/// let params = RangeVectorParams::new(60_000, 120_000, 60_000).with_range(60_000);
/// let selector = Arc::new(SeriesSelector::new(storage, vec![]).with_hints(params.select_hints()));
/// let rate = window_function("rate", params.select_range).unwrap();
///
/// let mut op = RangeVectorOperator::new(selector, rate, params)?;
/// let mut ctx = ExecutionContext::new(&ExecutorConfig::default());
/// while let Some(vector) = op.next(&mut ctx)? {
///     assert!((vector[0].point.value - 1.0).abs() < 1e-9);
/// }
/// # Ok(())
/// # }
/// ```
pub struct RangeVectorOperator {
    source: Arc<dyn SeriesSource>,
    function: Arc<dyn WindowFunction>,
    params: RangeVectorParams,
    current_step: i64,
    exhausted: bool,
    state: ScanState,
    /// Reused selection buffer
    scratch: Vec<Point>,
    name: &'static str,
}

impl RangeVectorOperator {
    /// Create an operator for one shard of `source`
    ///
    /// Fails with a validation error if `params` are inconsistent. Storage is
    /// not touched until the first step.
    pub fn new(
        source: Arc<dyn SeriesSource>,
        function: Arc<dyn WindowFunction>,
        params: RangeVectorParams,
    ) -> QueryResult<Self> {
        params.validate()?;
        Ok(Self {
            source,
            function,
            params,
            current_step: params.start.saturating_sub(params.step),
            exhausted: false,
            state: ScanState::Uninitialized,
            scratch: Vec::new(),
            name: OPERATOR_NAME,
        })
    }

    /// Create an operator applying the configured default window function
    ///
    /// Fails with a validation error if the configured function is unknown.
    pub fn from_config(
        source: Arc<dyn SeriesSource>,
        config: &ExecutorConfig,
        params: RangeVectorParams,
    ) -> QueryResult<Self> {
        let function = config.default_window_function(params.select_range)?;
        Self::new(source, function, params)
    }

    /// Override the name reported to metrics and logs
    pub(crate) fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Evaluation parameters
    pub fn params(&self) -> &RangeVectorParams {
        &self.params
    }

    /// Window function applied to each series
    pub fn function(&self) -> &Arc<dyn WindowFunction> {
        &self.function
    }

    /// Whether every step has been evaluated
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    fn initialize(&self) -> QueryResult<Vec<SeriesScan>> {
        let series = self
            .source
            .resolve(self.params.shard, self.params.num_shards)?;

        let scans: Vec<SeriesScan> = series
            .into_iter()
            .map(|(labels, it)| SeriesScan {
                labels,
                carry: Vec::new(),
                iter: BufferedSeriesIterator::new(it, self.params.select_range),
            })
            .collect();

        debug!(
            operator = self.name,
            function = self.function.name(),
            shard = self.params.shard,
            num_shards = self.params.num_shards,
            series = scans.len(),
            "Initialized range vector operator"
        );
        metrics::record_series_initialized(self.name, scans.len());
        Ok(scans)
    }

    fn fail(&mut self, err: QueryError) -> QueryError {
        metrics::record_error(err.kind.as_str(), self.name);
        self.state = ScanState::Failed(err.clone());
        err
    }

    fn evaluate_step(&mut self, ctx: &mut ExecutionContext) -> QueryResult<InstantVector> {
        let t = self.current_step;
        let mint = t.saturating_sub(self.params.select_range);
        let trim_horizon = t.clamp(0, self.params.select_range);

        let scans = match &mut self.state {
            ScanState::Running(scans) => scans,
            ScanState::Failed(e) => return Err(e.clone()),
            ScanState::Uninitialized => {
                return Err(QueryError::internal("Operator stepped before initialization"))
            }
        };

        ctx.begin_step(t);
        let mut vector = InstantVector::new();
        let (mut reused, mut scanned) = (0, 0);

        for scan in scans.iter_mut() {
            ctx.check()?;

            let kept = select_points_into(&mut scan.iter, mint, t, &scan.carry, &mut self.scratch)
                .map_err(|e| {
                    warn!(series = %scan.labels, step = t, error = %e, "Storage iteration failed");
                    QueryError::from(e)
                })?;
            ctx.record_samples(self.scratch.len())?;
            reused += kept;
            scanned += self.scratch.len() - kept;

            if let Some(point) = self.function.call(&self.scratch, t) {
                vector.push(Sample::new(scan.labels.clone(), point));
                std::mem::swap(&mut scan.carry, &mut self.scratch);
                scan.iter.trim(trim_horizon);
            }
        }

        metrics::record_points_selected(reused, scanned);
        Ok(vector)
    }
}

impl VectorOperator for RangeVectorOperator {
    fn next(&mut self, ctx: &mut ExecutionContext) -> QueryResult<Option<InstantVector>> {
        if self.exhausted {
            return Ok(None);
        }
        let t = match self.current_step.checked_add(self.params.step) {
            Some(t) if t <= self.params.end => t,
            _ => {
                self.exhausted = true;
                return Ok(None);
            }
        };

        if let Err(e) = ctx.check() {
            warn!(operator = self.name, step = t, error = %e, "Step aborted");
            metrics::record_error(e.kind.as_str(), self.name);
            return Err(e);
        }

        if matches!(self.state, ScanState::Uninitialized) {
            match self.initialize() {
                Ok(scans) => self.state = ScanState::Running(scans),
                Err(e) => return Err(self.fail(e)),
            }
        }
        if let ScanState::Failed(e) = &self.state {
            return Err(e.clone());
        }

        let started = Instant::now();
        self.current_step = t;
        match self.evaluate_step(ctx) {
            Ok(vector) => {
                trace!(
                    operator = self.name,
                    step = t,
                    samples = vector.len(),
                    "Evaluated step"
                );
                metrics::record_step(self.name, started.elapsed().as_secs_f64());
                Ok(Some(vector))
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn step_timestamp(&self) -> i64 {
        self.current_step
    }

    fn reset(&mut self) {
        self.current_step = self.params.start.saturating_sub(self.params.step);
        self.exhausted = false;
        self.state = ScanState::Uninitialized;
        self.scratch.clear();
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn series_count(&self) -> Option<usize> {
        match &self.state {
            ScanState::Running(scans) => Some(scans.len()),
            _ => None,
        }
    }
}

impl std::fmt::Debug for RangeVectorOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangeVectorOperator")
            .field("name", &self.name)
            .field("function", &self.function.name())
            .field("params", &self.params)
            .field("current_step", &self.current_step)
            .field("exhausted", &self.exhausted)
            .field("series", &self.series_count())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
