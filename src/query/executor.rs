//! Query Executor - step-wise range query driver
//!
//! This module provides the execution infrastructure around vector operators:
//! - `ExecutorConfig`: limits and defaults for a query
//! - `ExecutionContext`: per-query state threaded through every pull
//!   (deadline, cooperative cancellation, sample accounting)
//! - `QueryExecutor`: drains an operator into a `RangeResult`
//!
//! # Architecture
//!
//! The executor follows a pull-based volcano model. Each pull on the root
//! operator evaluates exactly one step:
//!
//! ```text
//! ┌─────────────────┐
//! │  QueryExecutor  │  ← collects one StepVector per pull
//! └────────┬────────┘
//!          │ next(ctx)
//! ┌────────▼────────┐
//! │ RangeVector op  │  ← window selection + window function per series
//! └────────┬────────┘
//!          │ seek / buffer
//! ┌────────▼────────┐
//! │    Storage      │
//! └─────────────────┘
//! ```
//!
//! Cancellation is cooperative: operators call [`ExecutionContext::check`]
//! at step boundaries and inside their series loops. A [`CancelHandle`] lets
//! another thread abort a running query.

use crate::config::QueryConfig;
use crate::query::error::{QueryError, QueryResult};
use crate::query::functions::{window_function, WindowFunction, DEFAULT_FUNCTION};
use crate::query::operators::VectorOperator;
use crate::types::{InstantVector, Labels, Matrix, Point, SeriesPoints};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

// ============================================================================
// Executor Configuration
// ============================================================================

/// Configuration for query execution
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum number of parallel shard workers (default: num_cpus)
    pub max_parallelism: usize,

    /// Query timeout duration (default: 2 minutes)
    pub timeout: Duration,

    /// Maximum points selected across all series in one step, summed over
    /// every shard of the query (default: 50_000_000, 0 = unlimited)
    pub max_samples: usize,

    /// Run shards on the rayon pool (default: true)
    pub enable_parallel: bool,

    /// Window function of range selectors that name none (default: `rate`)
    pub default_function: String,

    /// Lookback window for instant vector selectors in milliseconds
    /// (default: 5 minutes)
    pub lookback_delta_ms: i64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_parallelism: num_cpus::get(),
            timeout: Duration::from_secs(120),
            max_samples: 50_000_000,
            enable_parallel: true,
            default_function: DEFAULT_FUNCTION.to_string(),
            lookback_delta_ms: 5 * 60 * 1000,
        }
    }
}

impl ExecutorConfig {
    /// Create a new executor config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum parallelism
    pub fn with_parallelism(mut self, workers: usize) -> Self {
        self.max_parallelism = workers.max(1);
        self
    }

    /// Set query timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the per-step sample limit (0 disables the limit)
    pub fn with_max_samples(mut self, samples: usize) -> Self {
        self.max_samples = samples;
        self
    }

    /// Enable or disable parallel shard execution
    pub fn with_parallel(mut self, enable: bool) -> Self {
        self.enable_parallel = enable;
        self
    }

    /// Set the window function used when a query names none
    pub fn with_default_function(mut self, name: impl Into<String>) -> Self {
        self.default_function = name.into();
        self
    }

    /// Set the instant selector lookback in milliseconds
    pub fn with_lookback_delta(mut self, lookback_ms: i64) -> Self {
        self.lookback_delta_ms = lookback_ms;
        self
    }

    /// Build the default window function for windows of `select_range` ms
    pub fn default_window_function(
        &self,
        select_range: i64,
    ) -> QueryResult<Arc<dyn WindowFunction>> {
        window_function(&self.default_function, select_range).ok_or_else(|| {
            QueryError::validation(format!(
                "Unknown window function '{}'",
                self.default_function
            ))
        })
    }
}

impl From<&QueryConfig> for ExecutorConfig {
    fn from(config: &QueryConfig) -> Self {
        Self {
            max_parallelism: config.max_parallelism.max(1),
            timeout: Duration::from_millis(config.timeout_ms),
            max_samples: config.max_samples,
            enable_parallel: config.enable_parallel,
            default_function: config.default_function.clone(),
            lookback_delta_ms: config.lookback_delta_ms,
        }
    }
}

// ============================================================================
// Query Executor
// ============================================================================

/// One evaluated step of a range query
#[derive(Debug, Clone, PartialEq)]
pub struct StepVector {
    /// Evaluation timestamp
    pub timestamp: i64,
    /// Series that produced a result at this step
    pub samples: InstantVector,
}

/// Result of draining an operator to exhaustion
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RangeResult {
    /// One entry per evaluated step, in step order
    pub steps: Vec<StepVector>,
}

impl RangeResult {
    /// Number of evaluated steps
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Total number of output samples across all steps
    pub fn sample_count(&self) -> usize {
        self.steps.iter().map(|s| s.samples.len()).sum()
    }

    /// Regroup the step vectors into one point sequence per series
    ///
    /// Series are sorted by labels; points keep step order.
    pub fn into_matrix(self) -> Matrix {
        let mut by_series: BTreeMap<Labels, Vec<Point>> = BTreeMap::new();
        for step in self.steps {
            for sample in step.samples {
                by_series.entry(sample.labels).or_default().push(sample.point);
            }
        }
        by_series
            .into_iter()
            .map(|(labels, points)| SeriesPoints { labels, points })
            .collect()
    }

    /// Merge per-shard results step by step
    ///
    /// Every shard evaluates the same step grid, so steps are aligned by
    /// position. Samples within a step are sorted by labels.
    pub fn merge(shards: Vec<RangeResult>) -> QueryResult<RangeResult> {
        let mut merged: Vec<StepVector> = Vec::new();
        for shard in shards {
            if merged.is_empty() {
                merged = shard.steps;
                continue;
            }
            if shard.steps.len() != merged.len() {
                return Err(QueryError::internal(format!(
                    "Shard step count mismatch: {} vs {}",
                    shard.steps.len(),
                    merged.len()
                )));
            }
            for (target, step) in merged.iter_mut().zip(shard.steps) {
                if target.timestamp != step.timestamp {
                    return Err(QueryError::internal(format!(
                        "Shard step timestamp mismatch: {} vs {}",
                        step.timestamp, target.timestamp
                    )));
                }
                target.samples.extend(step.samples);
            }
        }
        for step in &mut merged {
            step.samples.sort_by(|a, b| a.labels.cmp(&b.labels));
        }
        Ok(RangeResult { steps: merged })
    }
}

/// Drives operators to exhaustion and collects their output
pub struct QueryExecutor {
    /// Executor configuration
    config: ExecutorConfig,

    /// Execution statistics for monitoring
    stats: ExecutionStats,
}

impl QueryExecutor {
    /// Create a new query executor with default configuration
    pub fn new() -> Self {
        Self::with_config(ExecutorConfig::default())
    }

    /// Create a query executor with custom configuration
    pub fn with_config(config: ExecutorConfig) -> Self {
        Self {
            config,
            stats: ExecutionStats::default(),
        }
    }

    /// Fresh execution context using this executor's limits
    pub fn context(&self) -> ExecutionContext {
        ExecutionContext::new(&self.config)
    }

    /// Pull every step from `operator` and collect the results
    ///
    /// Any error from the operator aborts the query; there is no partial
    /// result.
    pub fn execute_range(
        &mut self,
        operator: &mut dyn VectorOperator,
        ctx: &mut ExecutionContext,
    ) -> QueryResult<RangeResult> {
        let start = Instant::now();
        let mut steps = Vec::new();

        let outcome = self.execute_streaming(operator, ctx, |timestamp, samples| {
            steps.push(StepVector { timestamp, samples });
            Ok(())
        });

        self.stats.total_queries += 1;
        self.stats.total_execution_time += start.elapsed();
        if let Err(e) = outcome {
            self.stats.failed_queries += 1;
            warn!(operator = operator.name(), error = %e, "Range query failed");
            return Err(e);
        }

        let result = RangeResult { steps };
        debug!(
            operator = operator.name(),
            steps = result.step_count(),
            samples = result.sample_count(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "Range query completed"
        );
        Ok(result)
    }

    /// Pull every step from `operator`, handing each vector to `processor`
    ///
    /// Useful when the caller streams steps out instead of collecting them.
    pub fn execute_streaming<F>(
        &mut self,
        operator: &mut dyn VectorOperator,
        ctx: &mut ExecutionContext,
        mut processor: F,
    ) -> QueryResult<()>
    where
        F: FnMut(i64, InstantVector) -> QueryResult<()>,
    {
        let selected_before = ctx.total_samples;
        let outcome = loop {
            match operator.next(ctx) {
                Ok(Some(vector)) => {
                    self.stats.steps_evaluated += 1;
                    self.stats.samples_returned += vector.len() as u64;
                    if let Err(e) = processor(operator.step_timestamp(), vector) {
                        break Err(e);
                    }
                }
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        self.stats.samples_selected += (ctx.total_samples - selected_before) as u64;
        outcome
    }

    /// Get current execution statistics
    pub fn stats(&self) -> &ExecutionStats {
        &self.stats
    }

    /// Reset execution statistics
    pub fn reset_stats(&mut self) {
        self.stats = ExecutionStats::default();
    }

    /// Get executor configuration
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }
}

impl Default for QueryExecutor {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Execution Statistics
// ============================================================================

/// Statistics collected across executed queries
#[derive(Debug, Clone, Default)]
pub struct ExecutionStats {
    /// Total number of queries executed
    pub total_queries: u64,

    /// Queries that ended in an error
    pub failed_queries: u64,

    /// Total execution time across all queries
    pub total_execution_time: Duration,

    /// Steps pulled from operators
    pub steps_evaluated: u64,

    /// Points handed to window functions
    pub samples_selected: u64,

    /// Output samples across all steps
    pub samples_returned: u64,
}

impl ExecutionStats {
    /// Calculate average query latency
    pub fn avg_query_latency(&self) -> Duration {
        if self.total_queries == 0 {
            Duration::ZERO
        } else {
            self.total_execution_time / self.total_queries.min(u32::MAX as u64) as u32
        }
    }

    /// Average number of output samples per step
    pub fn samples_per_step(&self) -> f64 {
        if self.steps_evaluated == 0 {
            0.0
        } else {
            self.samples_returned as f64 / self.steps_evaluated as f64
        }
    }
}

// ============================================================================
// Execution Context
// ============================================================================

/// Handle that cancels the query of the context it was taken from
#[derive(Debug, Clone)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Request cancellation; operators stop at their next check
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Points selected per step timestamp, shared by every fork of a context
type StepBudget = Arc<Mutex<HashMap<i64, usize>>>;

/// Context passed through every operator pull
#[derive(Debug)]
pub struct ExecutionContext {
    /// Query start time for timeout checking
    pub start_time: Instant,

    /// Timeout duration
    pub timeout: Duration,

    /// Maximum points selected in one step across all forks (0 = unlimited)
    pub max_samples: usize,

    /// Timestamp of the step being evaluated
    pub step: i64,

    /// Points selected in the current step by this worker
    pub step_samples: usize,

    /// Points selected across all steps by this worker
    pub total_samples: usize,

    /// Shared cancellation flag
    cancelled: Arc<AtomicBool>,

    /// Shared per-step sample counts
    step_budget: StepBudget,
}

impl ExecutionContext {
    /// Create a new execution context from config
    pub fn new(config: &ExecutorConfig) -> Self {
        Self {
            start_time: Instant::now(),
            timeout: config.timeout,
            max_samples: config.max_samples,
            step: i64::MIN,
            step_samples: 0,
            total_samples: 0,
            cancelled: Arc::new(AtomicBool::new(false)),
            step_budget: StepBudget::default(),
        }
    }

    /// Context for a sibling worker of the same query
    ///
    /// Shares the deadline, the cancellation flag and the per-step sample
    /// budget; the worker's own counters start at zero.
    pub fn fork(&self) -> Self {
        Self {
            start_time: self.start_time,
            timeout: self.timeout,
            max_samples: self.max_samples,
            step: i64::MIN,
            step_samples: 0,
            total_samples: 0,
            cancelled: Arc::clone(&self.cancelled),
            step_budget: Arc::clone(&self.step_budget),
        }
    }

    /// Handle that can cancel this query from another thread
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            cancelled: Arc::clone(&self.cancelled),
        }
    }

    /// Cancel execution
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Check if query has timed out
    pub fn is_timed_out(&self) -> bool {
        self.start_time.elapsed() > self.timeout
    }

    /// Check if execution should stop (cancelled or timed out)
    pub fn should_stop(&self) -> bool {
        self.is_cancelled() || self.is_timed_out()
    }

    /// Fail with `Cancelled` or `Timeout` if execution should stop
    pub fn check(&self) -> QueryResult<()> {
        if self.is_cancelled() {
            return Err(QueryError::cancelled("Query was cancelled"));
        }
        if self.is_timed_out() {
            return Err(QueryError::timeout(format!(
                "Query exceeded timeout of {:?}",
                self.timeout
            )));
        }
        Ok(())
    }

    /// Start accounting for the step evaluated at `timestamp`
    pub fn begin_step(&mut self, timestamp: i64) {
        self.step = timestamp;
        self.step_samples = 0;
    }

    /// Account for points selected in the current step
    ///
    /// Counts of all forks evaluating the same step timestamp add up. Fails
    /// with `ResourceLimit` once the step exceeds `max_samples`. A context
    /// covers one pass over the step grid; replaying steps on it counts them
    /// again.
    pub fn record_samples(&mut self, count: usize) -> QueryResult<()> {
        self.step_samples += count;
        self.total_samples += count;
        if self.max_samples == 0 {
            return Ok(());
        }

        let selected = {
            let mut steps = self.step_budget.lock();
            let selected = steps.entry(self.step).or_insert(0);
            *selected += count;
            *selected
        };
        if selected > self.max_samples {
            return Err(QueryError::resource_limit(format!(
                "Query selected {} samples at step {}, limit is {}",
                selected, self.step, self.max_samples
            )));
        }
        Ok(())
    }

    /// Get remaining time before timeout
    pub fn remaining_time(&self) -> Duration {
        self.timeout.saturating_sub(self.start_time.elapsed())
    }
}

// ============================================================================
// Tests
// ============================================================================
