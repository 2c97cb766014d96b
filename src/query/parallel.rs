//! Sharded parallel execution
//!
//! A range query over many series is split into `num_shards` operator
//! instances, each evaluating a disjoint slice of the series set. Shards
//! share nothing mutable except the one-time series resolution of their
//! common selector, so they run as independent rayon tasks:
//!
//! ```text
//!                   ┌── shard 0 ── operator ── steps ──┐
//! SeriesSelector ───┼── shard 1 ── operator ── steps ──┼──► merge per step
//!  (resolve once)   └── shard 2 ── operator ── steps ──┘
//! ```
//!
//! The first failing shard cancels its siblings through the shared flag of
//! the execution context; the query then fails as a whole.

use crate::metrics;
use crate::query::error::{QueryError, QueryResult};
use crate::query::executor::{ExecutionContext, ExecutorConfig, QueryExecutor, RangeResult};
use crate::query::operators::VectorOperator;
use rayon::prelude::*;
use tracing::{debug, warn};

// ============================================================================
// Parallel Configuration
// ============================================================================

/// Configuration for sharded execution
#[derive(Debug, Clone)]
pub struct ParallelConfig {
    /// Number of shards the series set is split into (default: num_cpus)
    pub num_shards: usize,

    /// Run shards on the rayon pool; when false they run one after another
    pub enable_parallel: bool,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            num_shards: num_cpus::get(),
            enable_parallel: true,
        }
    }
}

impl ParallelConfig {
    /// Set the number of shards
    pub fn with_shards(mut self, shards: usize) -> Self {
        self.num_shards = shards.max(1);
        self
    }

    /// Enable or disable parallel shard execution
    pub fn with_parallel(mut self, enable: bool) -> Self {
        self.enable_parallel = enable;
        self
    }
}

impl From<&ExecutorConfig> for ParallelConfig {
    fn from(config: &ExecutorConfig) -> Self {
        Self::default()
            .with_shards(config.max_parallelism)
            .with_parallel(config.enable_parallel)
    }
}

// ============================================================================
// Sharded Execution
// ============================================================================

/// Evaluate a query as `config.num_shards` shard operators and merge them
///
/// `build(shard, num_shards)` creates the operator for one shard. Every shard
/// runs against a fork of `ctx`, so cancelling `ctx` stops all of them.
///
/// Returns the merged result with samples of each step sorted by labels, or
/// the error of the first shard that failed for a reason other than being
/// cancelled by a sibling.
pub fn execute_sharded<F>(
    config: &ParallelConfig,
    exec_config: &ExecutorConfig,
    ctx: &ExecutionContext,
    build: F,
) -> QueryResult<RangeResult>
where
    F: Fn(usize, usize) -> QueryResult<Box<dyn VectorOperator>> + Sync,
{
    let num_shards = config.num_shards.max(1);

    let run_shard = |shard: usize| -> QueryResult<RangeResult> {
        let mut shard_ctx = ctx.fork();
        metrics::ACTIVE_SHARDS.inc();
        let result = build(shard, num_shards).and_then(|mut op| {
            QueryExecutor::with_config(exec_config.clone()).execute_range(op.as_mut(), &mut shard_ctx)
        });
        metrics::ACTIVE_SHARDS.dec();

        if let Err(e) = &result {
            if !e.is_interrupt() {
                warn!(shard, num_shards, error = %e, "Shard failed, cancelling query");
            }
            shard_ctx.cancel();
        }
        result
    };

    let results: Vec<QueryResult<RangeResult>> = if config.enable_parallel {
        (0..num_shards).into_par_iter().map(run_shard).collect()
    } else {
        (0..num_shards).map(run_shard).collect()
    };

    let mut shards = Vec::with_capacity(results.len());
    let mut first_error: Option<QueryError> = None;
    for result in results {
        match result {
            Ok(r) => shards.push(r),
            Err(e) => {
                let replace = match &first_error {
                    None => true,
                    Some(current) => current.is_interrupt() && !e.is_interrupt(),
                };
                if replace {
                    first_error = Some(e);
                }
            }
        }
    }
    if let Some(e) = first_error {
        return Err(e);
    }

    let merged = RangeResult::merge(shards)?;
    debug!(
        num_shards,
        steps = merged.step_count(),
        samples = merged.sample_count(),
        "Merged sharded range query"
    );
    Ok(merged)
}
