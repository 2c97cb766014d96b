//! Instant vector selector
//!
//! Selects, for every step, the latest non-stale sample of each series within
//! the lookback window `[t - lookback, t]`, stamped with the step time. This is
//! a range-vector evaluation of `last_over_time` with the lookback as range.

use crate::query::error::QueryResult;
use crate::query::executor::ExecutionContext;
use crate::query::functions::LastOverTime;
use crate::query::operators::{RangeVectorOperator, RangeVectorParams, VectorOperator};
use crate::query::series_selector::SeriesSource;
use crate::types::InstantVector;
use std::sync::Arc;

/// Default lookback for instant selectors (5 minutes)
pub const DEFAULT_LOOKBACK_DELTA_MS: i64 = 5 * 60 * 1000;

/// Latest sample per series at every step
#[derive(Debug)]
pub struct VectorSelector {
    inner: RangeVectorOperator,
}

impl VectorSelector {
    /// Create a selector over one shard of `source`
    ///
    /// The `select_range` of `params` is replaced by `lookback_delta`.
    pub fn new(
        source: Arc<dyn SeriesSource>,
        params: RangeVectorParams,
        lookback_delta: i64,
    ) -> QueryResult<Self> {
        let params = params.with_range(lookback_delta);
        let inner = RangeVectorOperator::new(source, Arc::new(LastOverTime), params)?
            .with_name("vector_selector");
        Ok(Self { inner })
    }

    /// Evaluation parameters
    pub fn params(&self) -> &RangeVectorParams {
        self.inner.params()
    }
}

impl VectorOperator for VectorSelector {
    fn next(&mut self, ctx: &mut ExecutionContext) -> QueryResult<Option<InstantVector>> {
        self.inner.next(ctx)
    }

    fn step_timestamp(&self) -> i64 {
        self.inner.step_timestamp()
    }

    fn reset(&mut self) {
        self.inner.reset()
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn series_count(&self) -> Option<usize> {
        self.inner.series_count()
    }
}
