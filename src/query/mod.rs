//! Query execution for range-vector and instant-vector selectors
//!
//! This module provides the step-wise evaluation engine with:
//! - Incremental window selection that reuses the previous step's points
//! - Pluggable window functions (`rate`, `increase`, `*_over_time`, ...)
//! - Horizontal sharding of the series set across parallel operators
//! - Cooperative cancellation, timeouts and per-step sample limits
//!
//! # Architecture
//!
//! ```text
//! Label matchers + hints
//!      │
//!      ▼
//! ┌────────────────┐
//! │ SeriesSelector │  Resolve matched series once, slice per shard
//! └────────────────┘
//!      │
//!      ▼
//! ┌────────────────┐
//! │ RangeVector    │  One operator per shard, one step per pull
//! │ Operator       │  select window → window function → trim buffer
//! └────────────────┘
//!      │
//!      ▼
//! ┌────────────────┐
//! │ execute_sharded│  Drain shards on rayon, merge step vectors
//! └────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use kuba_rangevec::query::{
//!     execute_sharded, window_function, ExecutionContext, ExecutorConfig, LabelMatcher,
//!     ParallelConfig, QueryResult, RangeVectorOperator, RangeVectorParams, SeriesSelector,
//!     VectorOperator,
//! };
//! use kuba_rangevec::storage::load;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = Arc::new(load(
//!     "load 30s
//!         http_requests_total{job=\"api\"} 0+30x20
//!         http_requests_total{job=\"web\"} 0+60x20",
//! )?);
//!
//! let params = RangeVectorParams::new(300_000, 600_000, 60_000).with_range(120_000);
//! let selector = Arc::new(
//!     SeriesSelector::new(storage, vec![LabelMatcher::equal("__name__", "http_requests_total")])
//!         .with_hints(params.select_hints().with_func("rate")),
//! );
//!
//! let config = ExecutorConfig::default();
//! let ctx = ExecutionContext::new(&config);
//! let result = execute_sharded(
//!     &ParallelConfig::default().with_shards(2),
//!     &config,
//!     &ctx,
//!     |shard, num_shards| -> QueryResult<Box<dyn VectorOperator>> {
//!         let rate = window_function("rate", params.select_range).unwrap();
//!         let op = RangeVectorOperator::new(
//!             selector.clone(),
//!             rate,
//!             params.with_shard(shard, num_shards),
//!         )?;
//!         Ok(Box::new(op))
//!     },
//! )?;
//!
//! let matrix = result.into_matrix();
//! assert_eq!(matrix.len(), 2);
//! assert!((matrix[0].points[0].value - 1.0).abs() < 1e-9);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod executor;
pub mod functions;
pub mod matcher;
pub mod operators;
pub mod parallel;
pub mod series_selector;

// Re-export main types
pub use error::{QueryError, QueryErrorKind, QueryResult};
pub use executor::{
    CancelHandle, ExecutionContext, ExecutionStats, ExecutorConfig, QueryExecutor, RangeResult,
    StepVector,
};
pub use functions::{function_names, window_function, WindowFunction, DEFAULT_FUNCTION};
pub use matcher::LabelMatcher;
pub use operators::{
    select_points, RangeVectorOperator, RangeVectorParams, VectorOperator, VectorSelector,
};
pub use parallel::{execute_sharded, ParallelConfig};
pub use series_selector::{SeriesSelector, SeriesSource, ShardSeries};
