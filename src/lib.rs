//! Kuba RangeVec - sharded, incremental range-vector evaluation
//!
//! This library provides the physical operator that evaluates windowed
//! (range-vector) queries over time-series storage:
//! - One instant vector per evaluation step, pulled on demand
//! - Incremental windows that reuse the previous step's points
//! - Disjoint series shards evaluated by independent operators in parallel
//! - PromQL window functions (`rate`, `increase`, `*_over_time`, ...)
//! - An in-memory series store and `load` notation for tests and embedding

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod storage;
pub mod types;

/// Prometheus metrics and telemetry
pub mod metrics;

/// Configuration management with TOML support
pub mod config;

/// Query execution for range-vector and instant-vector selectors
/// Provides the step-wise operators, window functions and sharded execution
pub mod query;

// Re-export main types
pub use config::{Config, LoggingConfig, QueryConfig};
pub use error::{Error, Result, StorageError};
pub use types::{InstantVector, Labels, Matrix, Point, Sample, TimeRange};
