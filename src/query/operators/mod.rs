//! Query Operators - step-wise vector execution primitives
//!
//! This module provides the physical operators of a range query:
//! - `RangeVectorOperator`: windowed selection plus a window function,
//!   evaluated incrementally step by step
//! - `VectorSelector`: latest sample within a lookback, built on the same
//!   windowing machinery
//!
//! Every pull yields one instant vector for one evaluation step. Operators
//! own their per-series iterator state exclusively, so distinct shards of
//! the same query can be driven from different threads.

pub mod matrix_selector;
pub mod vector_selector;

pub use matrix_selector::{select_points, RangeVectorOperator, RangeVectorParams};
pub use vector_selector::VectorSelector;

use crate::query::error::QueryError;
use crate::query::executor::ExecutionContext;
use crate::types::InstantVector;

// ============================================================================
// Operator Trait
// ============================================================================

/// Pull-based operator producing one instant vector per evaluation step
///
/// Operators form a tree where each operator pulls steps from its children
/// and produces output for its parent. This is the "Volcano" iterator model
/// with one step as the unit of work.
pub trait VectorOperator: Send {
    /// Evaluate the next step
    ///
    /// Returns:
    /// - `Ok(Some(vector))` - Results for the step (possibly empty)
    /// - `Ok(None)` - All steps evaluated (stays `None` on later calls)
    /// - `Err(e)` - The step failed
    fn next(&mut self, ctx: &mut ExecutionContext) -> Result<Option<InstantVector>, QueryError>;

    /// Timestamp of the step most recently evaluated
    fn step_timestamp(&self) -> i64;

    /// Reset operator state for re-execution
    fn reset(&mut self);

    /// Get operator name for debugging/profiling
    fn name(&self) -> &'static str;

    /// Number of series this operator evaluates, once known
    fn series_count(&self) -> Option<usize> {
        None // Unknown by default
    }
}
