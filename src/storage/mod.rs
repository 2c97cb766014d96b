//! Storage-facing contracts consumed by the query operators
//!
//! The operators never read storage directly. They talk to three small traits:
//!
//! ```text
//! Queryable ──select(hints, matchers)──► [Series] ──iterator()──► SampleIterator
//!                                                                      │
//!                                               BufferedSeriesIterator ┘
//!                                          (seek + trailing sample buffer)
//! ```
//!
//! # Key Components
//!
//! - **`SampleIterator`**: Forward-only, seekable cursor over one series
//! - **`Series`**: Label set plus a factory for fresh iterators
//! - **`Queryable`**: Resolves label matchers into a series set
//! - **`BufferedSeriesIterator`**: Adds a bounded trailing buffer on top of a
//!   `SampleIterator`, used by the windowing algorithm
//! - **`MemoryStorage`**: In-memory `Queryable` for tests, benchmarks and
//!   embedding
//!
//! # Example
//!
//! ```rust
//! use kuba_rangevec::query::LabelMatcher;
//! use kuba_rangevec::storage::{MemoryStorage, Queryable, SelectHints};
//! use kuba_rangevec::types::{Labels, Point};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = MemoryStorage::new();
//! storage.append_points(
//!     Labels::from_pairs([("__name__", "up"), ("job", "api")]),
//!     &[Point::new(0, 1.0), Point::new(15_000, 1.0)],
//! )?;
//!
//! let matchers = vec![LabelMatcher::equal("__name__", "up")];
//! let series = storage.select(&SelectHints::default(), &matchers)?;
//! assert_eq!(series.len(), 1);
//! # Ok(())
//! # }
//! ```

/// Seekable iterator with a bounded trailing buffer
pub mod buffer;
/// Text notation for loading series into memory storage
pub mod loader;
/// In-memory series storage
pub mod memory;

pub use buffer::BufferedSeriesIterator;
pub use loader::load;
pub use memory::MemoryStorage;

use crate::error::StorageError;
use crate::query::LabelMatcher;
use crate::types::{Labels, Point, TimeRange};
use std::sync::Arc;

// =============================================================================
// Selection Hints
// =============================================================================

/// Push-down hints passed to storage when resolving series
///
/// Operators treat the hints as opaque. Storage may use them to skip series
/// with no samples in the hinted time range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectHints {
    /// Every sample any window can reach, `None` for unbounded
    pub time_range: Option<TimeRange>,
    /// Evaluation step in milliseconds
    pub step: i64,
    /// Window length in milliseconds
    pub range: i64,
    /// Name of the window function, if known
    pub func: Option<String>,
}

impl SelectHints {
    /// Hints covering every sample a range query over `[start, end]` can touch
    pub fn for_range_query(start: i64, end: i64, step: i64, range: i64) -> Self {
        Self {
            time_range: Some(TimeRange {
                start: start.saturating_sub(range),
                end,
            }),
            step,
            range,
            func: None,
        }
    }

    /// Set the window function name
    pub fn with_func(mut self, func: impl Into<String>) -> Self {
        self.func = Some(func.into());
        self
    }
}

// =============================================================================
// SampleIterator Trait
// =============================================================================

/// Forward-only cursor over the samples of a single series
///
/// Samples are yielded in strictly increasing timestamp order. Once either
/// method returns `Ok(None)` the iterator is exhausted and stays exhausted.
pub trait SampleIterator: Send {
    /// Advance to the next sample
    fn next(&mut self) -> Result<Option<Point>, StorageError>;

    /// Advance to the first sample with `timestamp >= t`
    ///
    /// Never moves backwards: if the current sample already satisfies the
    /// bound it is returned again.
    fn seek(&mut self, t: i64) -> Result<Option<Point>, StorageError>;
}

// =============================================================================
// Series / Queryable Traits
// =============================================================================

/// A stored series: identity plus a way to read it
pub trait Series: Send + Sync {
    /// Series identity
    fn labels(&self) -> &Labels;

    /// Fresh iterator positioned before the first sample
    fn iterator(&self) -> Box<dyn SampleIterator>;
}

/// Storage that can resolve label matchers into series
pub trait Queryable: Send + Sync {
    /// Return every series matching all `matchers`, sorted by labels
    fn select(
        &self,
        hints: &SelectHints,
        matchers: &[LabelMatcher],
    ) -> Result<Vec<Arc<dyn Series>>, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hints_for_range_query() {
        let hints = SelectHints::for_range_query(60_000, 120_000, 15_000, 300_000).with_func("rate");
        let range = hints.time_range.unwrap();
        assert_eq!(range.start, -240_000);
        assert_eq!(range.end, 120_000);
        assert_eq!(hints.func.as_deref(), Some("rate"));
    }

    #[test]
    fn test_default_hints_unbounded() {
        assert!(SelectHints::default().time_range.is_none());
    }
}
