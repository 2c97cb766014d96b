//! Series resolution shared by the shards of one query
//!
//! A [`SeriesSelector`] owns the label matchers and selection hints of a
//! selector expression. The matched series set is resolved against storage
//! once, on first use, and then split into `num_shards` contiguous slices of
//! the label-sorted set. Each call hands out fresh iterators, so every shard
//! operator owns its iterators exclusively.
//!
//! ```text
//!             resolve once (sorted by labels)
//!   ┌──────┬──────┬──────┬──────┬──────┬──────┬──────┐
//!   │  s0  │  s1  │  s2  │  s3  │  s4  │  s5  │  s6  │
//!   └──────┴──────┴──────┴──────┴──────┴──────┴──────┘
//!   ├─ shard 0 ──┤├──── shard 1 ──────┤├─── shard 2 ──┤
//! ```

use crate::error::StorageError;
use crate::query::matcher::LabelMatcher;
use crate::storage::{Queryable, SampleIterator, SelectHints, Series};
use crate::types::Labels;
use std::fmt;
use std::ops::Range;
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// A series handed to a shard: identity plus an exclusively owned iterator
pub type ShardSeries = (Labels, Box<dyn SampleIterator>);

/// Source of the series one operator shard evaluates
pub trait SeriesSource: Send + Sync {
    /// Series belonging to `shard` out of `num_shards`
    ///
    /// Across all shards the result is a disjoint, exhaustive partition of
    /// the matched set, and the same shard always receives the same series.
    fn resolve(&self, shard: usize, num_shards: usize) -> Result<Vec<ShardSeries>, StorageError>;
}

/// [`SeriesSource`] backed by a [`Queryable`], resolved at most once
pub struct SeriesSelector {
    storage: Arc<dyn Queryable>,
    matchers: Vec<LabelMatcher>,
    hints: SelectHints,
    resolved: OnceLock<Result<Vec<Arc<dyn Series>>, StorageError>>,
}

impl SeriesSelector {
    /// Create a selector for `matchers` against `storage`
    pub fn new(storage: Arc<dyn Queryable>, matchers: Vec<LabelMatcher>) -> Self {
        Self {
            storage,
            matchers,
            hints: SelectHints::default(),
            resolved: OnceLock::new(),
        }
    }

    /// Attach push-down hints for the storage lookup
    pub fn with_hints(mut self, hints: SelectHints) -> Self {
        self.hints = hints;
        self
    }

    /// Label matchers of this selector
    pub fn matchers(&self) -> &[LabelMatcher] {
        &self.matchers
    }

    /// Hints passed to storage
    pub fn hints(&self) -> &SelectHints {
        &self.hints
    }

    /// Whether the series set has been resolved yet
    pub fn is_resolved(&self) -> bool {
        self.resolved.get().is_some()
    }

    fn matched(&self) -> Result<&[Arc<dyn Series>], StorageError> {
        let resolved = self.resolved.get_or_init(|| {
            let mut series = self.storage.select(&self.hints, &self.matchers)?;
            series.sort_by(|a, b| a.labels().cmp(b.labels()));
            debug!(
                matchers = self.matchers.len(),
                series = series.len(),
                "Resolved series for selector"
            );
            Ok(series)
        });
        match resolved {
            Ok(series) => Ok(series.as_slice()),
            Err(e) => Err(e.clone()),
        }
    }
}

impl SeriesSource for SeriesSelector {
    fn resolve(&self, shard: usize, num_shards: usize) -> Result<Vec<ShardSeries>, StorageError> {
        if num_shards == 0 || shard >= num_shards {
            return Err(StorageError::SeriesResolution(format!(
                "Shard {} out of range for {} shards",
                shard, num_shards
            )));
        }

        let matched = self.matched()?;
        let slice = &matched[shard_bounds(matched.len(), shard, num_shards)];
        Ok(slice
            .iter()
            .map(|s| (s.labels().clone(), s.iterator()))
            .collect())
    }
}

impl fmt::Debug for SeriesSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeriesSelector")
            .field("matchers", &self.matchers)
            .field("hints", &self.hints)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// Index range of `shard` when `len` items are split into `num_shards`
/// contiguous slices whose sizes differ by at most one
pub fn shard_bounds(len: usize, shard: usize, num_shards: usize) -> Range<usize> {
    let base = len / num_shards;
    let extra = len % num_shards;
    let start = shard * base + shard.min(extra);
    let size = base + usize::from(shard < extra);
    start..start + size
}
