//! In-memory series storage
//!
//! Holds every series as an immutable, shared slice of points. Appends build a
//! new slice, so iterators handed out earlier keep reading a consistent
//! snapshot.

use super::{Queryable, SampleIterator, SelectHints, Series};
use crate::error::StorageError;
use crate::query::LabelMatcher;
use crate::types::{Labels, Point, TimeRange};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

// =============================================================================
// Memory Series
// =============================================================================

/// One stored series
#[derive(Debug, Clone)]
pub struct MemorySeries {
    labels: Labels,
    points: Arc<[Point]>,
}

impl MemorySeries {
    /// All stored points in timestamp order
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Time span covered by the stored points
    pub fn time_range(&self) -> Option<TimeRange> {
        match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) => Some(TimeRange {
                start: first.timestamp,
                end: last.timestamp,
            }),
            _ => None,
        }
    }
}

impl Series for MemorySeries {
    fn labels(&self) -> &Labels {
        &self.labels
    }

    fn iterator(&self) -> Box<dyn SampleIterator> {
        Box::new(PointsIterator::new(Arc::clone(&self.points)))
    }
}

// =============================================================================
// Points Iterator
// =============================================================================

/// [`SampleIterator`] over a shared slice of points
#[derive(Debug, Clone)]
pub struct PointsIterator {
    points: Arc<[Point]>,
    cursor: Option<usize>,
    exhausted: bool,
}

impl PointsIterator {
    /// Iterate over `points`, which must be sorted by timestamp
    pub fn new(points: Arc<[Point]>) -> Self {
        Self {
            points,
            cursor: None,
            exhausted: false,
        }
    }

    fn position_at(&mut self, idx: usize) -> Option<Point> {
        if idx < self.points.len() {
            self.cursor = Some(idx);
            Some(self.points[idx])
        } else {
            self.exhausted = true;
            None
        }
    }
}

impl SampleIterator for PointsIterator {
    fn next(&mut self) -> Result<Option<Point>, StorageError> {
        if self.exhausted {
            return Ok(None);
        }
        let idx = self.cursor.map_or(0, |c| c + 1);
        Ok(self.position_at(idx))
    }

    fn seek(&mut self, t: i64) -> Result<Option<Point>, StorageError> {
        if self.exhausted {
            return Ok(None);
        }
        if let Some(c) = self.cursor {
            if self.points[c].timestamp >= t {
                return Ok(Some(self.points[c]));
            }
        }
        let from = self.cursor.map_or(0, |c| c + 1);
        let idx = from + self.points[from..].partition_point(|p| p.timestamp < t);
        Ok(self.position_at(idx))
    }
}

// =============================================================================
// Memory Storage
// =============================================================================

/// Thread-safe in-memory [`Queryable`]
#[derive(Debug, Default)]
pub struct MemoryStorage {
    series: RwLock<BTreeMap<Labels, Arc<MemorySeries>>>,
}

impl MemoryStorage {
    /// Create an empty storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Append points to a series, creating it if needed
    ///
    /// Timestamps must be strictly increasing, both within `points` and
    /// relative to what the series already holds.
    pub fn append_points(&self, labels: Labels, points: &[Point]) -> Result<(), StorageError> {
        if points.is_empty() {
            return Ok(());
        }

        let mut series = self.series.write();
        let existing = series.get(&labels).map(|s| Arc::clone(&s.points));

        let mut merged: Vec<Point> = existing.as_deref().map(<[Point]>::to_vec).unwrap_or_default();
        merged.reserve(points.len());
        for point in points {
            if let Some(last) = merged.last() {
                if point.timestamp <= last.timestamp {
                    return Err(StorageError::OutOfOrder {
                        series: labels.to_string(),
                        timestamp: point.timestamp,
                        last: last.timestamp,
                    });
                }
            }
            merged.push(*point);
        }

        series.insert(
            labels.clone(),
            Arc::new(MemorySeries {
                labels,
                points: Arc::from(merged),
            }),
        );
        Ok(())
    }

    /// Append a single point
    pub fn append(&self, labels: Labels, timestamp: i64, value: f64) -> Result<(), StorageError> {
        self.append_points(labels, &[Point::new(timestamp, value)])
    }

    /// Look up a series by its exact labels
    pub fn get(&self, labels: &Labels) -> Option<Arc<MemorySeries>> {
        self.series.read().get(labels).cloned()
    }

    /// Number of stored series
    pub fn series_count(&self) -> usize {
        self.series.read().len()
    }

    /// Total number of stored points
    pub fn sample_count(&self) -> usize {
        self.series.read().values().map(|s| s.points.len()).sum()
    }
}

impl Queryable for MemoryStorage {
    fn select(
        &self,
        hints: &SelectHints,
        matchers: &[LabelMatcher],
    ) -> Result<Vec<Arc<dyn Series>>, StorageError> {
        let series = self.series.read();
        let selected: Vec<Arc<dyn Series>> = series
            .values()
            .filter(|s| matchers.iter().all(|m| m.matches(&s.labels)))
            .filter(|s| match (&hints.time_range, s.time_range()) {
                (Some(hinted), Some(stored)) => hinted.overlaps(&stored),
                (Some(_), None) => false,
                (None, _) => true,
            })
            .map(|s| Arc::clone(s) as Arc<dyn Series>)
            .collect();

        debug!(
            matchers = matchers.len(),
            stored = series.len(),
            selected = selected.len(),
            "Selected series from memory storage"
        );
        Ok(selected)
    }
}
