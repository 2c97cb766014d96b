//! Core data types used throughout the range-vector engine
//!
//! This module defines the fundamental data structures shared by storage and
//! the query operators:
//!
//! # Key Types
//!
//! - **`Point`**: A single sample (timestamp + value)
//! - **`Label`** / **`Labels`**: Immutable, sorted series identity
//! - **`Sample`**: One entry of an instant vector (labels + point)
//! - **`TimeRange`**: Inclusive time window used for push-down hints
//!
//! # Stale markers
//!
//! A stale marker is a sample whose value carries the reserved
//! `STALE_NAN_BITS` NaN payload. It occupies a timestamp slot but must be
//! treated as absent data. Because it is a NaN it can only be recognized by
//! bit pattern, see [`is_stale_nan`].
//!
//! # Example
//!
//! ```rust
//! use kuba_rangevec::types::{is_stale_nan, stale_nan, Labels, Point};
//!
//! let labels = Labels::from_pairs([("__name__", "http_requests_total"), ("job", "api")]);
//! assert_eq!(labels.get("job"), Some("api"));
//!
//! let marker = Point::new(1000, stale_nan());
//! assert!(is_stale_nan(marker.value));
//! assert!(!is_stale_nan(f64::NAN));
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Name of the label carrying the metric name
pub const METRIC_NAME_LABEL: &str = "__name__";

/// Bit pattern of the stale-marker NaN
///
/// Distinct from the canonical NaN produced by arithmetic, so real NaN
/// samples are never mistaken for staleness.
pub const STALE_NAN_BITS: u64 = 0x7ff0_0000_0000_0002;

/// The stale-marker value
pub fn stale_nan() -> f64 {
    f64::from_bits(STALE_NAN_BITS)
}

/// Check whether a value is the stale marker
#[inline]
pub fn is_stale_nan(value: f64) -> bool {
    value.to_bits() == STALE_NAN_BITS
}

/// A single time-series sample
///
/// # Example
///
/// ```rust
/// use kuba_rangevec::types::Point;
///
/// let p = Point::new(60_000, 10.0);
/// assert_eq!(p.timestamp, 60_000);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Unix timestamp in milliseconds
    pub timestamp: i64,

    /// Sample value (any IEEE 754 double, including the stale marker)
    pub value: f64,
}

impl Point {
    /// Create a new point
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }

    /// Whether this point is a stale marker
    #[inline]
    pub fn is_stale(&self) -> bool {
        is_stale_nan(self.value)
    }
}

/// A single label name/value pair
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label {
    /// Label name
    pub name: String,
    /// Label value
    pub value: String,
}

impl Label {
    /// Create a new label
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Immutable label set identifying a series
///
/// Labels are kept sorted by name with unique names, so equality, ordering and
/// hashing depend only on content. Cloning is cheap: the pairs are shared.
///
/// # Example
///
/// ```rust
/// use kuba_rangevec::types::Labels;
///
/// let a = Labels::from_pairs([("job", "api"), ("__name__", "up")]);
/// let b = Labels::from_pairs([("__name__", "up"), ("job", "api")]);
///
/// // Insertion order does not matter
/// assert_eq!(a, b);
/// assert_eq!(a.to_string(), r#"up{job="api"}"#);
/// ```
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Labels(Arc<[Label]>);

impl Labels {
    /// Create an empty label set
    pub fn empty() -> Self {
        Self(Arc::from(Vec::new()))
    }

    /// Build a label set from arbitrary labels
    ///
    /// Labels are sorted by name. When a name repeats, the last value wins.
    pub fn new(mut labels: Vec<Label>) -> Self {
        // Stable sort keeps insertion order among equal names, then keep the last
        labels.sort_by(|a, b| a.name.cmp(&b.name));
        let mut deduped: Vec<Label> = Vec::with_capacity(labels.len());
        for label in labels {
            match deduped.last_mut() {
                Some(last) if last.name == label.name => *last = label,
                _ => deduped.push(label),
            }
        }
        Self(deduped.into())
    }

    /// Build a label set from name/value pairs
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::new(pairs.into_iter().map(|(k, v)| Label::new(k, v)).collect())
    }

    /// Look up a label value by name
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .binary_search_by(|l| l.name.as_str().cmp(name))
            .ok()
            .map(|idx| self.0[idx].value.as_str())
    }

    /// Metric name, if the `__name__` label is present
    pub fn metric_name(&self) -> Option<&str> {
        self.get(METRIC_NAME_LABEL)
    }

    /// Iterate over labels in name order
    pub fn iter(&self) -> std::slice::Iter<'_, Label> {
        self.0.iter()
    }

    /// Number of labels
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the label set is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for Labels {
    fn default() -> Self {
        Self::empty()
    }
}

impl<'a> IntoIterator for &'a Labels {
    type Item = &'a Label;
    type IntoIter = std::slice::Iter<'a, Label>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Display for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = self.metric_name() {
            write!(f, "{}", name)?;
        }
        write!(f, "{{")?;
        let mut first = true;
        for label in self.0.iter().filter(|l| l.name != METRIC_NAME_LABEL) {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{}=\"{}\"", label.name, label.value)?;
            first = false;
        }
        write!(f, "}}")
    }
}

impl fmt::Debug for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Labels({})", self)
    }
}

/// One entry of an instant vector
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Series identity
    pub labels: Labels,
    /// Computed point, stamped at the evaluation time
    pub point: Point,
}

impl Sample {
    /// Create a new sample
    pub fn new(labels: Labels, point: Point) -> Self {
        Self { labels, point }
    }
}

/// Per-step operator output: one sample per series that produced a result
pub type InstantVector = Vec<Sample>;

/// All points of one series over a range query
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesPoints {
    /// Series identity
    pub labels: Labels,
    /// Points in timestamp order
    pub points: Vec<Point>,
}

/// Range query result regrouped by series, sorted by labels
pub type Matrix = Vec<SeriesPoints>;

/// Time range (inclusive on both ends)
///
/// # Example
///
/// ```rust
/// use kuba_rangevec::types::TimeRange;
///
/// let range = TimeRange::new(1000, 2000).unwrap();
/// assert!(range.contains(1000));
/// assert!(range.contains(2000));
/// assert!(!range.contains(2001));
/// assert_eq!(range.duration_ms(), Some(1000));
///
/// assert!(TimeRange::new(2000, 1000).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start timestamp in milliseconds (inclusive)
    pub start: i64,

    /// End timestamp in milliseconds (inclusive)
    pub end: i64,
}

impl TimeRange {
    /// Create a new time range, rejecting `start > end`
    pub fn new(start: i64, end: i64) -> Result<Self, crate::error::Error> {
        if start > end {
            return Err(crate::error::Error::Configuration(format!(
                "Invalid time range: start {} > end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Check if a timestamp falls within this range (inclusive)
    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }

    /// Check if two ranges share at least one timestamp
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Duration of this range in milliseconds, `None` on overflow
    pub fn duration_ms(&self) -> Option<i64> {
        self.end.checked_sub(self.start)
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        Self {
            start: i64::MIN,
            end: i64::MAX,
        }
    }
}
