//! Window functions applied to the points selected for each step
//!
//! A window function maps the ordered, stale-free points of one series'
//! window plus the evaluation timestamp to at most one output point. Returning
//! `None` is a normal outcome (too few points, empty window) and simply means
//! the series is absent from that step's vector.
//!
//! Output points are always stamped with the evaluation timestamp.
//!
//! # Example
//!
//! ```rust
//! use kuba_rangevec::query::functions::window_function;
//! use kuba_rangevec::types::Point;
//!
//! let rate = window_function("rate", 60_000).unwrap();
//! let points = [Point::new(0, 0.0), Point::new(30_000, 30.0), Point::new(60_000, 60.0)];
//! let out = rate.call(&points, 60_000).unwrap();
//! assert_eq!(out.timestamp, 60_000);
//! assert!((out.value - 1.0).abs() < 1e-9);
//! ```

use crate::types::Point;
use std::fmt;
use std::sync::Arc;

/// Name of the window function used when none is specified
pub const DEFAULT_FUNCTION: &str = "rate";

/// Stateless transform from a window of points to an optional output point
pub trait WindowFunction: Send + Sync + fmt::Debug {
    /// PromQL name of the function
    fn name(&self) -> &'static str;

    /// Evaluate the window
    ///
    /// `points` are strictly increasing in timestamp and contain no stale
    /// markers. Implementations must not assume a minimum length.
    fn call(&self, points: &[Point], eval_time: i64) -> Option<Point>;
}

/// Look up a window function by name
///
/// `select_range` is the window length in milliseconds; functions that
/// extrapolate to the window boundaries need it.
pub fn window_function(name: &str, select_range: i64) -> Option<Arc<dyn WindowFunction>> {
    let function: Arc<dyn WindowFunction> = match name {
        "rate" => Arc::new(ExtrapolatedRate::rate(select_range)),
        "increase" => Arc::new(ExtrapolatedRate::increase(select_range)),
        "delta" => Arc::new(ExtrapolatedRate::delta(select_range)),
        "irate" => Arc::new(InstantDelta::irate()),
        "idelta" => Arc::new(InstantDelta::idelta()),
        "sum_over_time" => Arc::new(OverTime::new("sum_over_time", sum_kahan)),
        "avg_over_time" => Arc::new(OverTime::new("avg_over_time", avg_kahan)),
        "min_over_time" => Arc::new(OverTime::new("min_over_time", min_value)),
        "max_over_time" => Arc::new(OverTime::new("max_over_time", max_value)),
        "count_over_time" => Arc::new(OverTime::new("count_over_time", |p| p.len() as f64)),
        "last_over_time" => Arc::new(LastOverTime),
        "present_over_time" => Arc::new(OverTime::new("present_over_time", |_| 1.0)),
        "stddev_over_time" => Arc::new(OverTime::new("stddev_over_time", |p| {
            variance(p).sqrt()
        })),
        "stdvar_over_time" => Arc::new(OverTime::new("stdvar_over_time", variance)),
        _ => return None,
    };
    Some(function)
}

/// Names accepted by [`window_function`]
pub fn function_names() -> &'static [&'static str] {
    &[
        "rate",
        "increase",
        "delta",
        "irate",
        "idelta",
        "sum_over_time",
        "avg_over_time",
        "min_over_time",
        "max_over_time",
        "count_over_time",
        "last_over_time",
        "present_over_time",
        "stddev_over_time",
        "stdvar_over_time",
    ]
}

// ============================================================================
// Extrapolated rate / increase / delta
// ============================================================================

/// `rate`, `increase` and `delta` with Prometheus extrapolation
///
/// The raw difference between the first and last sample is extrapolated
/// towards the window boundaries. Extrapolation stops half an average sample
/// interval short of a boundary when the nearest sample is more than 1.1
/// average intervals away from it. Counters additionally correct for resets
/// and are never extrapolated below zero.
#[derive(Debug, Clone, Copy)]
pub struct ExtrapolatedRate {
    name: &'static str,
    range_ms: i64,
    is_counter: bool,
    is_rate: bool,
}

impl ExtrapolatedRate {
    /// Per-second counter rate
    pub fn rate(range_ms: i64) -> Self {
        Self {
            name: "rate",
            range_ms,
            is_counter: true,
            is_rate: true,
        }
    }

    /// Counter increase over the window
    pub fn increase(range_ms: i64) -> Self {
        Self {
            name: "increase",
            range_ms,
            is_counter: true,
            is_rate: false,
        }
    }

    /// Gauge difference over the window
    pub fn delta(range_ms: i64) -> Self {
        Self {
            name: "delta",
            range_ms,
            is_counter: false,
            is_rate: false,
        }
    }
}

impl WindowFunction for ExtrapolatedRate {
    fn name(&self) -> &'static str {
        self.name
    }

    fn call(&self, points: &[Point], eval_time: i64) -> Option<Point> {
        let (first, last) = match points {
            [first, .., last] => (first, last),
            _ => return None,
        };

        let range_start = eval_time - self.range_ms;
        let range_end = eval_time;

        let mut result = last.value - first.value;
        if self.is_counter {
            let mut previous = 0.0;
            for p in points {
                if p.value < previous {
                    result += previous;
                }
                previous = p.value;
            }
        }

        let mut duration_to_start = (first.timestamp - range_start) as f64 / 1000.0;
        let duration_to_end = (range_end - last.timestamp) as f64 / 1000.0;
        let sampled_interval = (last.timestamp - first.timestamp) as f64 / 1000.0;
        let average_interval = sampled_interval / (points.len() - 1) as f64;

        if self.is_counter && result > 0.0 && first.value >= 0.0 {
            let duration_to_zero = sampled_interval * (first.value / result);
            if duration_to_zero < duration_to_start {
                duration_to_start = duration_to_zero;
            }
        }

        let threshold = average_interval * 1.1;
        let mut extrapolate_to = sampled_interval;
        extrapolate_to += if duration_to_start < threshold {
            duration_to_start
        } else {
            average_interval / 2.0
        };
        extrapolate_to += if duration_to_end < threshold {
            duration_to_end
        } else {
            average_interval / 2.0
        };

        result *= extrapolate_to / sampled_interval;
        if self.is_rate {
            result /= self.range_ms as f64 / 1000.0;
        }
        Some(Point::new(eval_time, result))
    }
}

// ============================================================================
// irate / idelta
// ============================================================================

/// `irate` / `idelta`: difference between the last two samples
#[derive(Debug, Clone, Copy)]
pub struct InstantDelta {
    is_rate: bool,
}

impl InstantDelta {
    /// Per-second rate between the last two samples
    pub fn irate() -> Self {
        Self { is_rate: true }
    }

    /// Difference between the last two samples
    pub fn idelta() -> Self {
        Self { is_rate: false }
    }
}

impl WindowFunction for InstantDelta {
    fn name(&self) -> &'static str {
        if self.is_rate {
            "irate"
        } else {
            "idelta"
        }
    }

    fn call(&self, points: &[Point], eval_time: i64) -> Option<Point> {
        let (previous, last) = match points {
            [.., previous, last] => (previous, last),
            _ => return None,
        };

        let interval_ms = last.timestamp - previous.timestamp;
        if interval_ms == 0 {
            return None;
        }

        let mut value = if self.is_rate && last.value < previous.value {
            // Counter reset
            last.value
        } else {
            last.value - previous.value
        };
        if self.is_rate {
            value /= interval_ms as f64 / 1000.0;
        }
        Some(Point::new(eval_time, value))
    }
}

// ============================================================================
// *_over_time aggregations
// ============================================================================

/// Aggregation of all values in the window
#[derive(Clone, Copy)]
pub struct OverTime {
    name: &'static str,
    reduce: fn(&[Point]) -> f64,
}

impl OverTime {
    /// Create an aggregation from a reducer over a non-empty window
    pub fn new(name: &'static str, reduce: fn(&[Point]) -> f64) -> Self {
        Self { name, reduce }
    }
}

impl fmt::Debug for OverTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverTime").field("name", &self.name).finish()
    }
}

impl WindowFunction for OverTime {
    fn name(&self) -> &'static str {
        self.name
    }

    fn call(&self, points: &[Point], eval_time: i64) -> Option<Point> {
        if points.is_empty() {
            return None;
        }
        Some(Point::new(eval_time, (self.reduce)(points)))
    }
}

/// Latest sample in the window, stamped at the evaluation time
///
/// Also backs the instant vector selector.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastOverTime;

impl WindowFunction for LastOverTime {
    fn name(&self) -> &'static str {
        "last_over_time"
    }

    fn call(&self, points: &[Point], eval_time: i64) -> Option<Point> {
        points.last().map(|p| Point::new(eval_time, p.value))
    }
}

// ============================================================================
// Numeric helpers
// ============================================================================

/// Neumaier-compensated summation step, returns `(sum, compensation)`
#[inline(never)]
// Not inlined: reordering of the float operations loses the compensation
fn kahan_inc(inc: f64, sum: f64, c: f64) -> (f64, f64) {
    let t = sum + inc;
    let c = if t.is_infinite() {
        0.0
    } else if sum.abs() >= inc.abs() {
        c + ((sum - t) + inc)
    } else {
        c + ((inc - t) + sum)
    };
    (t, c)
}

fn sum_kahan(points: &[Point]) -> f64 {
    let (sum, c) = points
        .iter()
        .fold((0.0, 0.0), |(sum, c), p| kahan_inc(p.value, sum, c));
    if sum.is_infinite() {
        sum
    } else {
        sum + c
    }
}

/// Mean with compensated summation, falling back to an incremental mean once
/// the running sum overflows
fn avg_kahan(points: &[Point]) -> f64 {
    if points.len() == 1 {
        return points[0].value;
    }

    let mut sum = points[0].value;
    let mut c = 0.0;
    let mut mean = 0.0;
    let mut incremental = false;

    for (i, p) in points.iter().enumerate().skip(1) {
        let count = (i + 1) as f64;
        if !incremental {
            let (next_sum, next_c) = kahan_inc(p.value, sum, c);
            if !next_sum.is_infinite() {
                sum = next_sum;
                c = next_c;
                continue;
            }
            incremental = true;
            mean = sum / (count - 1.0);
            c /= count - 1.0;
        }
        let q = (count - 1.0) / count;
        (mean, c) = kahan_inc(p.value / count, q * mean, q * c);
    }

    if incremental {
        mean + c
    } else {
        let count = points.len() as f64;
        sum / count + c / count
    }
}

/// Smallest value; NaN only if every value is NaN
fn min_value(points: &[Point]) -> f64 {
    points[1..].iter().fold(points[0].value, |min, p| {
        if p.value < min || min.is_nan() {
            p.value
        } else {
            min
        }
    })
}

/// Largest value; NaN only if every value is NaN
fn max_value(points: &[Point]) -> f64 {
    points[1..].iter().fold(points[0].value, |max, p| {
        if p.value > max || max.is_nan() {
            p.value
        } else {
            max
        }
    })
}

/// Population variance (Welford with compensated accumulators)
fn variance(points: &[Point]) -> f64 {
    let mut count = 0.0;
    let (mut mean, mut c_mean) = (0.0, 0.0);
    let (mut m2, mut c_m2) = (0.0, 0.0);

    for p in points {
        count += 1.0;
        let delta = p.value - (mean + c_mean);
        (mean, c_mean) = kahan_inc(delta / count, mean, c_mean);
        let new_delta = p.value - (mean + c_mean);
        (m2, c_m2) = kahan_inc(delta * new_delta, m2, c_m2);
    }
    (m2 + c_m2) / count
}
