//! Buffered series iterator
//!
//! Wraps a [`SampleIterator`] so that seeking forward keeps the samples it
//! walks over in a trailing ring buffer instead of discarding them. The
//! windowing algorithm seeks to each evaluation timestamp and then reads the
//! samples that fell inside the window from the buffer.
//!
//! ```text
//!            buffer (t < last seek)        current (t >= last seek)
//!   ... ─┬──────┬──────┬──────┬─────────────────┬──────► time
//!       s1     s2     s3     s4                s5
//!        └──── horizon ─────┘
//! ```
//!
//! Two bounds keep the buffer small:
//!
//! - On every append, samples older than `newest - horizon` are evicted.
//! - [`BufferedSeriesIterator::trim`] drops samples older than
//!   `last_seek - horizon` for a caller-chosen, possibly smaller horizon.

use super::SampleIterator;
use crate::error::StorageError;
use crate::types::Point;
use std::collections::VecDeque;

// =============================================================================
// Sample Ring
// =============================================================================

/// Ordered trailing buffer that evicts samples outside `delta` of the newest
#[derive(Debug, Clone)]
struct SampleRing {
    delta: i64,
    samples: VecDeque<Point>,
}

impl SampleRing {
    fn new(delta: i64) -> Self {
        Self {
            delta,
            samples: VecDeque::with_capacity(16),
        }
    }

    fn push(&mut self, point: Point) {
        let min_time = point.timestamp.saturating_sub(self.delta);
        self.samples.push_back(point);
        self.drop_before(min_time);
    }

    /// Drop samples with `timestamp < min_time`
    fn drop_before(&mut self, min_time: i64) -> usize {
        let mut dropped = 0;
        while matches!(self.samples.front(), Some(p) if p.timestamp < min_time) {
            self.samples.pop_front();
            dropped += 1;
        }
        dropped
    }

    fn clear(&mut self) {
        self.samples.clear();
    }
}

// =============================================================================
// Buffered Series Iterator
// =============================================================================

/// Seekable iterator that remembers a bounded tail of consumed samples
pub struct BufferedSeriesIterator {
    it: Box<dyn SampleIterator>,
    buf: SampleRing,
    /// Sample the underlying iterator sits on
    current: Option<Point>,
    exhausted: bool,
    last_seek: i64,
}

impl BufferedSeriesIterator {
    /// Wrap `it`, buffering up to `horizon` milliseconds behind the newest sample
    pub fn new(it: Box<dyn SampleIterator>, horizon: i64) -> Self {
        Self {
            it,
            buf: SampleRing::new(horizon.max(0)),
            current: None,
            exhausted: false,
            last_seek: i64::MIN,
        }
    }

    /// Advance to the first sample with `timestamp >= t`
    ///
    /// Returns `true` if such a sample exists; [`at`](Self::at) then returns
    /// it. Samples walked over are appended to the buffer. If the gap to `t`
    /// is larger than the horizon, the buffer is dropped and the underlying
    /// iterator seeks directly to `t - horizon`.
    ///
    /// Once the underlying iterator is exhausted the buffer is kept, so later
    /// windows can still read the trailing samples.
    pub fn seek(&mut self, t: i64) -> Result<bool, StorageError> {
        self.last_seek = t;
        if self.exhausted {
            return Ok(false);
        }

        let t0 = t.saturating_sub(self.buf.delta);
        let skip = match self.current {
            None => true,
            Some(p) => t0 > p.timestamp,
        };
        if skip {
            self.buf.clear();
            self.current = self.it.seek(t0)?;
        }

        loop {
            match self.current {
                Some(p) if p.timestamp >= t => return Ok(true),
                Some(p) => {
                    self.buf.push(p);
                    self.current = self.it.next()?;
                }
                None => {
                    self.exhausted = true;
                    return Ok(false);
                }
            }
        }
    }

    /// Sample the iterator sits on after a successful [`seek`](Self::seek)
    pub fn at(&self) -> Option<Point> {
        if self.exhausted {
            None
        } else {
            self.current
        }
    }

    /// Buffered samples strictly before the last seek target, oldest first
    ///
    /// Each call starts a fresh pass over the buffer.
    pub fn buffer(&self) -> impl Iterator<Item = Point> + '_ {
        let bound = self.last_seek;
        self.buf
            .samples
            .iter()
            .copied()
            .take_while(move |p| p.timestamp < bound)
    }

    /// Drop buffered samples older than `last_seek - horizon`
    ///
    /// Negative horizons are treated as zero. Returns the number of samples
    /// released.
    pub fn trim(&mut self, horizon: i64) -> usize {
        let min_time = self.last_seek.saturating_sub(horizon.max(0));
        self.buf.drop_before(min_time)
    }
}

impl std::fmt::Debug for BufferedSeriesIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedSeriesIterator")
            .field("current", &self.current)
            .field("buffered", &self.buf.samples.len())
            .field("exhausted", &self.exhausted)
            .field("last_seek", &self.last_seek)
            .finish()
    }
}
