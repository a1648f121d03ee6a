//! Sliding time windows for harvest and proxied-query cursors.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A time window with two endpoints.
///
/// The endpoints are *not* required to be in chronological order: a window
/// built as `(now, now - 30m)` is a legitimate backward-looking query range.
/// [`earliest`](DatetimeInterval::earliest) and
/// [`latest`](DatetimeInterval::latest) sort the endpoints, so range tests
/// never depend on construction order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatetimeInterval {
    pub begin: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DatetimeInterval {
    /// Build a window from two endpoints, in either order.
    pub fn new(begin: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { begin, end }
    }

    /// A forward window of `width` starting at `begin`.
    pub fn starting_at(begin: DateTime<Utc>, width: Duration) -> Self {
        Self {
            begin,
            end: begin + width,
        }
    }

    /// A backward-looking window of `width` ending now.
    pub fn lookback(width: Duration) -> Self {
        let now = Utc::now();
        Self {
            begin: now - width,
            end: now,
        }
    }

    /// The chronologically earlier endpoint.
    pub fn earliest(&self) -> DateTime<Utc> {
        self.begin.min(self.end)
    }

    /// The chronologically later endpoint.
    pub fn latest(&self) -> DateTime<Utc> {
        self.begin.max(self.end)
    }

    /// Absolute width of the window.
    pub fn width(&self) -> Duration {
        self.latest() - self.earliest()
    }

    /// The signed advance increment, `end - begin`. Negative for
    /// backward-looking windows, so advancing walks further into the past.
    pub fn increment(&self) -> Duration {
        self.end - self.begin
    }

    /// Shift both endpoints by the current increment, preserving width.
    pub fn advance(&mut self) {
        let step = self.increment();
        self.begin += step;
        self.end += step;
    }

    /// Half-open membership test on `[earliest, latest)`.
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.earliest() && t < self.latest()
    }
}

impl fmt::Display for DatetimeInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} .. {})",
            self.earliest().to_rfc3339(),
            self.latest().to_rfc3339()
        )
    }
}
