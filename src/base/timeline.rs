//! Monotonic time sources for keep-alive deadlines.
//!
//! A [`Deadline`] is an instant on a [`TimeLine`], measured as the offset from
//! that time line's origin. Deadlines from different time lines must not be
//! compared.

use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// An instant on a monotonic time line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Deadline(Duration);

impl Deadline {
    /// The origin of the time line.
    pub const ORIGIN: Deadline = Deadline(Duration::ZERO);

    /// Create a deadline at `offset` past the origin.
    pub const fn from_offset(offset: Duration) -> Self {
        Deadline(offset)
    }

    /// Create a deadline `secs` whole seconds past the origin.
    pub const fn from_secs(secs: u64) -> Self {
        Deadline(Duration::from_secs(secs))
    }

    /// Create a deadline `millis` milliseconds past the origin.
    pub const fn from_millis(millis: u64) -> Self {
        Deadline(Duration::from_millis(millis))
    }

    /// Offset of this deadline from the origin.
    pub fn offset(&self) -> Duration {
        self.0
    }

    /// Drop the sub-second part.
    pub fn truncated_to_secs(&self) -> Self {
        Deadline(Duration::from_secs(self.0.as_secs()))
    }

    /// Deadline `secs` seconds later, saturating at the end of the time line.
    pub fn plus_secs(&self, secs: u64) -> Self {
        Deadline(self.0.saturating_add(Duration::from_secs(secs)))
    }

    pub fn is_before(&self, other: &Deadline) -> bool {
        self < other
    }

    pub fn is_after(&self, other: &Deadline) -> bool {
        self > other
    }

    /// Whole milliseconds from `self` until `later`; zero if `later` is not after `self`.
    pub fn millis_until(&self, later: &Deadline) -> u64 {
        let millis = later.0.saturating_sub(self.0).as_millis();
        u64::try_from(millis).unwrap_or(u64::MAX)
    }
}

impl fmt::Display for Deadline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T+{}ms", self.0.as_millis())
    }
}

/// A monotonic clock.
pub trait TimeLine: Send + Sync + fmt::Debug {
    /// The current instant on this time line.
    fn now(&self) -> Deadline;
}

/// Time line backed by [`Instant`], with its origin at construction time.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl TimeLine for MonotonicClock {
    fn now(&self) -> Deadline {
        Deadline::from_offset(self.origin.elapsed())
    }
}

/// Time line backed by tokio's clock, so it follows `tokio::time::pause`
/// and `advance` in tests.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    origin: tokio::time::Instant,
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TokioClock {
    pub fn new() -> Self {
        Self { origin: tokio::time::Instant::now() }
    }
}

impl TimeLine for TokioClock {
    fn now(&self) -> Deadline {
        Deadline::from_offset(self.origin.elapsed())
    }
}

/// A time line that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
}

impl ManualClock {
    /// Create a clock standing at the origin.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a clock standing at `deadline`.
    pub fn at(deadline: Deadline) -> Self {
        Self { now: Mutex::new(deadline.offset()) }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = now.saturating_add(by);
    }

    /// Jump to `deadline`. Moving backwards is ignored.
    pub fn set(&self, deadline: Deadline) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        if deadline.offset() > *now {
            *now = deadline.offset();
        }
    }
}

impl TimeLine for ManualClock {
    fn now(&self) -> Deadline {
        Deadline::from_offset(*self.now.lock().unwrap_or_else(|e| e.into_inner()))
    }
}
