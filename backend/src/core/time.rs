//! Time management for the simulation
//!
//! Simulated time is real calendar time (`DateTime<Utc>`). The driver advances
//! a global clock tick by tick; each tick boundary is either the wall-clock
//! "now" (online mode) or the previous boundary plus a fixed increment
//! (offline/batch mode), re-evaluated every tick.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::rc::Rc;
use thiserror::Error;

/// Simulated instant.
pub type Timestamp = DateTime<Utc>;

pub const SECONDS_IN_DAY: i64 = 24 * 60 * 60;

/// Fixed look-ahead window an actor expands at once.
pub fn schedule_window() -> Duration {
    Duration::days(1)
}

/// Convert fractional seconds to a millisecond-precision duration.
///
/// ```
/// use synthetic_events_core_rs::core::time::seconds;
///
/// assert_eq!(seconds(1.5).num_milliseconds(), 1500);
/// ```
pub fn seconds(value: f64) -> Duration {
    Duration::milliseconds((value * 1000.0).round() as i64)
}

// ============================================================================
// Wall clock
// ============================================================================

/// Source of real time. Only consulted by the driver to pick the clock mode
/// and the online tick boundary.
pub trait WallClock {
    fn now(&self) -> Timestamp;

    /// Block until `duration` has passed.
    fn sleep(&mut self, duration: Duration);
}

/// Production clock backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }

    fn sleep(&mut self, duration: Duration) {
        if let Ok(std_duration) = duration.to_std() {
            std::thread::sleep(std_duration);
        }
    }
}

/// Hand-driven clock for tests. Sleeping advances the clock instead of
/// blocking. Clones share the same instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Rc<Cell<Timestamp>>,
}

impl ManualClock {
    pub fn new(now: Timestamp) -> Self {
        Self {
            now: Rc::new(Cell::new(now)),
        }
    }

    pub fn set(&self, now: Timestamp) {
        self.now.set(now);
    }

    pub fn advance(&self, duration: Duration) {
        self.now.set(self.now.get() + duration);
    }
}

impl WallClock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.get()
    }

    fn sleep(&mut self, duration: Duration) {
        self.advance(duration);
    }
}

// ============================================================================
// Global clock
// ============================================================================

/// How the next tick boundary is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockMode {
    /// Boundary is the wall-clock "now"; the loop sleeps between ticks.
    Online,
    /// Boundary is `last_seen_ts + increment`, capped at the simulation end.
    Offline,
}

/// Boundary chosen for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickBoundary {
    pub end_ts: Timestamp,
    pub mode: ClockMode,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClockError {
    #[error("Clock cannot move backwards: at {current}, requested {requested}")]
    Regression {
        current: Timestamp,
        requested: Timestamp,
    },
}

/// Manages the global simulated clock.
///
/// # Example
/// ```
/// use chrono::{Duration, TimeZone, Utc};
/// use synthetic_events_core_rs::core::time::{ClockMode, TimeManager};
///
/// let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
/// let end = Utc.with_ymd_and_hms(2020, 1, 1, 3, 0, 0).unwrap();
/// let mut time = TimeManager::new(start, Some(end), Duration::hours(1));
///
/// let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
/// let boundary = time.next_boundary(now);
/// assert_eq!(boundary.mode, ClockMode::Offline);
/// assert_eq!(boundary.end_ts, start + Duration::hours(1));
///
/// time.advance_to(boundary.end_ts).unwrap();
/// assert_eq!(time.tick_count(), 1);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeManager {
    /// Instant up to which every actor and the relay have been accounted for
    last_seen_ts: Timestamp,
    /// Optional hard stop for the simulation
    end_ts: Option<Timestamp>,
    /// Offline tick size
    #[serde(with = "duration_seconds")]
    increment: Duration,
    /// Distance from real time below which the loop runs online
    #[serde(with = "duration_seconds")]
    online_threshold: Duration,
    /// Completed ticks
    tick_count: u64,
}

impl TimeManager {
    /// # Panics
    /// Panics if `increment` is not positive.
    pub fn new(start_ts: Timestamp, end_ts: Option<Timestamp>, increment: Duration) -> Self {
        assert!(increment > Duration::zero(), "increment must be positive");
        Self {
            last_seen_ts: start_ts,
            end_ts,
            increment,
            online_threshold: Duration::hours(1),
            tick_count: 0,
        }
    }

    pub fn with_online_threshold(mut self, threshold: Duration) -> Self {
        self.online_threshold = threshold;
        self
    }

    pub fn last_seen_ts(&self) -> Timestamp {
        self.last_seen_ts
    }

    pub fn end_ts(&self) -> Option<Timestamp> {
        self.end_ts
    }

    pub fn increment(&self) -> Duration {
        self.increment
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// True once the clock has reached the configured end.
    pub fn is_finished(&self) -> bool {
        self.end_ts.map_or(false, |end| self.last_seen_ts >= end)
    }

    /// Online when the simulated clock is ahead of, or within the threshold
    /// of, real time.
    pub fn mode(&self, now: Timestamp) -> ClockMode {
        if self.last_seen_ts >= now || now - self.last_seen_ts < self.online_threshold {
            ClockMode::Online
        } else {
            ClockMode::Offline
        }
    }

    /// Choose the next tick boundary. Never earlier than the current clock,
    /// never later than the configured end.
    pub fn next_boundary(&self, now: Timestamp) -> TickBoundary {
        let mode = self.mode(now);
        let mut end_ts = match mode {
            ClockMode::Online => now.max(self.last_seen_ts),
            ClockMode::Offline => (self.last_seen_ts + self.increment).min(now),
        };
        if let Some(end) = self.end_ts {
            end_ts = end_ts.min(end);
        }
        TickBoundary {
            end_ts: end_ts.max(self.last_seen_ts),
            mode,
        }
    }

    /// Commit a tick boundary.
    pub fn advance_to(&mut self, ts: Timestamp) -> Result<(), ClockError> {
        if ts < self.last_seen_ts {
            return Err(ClockError::Regression {
                current: self.last_seen_ts,
                requested: ts,
            });
        }
        self.last_seen_ts = ts;
        self.tick_count += 1;
        Ok(())
    }

    /// Restore a committed clock from a checkpoint.
    pub fn restore(&mut self, last_seen_ts: Timestamp, tick_count: u64) {
        self.last_seen_ts = last_seen_ts;
        self.tick_count = tick_count;
    }
}

/// Serde adapter storing a `chrono::Duration` as whole seconds.
pub mod duration_seconds {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(duration.num_seconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = i64::deserialize(deserializer)?;
        Ok(Duration::seconds(secs))
    }
}
