//! Wall-clock access and midnight-aligned tick scheduling
//!
//! Both monitoring loops sleep until the next boundary that is an exact
//! multiple of their interval counted from local midnight, so ticks land on
//! the same wall-clock instants regardless of when the process started.

use std::time::Duration;

use chrono::{DateTime, Local, Timelike, Utc};

/// Smallest interval the aligner accepts, in seconds
pub const MIN_TICK_INTERVAL: f64 = 0.1;

/// Largest interval the aligner accepts, one day
pub const MAX_TICK_INTERVAL: f64 = 86_400.0;

/// Distance from a boundary under which the caller counts as "on" it
const BOUNDARY_EPSILON: f64 = 0.01;

/// Seconds until the next aligned boundary
///
/// `elapsed_since_midnight` is the local wall-clock time of day in seconds.
/// On (or within 10ms after) a boundary this returns the full interval,
/// never a near-zero sleep.
pub fn seconds_until_next_tick(elapsed_since_midnight: f64, interval_seconds: f64) -> f64 {
    let interval = if interval_seconds.is_finite() {
        interval_seconds.clamp(MIN_TICK_INTERVAL, MAX_TICK_INTERVAL)
    } else {
        MIN_TICK_INTERVAL
    };

    let remainder = elapsed_since_midnight.max(0.0) % interval;
    if remainder < BOUNDARY_EPSILON {
        return interval;
    }
    (interval - remainder).max(0.001)
}

/// Local wall-clock seconds since midnight for `now`
pub fn seconds_since_local_midnight(now: DateTime<Local>) -> f64 {
    // leap seconds report nanoseconds above 1e9
    let nanos = now.nanosecond().min(999_999_999);
    now.num_seconds_from_midnight() as f64 + nanos as f64 / 1e9
}

/// Source of "now" and of tick delays for the monitoring loops
pub trait Clock: Send + Sync {
    /// Current instant, used to timestamp samples and periods
    fn now(&self) -> DateTime<Utc>;

    /// How long to sleep before the next aligned tick
    fn until_next_tick(&self, interval_seconds: f64) -> Duration;
}

/// The real clock, aligned to the host's local midnight
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn until_next_tick(&self, interval_seconds: f64) -> Duration {
        let elapsed = seconds_since_local_midnight(Local::now());
        let wait = seconds_until_next_tick(elapsed, interval_seconds);
        Duration::try_from_secs_f64(wait).unwrap_or(Duration::from_secs_f64(MAX_TICK_INTERVAL))
    }
}
