//! # Heartbeat protocol.
//!
//! The supervisor broadcasts `heartbeat{timestamp}` to every live worker at a fixed
//! interval. Each worker runs a [`HeartbeatWatchdog`] ticking at the same interval:
//!
//! ```text
//! supervisor                           worker
//!   every interval ── heartbeat{T} ──►   watchdog.record(T)
//!                                        every interval:
//!                                          check(now)
//!                                            ├─ Waiting  (nothing received yet, grace)
//!                                            ├─ Alive    (now - last <= tolerance × interval)
//!                                            └─ Stale    → report orphan, exit
//! ```
//!
//! The watchdog is pure state. Callers feed it timestamps and the current time so it
//! can be tested without a clock.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Default broadcast interval.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// Default number of intervals a worker tolerates without a heartbeat.
pub const DEFAULT_TOLERANCE: u32 = 32;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis().min(u128::from(u64::MAX)) as u64)
        .unwrap_or(0)
}

/// Outcome of one watchdog check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// No heartbeat has ever been received.
    Waiting,
    /// The last heartbeat is recent enough.
    Alive,
    /// The supervisor is considered gone.
    Stale {
        /// Timestamp of the last heartbeat received.
        last: u64,
    },
}

/// Worker-side staleness detector.
#[derive(Debug, Clone)]
pub struct HeartbeatWatchdog {
    interval: Duration,
    tolerance: u32,
    last: Option<u64>,
}

impl HeartbeatWatchdog {
    /// Creates a watchdog for the given interval and tolerance multiple.
    pub fn new(interval: Duration, tolerance: u32) -> Self {
        Self {
            interval,
            tolerance: tolerance.max(1),
            last: None,
        }
    }

    /// Returns the tick interval.
    #[inline]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Records a received heartbeat. The stored value is exactly `timestamp`.
    #[inline]
    pub fn record(&mut self, timestamp: u64) {
        self.last = Some(timestamp);
    }

    /// Timestamp of the last heartbeat, if any.
    #[inline]
    pub fn last_seen(&self) -> Option<u64> {
        self.last
    }

    /// Staleness window in milliseconds.
    #[inline]
    pub fn window_ms(&self) -> u64 {
        let ms = self.interval.as_millis().min(u128::from(u64::MAX)) as u64;
        ms.saturating_mul(u64::from(self.tolerance))
    }

    /// Evaluates staleness at `now` (ms since the epoch).
    pub fn check(&self, now: u64) -> Verdict {
        match self.last {
            None => Verdict::Waiting,
            Some(last) if now.saturating_sub(last) > self.window_ms() => Verdict::Stale { last },
            Some(_) => Verdict::Alive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waits_until_first_heartbeat() {
        let dog = HeartbeatWatchdog::new(Duration::from_millis(100), 32);
        assert_eq!(dog.check(u64::MAX), Verdict::Waiting);
    }

    #[test]
    fn record_stores_exact_timestamp() {
        let mut dog = HeartbeatWatchdog::new(DEFAULT_INTERVAL, DEFAULT_TOLERANCE);
        dog.record(1_700_000_000_042);
        assert_eq!(dog.last_seen(), Some(1_700_000_000_042));
    }

    #[test]
    fn stale_after_tolerance_intervals() {
        let mut dog = HeartbeatWatchdog::new(Duration::from_millis(100), 32);
        dog.record(10_000);
        assert_eq!(dog.window_ms(), 3_200);
        assert_eq!(dog.check(10_000 + 3_200), Verdict::Alive);
        assert_eq!(
            dog.check(10_000 + 3_201),
            Verdict::Stale { last: 10_000 }
        );
    }

    #[test]
    fn clock_skew_backwards_is_alive() {
        let mut dog = HeartbeatWatchdog::new(Duration::from_millis(100), 2);
        dog.record(50_000);
        assert_eq!(dog.check(40_000), Verdict::Alive);
    }
}
