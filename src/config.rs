//! # Supervisor configuration.
//!
//! Provides [`PoolConfig`] for [`PoolSupervisor`](crate::PoolSupervisor) and
//! [`ChildConfig`] for [`ChildSupervisor`](crate::ChildSupervisor).
//!
//! Both are plain structs with public fields and a [`Default`] carrying the
//! documented defaults. Both can be loaded from JSON (or any serde format); every
//! duration is expressed in milliseconds under a `*_ms` key:
//!
//! ```rust
//! use procvisor::PoolConfig;
//! use std::time::Duration;
//!
//! let cfg: PoolConfig = serde_json::from_str(
//!     r#"{ "enhanced": true, "count": 4, "heartbeat_ms": 2000, "stop_timeout_ms": 8000 }"#,
//! ).unwrap();
//! assert_eq!(cfg.worker_count(), 4);
//! assert_eq!(cfg.heartbeat, Duration::from_secs(2));
//! assert_eq!(cfg.respawn_delay, Duration::from_secs(15));
//! ```
//!
//! ## Sentinel values
//! - `count = 0` → one worker per available CPU
//! - `heartbeat = 0s` → no heartbeat broadcaster, workers never orphan themselves
//! - `max_connections = 0` / `max_memory_gain = 0` → that recycle trigger is off
//! - `stop_timeout = None` → no hard stop deadline (5s when not enhanced)

use std::time::Duration;

use serde::Deserialize;

use crate::heartbeat::{DEFAULT_INTERVAL, DEFAULT_TOLERANCE};
use crate::policies::{JitterPolicy, RecyclePolicy};
use crate::process::SchedulingPolicy;

/// Stop deadline applied when a non-enhanced supervisor has no explicit one.
pub const PLAIN_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for a worker pool.
///
/// ## Field semantics
/// - `enhanced`: workers speak the status protocol (`started`, `stop`, immediate heartbeat)
/// - `respawn`: replace workers that exit unexpectedly
/// - `respawn_delay`: wait before replacing a crashed worker
/// - `heartbeat`: broadcast interval (`0s` = disabled)
/// - `count`: pool size (`0` = available parallelism)
/// - `max_connections` / `max_memory_gain`: recycle thresholds (`0` = off)
/// - `stop_timeout`: hard deadline for `stop()`
/// - `recycle_timeout`: deadline for a retiring worker to disconnect (enhanced)
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Status-protocol mode.
    pub enhanced: bool,

    /// Replace workers that exit without being asked to.
    pub respawn: bool,

    /// Delay before an unintended exit is replaced.
    #[serde(rename = "respawn_delay_ms", with = "duration_ms")]
    pub respawn_delay: Duration,

    /// Randomization applied to `respawn_delay`.
    pub respawn_jitter: JitterPolicy,

    /// Heartbeat broadcast interval, also the worker watchdog tick.
    #[serde(rename = "heartbeat_ms", with = "duration_ms")]
    pub heartbeat: Duration,

    /// Number of missed intervals after which a worker declares itself orphaned.
    pub heartbeat_tolerance: u32,

    /// Number of workers.
    pub count: usize,

    /// Requests served before a worker is recycled.
    pub max_connections: u64,

    /// Memory growth factor (relative to the baseline) that triggers a recycle.
    pub max_memory_gain: u64,

    /// Hard deadline for `stop()`. After it every remaining worker is killed.
    #[serde(rename = "stop_timeout_ms", with = "duration_ms::option")]
    pub stop_timeout: Option<Duration>,

    /// How long a retiring worker may take to disconnect before it is killed.
    #[serde(rename = "recycle_timeout_ms", with = "duration_ms")]
    pub recycle_timeout: Duration,

    /// Connection scheduling token forwarded to the process layer.
    pub scheduling_policy: SchedulingPolicy,

    /// Capacity of the event bus ring buffer (min 1).
    pub bus_capacity: usize,
}

impl PoolConfig {
    /// Returns the effective pool size.
    #[inline]
    pub fn worker_count(&self) -> usize {
        if self.count == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            self.count
        }
    }

    /// Returns the heartbeat interval as an `Option` (`None` = disabled).
    #[inline]
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        non_zero(self.heartbeat)
    }

    /// Returns the stop deadline, falling back to 5s in non-enhanced mode.
    #[inline]
    pub fn effective_stop_timeout(&self) -> Option<Duration> {
        match self.stop_timeout {
            Some(t) => Some(t),
            None if !self.enhanced => Some(PLAIN_STOP_TIMEOUT),
            None => None,
        }
    }

    /// Returns the recycle thresholds.
    #[inline]
    pub fn recycle_policy(&self) -> RecyclePolicy {
        RecyclePolicy {
            max_connections: self.max_connections,
            max_memory_gain: self.max_memory_gain,
        }
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for PoolConfig {
    /// Default configuration:
    ///
    /// - `enhanced = false`, `respawn = true`
    /// - `respawn_delay = 15s`, `respawn_jitter = None`
    /// - `heartbeat = 10s`, `heartbeat_tolerance = 32`
    /// - `count = 0` (available parallelism)
    /// - `max_connections = 1_000_000`, `max_memory_gain = 1000`
    /// - `stop_timeout = None`, `recycle_timeout = 30s`
    /// - `scheduling_policy = rr`, `bus_capacity = 1024`
    fn default() -> Self {
        Self {
            enhanced: false,
            respawn: true,
            respawn_delay: Duration::from_secs(15),
            respawn_jitter: JitterPolicy::None,
            heartbeat: DEFAULT_INTERVAL,
            heartbeat_tolerance: DEFAULT_TOLERANCE,
            count: 0,
            max_connections: 1_000_000,
            max_memory_gain: 1000,
            stop_timeout: None,
            recycle_timeout: Duration::from_secs(30),
            scheduling_policy: SchedulingPolicy::RoundRobin,
            bus_capacity: 1024,
        }
    }
}

/// Whether a single supervised process is kept alive or run to completion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildMode {
    /// Long-running service: restarted on crash, stopped on request.
    #[default]
    Persistent,
    /// Run-to-completion: `start()` resolves when the process exits.
    Once,
}

/// Configuration for a single supervised process.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ChildConfig {
    /// Status-protocol mode.
    pub enhanced: bool,

    /// Restart the process when it exits unexpectedly (persistent mode only).
    pub respawn: bool,

    /// Delay before an unexpected exit is restarted.
    #[serde(rename = "respawn_delay_ms", with = "duration_ms")]
    pub respawn_delay: Duration,

    /// Randomization applied to `respawn_delay`.
    pub respawn_jitter: JitterPolicy,

    /// Heartbeat interval (`0s` = disabled).
    #[serde(rename = "heartbeat_ms", with = "duration_ms")]
    pub heartbeat: Duration,

    /// Number of missed intervals after which the child declares itself orphaned.
    pub heartbeat_tolerance: u32,

    /// Persistent or fire-once.
    pub mode: ChildMode,

    /// Fire-once deadline; the process is killed when it elapses.
    #[serde(rename = "timeout_ms", with = "duration_ms::option")]
    pub timeout: Option<Duration>,

    /// Deadline after which a stopping child is killed.
    #[serde(rename = "stop_timeout_ms", with = "duration_ms::option")]
    pub stop_timeout: Option<Duration>,

    /// Capacity of the event bus ring buffer (min 1).
    pub bus_capacity: usize,
}

impl ChildConfig {
    /// Fire-once configuration with an optional deadline.
    pub fn once(timeout: Option<Duration>) -> Self {
        Self {
            mode: ChildMode::Once,
            timeout,
            ..Self::default()
        }
    }

    /// Returns true in fire-once mode.
    #[inline]
    pub fn is_once(&self) -> bool {
        self.mode == ChildMode::Once
    }

    /// Returns the heartbeat interval as an `Option` (`None` = disabled).
    #[inline]
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        non_zero(self.heartbeat)
    }

    /// Returns the fire-once deadline (`None` or `0s` = wait forever).
    #[inline]
    pub fn once_timeout(&self) -> Option<Duration> {
        self.timeout.and_then(non_zero)
    }

    /// Returns the stop deadline, falling back to 5s in non-enhanced mode.
    #[inline]
    pub fn effective_stop_timeout(&self) -> Option<Duration> {
        match self.stop_timeout {
            Some(t) => Some(t),
            None if !self.enhanced => Some(PLAIN_STOP_TIMEOUT),
            None => None,
        }
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for ChildConfig {
    /// Default configuration:
    ///
    /// - `enhanced = false`, `respawn = true`
    /// - `respawn_delay = 1s`, `respawn_jitter = None`
    /// - `heartbeat = 10s`, `heartbeat_tolerance = 32`
    /// - `mode = Persistent`, `timeout = None`, `stop_timeout = None`
    /// - `bus_capacity = 1024`
    fn default() -> Self {
        Self {
            enhanced: false,
            respawn: true,
            respawn_delay: Duration::from_secs(1),
            respawn_jitter: JitterPolicy::None,
            heartbeat: DEFAULT_INTERVAL,
            heartbeat_tolerance: DEFAULT_TOLERANCE,
            mode: ChildMode::Persistent,
            timeout: None,
            stop_timeout: None,
            bus_capacity: 1024,
        }
    }
}

#[inline]
fn non_zero(d: Duration) -> Option<Duration> {
    if d.is_zero() { None } else { Some(d) }
}

/// Serde helpers for durations stored as integer milliseconds.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }

    pub mod option {
        use super::*;

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_defaults() {
        let cfg = PoolConfig::default();
        assert!(!cfg.enhanced);
        assert!(cfg.respawn);
        assert_eq!(cfg.respawn_delay, Duration::from_millis(15_000));
        assert_eq!(cfg.heartbeat, Duration::from_millis(10_000));
        assert_eq!(cfg.max_connections, 1_000_000);
        assert_eq!(cfg.max_memory_gain, 1000);
        assert_eq!(cfg.recycle_timeout, Duration::from_millis(30_000));
        assert_eq!(cfg.heartbeat_tolerance, 32);
        assert_eq!(cfg.scheduling_policy, SchedulingPolicy::RoundRobin);
        assert!(cfg.worker_count() >= 1);
    }

    #[test]
    fn non_enhanced_stop_timeout_defaults_to_five_seconds() {
        let mut cfg = PoolConfig::default();
        assert_eq!(cfg.effective_stop_timeout(), Some(Duration::from_secs(5)));

        cfg.enhanced = true;
        assert_eq!(cfg.effective_stop_timeout(), None);

        cfg.stop_timeout = Some(Duration::from_millis(1500));
        assert_eq!(cfg.effective_stop_timeout(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn zero_heartbeat_disables_broadcaster() {
        let cfg = PoolConfig {
            heartbeat: Duration::ZERO,
            ..PoolConfig::default()
        };
        assert_eq!(cfg.heartbeat_interval(), None);
    }

    #[test]
    fn loads_from_json_with_millisecond_keys() {
        let cfg: PoolConfig = serde_json::from_str(
            r#"{
                "respawn": false,
                "respawn_delay_ms": 250,
                "respawn_jitter": "equal",
                "max_connections": 5,
                "recycle_timeout_ms": 100,
                "scheduling_policy": "none"
            }"#,
        )
        .unwrap();
        assert!(!cfg.respawn);
        assert_eq!(cfg.respawn_delay, Duration::from_millis(250));
        assert_eq!(cfg.respawn_jitter, JitterPolicy::Equal);
        assert_eq!(cfg.max_connections, 5);
        assert_eq!(cfg.recycle_timeout, Duration::from_millis(100));
        assert_eq!(cfg.scheduling_policy, SchedulingPolicy::None);
        assert_eq!(cfg.heartbeat, Duration::from_secs(10));
    }

    #[test]
    fn child_defaults_and_once() {
        let cfg = ChildConfig::default();
        assert_eq!(cfg.respawn_delay, Duration::from_secs(1));
        assert!(!cfg.is_once());

        let once = ChildConfig::once(Some(Duration::from_millis(500)));
        assert!(once.is_once());
        assert_eq!(once.once_timeout(), Some(Duration::from_millis(500)));

        let cfg: ChildConfig =
            serde_json::from_str(r#"{ "mode": "once", "timeout_ms": 0 }"#).unwrap();
        assert!(cfg.is_once());
        assert_eq!(cfg.once_timeout(), None);
    }
}
