//! # Recycling thresholds.
//!
//! A worker is replaced (new one first, old one retired after) when it served too
//! many requests or when memory grew too much relative to the baseline captured when
//! it reported `started`.
//!
//! The memory sample is the *supervisor's* own process, not the worker's. This is a
//! coarse approximation: it tracks overall host pressure rather than per-worker leaks.

use crate::process::MemoryUsage;

/// Why a worker should be recycled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecycleReason {
    /// Request counter reached `max_connections`.
    Connections {
        /// Requests served by the worker.
        requests: u64,
    },
    /// Memory grew by at least `max_memory_gain` times the baseline.
    MemoryGain {
        /// Rounded growth factor that tripped the threshold.
        gain: u64,
    },
}

/// Per-worker recycle thresholds. `0` disables a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecyclePolicy {
    /// Requests before a recycle.
    pub max_connections: u64,
    /// Memory growth factor before a recycle.
    pub max_memory_gain: u64,
}

impl RecyclePolicy {
    /// Returns true when the request counter reached the limit.
    #[inline]
    pub fn over_connections(&self, requests: u64) -> bool {
        self.max_connections != 0 && requests >= self.max_connections
    }

    /// Returns the growth factor when either heap ratio reached the limit.
    ///
    /// Each ratio is rounded half away from zero before comparing. A zero or missing
    /// baseline never fires.
    pub fn over_memory_gain(
        &self,
        baseline: Option<MemoryUsage>,
        current: MemoryUsage,
    ) -> Option<u64> {
        if self.max_memory_gain == 0 {
            return None;
        }
        let baseline = baseline?;
        let total = gain(current.heap_total, baseline.heap_total);
        let used = gain(current.heap_used, baseline.heap_used);
        [total, used]
            .into_iter()
            .flatten()
            .filter(|g| *g >= self.max_memory_gain)
            .max()
    }

    /// Returns true if evaluating needs a memory sample at all.
    #[inline]
    pub fn tracks_memory(&self) -> bool {
        self.max_memory_gain != 0
    }

    /// Evaluates both triggers, connections first.
    pub fn evaluate(
        &self,
        requests: u64,
        baseline: Option<MemoryUsage>,
        current: Option<MemoryUsage>,
    ) -> Option<RecycleReason> {
        if self.over_connections(requests) {
            return Some(RecycleReason::Connections { requests });
        }
        let gain = self.over_memory_gain(baseline, current?)?;
        Some(RecycleReason::MemoryGain { gain })
    }
}

fn gain(current: u64, baseline: u64) -> Option<u64> {
    if baseline == 0 {
        return None;
    }
    let ratio = (current as f64 / baseline as f64).round();
    ratio.is_finite().then_some(ratio as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem(total: u64, used: u64) -> MemoryUsage {
        MemoryUsage {
            heap_total: total,
            heap_used: used,
        }
    }

    #[test]
    fn connections_threshold_is_inclusive() {
        let p = RecyclePolicy {
            max_connections: 5,
            max_memory_gain: 0,
        };
        assert!(!p.over_connections(4));
        assert!(p.over_connections(5));
        assert_eq!(
            p.evaluate(5, None, None),
            Some(RecycleReason::Connections { requests: 5 })
        );
    }

    #[test]
    fn zero_disables_triggers() {
        let p = RecyclePolicy {
            max_connections: 0,
            max_memory_gain: 0,
        };
        assert!(!p.over_connections(u64::MAX));
        assert_eq!(p.over_memory_gain(Some(mem(1, 1)), mem(1000, 1000)), None);
        assert!(!p.tracks_memory());
    }

    #[test]
    fn memory_gain_rounds_ratio() {
        let p = RecyclePolicy {
            max_connections: 0,
            max_memory_gain: 2,
        };
        // 1.4 rounds down, 1.5 rounds up
        assert_eq!(p.over_memory_gain(Some(mem(100, 100)), mem(140, 140)), None);
        assert_eq!(p.over_memory_gain(Some(mem(100, 100)), mem(150, 100)), Some(2));
        assert_eq!(p.over_memory_gain(Some(mem(100, 100)), mem(100, 310)), Some(3));
    }

    #[test]
    fn memory_gain_needs_baseline() {
        let p = RecyclePolicy {
            max_connections: 0,
            max_memory_gain: 1,
        };
        assert_eq!(p.over_memory_gain(None, mem(100, 100)), None);
        assert_eq!(p.over_memory_gain(Some(mem(0, 0)), mem(100, 100)), None);
        assert_eq!(p.evaluate(1, None, Some(mem(1, 1))), None);
    }
}
