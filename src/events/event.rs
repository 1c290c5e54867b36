//! # Runtime events emitted by the supervisors.
//!
//! The [`EventKind`] enum classifies events across four groups:
//! - **Lifecycle**: supervisor start/stop flow (`Starting`, `Started`, `Stopping`, `Stopped`, `StopTimeout`)
//! - **Worker**: per-process facts (`WorkerOnline`, `WorkerExit`, `Respawn`, `Recycle`, `Orphan`, ...)
//! - **Single process**: `Status` transitions and pass-through `Message`s
//! - **Runtime**: signals, heartbeat control and subscriber health
//!
//! Every variant carries its own data, so subscribers match on what they need
//! instead of probing optional fields.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use procvisor::{Event, EventKind};
//!
//! let a = Event::new(EventKind::Respawn { worker: 3, pid: Some(4242) });
//! let b = Event::new(EventKind::Stopped);
//!
//! assert!(b.seq > a.seq);
//! assert_eq!(a.worker(), Some(3));
//! assert_eq!(a.pid(), Some(4242));
//! assert_eq!(a.kind.as_label(), "respawn");
//! ```

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

use serde_json::Value;

use crate::core::Status;
use crate::policies::RecycleReason;
use crate::process::{ExitStatus, WorkerId};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    // === Lifecycle ===
    /// `start()` began spawning workers.
    Starting {
        /// Workers being spawned.
        workers: usize,
    },
    /// `start()` succeeded.
    Started,
    /// `stop()` began.
    Stopping,
    /// `stop()` finished; no workers remain.
    Stopped,
    /// The stop deadline elapsed; remaining workers were killed.
    StopTimeout {
        /// Workers still alive when the deadline hit.
        remaining: usize,
    },

    // === Worker ===
    /// A worker process came online.
    WorkerOnline {
        /// Worker identity.
        worker: WorkerId,
        /// OS process id.
        pid: Option<u32>,
    },
    /// A worker process exited.
    WorkerExit {
        /// Worker identity.
        worker: WorkerId,
        /// OS process id.
        pid: Option<u32>,
        /// How it ended.
        status: ExitStatus,
        /// Whether the supervisor asked for it.
        intentional: bool,
    },
    /// A crashed worker was replaced and the replacement is online.
    Respawn {
        /// Replacement identity.
        worker: WorkerId,
        /// Replacement pid.
        pid: Option<u32>,
    },
    /// A worker's replacement reported `started`; the worker is being retired.
    Recycle {
        /// Retiring worker.
        worker: WorkerId,
        /// Retiring worker's pid.
        pid: Option<u32>,
        /// Requests it served.
        requests: u64,
        /// Which threshold fired.
        reason: RecycleReason,
    },
    /// A retiring worker did not disconnect in time and was killed.
    RecycleTimeout {
        /// Retiring worker.
        worker: WorkerId,
        /// Its pid.
        pid: Option<u32>,
    },
    /// A worker reported that it lost its supervisor.
    Orphan {
        /// Worker identity.
        worker: WorkerId,
        /// Its pid.
        pid: Option<u32>,
    },
    /// A worker reported an error.
    WorkerError {
        /// Worker identity.
        worker: WorkerId,
        /// Its pid.
        pid: Option<u32>,
        /// Reported message, verbatim.
        message: String,
    },

    // === Single process ===
    /// Status transition of a single supervised process.
    Status(Status),
    /// User payload received from a process.
    Message {
        /// Sender.
        worker: WorkerId,
        /// Payload, untouched.
        payload: Value,
    },

    // === Runtime ===
    /// Shutdown requested (OS signal observed).
    ShutdownRequested,
    /// The heartbeat broadcaster was stopped on request.
    HeartbeatStopped,
    /// Subscriber dropped an event (queue full or worker closed).
    SubscriberOverflow {
        /// Subscriber name.
        subscriber: &'static str,
        /// `full` or `closed`.
        reason: &'static str,
    },
    /// Subscriber panicked during event processing.
    SubscriberPanicked {
        /// Subscriber name.
        subscriber: &'static str,
        /// Panic payload.
        info: String,
    },
}

impl EventKind {
    /// Short stable label (kebab-case) for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            EventKind::Starting { .. } => "starting",
            EventKind::Started => "started",
            EventKind::Stopping => "stopping",
            EventKind::Stopped => "stopped",
            EventKind::StopTimeout { .. } => "stop-timeout",
            EventKind::WorkerOnline { .. } => "online",
            EventKind::WorkerExit { .. } => "exit",
            EventKind::Respawn { .. } => "respawn",
            EventKind::Recycle { .. } => "recycle",
            EventKind::RecycleTimeout { .. } => "recycle-timeout",
            EventKind::Orphan { .. } => "orphan",
            EventKind::WorkerError { .. } => "error",
            EventKind::Status(_) => "status",
            EventKind::Message { .. } => "message",
            EventKind::ShutdownRequested => "shutdown-requested",
            EventKind::HeartbeatStopped => "heartbeat-stopped",
            EventKind::SubscriberOverflow { .. } => "subscriber-overflow",
            EventKind::SubscriberPanicked { .. } => "subscriber-panicked",
        }
    }
}

/// Runtime event with metadata.
#[derive(Debug, Clone)]
pub struct Event {
    /// Globally unique sequence number (monotonic).
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// What happened.
    pub kind: EventKind,
}

impl Event {
    /// Creates a new event stamped with the current time and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
        }
    }

    /// Worker the event is about, if any.
    pub fn worker(&self) -> Option<WorkerId> {
        match &self.kind {
            EventKind::WorkerOnline { worker, .. }
            | EventKind::WorkerExit { worker, .. }
            | EventKind::Respawn { worker, .. }
            | EventKind::Recycle { worker, .. }
            | EventKind::RecycleTimeout { worker, .. }
            | EventKind::Orphan { worker, .. }
            | EventKind::WorkerError { worker, .. }
            | EventKind::Message { worker, .. } => Some(*worker),
            _ => None,
        }
    }

    /// OS pid the event is about, if any.
    pub fn pid(&self) -> Option<u32> {
        match &self.kind {
            EventKind::WorkerOnline { pid, .. }
            | EventKind::WorkerExit { pid, .. }
            | EventKind::Respawn { pid, .. }
            | EventKind::Recycle { pid, .. }
            | EventKind::RecycleTimeout { pid, .. }
            | EventKind::Orphan { pid, .. }
            | EventKind::WorkerError { pid, .. } => *pid,
            _ => None,
        }
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow { subscriber, reason })
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked { subscriber, info })
    }

    #[inline]
    pub fn is_subscriber_overflow(&self) -> bool {
        matches!(self.kind, EventKind::SubscriberOverflow { .. })
    }
}
