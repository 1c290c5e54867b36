//! # Tagged protocol messages.
//!
//! Both directions use an explicit `type` discriminant so that a payload can never
//! be mistaken for a control message. User traffic rides in the `message` variant
//! and is passed through untouched.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error message a worker reports when its heartbeat watchdog declares the
/// supervisor gone.
pub const ORPHAN_MESSAGE: &str = "Connection to master lost";

/// Messages sent from the supervisor to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    /// Liveness broadcast carrying the supervisor's wall-clock time in ms.
    Heartbeat {
        /// Milliseconds since the Unix epoch.
        timestamp: u64,
    },
    /// Begin graceful shutdown.
    Stop,
    /// Opaque user payload.
    Message {
        /// Arbitrary JSON.
        payload: Value,
    },
}

impl Outbound {
    /// Wraps a user payload.
    #[inline]
    pub fn message(payload: impl Into<Value>) -> Self {
        Outbound::Message {
            payload: payload.into(),
        }
    }
}

/// Messages sent from a worker to the supervisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    /// The worker finished initializing.
    Started,
    /// Fatal worker-side error, during start, stop or at runtime.
    Error {
        /// Human-readable error.
        message: String,
    },
    /// One payload request was served.
    Request,
    /// Opaque user payload.
    Message {
        /// Arbitrary JSON.
        payload: Value,
    },
}

impl Inbound {
    /// Builds an error report.
    #[inline]
    pub fn error(message: impl Into<String>) -> Self {
        Inbound::Error {
            message: message.into(),
        }
    }

    /// Builds the report a worker sends when it lost its supervisor.
    #[inline]
    pub fn orphaned() -> Self {
        Inbound::error(ORPHAN_MESSAGE)
    }

    /// Returns true for the lost-connection error report.
    #[inline]
    pub fn is_orphan(&self) -> bool {
        matches!(self, Inbound::Error { message } if message == ORPHAN_MESSAGE)
    }
}
