//! Error types used by the supervisors, the wire protocol and the worker runtime.
//!
//! This module defines four error enums:
//!
//! - [`SupervisorError`] failures surfaced to callers of `start`/`stop`/`restart`.
//! - [`ProtocolError`] a line on the supervisor↔worker channel failed validation.
//! - [`SendError`] a message could not be delivered to one process.
//! - [`WorkerError`] failures of the worker-side runtime itself.
//!
//! Only [`SupervisorError`] ever reaches the caller of a supervisor. Everything else
//! that can go wrong at runtime (crashes, orphans, failed sends) is reported as an
//! [`Event`](crate::Event) so that worker churn never takes the supervisor down.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Literal message reported when a fire-once process overruns its timeout.
pub const TIMEOUT_MESSAGE: &str = "Process timeout reached, killed";

/// # Errors produced by supervisor operations.
///
/// `Startup` and `Stop` carry the exact message a worker reported, so the
/// [`Display`](std::fmt::Display) output of those variants is that message verbatim.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// A worker reported a fatal error (or died) before the supervisor became ready.
    #[error("{message}")]
    Startup {
        /// Message reported by the worker.
        message: String,
    },

    /// A worker reported a fatal error while the supervisor was stopping.
    #[error("{message}")]
    Stop {
        /// Message reported by the worker.
        message: String,
    },

    /// A fire-once process did not exit within its allotted time and was killed.
    #[error("Process timeout reached, killed")]
    Timeout {
        /// The configured timeout.
        timeout: Duration,
    },

    /// The process layer could not create a process.
    #[error("failed to spawn process: {source}")]
    Spawn {
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The same lifecycle operation is already in flight.
    #[error("{operation} already in progress")]
    Busy {
        /// Operation that was rejected (`"start"` or `"stop"`).
        operation: &'static str,
    },

    /// Signal handlers could not be registered.
    #[error("failed to register signal handlers: {source}")]
    Signal {
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The supervisor core has exited; the handle is no longer usable.
    #[error("supervisor has shut down")]
    Closed,
}

impl SupervisorError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use procvisor::SupervisorError;
    /// use std::time::Duration;
    ///
    /// let err = SupervisorError::Timeout { timeout: Duration::from_millis(500) };
    /// assert_eq!(err.as_label(), "supervisor_timeout");
    /// assert_eq!(err.to_string(), "Process timeout reached, killed");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            SupervisorError::Startup { .. } => "supervisor_startup",
            SupervisorError::Stop { .. } => "supervisor_stop",
            SupervisorError::Timeout { .. } => "supervisor_timeout",
            SupervisorError::Spawn { .. } => "supervisor_spawn",
            SupervisorError::Busy { .. } => "supervisor_busy",
            SupervisorError::Signal { .. } => "supervisor_signal",
            SupervisorError::Closed => "supervisor_closed",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            SupervisorError::Startup { message } => format!("startup failed: {message}"),
            SupervisorError::Stop { message } => format!("stop failed: {message}"),
            SupervisorError::Timeout { timeout } => {
                format!("{TIMEOUT_MESSAGE} (after {timeout:?})")
            }
            SupervisorError::Spawn { source } => format!("spawn failed: {source}"),
            SupervisorError::Busy { operation } => format!("busy: {operation}"),
            SupervisorError::Signal { source } => format!("signal registration: {source}"),
            SupervisorError::Closed => "supervisor closed".to_string(),
        }
    }

    /// Indicates whether the failure came from a worker (as opposed to the supervisor itself).
    pub fn is_worker_reported(&self) -> bool {
        matches!(
            self,
            SupervisorError::Startup { .. } | SupervisorError::Stop { .. }
        )
    }
}

/// # Errors produced while validating a line from the channel.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The line exceeded the maximum accepted size and was not parsed.
    #[error("message exceeds {max_bytes} bytes")]
    TooLarge {
        /// The size limit that was exceeded.
        max_bytes: usize,
    },

    /// The line contained only whitespace.
    #[error("empty message")]
    Empty,

    /// The line was not a valid, tagged protocol message.
    #[error("malformed message: {reason}")]
    Malformed {
        /// Parser diagnostics.
        reason: String,
    },
}

impl ProtocolError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ProtocolError::TooLarge { .. } => "protocol_too_large",
            ProtocolError::Empty => "protocol_empty",
            ProtocolError::Malformed { .. } => "protocol_malformed",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            ProtocolError::TooLarge { max_bytes } => format!("line over {max_bytes} bytes dropped"),
            ProtocolError::Empty => "blank line dropped".to_string(),
            ProtocolError::Malformed { reason } => format!("invalid message: {reason}"),
        }
    }
}

/// # Errors produced when delivering a message to one process.
///
/// Send failures are isolated per process: broadcasts log them and move on.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SendError {
    /// The channel to the process is closed (disconnected or exited).
    #[error("channel disconnected")]
    Disconnected,

    /// The message could not be encoded.
    #[error(transparent)]
    Encode(#[from] ProtocolError),
}

impl SendError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            SendError::Disconnected => "send_disconnected",
            SendError::Encode(_) => "send_encode",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            SendError::Disconnected => "process channel is closed".to_string(),
            SendError::Encode(e) => format!("encode failed: {}", e.as_message()),
        }
    }
}

/// # Errors produced by the worker-side runtime.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Reading from or writing to the supervisor channel failed.
    #[error("channel i/o failed: {source}")]
    Io {
        /// Underlying I/O error.
        #[from]
        source: io::Error,
    },
}

impl WorkerError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            WorkerError::Io { .. } => "worker_io",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            WorkerError::Io { source } => format!("supervisor channel: {source}"),
        }
    }
}
