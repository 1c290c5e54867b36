//! # Process layer seam.
//!
//! Supervisors never touch OS processes directly. They go through a [`Launcher`]
//! that creates processes and returns a [`ProcessHandle`] per worker. Everything the
//! process layer observes (online, inbound messages, disconnect, exit) is posted back
//! through the [`WorkerChannel`] it was given at launch.
//!
//! ```text
//!  supervisor core                         process layer
//!  ───────────────                         ─────────────
//!  launcher.launch(target, opts, channel) ──► spawn
//!  handle.send / signal / disconnect      ──► process
//!  inbox ◄── ProcessNotice { worker, event } ── channel.online / message / disconnected / exited
//! ```

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::mpsc;

use crate::error::SendError;
use crate::protocol::{Inbound, Outbound};

/// Supervisor-local worker identity. Never reused within one supervisor.
pub type WorkerId = u64;

/// Environment variable carrying the heartbeat interval (ms, `0` = disabled).
pub const ENV_HEARTBEAT_INTERVAL: &str = "PROCVISOR_HEARTBEAT_INTERVAL";
/// Environment variable carrying the staleness multiple.
pub const ENV_HEARTBEAT_TOLERANCE: &str = "PROCVISOR_HEARTBEAT_TOLERANCE";
/// Environment variable carrying the scheduling policy token.
pub const ENV_SCHED_POLICY: &str = "PROCVISOR_SCHED_POLICY";
/// Environment variable telling the worker whether it is pooled (`pool`) or single (`single`).
pub const ENV_WORKER_MODE: &str = "PROCVISOR_WORKER_MODE";

/// Signals a supervisor can deliver to a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    /// Reload / graceful retire.
    Hangup,
    /// Interactive interrupt.
    Interrupt,
    /// Polite termination.
    Terminate,
    /// Forced termination.
    Kill,
}

impl Signal {
    /// Conventional signal name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Hangup => "SIGHUP",
            Signal::Interrupt => "SIGINT",
            Signal::Terminate => "SIGTERM",
            Signal::Kill => "SIGKILL",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a process ended. Exactly one of `code`/`signal` is usually set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExitStatus {
    /// Exit code, when the process exited normally.
    pub code: Option<i32>,
    /// Terminating signal number, when it was killed.
    pub signal: Option<i32>,
}

impl ExitStatus {
    /// Normal exit with `code`.
    pub fn code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    /// Killed by signal number `signal`.
    pub fn signaled(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }

    /// Returns true for exit code 0.
    #[inline]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;
        Self {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "code {code}"),
            (None, Some(sig)) => write!(f, "signal {sig}"),
            (None, None) => f.write_str("unknown status"),
        }
    }
}

/// Connection scheduling token forwarded to the process layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum SchedulingPolicy {
    /// Round-robin distribution.
    #[default]
    #[serde(rename = "rr")]
    RoundRobin,
    /// Leave distribution to the OS.
    #[serde(rename = "none")]
    None,
}

impl SchedulingPolicy {
    /// Wire token (`rr` / `none`).
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulingPolicy::RoundRobin => "rr",
            SchedulingPolicy::None => "none",
        }
    }
}

/// What to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Executable path or name.
    pub program: PathBuf,
    /// Arguments.
    pub args: Vec<OsString>,
    /// Extra environment entries.
    pub env: Vec<(OsString, OsString)>,
    /// Working directory (inherited when `None`).
    pub cwd: Option<PathBuf>,
}

impl Target {
    /// Runs `program` with no arguments.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
        }
    }

    /// Re-executes the current binary, a common setup for self-forking services.
    pub fn current_exe() -> io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    /// Appends arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_owned()));
        self
    }

    /// Adds an environment entry.
    #[must_use]
    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.env
            .push((key.as_ref().to_owned(), value.as_ref().to_owned()));
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_owned());
        self
    }
}

/// Per-launch settings derived from the supervisor configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchOptions {
    /// Heartbeat interval the worker watchdog should use.
    pub heartbeat: Option<Duration>,
    /// Staleness multiple for the worker watchdog.
    pub heartbeat_tolerance: u32,
    /// Scheduling token.
    pub scheduling_policy: SchedulingPolicy,
    /// True for pool workers, false for a single supervised process.
    pub pooled: bool,
}

impl LaunchOptions {
    /// Environment entries describing these options to the worker.
    pub fn env_vars(&self) -> [(&'static str, String); 4] {
        let heartbeat = self.heartbeat.map(|d| d.as_millis()).unwrap_or(0);
        [
            (ENV_HEARTBEAT_INTERVAL, heartbeat.to_string()),
            (ENV_HEARTBEAT_TOLERANCE, self.heartbeat_tolerance.to_string()),
            (ENV_SCHED_POLICY, self.scheduling_policy.as_str().to_string()),
            (
                ENV_WORKER_MODE,
                if self.pooled { "pool" } else { "single" }.to_string(),
            ),
        ]
    }
}

/// Something observed about one process.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessEvent {
    /// The process is up and its channel is usable.
    Online,
    /// A validated message arrived.
    Message(Inbound),
    /// The channel closed (worker disconnected or died).
    Disconnect,
    /// The OS reported the process exit. Always the last event for a worker.
    Exit(ExitStatus),
}

/// A [`ProcessEvent`] tagged with the worker it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessNotice {
    /// Worker identity.
    pub worker: WorkerId,
    /// What happened.
    pub event: ProcessEvent,
}

/// Upstream half handed to the process layer for one worker.
#[derive(Debug, Clone)]
pub struct WorkerChannel {
    id: WorkerId,
    tx: mpsc::UnboundedSender<ProcessNotice>,
}

impl WorkerChannel {
    pub(crate) fn new(id: WorkerId, tx: mpsc::UnboundedSender<ProcessNotice>) -> Self {
        Self { id, tx }
    }

    /// Worker identity this channel reports for.
    #[inline]
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Reports that the process is online.
    pub fn online(&self) {
        self.post(ProcessEvent::Online);
    }

    /// Forwards a validated inbound message.
    pub fn message(&self, msg: Inbound) {
        self.post(ProcessEvent::Message(msg));
    }

    /// Reports that the channel closed.
    pub fn disconnected(&self) {
        self.post(ProcessEvent::Disconnect);
    }

    /// Reports the process exit.
    pub fn exited(&self, status: ExitStatus) {
        self.post(ProcessEvent::Exit(status));
    }

    /// Returns true once the supervisor core is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn post(&self, event: ProcessEvent) {
        let _ = self.tx.send(ProcessNotice {
            worker: self.id,
            event,
        });
    }
}

/// Creates processes.
pub trait Launcher: Send + Sync + 'static {
    /// Spawns one process for `target`. Called from inside the tokio runtime.
    ///
    /// Implementations must eventually call [`WorkerChannel::exited`] exactly once for
    /// every process they successfully launch.
    fn launch(
        &self,
        target: &Target,
        opts: &LaunchOptions,
        channel: WorkerChannel,
    ) -> io::Result<Box<dyn ProcessHandle>>;
}

/// Control surface of one launched process.
pub trait ProcessHandle: Send {
    /// OS process id, if known.
    fn pid(&self) -> Option<u32>;

    /// Delivers one message. Fails once the channel is closed.
    fn send(&mut self, msg: &Outbound) -> Result<(), SendError>;

    /// Delivers a signal.
    fn signal(&mut self, signal: Signal) -> io::Result<()>;

    /// Closes the channel. The process is expected to exit on its own afterwards.
    fn disconnect(&mut self);

    /// True once [`disconnect`](Self::disconnect) was called, so a following exit
    /// is deliberate.
    fn exited_after_disconnect(&self) -> bool;
}
