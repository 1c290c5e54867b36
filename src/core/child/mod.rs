//! # ChildSupervisor: one process with an explicit status machine.
//!
//! Two modes:
//! - **persistent**: a long-running service. `start()` resolves once the process
//!   is up (`started` in enhanced mode, online otherwise); unexpected exits are
//!   restarted after `respawn_delay`, walking `respawn → starting → ok`.
//! - **once**: a run-to-completion job. `start()` resolves when the process exits,
//!   with an error on a non-zero exit, a reported error, or the deadline.
//!
//! Every status change is published as [`EventKind::Status`](crate::EventKind::Status)
//! and mirrored on a `watch` channel, see [`ChildSupervisor::watch_status`].

mod actor;
mod status;

pub(crate) use actor::ChildCore;
pub use status::Status;

use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use super::builder::ChildBuilder;
use crate::config::ChildConfig;
use crate::error::SupervisorError;
use crate::events::{Bus, Event};
use crate::process::{Signal, Target};

pub(crate) type Reply = oneshot::Sender<Result<(), SupervisorError>>;

pub(crate) enum Command {
    Start(Reply),
    Stop(Reply),
    Send(Value),
    Kill(Signal),
}

/// Handle to a single supervised process. Cheap to clone; the process is killed
/// when the last clone drops.
#[derive(Clone)]
pub struct ChildSupervisor {
    commands: mpsc::UnboundedSender<Command>,
    bus: Bus,
    status: watch::Receiver<Status>,
}

impl ChildSupervisor {
    /// Returns a builder.
    pub fn builder(target: Target, cfg: ChildConfig) -> ChildBuilder {
        ChildBuilder::new(target, cfg)
    }

    /// Builds a supervisor with the OS process launcher and no subscribers.
    pub fn new(target: Target, cfg: ChildConfig) -> Self {
        Self::builder(target, cfg).build()
    }

    pub(crate) fn new_internal(
        commands: mpsc::UnboundedSender<Command>,
        bus: Bus,
        status: watch::Receiver<Status>,
    ) -> Self {
        Self {
            commands,
            bus,
            status,
        }
    }

    /// Runs `target` to completion.
    ///
    /// Fails with [`SupervisorError::Timeout`] when `timeout` elapses first (the
    /// process is killed), and with [`SupervisorError::Startup`] on a non-zero exit.
    pub async fn run_once(
        target: Target,
        timeout: Option<Duration>,
    ) -> Result<(), SupervisorError> {
        Self::new(target, ChildConfig::once(timeout)).start().await
    }

    /// Starts the process. See the module docs for when this resolves.
    pub async fn start(&self) -> Result<(), SupervisorError> {
        self.request(Command::Start).await
    }

    /// Stops the process and waits for it to exit.
    ///
    /// Succeeds at once, with no status change, unless the status is `ok`.
    pub async fn stop(&self) -> Result<(), SupervisorError> {
        self.request(Command::Stop).await
    }

    /// Sends a user payload to the process. Ignored when no process exists.
    pub fn send(&self, payload: impl Into<Value>) {
        let _ = self.commands.send(Command::Send(payload.into()));
    }

    /// Delivers a raw signal. An exit caused by it counts as a crash.
    pub fn kill(&self, signal: Signal) {
        let _ = self.commands.send(Command::Kill(signal));
    }

    /// Current status.
    pub fn status(&self) -> Status {
        *self.status.borrow()
    }

    /// Receiver that observes every status change.
    pub fn watch_status(&self) -> watch::Receiver<Status> {
        self.status.clone()
    }

    /// Subscribes to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    async fn request(&self, make: fn(Reply) -> Command) -> Result<(), SupervisorError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .map_err(|_| SupervisorError::Closed)?;
        rx.await.map_err(|_| SupervisorError::Closed)?
    }
}
