//! # PoolSupervisor: N symmetric workers.
//!
//! ```text
//! start():  spawn N ──► wait N × (online | started) ──► Started
//!
//! crash:    Exit(worker) ─► unintended ∧ ¬stopping ∧ running ∧ respawn?
//!                             └─ after respawn_delay: spawn ─► online ─► Respawn{pid}
//!
//! recycle:  Request(worker) ─► over threshold ∧ ¬recycling ∧ ¬stopping?
//!             └─ spawn replacement ─► replacement started ─► Recycle{old}
//!                 ─► SIGHUP old ─► enhanced: disconnect + recycle timeout
//!                                  plain:    SIGKILL
//!
//! stop():   Stopping ─► enhanced: broadcast stop, poll 1s until no workers ─► Stopped
//!                      stop_timeout: SIGKILL all ─► StopTimeout ─► +2s ─► Stopped
//! ```
//!
//! ## Example
//! ```rust,no_run
//! use procvisor::{PoolConfig, PoolSupervisor, Target};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), procvisor::SupervisorError> {
//!     let cfg = PoolConfig { enhanced: true, count: 4, ..PoolConfig::default() };
//!     let pool = PoolSupervisor::new(Target::new("./my-service"), cfg);
//!     pool.run_until_signal().await
//! }
//! ```

mod actor;
mod record;

pub(crate) use actor::PoolCore;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::info;

use super::builder::PoolBuilder;
use super::shutdown;
use crate::config::PoolConfig;
use crate::error::SupervisorError;
use crate::events::{Bus, Event, EventKind};
use crate::process::{Signal, Target, WorkerId};

pub(crate) type Reply = oneshot::Sender<Result<(), SupervisorError>>;

pub(crate) enum Command {
    Start(Reply),
    Stop(Reply),
    Send(Value),
    Kill(Signal),
    StopHeartbeat,
    Stats(oneshot::Sender<PoolStats>),
}

/// Snapshot of the pool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// `start()` succeeded and `stop()` has not completed.
    pub running: bool,
    /// A stop is in progress.
    pub stopping: bool,
    /// Requests served by all workers since the supervisor was built.
    pub requests: u64,
    /// Live workers, by id.
    pub workers: Vec<WorkerStats>,
}

/// Snapshot of one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerStats {
    /// Worker identity.
    pub worker: WorkerId,
    /// OS pid.
    pub pid: Option<u32>,
    /// Reported online by the process layer.
    pub online: bool,
    /// Requests served by this worker.
    pub requests: u64,
    /// A replacement was spawned for it.
    pub recycling: bool,
}

/// Handle to a worker pool. Cheap to clone; the pool lives until the last clone drops.
#[derive(Clone)]
pub struct PoolSupervisor {
    commands: mpsc::UnboundedSender<Command>,
    bus: Bus,
}

impl PoolSupervisor {
    /// Returns a builder.
    pub fn builder(target: Target, cfg: PoolConfig) -> PoolBuilder {
        PoolBuilder::new(target, cfg)
    }

    /// Builds a pool with the OS process launcher and no subscribers.
    pub fn new(target: Target, cfg: PoolConfig) -> Self {
        Self::builder(target, cfg).build()
    }

    pub(crate) fn new_internal(commands: mpsc::UnboundedSender<Command>, bus: Bus) -> Self {
        Self { commands, bus }
    }

    /// Spawns the workers and waits until all of them are up.
    ///
    /// Succeeds immediately when already running. Fails with the first worker error.
    pub async fn start(&self) -> Result<(), SupervisorError> {
        self.request(Command::Start).await
    }

    /// Stops every worker. Succeeds immediately when not running.
    pub async fn stop(&self) -> Result<(), SupervisorError> {
        self.request(Command::Stop).await
    }

    /// Stop then start; the first failure wins.
    pub async fn restart(&self) -> Result<(), SupervisorError> {
        self.stop().await?;
        self.start().await
    }

    /// Broadcasts a user payload to every live worker. Best effort.
    pub fn send(&self, payload: impl Into<Value>) {
        let _ = self.commands.send(Command::Send(payload.into()));
    }

    /// Signals every worker. The resulting exits are deliberate and never respawned.
    pub fn kill(&self, signal: Signal) {
        let _ = self.commands.send(Command::Kill(signal));
    }

    /// Stops the heartbeat broadcaster. Workers will consider themselves orphaned.
    pub fn stop_heartbeat(&self) {
        let _ = self.commands.send(Command::StopHeartbeat);
    }

    /// Returns a snapshot of the pool.
    pub async fn stats(&self) -> Result<PoolStats, SupervisorError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Stats(tx))
            .map_err(|_| SupervisorError::Closed)?;
        rx.await.map_err(|_| SupervisorError::Closed)
    }

    /// Subscribes to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// Starts the pool, waits for SIGINT/SIGTERM/SIGQUIT/SIGHUP, then stops it.
    pub async fn run_until_signal(&self) -> Result<(), SupervisorError> {
        self.start().await?;
        shutdown::wait_for_shutdown_signal()
            .await
            .map_err(|source| SupervisorError::Signal { source })?;
        info!("shutdown signal received, stopping pool");
        self.bus.emit(EventKind::ShutdownRequested);
        self.stop().await
    }

    async fn request(&self, make: fn(Reply) -> Command) -> Result<(), SupervisorError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .map_err(|_| SupervisorError::Closed)?;
        rx.await.map_err(|_| SupervisorError::Closed)?
    }
}
