use std::sync::Arc;

use tokio::sync::{broadcast::error::RecvError, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::child::{ChildCore, ChildSupervisor, Status};
use super::pool::{PoolCore, PoolSupervisor};
use super::timer::Timers;
use crate::{
    config::{ChildConfig, PoolConfig},
    events::Bus,
    process::{CommandLauncher, Launcher, MemorySampler, ProcessMemory, Target},
    subscribers::{Subscribe, SubscriberSet},
};

/// Builder for a [`PoolSupervisor`].
pub struct PoolBuilder {
    target: Target,
    cfg: PoolConfig,
    launcher: Arc<dyn Launcher>,
    sampler: Box<dyn MemorySampler>,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl PoolBuilder {
    /// Creates a builder running `target` under `cfg`, with the OS process launcher.
    pub fn new(target: Target, cfg: PoolConfig) -> Self {
        Self {
            target,
            cfg,
            launcher: Arc::new(CommandLauncher::new()),
            sampler: Box::new(ProcessMemory::new()),
            subscribers: Vec::new(),
        }
    }

    /// Replaces the process layer.
    pub fn with_launcher(mut self, launcher: impl Launcher) -> Self {
        self.launcher = Arc::new(launcher);
        self
    }

    /// Replaces the memory source used by the recycle policy.
    pub fn with_sampler(mut self, sampler: impl MemorySampler) -> Self {
        self.sampler = Box::new(sampler);
        self
    }

    /// Sets event subscribers.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Spawns the supervisor core and returns its handle.
    ///
    /// Must be called inside a tokio runtime. No process is started until
    /// [`PoolSupervisor::start`] is called.
    pub fn build(self) -> PoolSupervisor {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let runtime = CancellationToken::new();
        spawn_listener(&bus, self.subscribers, runtime.clone());

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();

        let core = PoolCore::new(
            self.target,
            self.cfg,
            self.launcher,
            self.sampler,
            bus.clone(),
            notice_tx,
            Timers::new(timer_tx),
            runtime,
        );
        tokio::spawn(core.run(cmd_rx, notice_rx, timer_rx));
        PoolSupervisor::new_internal(cmd_tx, bus)
    }
}

/// Builder for a [`ChildSupervisor`].
pub struct ChildBuilder {
    target: Target,
    cfg: ChildConfig,
    launcher: Arc<dyn Launcher>,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl ChildBuilder {
    /// Creates a builder running `target` under `cfg`, with the OS process launcher.
    pub fn new(target: Target, cfg: ChildConfig) -> Self {
        Self {
            target,
            cfg,
            launcher: Arc::new(CommandLauncher::new()),
            subscribers: Vec::new(),
        }
    }

    /// Replaces the process layer.
    pub fn with_launcher(mut self, launcher: impl Launcher) -> Self {
        self.launcher = Arc::new(launcher);
        self
    }

    /// Sets event subscribers.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Spawns the supervisor core and returns its handle. Must be called inside a
    /// tokio runtime.
    pub fn build(self) -> ChildSupervisor {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let runtime = CancellationToken::new();
        spawn_listener(&bus, self.subscribers, runtime.clone());

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(Status::Ready);

        let core = ChildCore::new(
            self.target,
            self.cfg,
            self.launcher,
            bus.clone(),
            status_tx,
            notice_tx,
            Timers::new(timer_tx),
            runtime,
        );
        tokio::spawn(core.run(cmd_rx, notice_rx, timer_rx));
        ChildSupervisor::new_internal(cmd_tx, bus, status_rx)
    }
}

/// Forwards bus events to the subscriber set until the core cancels `runtime`.
fn spawn_listener(bus: &Bus, subscribers: Vec<Arc<dyn Subscribe>>, runtime: CancellationToken) {
    if subscribers.is_empty() {
        return;
    }
    let mut rx = bus.subscribe();
    let set = SubscriberSet::new(subscribers, bus.clone());
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                ev = rx.recv() => match ev {
                    Ok(ev) => set.emit(ev),
                    Err(RecvError::Lagged(n)) => debug!(skipped = n, "subscriber listener lagged"),
                    Err(RecvError::Closed) => break,
                },
                _ = runtime.cancelled() => break,
            }
        }
        set.shutdown().await;
    });
}
