//! # Pool core: the one task that owns all pool state.
//!
//! Every input (handle command, process notice, timer firing) is handled to
//! completion before the next one, so no state is ever shared or locked.
//!
//! ## Rules
//! - A worker record is removed only when its exit is observed.
//! - Respawns and recycles never start while a stop is in progress.
//! - A replacement always reports ready before the worker it replaces is retired.
//! - Each pending `start`/`stop` reply is sent at most once.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::record::WorkerRecord;
use super::{Command, PoolStats, Reply, WorkerStats};
use crate::config::PoolConfig;
use crate::core::timer::Timers;
use crate::error::SupervisorError;
use crate::events::{Bus, EventKind};
use crate::heartbeat::timestamp_ms;
use crate::policies::RecyclePolicy;
use crate::process::{
    ExitStatus, LaunchOptions, Launcher, MemorySampler, ProcessEvent, ProcessNotice, Signal,
    Target, WorkerChannel, WorkerId,
};
use crate::protocol::{Inbound, ORPHAN_MESSAGE, Outbound};

/// Interval at which an enhanced stop checks for an empty pool.
const STOP_POLL: Duration = Duration::from_secs(1);
/// Wait after the stop deadline killed everything, before reporting success.
const STOP_GRACE: Duration = Duration::from_secs(2);

pub(crate) enum Timer {
    Heartbeat,
    Respawn,
    RecycleTimeout(WorkerId),
    StopPoll(u64),
    StopTimeout(u64),
    StopGrace(u64),
}

struct PendingStart {
    reply: Reply,
    pending: HashSet<WorkerId>,
    remaining: usize,
}

struct PendingStop {
    reply: Reply,
    generation: u64,
    timers: CancellationToken,
    timed_out: bool,
}

pub(crate) struct PoolCore {
    target: Target,
    cfg: PoolConfig,
    policy: RecyclePolicy,
    launcher: Arc<dyn Launcher>,
    sampler: Box<dyn MemorySampler>,
    bus: Bus,
    notices: mpsc::UnboundedSender<ProcessNotice>,
    timers: Timers<Timer>,

    /// Parent of every timer; cancelled when the core exits.
    runtime: CancellationToken,
    /// Parent of pending respawns; cancelled when a stop begins.
    respawns: CancellationToken,
    heartbeat: Option<CancellationToken>,

    workers: BTreeMap<WorkerId, WorkerRecord>,
    next_id: WorkerId,
    requests: u64,
    running: bool,
    starting: Option<PendingStart>,
    stop: Option<PendingStop>,
    stop_gen: u64,
    /// replacement id → id of the worker it will replace
    replacements: HashMap<WorkerId, WorkerId>,
    /// respawned workers that have not come online yet
    respawned: HashSet<WorkerId>,
}

impl PoolCore {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        target: Target,
        cfg: PoolConfig,
        launcher: Arc<dyn Launcher>,
        sampler: Box<dyn MemorySampler>,
        bus: Bus,
        notices: mpsc::UnboundedSender<ProcessNotice>,
        timers: Timers<Timer>,
        runtime: CancellationToken,
    ) -> Self {
        Self {
            target,
            policy: cfg.recycle_policy(),
            cfg,
            launcher,
            sampler,
            bus,
            notices,
            timers,
            respawns: runtime.child_token(),
            runtime,
            heartbeat: None,
            workers: BTreeMap::new(),
            next_id: 1,
            requests: 0,
            running: false,
            starting: None,
            stop: None,
            stop_gen: 0,
            replacements: HashMap::new(),
            respawned: HashSet::new(),
        }
    }

    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut notices: mpsc::UnboundedReceiver<ProcessNotice>,
        mut timers: mpsc::UnboundedReceiver<Timer>,
    ) {
        loop {
            tokio::select! {
                biased;
                Some(notice) = notices.recv() => self.on_notice(notice),
                Some(timer) = timers.recv() => self.on_timer(timer),
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.on_command(cmd),
                    None => break,
                },
            }
        }
        self.teardown();
    }

    fn teardown(&mut self) {
        if !self.workers.is_empty() {
            debug!(workers = self.workers.len(), "pool dropped, killing workers");
        }
        for rec in self.workers.values_mut() {
            rec.intentional = true;
            signal(rec, Signal::Kill);
        }
        self.runtime.cancel();
    }

    // ---- commands ----

    fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Start(reply) => self.start(reply),
            Command::Stop(reply) => self.begin_stop(reply),
            Command::Send(payload) => self.broadcast(&Outbound::Message { payload }),
            Command::Kill(sig) => {
                for rec in self.workers.values_mut() {
                    rec.intentional = true;
                    signal(rec, sig);
                }
            }
            Command::StopHeartbeat => {
                if let Some(token) = self.heartbeat.take() {
                    token.cancel();
                    warn!("heartbeat stopped, workers will orphan themselves");
                    self.bus.emit(EventKind::HeartbeatStopped);
                }
            }
            Command::Stats(reply) => {
                let _ = reply.send(self.stats());
            }
        }
    }

    fn start(&mut self, reply: Reply) {
        if self.starting.is_some() {
            let _ = reply.send(Err(SupervisorError::Busy { operation: "start" }));
            return;
        }
        if self.stop.is_some() {
            let _ = reply.send(Err(SupervisorError::Busy { operation: "stop" }));
            return;
        }
        if self.running {
            let _ = reply.send(Ok(()));
            return;
        }

        let count = self.cfg.worker_count();
        info!(workers = count, enhanced = self.cfg.enhanced, "starting pool");
        self.bus.emit(EventKind::Starting { workers: count });
        self.respawns = self.runtime.child_token();
        self.start_heartbeat();
        self.starting = Some(PendingStart {
            reply,
            pending: HashSet::with_capacity(count),
            remaining: count,
        });

        for _ in 0..count {
            match self.spawn_worker() {
                Ok(id) => {
                    if let Some(start) = self.starting.as_mut() {
                        start.pending.insert(id);
                    }
                }
                Err(source) => {
                    self.fail_start(SupervisorError::Spawn { source });
                    return;
                }
            }
        }
    }

    /// Counts one initial worker as up; resolves the start after the last one.
    fn confirm(&mut self, id: WorkerId) {
        let Some(start) = self.starting.as_mut() else {
            return;
        };
        if !start.pending.remove(&id) {
            return;
        }
        start.remaining = start.remaining.saturating_sub(1);
        if start.remaining > 0 {
            return;
        }
        if let Some(start) = self.starting.take() {
            self.running = true;
            info!(workers = self.workers.len(), "pool started");
            self.bus.emit(EventKind::Started);
            let _ = start.reply.send(Ok(()));
        }
    }

    fn fail_start(&mut self, err: SupervisorError) {
        let Some(start) = self.starting.take() else {
            return;
        };
        warn!(error = %err, "pool start failed, killing workers");
        self.respawns.cancel();
        self.cancel_heartbeat();
        for rec in self.workers.values_mut() {
            rec.intentional = true;
            signal(rec, Signal::Kill);
        }
        let _ = start.reply.send(Err(err));
    }

    fn begin_stop(&mut self, reply: Reply) {
        if self.stop.is_some() {
            let _ = reply.send(Err(SupervisorError::Busy { operation: "stop" }));
            return;
        }
        if !self.running {
            let _ = reply.send(Ok(()));
            return;
        }

        self.stop_gen += 1;
        let generation = self.stop_gen;
        info!(workers = self.workers.len(), "stopping pool");
        self.respawns.cancel();
        self.cancel_heartbeat();
        self.bus.emit(EventKind::Stopping);

        let timers = self.runtime.child_token();
        if self.cfg.enhanced {
            self.broadcast(&Outbound::Stop);
            self.timers
                .every(STOP_POLL, &timers, move || Timer::StopPoll(generation));
        }
        if let Some(deadline) = self.cfg.effective_stop_timeout() {
            self.timers
                .after(deadline, &timers, Timer::StopTimeout(generation));
        }
        self.stop = Some(PendingStop {
            reply,
            generation,
            timers,
            timed_out: false,
        });
    }

    fn finish_stop(&mut self) {
        let Some(stop) = self.stop.take() else {
            return;
        };
        stop.timers.cancel();
        self.running = false;
        info!("pool stopped");
        self.bus.emit(EventKind::Stopped);
        let _ = stop.reply.send(Ok(()));
    }

    /// A worker error aborts the stop; the pool goes back to running.
    fn fail_stop(&mut self, err: SupervisorError) {
        let Some(stop) = self.stop.take() else {
            return;
        };
        stop.timers.cancel();
        warn!(error = %err, "pool stop failed");
        self.respawns = self.runtime.child_token();
        self.start_heartbeat();
        let _ = stop.reply.send(Err(err));
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            running: self.running,
            stopping: self.stop.is_some(),
            requests: self.requests,
            workers: self
                .workers
                .values()
                .map(|rec| WorkerStats {
                    worker: rec.id,
                    pid: rec.pid,
                    online: rec.online,
                    requests: rec.requests,
                    recycling: rec.recycling.is_some(),
                })
                .collect(),
        }
    }

    // ---- process notices ----

    fn on_notice(&mut self, notice: ProcessNotice) {
        let id = notice.worker;
        match notice.event {
            ProcessEvent::Online => self.on_online(id),
            ProcessEvent::Message(Inbound::Started) => self.on_started(id),
            ProcessEvent::Message(Inbound::Error { message }) => self.on_error(id, message),
            ProcessEvent::Message(Inbound::Request) => self.on_request(id),
            ProcessEvent::Message(Inbound::Message { payload }) => {
                self.bus.emit(EventKind::Message {
                    worker: id,
                    payload,
                });
            }
            ProcessEvent::Disconnect => self.on_disconnect(id),
            ProcessEvent::Exit(status) => self.on_exit(id, status),
        }
    }

    fn on_online(&mut self, id: WorkerId) {
        let prime = self.cfg.enhanced && self.heartbeat.is_some();
        let Some(rec) = self.workers.get_mut(&id) else {
            return;
        };
        rec.online = true;
        let pid = rec.pid;
        if prime {
            post(rec, &Outbound::Heartbeat {
                timestamp: timestamp_ms(),
            });
        }
        debug!(worker = id, pid, "worker online");
        self.bus.emit(EventKind::WorkerOnline { worker: id, pid });

        if self.respawned.remove(&id) {
            info!(worker = id, pid, "worker respawned");
            self.bus.emit(EventKind::Respawn { worker: id, pid });
        }
        if !self.cfg.enhanced {
            self.confirm(id);
            self.hand_over(id);
        }
    }

    fn on_started(&mut self, id: WorkerId) {
        let needs_baseline = self.policy.tracks_memory()
            && self
                .workers
                .get(&id)
                .is_some_and(|rec| rec.baseline.is_none());
        let baseline = if needs_baseline {
            self.sampler.sample()
        } else {
            None
        };
        let Some(rec) = self.workers.get_mut(&id) else {
            return;
        };
        if baseline.is_some() {
            rec.baseline = baseline;
        }
        debug!(worker = id, pid = rec.pid, "worker started");

        if self.cfg.enhanced {
            self.confirm(id);
            self.hand_over(id);
        }
    }

    fn on_error(&mut self, id: WorkerId, message: String) {
        let pid = self.workers.get(&id).and_then(|rec| rec.pid);
        if message == ORPHAN_MESSAGE {
            warn!(worker = id, pid, "worker lost its supervisor");
            self.bus.emit(EventKind::Orphan { worker: id, pid });
        } else {
            warn!(worker = id, pid, error = %message, "worker reported an error");
        }
        self.bus.emit(EventKind::WorkerError {
            worker: id,
            pid,
            message: message.clone(),
        });

        if self.starting.is_some() {
            self.fail_start(SupervisorError::Startup { message });
        } else if self.stop.as_ref().is_some_and(|stop| !stop.timed_out) {
            self.fail_stop(SupervisorError::Stop { message });
        }
    }

    fn on_request(&mut self, id: WorkerId) {
        self.requests += 1;
        let stopping = self.stop.is_some();
        let tracks_memory = self.policy.tracks_memory();
        let Some(rec) = self.workers.get_mut(&id) else {
            return;
        };
        rec.requests += 1;
        if stopping || rec.intentional || rec.recycling.is_some() {
            return;
        }

        let current = if tracks_memory && rec.baseline.is_some() {
            self.sampler.sample()
        } else {
            None
        };
        let Some(reason) = self.policy.evaluate(rec.requests, rec.baseline, current) else {
            return;
        };
        rec.recycling = Some(reason);
        info!(
            worker = id,
            pid = rec.pid,
            requests = rec.requests,
            ?reason,
            "recycle threshold reached, spawning replacement"
        );

        match self.spawn_worker() {
            Ok(replacement) => {
                self.replacements.insert(replacement, id);
            }
            Err(e) => {
                warn!(worker = id, error = %e, "failed to spawn replacement");
                if let Some(rec) = self.workers.get_mut(&id) {
                    rec.recycling = None;
                }
            }
        }
    }

    fn on_disconnect(&mut self, id: WorkerId) {
        let Some(rec) = self.workers.get_mut(&id) else {
            return;
        };
        if let Some(timeout) = rec.retire.take() {
            timeout.cancel();
            debug!(worker = id, pid = rec.pid, "retiring worker disconnected");
            signal(rec, Signal::Kill);
        }
    }

    fn on_exit(&mut self, id: WorkerId, status: ExitStatus) {
        let Some(mut rec) = self.workers.remove(&id) else {
            return;
        };
        if let Some(timeout) = rec.retire.take() {
            timeout.cancel();
        }
        let intentional = rec.intentional || rec.handle.exited_after_disconnect();
        self.respawned.remove(&id);
        if intentional {
            debug!(worker = id, pid = rec.pid, %status, "worker exited");
        } else {
            warn!(worker = id, pid = rec.pid, %status, "worker exited unexpectedly");
        }
        self.bus.emit(EventKind::WorkerExit {
            worker: id,
            pid: rec.pid,
            status,
            intentional,
        });

        // a replacement that died before taking over frees the old worker to recycle again
        if let Some(old) = self.replacements.remove(&id) {
            if let Some(old) = self.workers.get_mut(&old) {
                old.recycling = None;
            }
        }

        if self
            .starting
            .as_ref()
            .is_some_and(|start| start.pending.contains(&id))
        {
            self.fail_start(SupervisorError::Startup {
                message: format!("worker exited during start ({status})"),
            });
            return;
        }

        if !intentional && self.stop.is_none() && self.running && self.cfg.respawn {
            let delay = self.cfg.respawn_jitter.apply(self.cfg.respawn_delay);
            debug!(worker = id, ?delay, "respawn scheduled");
            self.timers.after(delay, &self.respawns, Timer::Respawn);
        }
    }

    // ---- timers ----

    fn on_timer(&mut self, timer: Timer) {
        match timer {
            Timer::Heartbeat => {
                if self.heartbeat.is_some() {
                    let timestamp = timestamp_ms();
                    self.broadcast(&Outbound::Heartbeat { timestamp });
                }
            }
            Timer::Respawn => self.respawn(),
            Timer::RecycleTimeout(id) => self.recycle_timeout(id),
            Timer::StopPoll(generation) => {
                if self.is_current_stop(generation) && self.workers.is_empty() {
                    self.finish_stop();
                } else if self.is_current_stop(generation) {
                    debug!(workers = self.workers.len(), "waiting on workers to exit");
                }
            }
            Timer::StopTimeout(generation) => {
                if self.is_current_stop(generation) {
                    self.stop_deadline(generation);
                }
            }
            Timer::StopGrace(generation) => {
                if self.is_current_stop(generation) {
                    self.finish_stop();
                }
            }
        }
    }

    fn is_current_stop(&self, generation: u64) -> bool {
        self.stop.as_ref().is_some_and(|stop| stop.generation == generation)
    }

    fn respawn(&mut self) {
        if self.respawns.is_cancelled() || self.stop.is_some() || !self.running || !self.cfg.respawn
        {
            return;
        }
        match self.spawn_worker() {
            Ok(id) => {
                self.respawned.insert(id);
            }
            Err(e) => {
                warn!(error = %e, "respawn failed, retrying");
                self.timers
                    .after(self.cfg.respawn_delay, &self.respawns, Timer::Respawn);
            }
        }
    }

    fn recycle_timeout(&mut self, id: WorkerId) {
        let Some(rec) = self.workers.get_mut(&id) else {
            return;
        };
        if rec.retire.take().is_none() {
            return;
        }
        warn!(worker = id, pid = rec.pid, "recycle timeout exceeded, killing worker");
        signal(rec, Signal::Kill);
        let pid = rec.pid;
        self.bus.emit(EventKind::RecycleTimeout { worker: id, pid });
    }

    fn stop_deadline(&mut self, generation: u64) {
        let remaining = self.workers.len();
        warn!(remaining, "stop timeout reached, killing workers");
        for rec in self.workers.values_mut() {
            rec.intentional = true;
            signal(rec, Signal::Kill);
        }
        self.bus.emit(EventKind::StopTimeout { remaining });

        let grace = self.runtime.child_token();
        self.timers
            .after(STOP_GRACE, &grace, Timer::StopGrace(generation));
        if let Some(stop) = self.stop.as_mut() {
            stop.timers.cancel();
            stop.timers = grace;
            stop.timed_out = true;
        }
    }

    // ---- helpers ----

    fn spawn_worker(&mut self) -> io::Result<WorkerId> {
        let id = self.next_id;
        self.next_id += 1;
        let opts = LaunchOptions {
            heartbeat: self.cfg.heartbeat_interval(),
            heartbeat_tolerance: self.cfg.heartbeat_tolerance,
            scheduling_policy: self.cfg.scheduling_policy,
            pooled: true,
        };
        let channel = WorkerChannel::new(id, self.notices.clone());
        let handle = self.launcher.launch(&self.target, &opts, channel)?;
        let rec = WorkerRecord::new(id, handle);
        debug!(worker = id, pid = rec.pid, "worker spawned");
        self.workers.insert(id, rec);
        Ok(id)
    }

    /// The replacement `id` is ready: retire the worker it replaces.
    fn hand_over(&mut self, id: WorkerId) {
        let Some(old) = self.replacements.remove(&id) else {
            return;
        };
        if self.stop.is_some() {
            return;
        }
        let enhanced = self.cfg.enhanced;
        let Some(rec) = self.workers.get_mut(&old) else {
            return;
        };
        let Some(reason) = rec.recycling else {
            return;
        };
        rec.intentional = true;
        info!(worker = old, pid = rec.pid, requests = rec.requests, replacement = id, "recycling worker");
        self.bus.emit(EventKind::Recycle {
            worker: old,
            pid: rec.pid,
            requests: rec.requests,
            reason,
        });

        signal(rec, Signal::Hangup);
        if enhanced {
            rec.retire = Some(self.timers.after(
                self.cfg.recycle_timeout,
                &self.runtime,
                Timer::RecycleTimeout(old),
            ));
            rec.handle.disconnect();
        } else {
            signal(rec, Signal::Kill);
        }
    }

    fn start_heartbeat(&mut self) {
        if self.heartbeat.is_some() {
            return;
        }
        if let Some(interval) = self.cfg.heartbeat_interval() {
            self.heartbeat = Some(
                self.timers
                    .every(interval, &self.runtime, || Timer::Heartbeat),
            );
        }
    }

    fn cancel_heartbeat(&mut self) {
        if let Some(token) = self.heartbeat.take() {
            token.cancel();
        }
    }

    fn broadcast(&mut self, msg: &Outbound) {
        for rec in self.workers.values_mut() {
            post(rec, msg);
        }
    }
}

fn post(rec: &mut WorkerRecord, msg: &Outbound) {
    if let Err(e) = rec.handle.send(msg) {
        debug!(worker = rec.id, pid = rec.pid, label = e.as_label(), error = %e, "send failed");
    }
}

fn signal(rec: &mut WorkerRecord, sig: Signal) {
    if let Err(e) = rec.handle.signal(sig) {
        debug!(worker = rec.id, pid = rec.pid, signal = %sig, error = %e, "signal failed");
    }
}
