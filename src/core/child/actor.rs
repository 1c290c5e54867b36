//! # Child core: the one task that owns a single process and its status.
//!
//! At most one process exists at a time. Notices from an older process (already
//! replaced or reaped) are ignored by id.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Command, Reply, Status};
use crate::config::ChildConfig;
use crate::core::timer::Timers;
use crate::error::SupervisorError;
use crate::events::{Bus, EventKind};
use crate::heartbeat::timestamp_ms;
use crate::process::{
    ExitStatus, LaunchOptions, Launcher, ProcessEvent, ProcessHandle, ProcessNotice,
    SchedulingPolicy, Signal, Target, WorkerChannel, WorkerId,
};
use crate::protocol::{Inbound, ORPHAN_MESSAGE, Outbound};

pub(crate) enum Timer {
    Heartbeat,
    Respawn,
    Deadline(WorkerId),
    StopTimeout(WorkerId),
}

struct Current {
    id: WorkerId,
    pid: Option<u32>,
    handle: Box<dyn ProcessHandle>,
    intentional: bool,
    /// Fire-once deadline or stop deadline, whichever is armed.
    deadline: Option<CancellationToken>,
}

pub(crate) struct ChildCore {
    target: Target,
    cfg: ChildConfig,
    launcher: Arc<dyn Launcher>,
    bus: Bus,
    status_tx: watch::Sender<Status>,
    notices: mpsc::UnboundedSender<ProcessNotice>,
    timers: Timers<Timer>,
    runtime: CancellationToken,

    status: Status,
    current: Option<Current>,
    next_id: WorkerId,
    heartbeat: Option<CancellationToken>,
    respawn: Option<CancellationToken>,
    pending_start: Option<Reply>,
    pending_stop: Option<Reply>,
    /// Error reported by a fire-once process, returned when it exits.
    once_error: Option<String>,
    timed_out: bool,
    /// The process being started replaces a crashed one.
    respawning: bool,
}

impl ChildCore {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        target: Target,
        cfg: ChildConfig,
        launcher: Arc<dyn Launcher>,
        bus: Bus,
        status_tx: watch::Sender<Status>,
        notices: mpsc::UnboundedSender<ProcessNotice>,
        timers: Timers<Timer>,
        runtime: CancellationToken,
    ) -> Self {
        Self {
            target,
            cfg,
            launcher,
            bus,
            status_tx,
            notices,
            timers,
            runtime,
            status: Status::Ready,
            current: None,
            next_id: 1,
            heartbeat: None,
            respawn: None,
            pending_start: None,
            pending_stop: None,
            once_error: None,
            timed_out: false,
            respawning: false,
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
        if let Some(cur) = self.current.as_mut() {
            debug!(worker = cur.id, pid = cur.pid, "supervisor dropped, killing process");
            cur.intentional = true;
            signal(cur, Signal::Kill);
        }
        self.runtime.cancel();
    }

    fn set_status(&mut self, status: Status) {
        if self.status == status {
            return;
        }
        debug!(from = %self.status, to = %status, "status changed");
        self.status = status;
        self.status_tx.send_replace(status);
        self.bus.emit(EventKind::Status(status));
    }

    // ---- commands ----

    fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Start(reply) => self.start(reply),
            Command::Stop(reply) => self.stop(reply),
            Command::Send(payload) => match self.current.as_mut() {
                Some(cur) => post(cur, &Outbound::Message { payload }),
                None => debug!("no process, message dropped"),
            },
            Command::Kill(sig) => {
                if let Some(cur) = self.current.as_mut() {
                    signal(cur, sig);
                }
            }
        }
    }

    fn start(&mut self, reply: Reply) {
        match self.status {
            Status::Ready => {}
            Status::Ok if !self.cfg.is_once() => {
                let _ = reply.send(Ok(()));
                return;
            }
            Status::Stopping => {
                let _ = reply.send(Err(SupervisorError::Busy { operation: "stop" }));
                return;
            }
            _ => {
                let _ = reply.send(Err(SupervisorError::Busy { operation: "start" }));
                return;
            }
        }

        self.once_error = None;
        self.timed_out = false;
        self.respawning = false;
        self.set_status(Status::Starting);
        if let Err(source) = self.spawn() {
            warn!(error = %source, "failed to spawn process");
            self.set_status(Status::Ready);
            let _ = reply.send(Err(SupervisorError::Spawn { source }));
            return;
        }
        self.start_heartbeat();
        self.pending_start = Some(reply);
    }

    fn stop(&mut self, reply: Reply) {
        // only a running process has anything to stop; a pending restart still fires
        if self.status != Status::Ok {
            let _ = reply.send(Ok(()));
            return;
        }

        let Some(cur) = self.current.as_mut() else {
            self.set_status(Status::Ready);
            let _ = reply.send(Ok(()));
            return;
        };
        info!(worker = cur.id, pid = cur.pid, "stopping process");
        cur.intentional = true;
        if self.cfg.enhanced {
            if let Err(e) = cur.handle.send(&Outbound::Stop) {
                debug!(worker = cur.id, error = %e, "stop message failed, terminating");
                signal(cur, Signal::Terminate);
            }
        } else {
            signal(cur, Signal::Terminate);
        }
        if let Some(deadline) = self.cfg.effective_stop_timeout() {
            if let Some(token) = cur.deadline.take() {
                token.cancel();
            }
            cur.deadline = Some(
                self.timers
                    .after(deadline, &self.runtime, Timer::StopTimeout(cur.id)),
            );
        }
        self.pending_stop = Some(reply);
        self.cancel_heartbeat();
        self.set_status(Status::Stopping);
    }

    // ---- process notices ----

    fn on_notice(&mut self, notice: ProcessNotice) {
        if self.current.as_ref().map(|cur| cur.id) != Some(notice.worker) {
            debug!(worker = notice.worker, "notice from a stale process ignored");
            return;
        }
        match notice.event {
            ProcessEvent::Online => self.on_online(),
            ProcessEvent::Message(msg) => self.on_message(msg),
            ProcessEvent::Disconnect => {}
            ProcessEvent::Exit(status) => self.on_exit(status),
        }
    }

    fn on_online(&mut self) {
        let prime = self.cfg.enhanced && self.heartbeat.is_some();
        let Some(cur) = self.current.as_mut() else {
            return;
        };
        if prime {
            post(cur, &Outbound::Heartbeat {
                timestamp: timestamp_ms(),
            });
        }
        let (worker, pid) = (cur.id, cur.pid);
        debug!(worker, pid, "process online");
        self.bus.emit(EventKind::WorkerOnline { worker, pid });

        if self.status != Status::Starting {
            return;
        }
        if self.cfg.is_once() {
            // fire-once: the start resolves at exit
            self.set_status(Status::Ok);
        } else if !self.cfg.enhanced {
            self.become_ok();
        }
    }

    fn on_message(&mut self, msg: Inbound) {
        match msg {
            Inbound::Started => {
                if self.cfg.enhanced && !self.cfg.is_once() && self.status == Status::Starting {
                    self.become_ok();
                }
            }
            Inbound::Error { message } => self.on_error(message),
            Inbound::Request => {}
            Inbound::Message { payload } => {
                if let Some(cur) = self.current.as_ref() {
                    self.bus.emit(EventKind::Message {
                        worker: cur.id,
                        payload,
                    });
                }
            }
        }
    }

    fn on_error(&mut self, message: String) {
        let Some(cur) = self.current.as_mut() else {
            return;
        };
        let (worker, pid) = (cur.id, cur.pid);
        if message == ORPHAN_MESSAGE {
            warn!(worker, pid, "process lost its supervisor");
            self.bus.emit(EventKind::Orphan { worker, pid });
        } else {
            warn!(worker, pid, error = %message, "process reported an error");
        }
        self.bus.emit(EventKind::WorkerError {
            worker,
            pid,
            message: message.clone(),
        });

        if self.cfg.is_once() {
            self.once_error.get_or_insert(message);
            return;
        }
        if self.status == Status::Starting {
            // a start error is final: no restart
            cur.intentional = true;
            signal(cur, Signal::Kill);
            if let Some(reply) = self.pending_start.take() {
                let _ = reply.send(Err(SupervisorError::Startup { message }));
            }
        } else if let Some(reply) = self.pending_stop.take() {
            let _ = reply.send(Err(SupervisorError::Stop { message }));
        }
    }

    fn become_ok(&mut self) {
        self.set_status(Status::Ok);
        if let Some(reply) = self.pending_start.take() {
            let _ = reply.send(Ok(()));
        }
        if std::mem::take(&mut self.respawning) {
            if let Some(cur) = self.current.as_ref() {
                info!(worker = cur.id, pid = cur.pid, "process respawned");
                self.bus.emit(EventKind::Respawn {
                    worker: cur.id,
                    pid: cur.pid,
                });
            }
        }
    }

    fn on_exit(&mut self, status: ExitStatus) {
        let Some(mut cur) = self.current.take() else {
            return;
        };
        if let Some(token) = cur.deadline.take() {
            token.cancel();
        }
        let intentional = cur.intentional || cur.handle.exited_after_disconnect();
        if intentional || status.success() {
            debug!(worker = cur.id, pid = cur.pid, %status, "process exited");
        } else {
            warn!(worker = cur.id, pid = cur.pid, %status, "process exited unexpectedly");
        }
        self.bus.emit(EventKind::WorkerExit {
            worker: cur.id,
            pid: cur.pid,
            status,
            intentional,
        });

        if self.cfg.is_once() {
            self.finish_once(status);
            return;
        }

        if let Some(reply) = self.pending_stop.take() {
            self.set_status(Status::Ready);
            let _ = reply.send(Ok(()));
            return;
        }

        if let Some(reply) = self.pending_start.take() {
            self.cancel_heartbeat();
            self.set_status(Status::Ready);
            let _ = reply.send(Err(SupervisorError::Startup {
                message: format!("process exited during start ({status})"),
            }));
            return;
        }

        let crashed = !intentional && matches!(self.status, Status::Ok | Status::Starting);
        if crashed && self.cfg.respawn {
            self.set_status(Status::Respawn);
            let delay = self.cfg.respawn_jitter.apply(self.cfg.respawn_delay);
            debug!(?delay, "respawn scheduled");
            self.respawn = Some(self.timers.after(delay, &self.runtime, Timer::Respawn));
        } else {
            self.cancel_heartbeat();
            self.set_status(Status::Ready);
        }
    }

    fn finish_once(&mut self, status: ExitStatus) {
        self.cancel_heartbeat();
        let result = if self.timed_out {
            Err(SupervisorError::Timeout {
                timeout: self.cfg.once_timeout().unwrap_or_default(),
            })
        } else if let Some(message) = self.once_error.take() {
            Err(SupervisorError::Startup { message })
        } else if status.success() {
            Ok(())
        } else {
            Err(SupervisorError::Startup {
                message: format!("process exited with {status}"),
            })
        };
        self.set_status(Status::Ready);
        if let Some(reply) = self.pending_start.take() {
            let _ = reply.send(result);
        }
        if let Some(reply) = self.pending_stop.take() {
            let _ = reply.send(Ok(()));
        }
    }

    // ---- timers ----

    fn on_timer(&mut self, timer: Timer) {
        match timer {
            Timer::Heartbeat => {
                if self.heartbeat.is_some() {
                    if let Some(cur) = self.current.as_mut() {
                        post(cur, &Outbound::Heartbeat {
                            timestamp: timestamp_ms(),
                        });
                    }
                }
            }
            Timer::Respawn => self.respawn(),
            Timer::Deadline(id) => {
                let Some(cur) = self.current.as_mut().filter(|cur| cur.id == id) else {
                    return;
                };
                warn!(worker = id, pid = cur.pid, "process timeout reached, killing");
                self.timed_out = true;
                cur.intentional = true;
                signal(cur, Signal::Kill);
            }
            Timer::StopTimeout(id) => {
                if self.status != Status::Stopping {
                    return;
                }
                let Some(cur) = self.current.as_mut().filter(|cur| cur.id == id) else {
                    return;
                };
                warn!(worker = id, pid = cur.pid, "stop timeout reached, killing");
                signal(cur, Signal::Kill);
            }
        }
    }

    fn respawn(&mut self) {
        if self.status != Status::Respawn {
            return;
        }
        self.respawn = None;
        self.respawning = true;
        self.set_status(Status::Starting);
        if let Err(e) = self.spawn() {
            warn!(error = %e, "respawn failed, retrying");
            self.respawning = false;
            self.set_status(Status::Respawn);
            self.respawn = Some(self.timers.after(
                self.cfg.respawn_delay,
                &self.runtime,
                Timer::Respawn,
            ));
        }
    }

    // ---- helpers ----

    fn spawn(&mut self) -> std::io::Result<()> {
        let id = self.next_id;
        self.next_id += 1;
        let opts = LaunchOptions {
            heartbeat: self.cfg.heartbeat_interval(),
            heartbeat_tolerance: self.cfg.heartbeat_tolerance,
            scheduling_policy: SchedulingPolicy::default(),
            pooled: false,
        };
        let channel = WorkerChannel::new(id, self.notices.clone());
        let handle = self.launcher.launch(&self.target, &opts, channel)?;
        let pid = handle.pid();
        debug!(worker = id, pid, "process spawned");

        let deadline = match self.cfg.once_timeout() {
            Some(timeout) if self.cfg.is_once() => {
                Some(self.timers.after(timeout, &self.runtime, Timer::Deadline(id)))
            }
            _ => None,
        };
        self.current = Some(Current {
            id,
            pid,
            handle,
            intentional: false,
            deadline,
        });
        Ok(())
    }

    fn start_heartbeat(&mut self) {
        if self.heartbeat.is_some() || !self.cfg.enhanced {
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
}

fn post(cur: &mut Current, msg: &Outbound) {
    if let Err(e) = cur.handle.send(msg) {
        debug!(worker = cur.id, pid = cur.pid, label = e.as_label(), error = %e, "send failed");
    }
}

fn signal(cur: &mut Current, sig: Signal) {
    if let Err(e) = cur.handle.signal(sig) {
        debug!(worker = cur.id, pid = cur.pid, signal = %sig, error = %e, "signal failed");
    }
}
