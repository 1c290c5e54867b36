//! In-memory process layer for scenario tests.
//!
//! Every launch creates a [`FakeProc`] that reports online immediately and then
//! behaves according to its [`Behaviour`]. Tests drive crashes and requests
//! through the proc and observe what the supervisor sent to it.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use procvisor::{
    Event, EventKind, ExitStatus, Inbound, LaunchOptions, Launcher, MemorySampler, MemoryUsage,
    Outbound, ProcessHandle, SendError, Signal, Target, WorkerChannel,
};
use tokio::sync::broadcast;

/// What a fake process does once it is online.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Boot {
    /// Reports `started`.
    Started,
    /// Reports nothing.
    Silent,
    /// Reports an error and stays alive.
    Fail(&'static str),
    /// Reports an error, then exits with the code.
    FailExit(&'static str, i32),
    /// Exits right away with the code.
    Exit(i32),
}

/// What a fake process does when it receives a stop message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OnStop {
    Exit,
    Fail(&'static str),
    Ignore,
}

#[derive(Clone, Copy, Debug)]
pub struct Behaviour {
    pub boot: Boot,
    pub on_stop: OnStop,
    /// Exits on SIGTERM / SIGINT.
    pub dies_on_term: bool,
    /// Exits on SIGHUP or when the supervisor disconnects.
    pub dies_on_hangup: bool,
}

impl Default for Behaviour {
    fn default() -> Self {
        Self {
            boot: Boot::Started,
            on_stop: OnStop::Exit,
            dies_on_term: true,
            dies_on_hangup: true,
        }
    }
}

impl Behaviour {
    pub fn boot(boot: Boot) -> Self {
        Self {
            boot,
            ..Self::default()
        }
    }

    /// Ignores everything but SIGKILL.
    pub fn stubborn() -> Self {
        Self {
            boot: Boot::Started,
            on_stop: OnStop::Ignore,
            dies_on_term: false,
            dies_on_hangup: false,
        }
    }
}

pub struct FakeProc {
    pid: u32,
    opts: LaunchOptions,
    behaviour: Behaviour,
    channel: WorkerChannel,
    exited: AtomicBool,
    sent: Mutex<Vec<Outbound>>,
    signals: Mutex<Vec<Signal>>,
}

impl FakeProc {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn opts(&self) -> LaunchOptions {
        self.opts
    }

    pub fn is_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<Outbound> {
        self.sent.lock().unwrap().clone()
    }

    pub fn heartbeats(&self) -> Vec<u64> {
        self.sent()
            .into_iter()
            .filter_map(|msg| match msg {
                Outbound::Heartbeat { timestamp } => Some(timestamp),
                _ => None,
            })
            .collect()
    }

    pub fn signals(&self) -> Vec<Signal> {
        self.signals.lock().unwrap().clone()
    }

    /// Dies on its own.
    pub fn crash(&self, code: i32) {
        self.exit(ExitStatus::code(code));
    }

    pub fn request(&self) {
        self.channel.message(Inbound::Request);
    }

    pub fn report(&self, msg: Inbound) {
        self.channel.message(msg);
    }

    fn exit(&self, status: ExitStatus) {
        if !self.exited.swap(true, Ordering::SeqCst) {
            self.channel.exited(status);
        }
    }
}

struct FakeHandle {
    proc: Arc<FakeProc>,
    disconnected: bool,
}

impl ProcessHandle for FakeHandle {
    fn pid(&self) -> Option<u32> {
        Some(self.proc.pid)
    }

    fn send(&mut self, msg: &Outbound) -> Result<(), SendError> {
        if self.disconnected || self.proc.is_exited() {
            return Err(SendError::Disconnected);
        }
        self.proc.sent.lock().unwrap().push(msg.clone());
        if *msg == Outbound::Stop {
            match self.proc.behaviour.on_stop {
                OnStop::Exit => self.proc.exit(ExitStatus::code(0)),
                OnStop::Fail(message) => self.proc.channel.message(Inbound::error(message)),
                OnStop::Ignore => {}
            }
        }
        Ok(())
    }

    fn signal(&mut self, signal: Signal) -> io::Result<()> {
        if self.proc.is_exited() {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such process"));
        }
        self.proc.signals.lock().unwrap().push(signal);
        match signal {
            Signal::Kill => self.proc.exit(ExitStatus::signaled(9)),
            Signal::Terminate | Signal::Interrupt if self.proc.behaviour.dies_on_term => {
                self.proc.exit(ExitStatus::signaled(15))
            }
            Signal::Hangup if self.proc.behaviour.dies_on_hangup => {
                self.proc.exit(ExitStatus::code(0))
            }
            _ => {}
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.disconnected {
            return;
        }
        self.disconnected = true;
        // a cooperative process notices EOF and leaves; a stubborn one keeps running
        if !self.proc.is_exited() && self.proc.behaviour.dies_on_hangup {
            self.proc.channel.disconnected();
            self.proc.exit(ExitStatus::code(0));
        }
    }

    fn exited_after_disconnect(&self) -> bool {
        self.disconnected
    }
}

#[derive(Default)]
struct State {
    script: VecDeque<Behaviour>,
    default: Option<Behaviour>,
    failing: usize,
    next_pid: u32,
    procs: Vec<Arc<FakeProc>>,
}

/// Launcher handing out [`FakeProc`]s. Clones share state.
#[derive(Clone, Default)]
pub struct FakeLauncher {
    state: Arc<Mutex<State>>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Behaviour of every launch not covered by [`script`](Self::script).
    pub fn with_default(self, behaviour: Behaviour) -> Self {
        self.state.lock().unwrap().default = Some(behaviour);
        self
    }

    /// Behaviour of the next unscripted launch.
    pub fn script(&self, behaviour: Behaviour) {
        self.state.lock().unwrap().script.push_back(behaviour);
    }

    /// Makes the next `n` launches fail.
    pub fn fail_launches(&self, n: usize) {
        self.state.lock().unwrap().failing = n;
    }

    pub fn launches(&self) -> usize {
        self.state.lock().unwrap().procs.len()
    }

    pub fn procs(&self) -> Vec<Arc<FakeProc>> {
        self.state.lock().unwrap().procs.clone()
    }

    pub fn proc(&self, index: usize) -> Arc<FakeProc> {
        self.procs()[index].clone()
    }

    /// Processes that have not exited.
    pub fn alive(&self) -> Vec<Arc<FakeProc>> {
        self.procs().into_iter().filter(|p| !p.is_exited()).collect()
    }
}

impl Launcher for FakeLauncher {
    fn launch(
        &self,
        _target: &Target,
        opts: &LaunchOptions,
        channel: WorkerChannel,
    ) -> io::Result<Box<dyn ProcessHandle>> {
        let proc = {
            let mut state = self.state.lock().unwrap();
            if state.failing > 0 {
                state.failing -= 1;
                return Err(io::Error::new(io::ErrorKind::NotFound, "no such program"));
            }
            let behaviour = state
                .script
                .pop_front()
                .or(state.default)
                .unwrap_or_default();
            state.next_pid += 1;
            let proc = Arc::new(FakeProc {
                pid: 1000 + state.next_pid,
                opts: *opts,
                behaviour,
                channel,
                exited: AtomicBool::new(false),
                sent: Mutex::new(Vec::new()),
                signals: Mutex::new(Vec::new()),
            });
            state.procs.push(proc.clone());
            proc
        };

        proc.channel.online();
        match proc.behaviour.boot {
            Boot::Started => proc.channel.message(Inbound::Started),
            Boot::Silent => {}
            Boot::Fail(message) => proc.channel.message(Inbound::error(message)),
            Boot::FailExit(message, code) => {
                proc.channel.message(Inbound::error(message));
                proc.exit(ExitStatus::code(code));
            }
            Boot::Exit(code) => proc.exit(ExitStatus::code(code)),
        }

        Ok(Box::new(FakeHandle {
            proc,
            disconnected: false,
        }))
    }
}

/// Memory source the test moves by hand. Clones share the reading.
#[derive(Clone, Default)]
pub struct FakeSampler {
    current: Arc<Mutex<MemoryUsage>>,
}

impl FakeSampler {
    pub fn set(&self, heap_total: u64, heap_used: u64) {
        *self.current.lock().unwrap() = MemoryUsage {
            heap_total,
            heap_used,
        };
    }
}

impl MemorySampler for FakeSampler {
    fn sample(&mut self) -> Option<MemoryUsage> {
        Some(*self.current.lock().unwrap())
    }
}

/// Target that is never executed by the fake launcher.
pub fn target() -> Target {
    Target::new("fake-worker")
}

/// Waits for the first event matching `pred`, skipping the rest.
pub async fn wait_for<F>(rx: &mut broadcast::Receiver<Event>, pred: F) -> Event
where
    F: Fn(&EventKind) -> bool,
{
    tokio::time::timeout(Duration::from_secs(3600), async {
        loop {
            let ev = rx.recv().await.expect("bus closed");
            if pred(&ev.kind) {
                return ev;
            }
        }
    })
    .await
    .expect("event never arrived")
}

/// Drains every event already published.
pub fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<EventKind> {
    let mut out = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        out.push(ev.kind);
    }
    out
}

/// Lets the supervisor core process everything queued, without moving time.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}
