//! # OS process launcher.
//!
//! [`CommandLauncher`] runs workers with `tokio::process`. The control channel is the
//! worker's stdio:
//!
//! ```text
//!            ┌──────── writer task ────────┐
//! send() ──► │ mpsc<String> ──► child stdin │   (dropping the sender closes stdin = disconnect)
//!            └──────────────────────────────┘
//!            ┌──────── reader task ────────┐
//! inbox  ◄── │ LineReader(child stdout)    │   (EOF → Disconnect)
//!            └──────────────────────────────┘
//!            ┌──────── waiter task ────────┐
//! inbox  ◄── │ child.wait() → Exit          │   (waits for the reader so messages precede Exit)
//!            └──────────────────────────────┘
//! ```
//!
//! stderr is inherited so worker diagnostics end up wherever the supervisor logs go.

use std::io;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::handle::{
    ExitStatus, LaunchOptions, Launcher, ProcessHandle, Signal, Target, WorkerChannel,
};
use crate::error::SendError;
use crate::protocol::{Inbound, LineReader, Outbound, encode_line};

/// How long the waiter lets the reader drain stdout after the process exited.
const READER_DRAIN: Duration = Duration::from_secs(1);

/// Launches workers as child processes speaking NDJSON over stdio.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandLauncher;

impl CommandLauncher {
    /// Creates a launcher.
    pub fn new() -> Self {
        Self
    }
}

impl Launcher for CommandLauncher {
    fn launch(
        &self,
        target: &Target,
        opts: &LaunchOptions,
        channel: WorkerChannel,
    ) -> io::Result<Box<dyn ProcessHandle>> {
        let mut cmd = Command::new(&target.program);
        cmd.args(&target.args)
            .envs(target.env.iter().map(|(k, v)| (k, v)))
            .envs(opts.env_vars())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = &target.cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn()?;
        let pid = child.id();
        let worker = channel.id();
        debug!(worker, pid, program = %target.program.display(), "process spawned");

        let (tx, rx) = mpsc::unbounded_channel::<String>();
        if let Some(stdin) = child.stdin.take() {
            tokio::spawn(write_loop(stdin, rx, worker));
        }
        let reader = child
            .stdout
            .take()
            .map(|stdout| tokio::spawn(read_loop(stdout, channel.clone())));

        let kill = CancellationToken::new();
        let reaped = Arc::new(AtomicBool::new(false));
        tokio::spawn(wait_loop(
            child,
            kill.clone(),
            reaped.clone(),
            reader,
            channel.clone(),
        ));

        channel.online();
        Ok(Box::new(CommandHandle {
            pid,
            outbox: Some(tx),
            kill,
            reaped,
            disconnected: false,
        }))
    }
}

struct CommandHandle {
    pid: Option<u32>,
    outbox: Option<mpsc::UnboundedSender<String>>,
    kill: CancellationToken,
    /// Set once the waiter reaped the process; its pid may be reused after that.
    reaped: Arc<AtomicBool>,
    disconnected: bool,
}

impl ProcessHandle for CommandHandle {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn send(&mut self, msg: &Outbound) -> Result<(), SendError> {
        let outbox = self.outbox.as_ref().ok_or(SendError::Disconnected)?;
        let line = encode_line(msg)?;
        outbox.send(line).map_err(|_| SendError::Disconnected)
    }

    fn signal(&mut self, signal: Signal) -> io::Result<()> {
        if signal == Signal::Kill {
            self.kill.cancel();
            return Ok(());
        }
        let pid = self
            .pid
            .filter(|_| !self.reaped.load(Ordering::Acquire))
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "process already reaped"))?;
        deliver(pid, signal)
    }

    fn disconnect(&mut self) {
        self.disconnected = true;
        self.outbox = None;
    }

    fn exited_after_disconnect(&self) -> bool {
        self.disconnected
    }
}

#[cfg(unix)]
fn deliver(pid: u32, signal: Signal) -> io::Result<()> {
    use nix::sys::signal::{Signal as NixSignal, kill};
    use nix::unistd::Pid;

    let sig = match signal {
        Signal::Hangup => NixSignal::SIGHUP,
        Signal::Interrupt => NixSignal::SIGINT,
        Signal::Terminate => NixSignal::SIGTERM,
        Signal::Kill => NixSignal::SIGKILL,
    };
    kill(Pid::from_raw(pid as i32), sig).map_err(io::Error::from)
}

#[cfg(not(unix))]
fn deliver(_pid: u32, signal: Signal) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("{signal} is not supported on this platform"),
    ))
}

async fn write_loop(mut stdin: ChildStdin, mut rx: mpsc::UnboundedReceiver<String>, worker: u64) {
    while let Some(line) = rx.recv().await {
        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            debug!(worker, error = %e, "worker stdin closed");
            break;
        }
        if let Err(e) = stdin.flush().await {
            debug!(worker, error = %e, "worker stdin flush failed");
            break;
        }
    }
}

async fn read_loop(stdout: ChildStdout, channel: WorkerChannel) {
    let mut lines = LineReader::new(BufReader::new(stdout));
    loop {
        match lines.next_message::<Inbound>().await {
            Ok(Some(Ok(msg))) => channel.message(msg),
            Ok(Some(Err(e))) => {
                debug!(worker = channel.id(), label = e.as_label(), error = %e, "dropping invalid line");
            }
            Ok(None) => break,
            Err(e) => {
                debug!(worker = channel.id(), error = %e, "worker stdout read failed");
                break;
            }
        }
    }
    channel.disconnected();
}

async fn wait_loop(
    mut child: Child,
    kill: CancellationToken,
    reaped: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
    channel: WorkerChannel,
) {
    let status = tokio::select! {
        res = child.wait() => res,
        _ = kill.cancelled() => {
            if let Err(e) = child.start_kill() {
                debug!(worker = channel.id(), error = %e, "kill failed");
            }
            child.wait().await
        }
    };
    reaped.store(true, Ordering::Release);

    if let Some(reader) = reader {
        if tokio::time::timeout(READER_DRAIN, reader).await.is_err() {
            debug!(worker = channel.id(), "stdout still open after exit");
        }
    }

    let status = match status {
        Ok(s) => ExitStatus::from(s),
        Err(e) => {
            warn!(worker = channel.id(), error = %e, "failed to reap process");
            ExitStatus::default()
        }
    };
    channel.exited(status);
}
