use std::future::pending;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout};
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::link::{Outgoing, WorkerLink};
use crate::core::shutdown::wait_for_stop_signal;
use crate::error::WorkerError;
use crate::heartbeat::{DEFAULT_TOLERANCE, HeartbeatWatchdog, Verdict, timestamp_ms};
use crate::process::{ENV_HEARTBEAT_INTERVAL, ENV_HEARTBEAT_TOLERANCE, ENV_WORKER_MODE};
use crate::protocol::{LineReader, Outbound, encode_line};

/// Error type returned by [`Service`] hooks. Its `Display` output is what the
/// supervisor receives.
pub type ServiceError = Box<dyn std::error::Error + Send + Sync>;

/// The program a worker runs.
#[async_trait]
pub trait Service: Send {
    /// Brings the service up. Report requests through `link` once serving.
    async fn start(&mut self, link: WorkerLink) -> Result<(), ServiceError>;

    /// Shuts the service down.
    async fn stop(&mut self) -> Result<(), ServiceError>;

    /// Handles a user payload from the supervisor. Ignored by default.
    async fn on_message(&mut self, payload: Value) {
        let _ = payload;
    }
}

/// How the worker run ended, and the exit code the process should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Graceful stop completed.
    Stopped,
    /// `Service::start` failed; the error was reported.
    StartFailed,
    /// `Service::stop` failed; the error was reported.
    StopFailed,
    /// No heartbeat for too long; the orphan error was reported.
    Orphaned,
}

impl WorkerExit {
    /// Process exit code.
    pub fn code(&self) -> i32 {
        match self {
            WorkerExit::Stopped | WorkerExit::Orphaned => 0,
            WorkerExit::StartFailed | WorkerExit::StopFailed => 1,
        }
    }
}

/// Worker half of the protocol.
///
/// ```text
/// start ──ok──► {"type":"started"} ──► loop {
///   │              heartbeat → watchdog.record
///   │              message   → Service::on_message
///   │              stop | EOF | SIGHUP (+ SIGINT/SIGTERM when single) → graceful stop
///   │              watchdog stale → {"type":"error","message":"Connection to master lost"} → Orphaned
///   │           }
///   └─err─► {"type":"error",...} ──► StartFailed
/// ```
pub struct WorkerRuntime<R, W> {
    reader: R,
    writer: W,
    heartbeat: Option<Duration>,
    tolerance: u32,
    signals: bool,
    pooled: bool,
}

impl WorkerRuntime<BufReader<Stdin>, Stdout> {
    /// Speaks the protocol over stdin/stdout, configured from the environment
    /// the launcher provides, with OS signal handling enabled.
    pub fn stdio() -> Self {
        let heartbeat = env_u64(ENV_HEARTBEAT_INTERVAL)
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);
        let tolerance = env_u64(ENV_HEARTBEAT_TOLERANCE)
            .and_then(|t| u32::try_from(t).ok())
            .unwrap_or(DEFAULT_TOLERANCE);
        let pooled = std::env::var(ENV_WORKER_MODE).map_or(true, |mode| mode != "single");

        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .with_heartbeat(heartbeat)
            .with_tolerance(tolerance)
            .with_signals(true)
            .pooled(pooled)
    }
}

impl<R, W> WorkerRuntime<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Speaks the protocol over the given streams. No watchdog, no signal handling.
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            heartbeat: None,
            tolerance: DEFAULT_TOLERANCE,
            signals: false,
            pooled: true,
        }
    }

    /// Enables the heartbeat watchdog (`None` disables it).
    pub fn with_heartbeat(mut self, interval: Option<Duration>) -> Self {
        self.heartbeat = interval;
        self
    }

    /// Sets how many intervals may pass without a heartbeat.
    pub fn with_tolerance(mut self, tolerance: u32) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Enables OS signal handling.
    pub fn with_signals(mut self, enabled: bool) -> Self {
        self.signals = enabled;
        self
    }

    /// Pooled workers ignore SIGINT/SIGTERM; single processes stop on them.
    pub fn pooled(mut self, pooled: bool) -> Self {
        self.pooled = pooled;
        self
    }

    /// Runs `service` until it stops, fails, or loses its supervisor.
    ///
    /// Only channel I/O failures are errors; service failures are reported to the
    /// supervisor and described by the returned [`WorkerExit`].
    pub async fn run<S: Service>(self, mut service: S) -> Result<WorkerExit, WorkerError> {
        let Self {
            reader,
            writer,
            heartbeat,
            tolerance,
            signals,
            pooled,
        } = self;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(writer, rx));
        let link = WorkerLink::new(tx);

        if let Err(e) = service.start(link.clone()).await {
            let message = e.to_string();
            warn!(error = %message, "service start failed");
            link.error(message);
            link.flush().await;
            return Ok(WorkerExit::StartFailed);
        }
        link.started();
        info!("service started");

        let mut reader = LineReader::new(reader);
        let mut watchdog = heartbeat.map(|interval| HeartbeatWatchdog::new(interval, tolerance));
        let mut check = watchdog.as_ref().map(|dog| {
            let mut ticker = tokio::time::interval(dog.interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        let stop_signal = async move {
            if signals {
                wait_for_stop_signal(pooled).await
            } else {
                pending::<std::io::Result<&'static str>>().await
            }
        };
        tokio::pin!(stop_signal);

        let reason = loop {
            tokio::select! {
                msg = reader.next_message::<Outbound>() => match msg? {
                    None => break "channel closed",
                    Some(Err(e)) => warn!(error = %e, "invalid message from supervisor"),
                    Some(Ok(Outbound::Heartbeat { timestamp })) => {
                        if let Some(dog) = watchdog.as_mut() {
                            dog.record(timestamp);
                        }
                    }
                    Some(Ok(Outbound::Stop)) => break "stop requested",
                    Some(Ok(Outbound::Message { payload })) => service.on_message(payload).await,
                },
                sig = &mut stop_signal => break sig?,
                _ = tick(&mut check) => {
                    if let Some(dog) = watchdog.as_ref() {
                        if let Verdict::Stale { last } = dog.check(timestamp_ms()) {
                            warn!(last, window_ms = dog.window_ms(), "heartbeat timed out, exiting");
                            link.orphaned();
                            link.flush().await;
                            return Ok(WorkerExit::Orphaned);
                        }
                    }
                }
            }
        };

        info!(reason, "stopping service");
        match service.stop().await {
            Ok(()) => {
                debug!("service stopped");
                link.flush().await;
                Ok(WorkerExit::Stopped)
            }
            Err(e) => {
                let message = e.to_string();
                warn!(error = %message, "service stop failed");
                link.error(message);
                link.flush().await;
                Ok(WorkerExit::StopFailed)
            }
        }
    }
}

async fn tick(check: &mut Option<Interval>) {
    match check {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => pending::<()>().await,
    }
}

async fn write_loop<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<Outgoing>,
) {
    while let Some(out) = rx.recv().await {
        match out {
            Outgoing::Msg(msg) => {
                let line = match encode_line(&msg) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!(error = %e, "dropping unencodable message");
                        continue;
                    }
                };
                let written = match writer.write_all(line.as_bytes()).await {
                    Ok(()) => writer.flush().await,
                    Err(e) => Err(e),
                };
                if let Err(e) = written {
                    debug!(error = %e, "supervisor channel closed");
                    break;
                }
            }
            Outgoing::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok()?.trim().parse().ok()
}
