//! # LogWriter: events as log lines
//!
//! A minimal subscriber that renders every [`Event`] as one `tracing` record.
//! Lifecycle and recycling go out at `info`, crashes and orphans at `warn`,
//! pass-through messages at `debug`.
//!
//! ## Example output
//! ```text
//! [starting] workers=4
//! [online] worker=1 pid=4242
//! [exit] worker=1 pid=4242 status=signal 9 intentional=false
//! [respawn] worker=5 pid=4250
//! [recycle] worker=2 pid=4243 requests=1000000
//! [orphan] worker=3 pid=4244
//! [stopped]
//! ```

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let label = e.kind.as_label();
        match &e.kind {
            EventKind::Starting { workers } => info!("[{label}] workers={workers}"),
            EventKind::StopTimeout { remaining } => warn!("[{label}] remaining={remaining}"),
            EventKind::WorkerOnline { worker, pid } | EventKind::Respawn { worker, pid } => {
                info!("[{label}] worker={worker} pid={pid:?}")
            }
            EventKind::WorkerExit {
                worker,
                pid,
                status,
                intentional,
            } => {
                if *intentional {
                    info!("[{label}] worker={worker} pid={pid:?} status={status} intentional=true");
                } else {
                    warn!("[{label}] worker={worker} pid={pid:?} status={status} intentional=false");
                }
            }
            EventKind::Recycle {
                worker,
                pid,
                requests,
                reason,
            } => info!("[{label}] worker={worker} pid={pid:?} requests={requests} reason={reason:?}"),
            EventKind::RecycleTimeout { worker, pid } | EventKind::Orphan { worker, pid } => {
                warn!("[{label}] worker={worker} pid={pid:?}")
            }
            EventKind::WorkerError {
                worker,
                pid,
                message,
            } => warn!("[{label}] worker={worker} pid={pid:?} err={message:?}"),
            EventKind::Status(status) => info!("[{label}] {status}"),
            EventKind::Message { worker, payload } => {
                debug!("[{label}] worker={worker} payload={payload}")
            }
            EventKind::SubscriberOverflow { subscriber, reason } => {
                warn!("[{label}] subscriber={subscriber} reason={reason}")
            }
            EventKind::SubscriberPanicked { subscriber, info } => {
                warn!("[{label}] subscriber={subscriber} info={info}")
            }
            _ => info!("[{label}]"),
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
