use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::protocol::Inbound;

pub(crate) enum Outgoing {
    Msg(Inbound),
    Flush(oneshot::Sender<()>),
}

/// Upstream half of the protocol, handed to a [`Service`](super::Service).
///
/// Cloneable; every clone writes to the same supervisor channel, in order.
/// Writes never block and are dropped silently once the channel is gone.
#[derive(Clone, Debug)]
pub struct WorkerLink {
    tx: mpsc::UnboundedSender<Outgoing>,
}

impl WorkerLink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Outgoing>) -> Self {
        Self { tx }
    }

    /// Counts one served request toward the recycle threshold.
    pub fn request(&self) {
        self.push(Inbound::Request);
    }

    /// Sends a user payload to the supervisor.
    pub fn send(&self, payload: impl Into<Value>) {
        self.push(Inbound::Message {
            payload: payload.into(),
        });
    }

    /// Reports an error. During start or stop the supervisor fails that operation.
    pub fn error(&self, message: impl Into<String>) {
        self.push(Inbound::error(message));
    }

    pub(crate) fn started(&self) {
        self.push(Inbound::Started);
    }

    pub(crate) fn orphaned(&self) {
        self.push(Inbound::orphaned());
    }

    /// Waits until everything queued before this call was written.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(Outgoing::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }

    /// True once the writer has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn push(&self, msg: Inbound) {
        let _ = self.tx.send(Outgoing::Msg(msg));
    }
}
