//! # Event bus.
//!
//! [`Bus`] wraps [`tokio::sync::broadcast`]. Each supervisor owns one bus; its core
//! publishes, and any number of receivers observe:
//!
//! ```text
//!   supervisor core ──┐
//!   signal watcher  ──┼──► Bus ──┬──► subscriber listener ──► SubscriberSet ──► Subscribe impls
//!   SubscriberSet   ──┘          └──► handle.subscribe() receivers (tests, callers)
//! ```
//!
//! ## Rules
//! - `publish()` never blocks and never fails; with no receivers the event is dropped.
//! - One ring buffer of `capacity` events is shared by all receivers.
//! - Slow receivers observe `RecvError::Lagged(n)` and skip the `n` oldest events.

use tokio::sync::broadcast;

use super::event::{Event, EventKind};

/// Broadcast channel for runtime events. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a bus holding at most `capacity` undelivered events (min 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<Event>(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event to all current receivers.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Stamps and publishes `kind`.
    #[inline]
    pub fn emit(&self, kind: EventKind) {
        self.publish(Event::new(kind));
    }

    /// Creates a receiver that observes events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn receivers_see_events_published_after_subscribe() {
        let bus = Bus::new(8);
        bus.emit(EventKind::Started);

        let mut rx = bus.subscribe();
        bus.emit(EventKind::Stopping);
        bus.emit(EventKind::Stopped);

        assert_eq!(rx.recv().await.unwrap().kind, EventKind::Stopping);
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::Stopped);
    }

    #[tokio::test]
    async fn lagging_receiver_skips_oldest() {
        let bus = Bus::new(1);
        let mut rx = bus.subscribe();
        bus.emit(EventKind::Stopping);
        bus.emit(EventKind::Stopped);

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(1))
        ));
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::Stopped);
    }
}
