//! # Cancellable timers that post back into a core's inbox.
//!
//! A supervisor core never sleeps itself. Every delay (respawn, recycle timeout,
//! stop deadline, heartbeat tick) is a small spawned task that sends a message to
//! the core when it fires:
//!
//! ```text
//! core ── after(delay, parent, msg) ──► spawn { select! { sleep(delay) → tx.send(msg), token.cancelled() } }
//!      ◄─────────────────── msg ────────────────────┘
//! ```
//!
//! Each timer runs under a child of `parent`, so cancelling the parent cancels every
//! timer below it. A firing can already be queued when its token is cancelled, so
//! cores re-validate their state when the message arrives.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Timer factory bound to one inbox.
pub(crate) struct Timers<T> {
    tx: mpsc::UnboundedSender<T>,
}

impl<T: Send + 'static> Timers<T> {
    pub(crate) fn new(tx: mpsc::UnboundedSender<T>) -> Self {
        Self { tx }
    }

    /// Posts `msg` once after `delay`.
    pub(crate) fn after(
        &self,
        delay: Duration,
        parent: &CancellationToken,
        msg: T,
    ) -> CancellationToken {
        let token = parent.child_token();
        let cancelled = token.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(msg);
                }
            }
        });
        token
    }

    /// Posts `make()` every `period`, first after one full period.
    pub(crate) fn every<F>(
        &self,
        period: Duration,
        parent: &CancellationToken,
        make: F,
    ) -> CancellationToken
    where
        F: Fn() -> T + Send + 'static,
    {
        let token = parent.child_token();
        let cancelled = token.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        if tx.send(make()).is_err() {
                            break;
                        }
                    }
                }
            }
        });
        token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn after_fires_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let timers = Timers::new(tx);
        let root = CancellationToken::new();

        timers.after(Duration::from_secs(15), &root, "respawn");
        assert_eq!(rx.recv().await, Some("respawn"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let (tx, mut rx) = mpsc::unbounded_channel::<&str>();
        let timers = Timers::new(tx);
        let root = CancellationToken::new();

        let t = timers.after(Duration::from_secs(1), &root, "late");
        t.cancel();
        timers.after(Duration::from_secs(2), &root, "kept");
        assert_eq!(rx.recv().await, Some("kept"));
    }

    #[tokio::test(start_paused = true)]
    async fn parent_cancels_periodic() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let timers = Timers::new(tx);
        let root = CancellationToken::new();

        let start = tokio::time::Instant::now();
        timers.every(Duration::from_secs(10), &root, || "tick");
        assert_eq!(rx.recv().await, Some("tick"));
        assert_eq!(start.elapsed(), Duration::from_secs(10));
        assert_eq!(rx.recv().await, Some("tick"));

        root.cancel();
        drop(timers);
        assert_eq!(rx.recv().await, None);
    }
}
