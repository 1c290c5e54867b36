//! # Event subscribers.
//!
//! [`Subscribe`] is the observer trait; [`SubscriberSet`] fans events out to a list
//! of subscribers with per-subscriber queues.
//!
//! ```text
//!   supervisor core ── publish(Event) ──► Bus ──► subscriber listener ──► SubscriberSet
//!                                                                            │
//!                                                          ┌─────────┬───────┴──┐
//!                                                          ▼         ▼          ▼
//!                                                      LogWriter  Metrics   Custom ...
//! ```

mod embedded;
mod subscriber;
mod subscriber_set;

#[cfg(feature = "logging")]
pub use embedded::LogWriter;
pub use subscriber::Subscribe;
pub use subscriber_set::SubscriberSet;
