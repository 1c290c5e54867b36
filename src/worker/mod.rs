//! # Worker side of the protocol.
//!
//! A supervised program wraps its service in a [`WorkerRuntime`] and lets it handle
//! the channel: the `started`/`error` reports, heartbeats, graceful stop and the
//! orphan watchdog.
//!
//! ## Example
//! ```rust,no_run
//! use procvisor::{Service, ServiceError, WorkerLink, WorkerRuntime};
//!
//! struct Echo {
//!     link: Option<WorkerLink>,
//! }
//!
//! #[async_trait::async_trait]
//! impl Service for Echo {
//!     async fn start(&mut self, link: WorkerLink) -> Result<(), ServiceError> {
//!         self.link = Some(link);
//!         Ok(())
//!     }
//!
//!     async fn stop(&mut self) -> Result<(), ServiceError> {
//!         Ok(())
//!     }
//!
//!     async fn on_message(&mut self, payload: serde_json::Value) {
//!         if let Some(link) = &self.link {
//!             link.request();
//!             link.send(payload);
//!         }
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), procvisor::WorkerError> {
//!     let exit = WorkerRuntime::stdio().run(Echo { link: None }).await?;
//!     std::process::exit(exit.code());
//! }
//! ```

mod link;
mod runtime;

pub use link::WorkerLink;
pub use runtime::{Service, ServiceError, WorkerExit, WorkerRuntime};
