//! # procvisor
//!
//! **Procvisor** supervises OS processes: a pool of N symmetric workers, or one
//! process with an explicit status machine. It keeps them alive (respawn),
//! retires them before they degrade (recycling), tells them the supervisor is
//! still there (heartbeat), and shuts them down gracefully.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   PoolSupervisor / ChildSupervisor (cloneable handles)
//!            │ commands                         ▲ replies (oneshot)
//!            ▼                                  │
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  core task (one per supervisor, owns every piece of state)        │
//! │  - worker records / current process                               │
//! │  - Timers (respawn, recycle timeout, stop deadline, heartbeat)    │
//! │  - Launcher (process layer seam)                                  │
//! └──────┬──────────────────▲──────────────────────────────┬──────────┘
//!        │ send/signal      │ ProcessNotice                │ publish
//!        ▼                  │ (online, message,            ▼
//! ┌────────────────┐        │  disconnect, exit)   ┌────────────────┐
//! │ ProcessHandle  │────────┘                      │      Bus       │
//! │ (CommandLauncher: stdin/stdout NDJSON)         └───────┬────────┘
//! └──────┬─────────┘                                       ▼
//!        ▼                                         subscriber listener
//! ┌────────────────┐                                       ▼
//! │ worker process │                                 SubscriberSet
//! │ WorkerRuntime  │                               ┌───────┼───────┐
//! │  + Service     │                               ▼       ▼       ▼
//! └────────────────┘                             sub1    sub2    subN
//! ```
//!
//! ### Pool lifecycle
//! ```text
//! start ─► spawn N ─► N × online (started when enhanced) ─► Started
//!   │
//!   ├─ unexpected exit ─► respawn_delay ─► spawn ─► online ─► Respawn
//!   ├─ request threshold / memory gain ─► spawn replacement ─► started ─► Recycle old
//!   └─ stop ─► Stopping ─► stop message / SIGKILL at deadline ─► Stopped
//! ```
//!
//! ## Features
//! | Area              | Description                                                   | Key types / traits                        |
//! |-------------------|---------------------------------------------------------------|-------------------------------------------|
//! | **Supervision**   | Pools and single processes.                                   | [`PoolSupervisor`], [`ChildSupervisor`]   |
//! | **Subscriber API**| Hook into lifecycle events (logging, metrics, custom).        | [`Subscribe`], [`EventKind`]              |
//! | **Policies**      | Recycling thresholds and respawn jitter.                      | [`RecyclePolicy`], [`JitterPolicy`]       |
//! | **Process layer** | Replaceable process backend.                                  | [`Launcher`], [`ProcessHandle`]           |
//! | **Worker side**   | Protocol runtime for supervised programs.                     | [`WorkerRuntime`], [`Service`]            |
//! | **Errors**        | Typed errors for supervision and the channel.                 | [`SupervisorError`], [`ProtocolError`]    |
//! | **Configuration** | Plain structs with defaults, loadable from JSON.              | [`PoolConfig`], [`ChildConfig`]           |
//!
//! ## Optional features
//! - `logging`: exports a simple built-in [`LogWriter`] _(demo/reference only)_.
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use procvisor::{PoolConfig, PoolSupervisor, Target};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), procvisor::SupervisorError> {
//!     let cfg = PoolConfig {
//!         enhanced: true,
//!         count: 4,
//!         max_connections: 10_000,
//!         ..PoolConfig::default()
//!     };
//!
//!     #[cfg(feature = "logging")]
//!     let subs: Vec<Arc<dyn procvisor::Subscribe>> = vec![Arc::new(procvisor::LogWriter::new())];
//!     #[cfg(not(feature = "logging"))]
//!     let subs: Vec<Arc<dyn procvisor::Subscribe>> = Vec::new();
//!
//!     let pool = PoolSupervisor::builder(Target::new("./my-service").arg("--worker"), cfg)
//!         .with_subscribers(subs)
//!         .build();
//!
//!     pool.run_until_signal().await
//! }
//! ```
mod config;
mod core;
mod error;
mod events;
mod heartbeat;
mod policies;
mod process;
mod protocol;
mod subscribers;
mod worker;

// ---- Public re-exports ----

pub use config::{ChildConfig, ChildMode, PoolConfig};
pub use self::core::{
    ChildBuilder, ChildSupervisor, PoolBuilder, PoolStats, PoolSupervisor, Status, WorkerStats,
};
pub use error::{ProtocolError, SendError, SupervisorError, TIMEOUT_MESSAGE, WorkerError};
pub use events::{Bus, Event, EventKind};
pub use heartbeat::{HeartbeatWatchdog, Verdict, timestamp_ms};
pub use policies::{JitterPolicy, RecyclePolicy, RecycleReason};
pub use process::{
    CommandLauncher, ENV_HEARTBEAT_INTERVAL, ENV_HEARTBEAT_TOLERANCE, ENV_SCHED_POLICY,
    ENV_WORKER_MODE, ExitStatus, LaunchOptions, Launcher, MemorySampler, MemoryUsage,
    ProcessEvent, ProcessHandle, ProcessMemory, ProcessNotice, SchedulingPolicy, Signal, Target,
    WorkerChannel, WorkerId,
};
pub use protocol::{
    Inbound, LineReader, MAX_LINE_BYTES, ORPHAN_MESSAGE, Outbound, decode_line, encode_line,
};
pub use subscribers::{Subscribe, SubscriberSet};
pub use worker::{Service, ServiceError, WorkerExit, WorkerLink, WorkerRuntime};

// Optional: expose a simple built-in logger subscriber (demo/reference).
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
