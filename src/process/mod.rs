//! Process layer: the abstract seam plus the shipped implementations.
//!
//! ## Contents
//! - [`Launcher`], [`ProcessHandle`], [`WorkerChannel`] the seam supervisors consume
//! - [`Target`], [`LaunchOptions`] what to run and how
//! - [`CommandLauncher`] `tokio::process` implementation speaking NDJSON over stdio
//! - [`MemorySampler`], [`ProcessMemory`] memory samples for the recycle policy

mod command;
mod handle;
mod memory;

pub use command::CommandLauncher;
pub use handle::{
    ENV_HEARTBEAT_INTERVAL, ENV_HEARTBEAT_TOLERANCE, ENV_SCHED_POLICY, ENV_WORKER_MODE,
    ExitStatus, LaunchOptions, Launcher, ProcessEvent, ProcessHandle, ProcessNotice,
    SchedulingPolicy, Signal, Target, WorkerChannel, WorkerId,
};
pub use memory::{MemorySampler, MemoryUsage, ProcessMemory};
