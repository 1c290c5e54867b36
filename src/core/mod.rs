//! Supervisor cores: orchestration and lifecycle.
//!
//! Both supervisors follow the same shape. A cloneable handle talks over channels to
//! a single core task that owns all state:
//!
//! ```text
//!   handle.start()/stop()/send()/kill() ──► commands ─┐
//!   process layer (WorkerChannel)       ──► notices  ─┼──► core task ──► Bus ──► subscribers
//!   Timers (respawn, deadlines, ticks)  ──► timers   ─┘        │
//!                                                              └──► Launcher / ProcessHandle
//! ```
//!
//! Replies travel back on oneshot channels, so each pending `start`/`stop` resolves
//! exactly once. Dropping the last handle ends the core, which kills every process
//! it still owns.
//!
//! Internal modules:
//! - [`pool`]: N symmetric workers with respawn and recycling;
//! - [`child`]: one process with an explicit status machine;
//! - [`timer`]: cancellable timers posting into a core inbox;
//! - [`shutdown`]: OS signal handling.

mod builder;
mod child;
mod pool;
pub(crate) mod shutdown;
mod timer;

pub use builder::{ChildBuilder, PoolBuilder};
pub use child::{ChildSupervisor, Status};
pub use pool::{PoolStats, PoolSupervisor, WorkerStats};
