//! Respawn and recycle policies.
//!
//! ## Contents
//! - [`RecyclePolicy`] when a healthy worker should be replaced anyway
//! - [`JitterPolicy`]  randomization of the respawn delay
//!
//! ## Quick wiring
//! ```text
//! PoolConfig { max_connections, max_memory_gain, respawn_delay, respawn_jitter }
//!      └─► core::pool actor uses:
//!           - recycle_policy().evaluate(..) on every request notification
//!           - respawn_jitter.apply(respawn_delay) before scheduling a respawn
//! ```

mod jitter;
mod recycle;

pub use jitter::JitterPolicy;
pub use recycle::{RecyclePolicy, RecycleReason};
