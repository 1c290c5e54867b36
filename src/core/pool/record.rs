use tokio_util::sync::CancellationToken;

use crate::policies::RecycleReason;
use crate::process::{MemoryUsage, ProcessHandle, WorkerId};

/// Per-worker bookkeeping, owned by the pool core. Dropped only on observed exit.
pub(super) struct WorkerRecord {
    pub(super) id: WorkerId,
    pub(super) pid: Option<u32>,
    pub(super) handle: Box<dyn ProcessHandle>,
    pub(super) online: bool,
    pub(super) requests: u64,
    pub(super) baseline: Option<MemoryUsage>,
    /// Set once a replacement was spawned; cleared if that replacement dies first.
    pub(super) recycling: Option<RecycleReason>,
    /// The supervisor asked this worker to go away; its exit is final.
    pub(super) intentional: bool,
    /// Armed recycle timeout while the worker is being retired (enhanced mode).
    pub(super) retire: Option<CancellationToken>,
}

impl WorkerRecord {
    pub(super) fn new(id: WorkerId, handle: Box<dyn ProcessHandle>) -> Self {
        Self {
            id,
            pid: handle.pid(),
            handle,
            online: false,
            requests: 0,
            baseline: None,
            recycling: None,
            intentional: false,
            retire: None,
        }
    }
}
