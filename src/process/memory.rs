//! # Memory sampling for the recycle policy.
//!
//! [`ProcessMemory`] samples the supervisor's own process through `sysinfo`. The pool
//! records one sample per worker when it reports `started` and compares later samples
//! against it.

use sysinfo::{Pid, ProcessesToUpdate, System};

/// One memory sample, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryUsage {
    /// Reserved address space.
    pub heap_total: u64,
    /// Resident memory.
    pub heap_used: u64,
}

/// Source of memory samples.
pub trait MemorySampler: Send + 'static {
    /// Takes a sample, `None` if it is unavailable.
    fn sample(&mut self) -> Option<MemoryUsage>;
}

/// Samples the current process.
pub struct ProcessMemory {
    system: System,
    pid: Pid,
}

impl ProcessMemory {
    /// Creates a sampler for the current process.
    pub fn new() -> Self {
        Self {
            system: System::new(),
            pid: Pid::from_u32(std::process::id()),
        }
    }
}

impl Default for ProcessMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySampler for ProcessMemory {
    fn sample(&mut self) -> Option<MemoryUsage> {
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);
        let process = self.system.process(self.pid)?;
        Some(MemoryUsage {
            heap_total: process.virtual_memory(),
            heap_used: process.memory(),
        })
    }
}
