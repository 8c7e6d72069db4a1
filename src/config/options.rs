//! Startup options for the engine.

use eyre::{ensure, Result};

use super::{MAX_NUMA_NODES, PAGE_SIZE};

/// Worker-thread topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadOptions {
    /// Number of NUMA nodes (thread groups) to bind. 1..=256.
    pub group_count: u16,
    /// Number of worker threads pinned to each node.
    pub thread_count_per_group: u8,
}

/// Per-node memory sizing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryOptions {
    /// Bytes of page pool allocated on each node. Rounded down to whole
    /// pages at pool construction.
    pub page_pool_size_per_node: u64,
    /// Pages each worker's core memory grabs from its node pool at init.
    pub private_initial_grab: u32,
}

/// All options recognized by `Engine::initialize`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    pub thread: ThreadOptions,
    pub memory: MemoryOptions,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            thread: ThreadOptions {
                group_count: 1,
                thread_count_per_group: 2,
            },
            memory: MemoryOptions {
                page_pool_size_per_node: 1 << 20,
                private_initial_grab: 8,
            },
        }
    }
}

impl EngineOptions {
    /// Total workers across all groups.
    pub fn total_threads(&self) -> u64 {
        u64::from(self.thread.group_count) * u64::from(self.thread.thread_count_per_group)
    }

    /// Bytes the pools must provide in aggregate to cover every worker's
    /// initial private grab.
    pub fn minimal_page_pool_bytes(&self) -> u64 {
        self.total_threads() * u64::from(self.memory.private_initial_grab) * PAGE_SIZE as u64
    }

    /// Structural validation, performed once by `Engine::initialize`.
    /// Pool sizing is checked separately by engine-memory startup.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.thread.group_count >= 1, "group_count must be at least 1");
        ensure!(
            (self.thread.group_count as usize) <= MAX_NUMA_NODES,
            "group_count {} exceeds the maximum of {}",
            self.thread.group_count,
            MAX_NUMA_NODES
        );
        ensure!(
            self.thread.thread_count_per_group >= 1,
            "thread_count_per_group must be at least 1"
        );
        Ok(())
    }
}
