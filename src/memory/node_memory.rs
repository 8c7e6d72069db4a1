//! # Per-Node Memory
//!
//! One `NumaNodeMemory` per NUMA node: the node's page pool plus one
//! core memory per worker ordinal. Construction happens under a scoped
//! NUMA preference (engine memory arranges that), so the pool's pages
//! and the node's bookkeeping fault onto the node they serve.

use std::sync::Arc;

use eyre::{ensure, Result, WrapErr};

use crate::config::EngineOptions;
use crate::thread::{
    compose_thread_id, decompose_numa_local_ordinal, decompose_numa_node, ThreadGroupId, ThreadId,
};

use super::core_memory::NumaCoreMemory;
use super::page_pool::PagePool;

pub struct NumaNodeMemory {
    numa_node: ThreadGroupId,
    page_pool: Arc<PagePool>,
    core_memories: Vec<Arc<NumaCoreMemory>>,
}

impl NumaNodeMemory {
    /// Builds and initializes the node's pool and core memories.
    pub fn initialize(numa_node: ThreadGroupId, options: &EngineOptions) -> Result<Self> {
        let page_pool = Arc::new(
            PagePool::initialize(numa_node, options.memory.page_pool_size_per_node)
                .wrap_err_with(|| format!("page pool on node {numa_node} failed to initialize"))?,
        );

        let mut core_memories = Vec::with_capacity(options.thread.thread_count_per_group as usize);
        for ordinal in 0..options.thread.thread_count_per_group {
            let core_id = compose_thread_id(numa_node, ordinal);
            let core = Arc::new(NumaCoreMemory::new(page_pool.clone(), core_id));
            core.initialize(options.memory.private_initial_grab)
                .wrap_err_with(|| format!("core memory for thread {core_id} failed to initialize"))?;
            core_memories.push(core);
        }

        Ok(Self {
            numa_node,
            page_pool,
            core_memories,
        })
    }

    /// Returns core pages to the pool and warns if pages went missing.
    pub fn uninitialize(&self) -> Result<()> {
        for core in &self.core_memories {
            core.uninitialize();
        }
        let free = self.page_pool.free_count();
        let capacity = self.page_pool.capacity() as usize;
        if free != capacity {
            // Storages release through their own batches before this runs;
            // anything still out is a leak worth knowing about.
            tracing::warn!(
                node = self.numa_node,
                free,
                capacity,
                "page pool shut down with pages still out"
            );
        }
        Ok(())
    }

    pub fn numa_node(&self) -> ThreadGroupId {
        self.numa_node
    }

    pub fn page_pool(&self) -> &Arc<PagePool> {
        &self.page_pool
    }

    /// The core memory owned by `core_id`, which must live on this node.
    pub fn get_core_memory(&self, core_id: ThreadId) -> Result<Arc<NumaCoreMemory>> {
        ensure!(
            decompose_numa_node(core_id) == self.numa_node,
            "thread {core_id} does not belong to node {}",
            self.numa_node
        );
        let ordinal = decompose_numa_local_ordinal(core_id) as usize;
        ensure!(
            ordinal < self.core_memories.len(),
            "thread {core_id} ordinal {ordinal} out of range"
        );
        Ok(self.core_memories[ordinal].clone())
    }

    pub fn core_count(&self) -> usize {
        self.core_memories.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PAGE_SIZE;

    fn options(threads: u8, pool_pages: u64) -> EngineOptions {
        let mut options = EngineOptions::default();
        options.thread.thread_count_per_group = threads;
        options.memory.page_pool_size_per_node = pool_pages * PAGE_SIZE as u64;
        options.memory.private_initial_grab = 2;
        options
    }

    #[test]
    fn builds_one_core_memory_per_ordinal() {
        let node = NumaNodeMemory::initialize(0, &options(3, 32)).unwrap();
        assert_eq!(node.core_count(), 3);
        for ordinal in 0..3u8 {
            let core = node.get_core_memory(compose_thread_id(0, ordinal)).unwrap();
            assert_eq!(core.numa_node(), 0);
        }
        node.uninitialize().unwrap();
    }

    #[test]
    fn rejects_foreign_thread_ids() {
        let node = NumaNodeMemory::initialize(0, &options(2, 32)).unwrap();
        assert!(node.get_core_memory(compose_thread_id(1, 0)).is_err());
        assert!(node.get_core_memory(compose_thread_id(0, 7)).is_err());
        node.uninitialize().unwrap();
    }
}
