//! # Per-Core Memory
//!
//! Each worker owns one `NumaCoreMemory`: a private clutch of pages
//! grabbed from the node pool at startup, plus a bump allocator that
//! carves record slots out of those pages for keyed storages. The private
//! pool exists so a worker's allocations never touch the node pool's lock
//! on the hot path, and so the memory a worker writes is resident on its
//! own node.
//!
//! Slots are never freed individually; pages come back to the node pool
//! only at engine shutdown, after all workers have joined. A slot handed
//! out here is therefore address-stable for the engine's lifetime, which
//! is what lets the transaction layer keep raw record pointers in its
//! read and write sets.

use std::sync::Arc;

use eyre::{bail, ensure, Result};
use parking_lot::Mutex;

use crate::config::PAGE_SIZE;
use crate::error::EngineError;
use crate::thread::{decompose_numa_node, ThreadGroupId, ThreadId};

use super::page_pool::{PagePool, PagePoolOffset, PagePoolOffsetChunk};

/// Bump-allocation state over the core's private pages.
#[derive(Debug, Default)]
struct SlotAllocator {
    /// Page currently being carved, with its fill level.
    current: Option<(PagePoolOffset, usize)>,
    /// Fully carved pages, kept until shutdown.
    retired: Vec<PagePoolOffset>,
}

/// One worker's NUMA-local memory.
pub struct NumaCoreMemory {
    core_id: ThreadId,
    numa_node: ThreadGroupId,
    pool: Arc<PagePool>,
    free_pool: Mutex<PagePoolOffsetChunk>,
    allocator: Mutex<SlotAllocator>,
}

impl NumaCoreMemory {
    pub(crate) fn new(pool: Arc<PagePool>, core_id: ThreadId) -> Self {
        let numa_node = decompose_numa_node(core_id);
        debug_assert_eq!(numa_node, pool.numa_node());
        Self {
            core_id,
            numa_node,
            pool,
            free_pool: Mutex::new(PagePoolOffsetChunk::new()),
            allocator: Mutex::new(SlotAllocator::default()),
        }
    }

    /// Grabs the core's initial private pages from the node pool.
    /// A partial grab is an allocation failure: the sizing rule promised
    /// these pages exist.
    pub(crate) fn initialize(&self, initial_grab: u32) -> Result<()> {
        let mut free = self.free_pool.lock();
        self.pool.grab(initial_grab, &mut free)?;
        if free.len() < initial_grab as usize {
            self.pool.release(&mut free);
            tracing::error!(
                core = self.core_id,
                wanted = initial_grab,
                "node pool could not cover the initial private grab"
            );
            bail!(EngineError::OutOfMemory);
        }
        tracing::debug!(core = self.core_id, pages = initial_grab, "core memory initialized");
        Ok(())
    }

    /// Returns every private page to the node pool. Called at engine
    /// shutdown only, after the owning worker has joined.
    pub(crate) fn uninitialize(&self) {
        let mut allocator = self.allocator.lock();
        let mut free = self.free_pool.lock();
        if let Some((page, _)) = allocator.current.take() {
            free.push(page);
        }
        for page in allocator.retired.drain(..) {
            free.push(page);
        }
        self.pool.release(&mut free);
    }

    pub fn core_id(&self) -> ThreadId {
        self.core_id
    }

    pub fn numa_node(&self) -> ThreadGroupId {
        self.numa_node
    }

    /// Carves a record slot of `bytes` (rounded up to 8) out of the
    /// core's private pages. The returned address is stable until engine
    /// shutdown. Draws another page from the private pool (or, if that
    /// is exhausted, from the node pool) when the current page is full.
    pub(crate) fn allocate_record_slot(&self, bytes: usize) -> Result<*mut u8> {
        let bytes = bytes.div_ceil(8) * 8;
        ensure!(
            bytes <= PAGE_SIZE,
            "record slot of {bytes} bytes exceeds the page size"
        );

        let mut allocator = self.allocator.lock();
        let (page, used) = match allocator.current {
            Some((page, used)) if used + bytes <= PAGE_SIZE => (page, used),
            current => {
                if let Some((full, _)) = current {
                    allocator.retired.push(full);
                }
                let page = self.take_private_page()?;
                allocator.current = Some((page, 0));
                (page, 0)
            }
        };
        allocator.current = Some((page, used + bytes));

        let address = self.pool.resolver().resolve_offset(page);
        // SAFETY: used + bytes <= PAGE_SIZE, so the slot stays inside the page.
        Ok(unsafe { address.add(used) })
    }

    fn take_private_page(&self) -> Result<PagePoolOffset> {
        let mut free = self.free_pool.lock();
        if let Some(page) = free.pop() {
            return Ok(page);
        }
        // Private pool exhausted; fall back to the node pool.
        self.pool.grab(1, &mut free)?;
        match free.pop() {
            Some(page) => Ok(page),
            None => bail!(EngineError::OutOfMemory),
        }
    }

    pub fn free_page_count(&self) -> usize {
        self.free_pool.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::compose_thread_id;

    fn test_pool() -> Arc<PagePool> {
        Arc::new(PagePool::initialize(0, 32 * PAGE_SIZE as u64).unwrap())
    }

    #[test]
    fn initial_grab_moves_pages_out_of_node_pool() {
        let pool = test_pool();
        let core = NumaCoreMemory::new(pool.clone(), compose_thread_id(0, 0));
        core.initialize(4).unwrap();
        assert_eq!(core.free_page_count(), 4);
        assert_eq!(pool.free_count(), 31 - 4);

        core.uninitialize();
        assert_eq!(pool.free_count(), 31);
    }

    #[test]
    fn slot_allocation_is_aligned_and_page_local() {
        let pool = test_pool();
        let core = NumaCoreMemory::new(pool, compose_thread_id(0, 1));
        core.initialize(2).unwrap();

        let a = core.allocate_record_slot(20).unwrap() as usize;
        let b = core.allocate_record_slot(20).unwrap() as usize;
        assert_eq!(a % 8, 0);
        assert_eq!(b - a, 24);
    }

    #[test]
    fn allocator_spills_to_following_pages() {
        let pool = test_pool();
        let core = NumaCoreMemory::new(pool, compose_thread_id(0, 2));
        core.initialize(2).unwrap();

        // Each slot takes half a page; the third must come from a new page.
        let half = PAGE_SIZE / 2;
        let a = core.allocate_record_slot(half).unwrap() as usize;
        let _b = core.allocate_record_slot(half).unwrap();
        let c = core.allocate_record_slot(half).unwrap() as usize;
        assert_ne!(a / PAGE_SIZE, c / PAGE_SIZE);
    }
}
