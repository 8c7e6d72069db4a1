//! # Per-Node Page Pool
//!
//! A pool is a contiguous anonymous mapping on one NUMA node, carved into
//! `PAGE_SIZE` pages addressed by a 32-bit offset. Offset 0 is reserved
//! as nil, so the usable range is `[1, page_count)`. Every node's pool
//! shares this `[begin, end)` shape and only the base address differs,
//! which is what lets the global resolver index pools by node id alone.
//!
//! ## Free-list discipline
//!
//! Free offsets live in a mutex-protected stack. Callers move offsets in
//! and out in chunks ([`PagePoolOffsetChunk`]) to amortize the lock:
//! core memories grab their private pages once at startup, storages grab
//! batches at creation and release batches at teardown.
//!
//! ## Resolution
//!
//! [`LocalPageResolver`] turns an offset into a raw page address. Pages
//! are shared mutable memory coordinated by the per-record version words
//! the transaction layer maintains; the resolver itself hands out raw
//! pointers and stays out of synchronization.
//!
//! ## Batches
//!
//! [`PageReleaseBatch`] collects offsets per node and flushes them to the
//! right pool in chunks. [`RoundRobinPageGrabBatch`] allocates across
//! nodes, advancing to the next node when one runs dry and failing only
//! after a full cycle finds no free page anywhere.

use std::ptr::NonNull;

use eyre::{bail, ensure, Result};
use memmap2::MmapMut;
use parking_lot::Mutex;

use crate::config::{NIL_PAGE_OFFSET, PAGE_SIZE};
use crate::error::EngineError;
use crate::storage::VolatilePagePointer;
use crate::thread::ThreadGroupId;

use super::engine_memory::EngineMemory;

/// Index of a page within its node's pool. 0 is nil.
pub type PagePoolOffset = u32;

/// Pages a release batch buffers per node before flushing to the pool.
const RELEASE_CHUNK_FLUSH: usize = 512;

/// Pages a round-robin grab batch pulls from a node at a time.
const GRAB_BATCH_PAGES: u32 = 16;

/// A caller-owned clutch of page offsets moving in or out of a pool.
#[derive(Debug, Default)]
pub struct PagePoolOffsetChunk {
    offsets: Vec<PagePoolOffset>,
}

impl PagePoolOffsetChunk {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            offsets: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn push(&mut self, offset: PagePoolOffset) {
        self.offsets.push(offset);
    }

    pub fn pop(&mut self) -> Option<PagePoolOffset> {
        self.offsets.pop()
    }

    pub fn drain_all(&mut self) -> impl Iterator<Item = PagePoolOffset> + '_ {
        self.offsets.drain(..)
    }
}

/// Translates a local page offset to the page's address.
///
/// Copyable view; valid for as long as the owning pool's mapping lives
/// (the engine's lifetime).
#[derive(Debug, Clone, Copy)]
pub struct LocalPageResolver {
    base: NonNull<u8>,
    begin: PagePoolOffset,
    end: PagePoolOffset,
}

// SAFETY: the resolver is a pure address computation over a mapping that
// outlives it; all access to the resolved memory is coordinated by the
// per-record version words.
unsafe impl Send for LocalPageResolver {}
unsafe impl Sync for LocalPageResolver {}

impl LocalPageResolver {
    pub fn begin(&self) -> PagePoolOffset {
        self.begin
    }

    pub fn end(&self) -> PagePoolOffset {
        self.end
    }

    pub(crate) fn base(&self) -> NonNull<u8> {
        self.base
    }

    /// Address of the page at `offset`.
    pub fn resolve_offset(&self, offset: PagePoolOffset) -> *mut u8 {
        debug_assert!(
            offset >= self.begin && offset < self.end,
            "page offset {offset} outside [{}, {})",
            self.begin,
            self.end
        );
        // SAFETY: offset is within the pool's mapping (asserted above).
        unsafe { self.base.as_ptr().add(offset as usize * PAGE_SIZE) }
    }
}

/// The per-node page pool.
pub struct PagePool {
    numa_node: ThreadGroupId,
    memory: MmapMut,
    begin: PagePoolOffset,
    end: PagePoolOffset,
    free_list: Mutex<Vec<PagePoolOffset>>,
}

impl PagePool {
    /// Maps the pool's backing region (best-effort bound to `numa_node`)
    /// and puts every usable offset on the free list.
    pub fn initialize(numa_node: ThreadGroupId, pool_bytes: u64) -> Result<Self> {
        let page_count = (pool_bytes / PAGE_SIZE as u64) as usize;
        ensure!(
            page_count >= 2,
            "page pool on node {numa_node} too small for even one usable page"
        );

        let memory = match MmapMut::map_anon(page_count * PAGE_SIZE) {
            Ok(memory) => memory,
            Err(err) => {
                tracing::error!(numa_node, page_count, %err, "page pool mapping failed");
                bail!(EngineError::OutOfMemory);
            }
        };
        super::numa::bind_region_to_node(memory.as_ptr() as *mut u8, memory.len(), numa_node);

        let begin: PagePoolOffset = NIL_PAGE_OFFSET + 1;
        let end = page_count as PagePoolOffset;
        let free_list = (begin..end).rev().collect();
        tracing::info!(numa_node, pages = end - begin, "page pool initialized");

        Ok(Self {
            numa_node,
            memory,
            begin,
            end,
            free_list: Mutex::new(free_list),
        })
    }

    pub fn numa_node(&self) -> ThreadGroupId {
        self.numa_node
    }

    /// Usable pages in this pool.
    pub fn capacity(&self) -> u32 {
        self.end - self.begin
    }

    pub fn free_count(&self) -> usize {
        self.free_list.lock().len()
    }

    /// Moves up to `desired` free offsets into `chunk`. Fails only when
    /// the free list is completely empty.
    pub fn grab(&self, desired: u32, chunk: &mut PagePoolOffsetChunk) -> Result<()> {
        let mut free = self.free_list.lock();
        if free.is_empty() {
            bail!(EngineError::NoFreePages {
                node: self.numa_node
            });
        }
        let take = (desired as usize).min(free.len());
        for _ in 0..take {
            if let Some(offset) = free.pop() {
                chunk.push(offset);
            }
        }
        Ok(())
    }

    /// Returns every offset in `chunk` to the free list.
    pub fn release(&self, chunk: &mut PagePoolOffsetChunk) {
        let mut free = self.free_list.lock();
        for offset in chunk.drain_all() {
            debug_assert!(offset >= self.begin && offset < self.end);
            free.push(offset);
        }
    }

    pub fn resolver(&self) -> LocalPageResolver {
        // SAFETY: an anonymous mapping never has a null base.
        let base = unsafe { NonNull::new_unchecked(self.memory.as_ptr() as *mut u8) };
        LocalPageResolver {
            base,
            begin: self.begin,
            end: self.end,
        }
    }
}

impl std::fmt::Debug for PagePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagePool")
            .field("numa_node", &self.numa_node)
            .field("begin", &self.begin)
            .field("end", &self.end)
            .field("free", &self.free_count())
            .finish()
    }
}

/// Collects page releases per node and flushes them in chunks.
///
/// Used at storage teardown, where pages allocated round-robin across
/// nodes all come home at once.
pub struct PageReleaseBatch<'a> {
    memory: &'a EngineMemory,
    chunks: Vec<PagePoolOffsetChunk>,
}

impl<'a> PageReleaseBatch<'a> {
    pub fn new(memory: &'a EngineMemory) -> Self {
        let chunks = (0..memory.node_count())
            .map(|_| PagePoolOffsetChunk::new())
            .collect();
        Self { memory, chunks }
    }

    pub fn release(&mut self, pointer: VolatilePagePointer) {
        let node = pointer.numa_node as usize;
        debug_assert!(node < self.chunks.len());
        self.chunks[node].push(pointer.offset);
        if self.chunks[node].len() >= RELEASE_CHUNK_FLUSH {
            self.release_chunk(pointer.numa_node);
        }
    }

    pub fn release_chunk(&mut self, node: ThreadGroupId) {
        let chunk = &mut self.chunks[node as usize];
        if chunk.is_empty() {
            return;
        }
        if let Ok(node_memory) = self.memory.get_node_memory(node) {
            node_memory.page_pool().release(chunk);
        }
    }

    pub fn release_all(&mut self) {
        for node in 0..self.chunks.len() {
            self.release_chunk(node as ThreadGroupId);
        }
    }
}

impl Drop for PageReleaseBatch<'_> {
    fn drop(&mut self) {
        self.release_all();
    }
}

/// Allocates pages across nodes, one chunk at a time.
///
/// When the current node runs out it moves to the next; only a full
/// cycle with no free page anywhere is an allocation failure.
pub struct RoundRobinPageGrabBatch<'a> {
    memory: &'a EngineMemory,
    chunk: PagePoolOffsetChunk,
    current_node: ThreadGroupId,
}

impl<'a> RoundRobinPageGrabBatch<'a> {
    pub fn new(memory: &'a EngineMemory) -> Self {
        Self {
            memory,
            chunk: PagePoolOffsetChunk::with_capacity(GRAB_BATCH_PAGES as usize),
            current_node: 0,
        }
    }

    pub fn grab(&mut self) -> Result<VolatilePagePointer> {
        if self.chunk.is_empty() {
            self.refill()?;
        }
        let offset = self
            .chunk
            .pop()
            .ok_or_else(|| eyre::Report::new(EngineError::OutOfMemory))?;
        Ok(VolatilePagePointer {
            numa_node: self.current_node,
            offset,
        })
    }

    fn refill(&mut self) -> Result<()> {
        let node_count = self.memory.node_count() as u16;
        let start = self.current_node;
        loop {
            self.current_node = (((self.current_node as u16) + 1) % node_count) as ThreadGroupId;
            let pool = self.memory.get_node_memory(self.current_node)?.page_pool();
            match pool.grab(GRAB_BATCH_PAGES, &mut self.chunk) {
                Ok(()) => return Ok(()),
                Err(err) => {
                    if err.downcast_ref::<EngineError>()
                        != Some(&EngineError::NoFreePages {
                            node: self.current_node,
                        })
                    {
                        return Err(err);
                    }
                    tracing::warn!(
                        node = self.current_node,
                        "node has no free pages; trying another"
                    );
                    if self.current_node == start {
                        bail!(EngineError::OutOfMemory);
                    }
                }
            }
        }
    }

    /// Returns any unconsumed pages to the node they came from.
    pub fn release_rest(&mut self) {
        if self.chunk.is_empty() {
            return;
        }
        if let Ok(node_memory) = self.memory.get_node_memory(self.current_node) {
            node_memory.page_pool().release(&mut self.chunk);
        }
    }
}

impl Drop for RoundRobinPageGrabBatch<'_> {
    fn drop(&mut self) {
        self.release_rest();
    }
}
