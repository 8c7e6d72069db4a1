//! # Engine Memory
//!
//! The engine-wide memory manager. Startup runs a fixed sequence:
//!
//! 1. Refuse to start before the debugging layer (dependent module).
//! 2. Refuse to start without a NUMA topology.
//! 3. Check the sizing rule: the pools must cover every worker's initial
//!    private grab (`total_threads * private_initial_grab * PAGE_SIZE`).
//! 4. Build one [`NumaNodeMemory`] per node, each under a scoped NUMA
//!    preference, collecting every pool's resolver base. All pools must
//!    expose the identical `[begin, end)` offset range; a mismatch is a
//!    fatal startup error.
//! 5. Assemble the [`GlobalPageResolver`] from the collected bases.
//!
//! Shutdown uninitializes every node, collecting failures into an
//! `ErrorBatch`, and reports a dependent-module error if the debugging
//! layer was torn down first.

use std::ptr::NonNull;
use std::sync::Arc;

use eyre::{bail, ensure, Result};

use crate::config::{EngineOptions, PAGE_SIZE};
use crate::debugging::DebuggingSupports;
use crate::error::{EngineError, ErrorBatch};
use crate::storage::VolatilePagePointer;
use crate::thread::{decompose_numa_node, ThreadGroupId, ThreadId};

use super::core_memory::NumaCoreMemory;
use super::node_memory::NumaNodeMemory;
use super::numa;
use super::page_pool::PagePoolOffset;

/// Maps `(node, offset)` to a page address, engine-wide.
///
/// One instance per engine, assembled once at startup and immutable
/// thereafter. Every node's pool shares `[begin, end)`; only the bases
/// differ.
#[derive(Debug, Clone)]
pub struct GlobalPageResolver {
    bases: Vec<NonNull<u8>>,
    begin: PagePoolOffset,
    end: PagePoolOffset,
}

// SAFETY: same contract as LocalPageResolver: pure address computation
// over mappings that live for the engine's lifetime; access to resolved
// memory is coordinated by record version words.
unsafe impl Send for GlobalPageResolver {}
unsafe impl Sync for GlobalPageResolver {}

impl GlobalPageResolver {
    pub fn node_count(&self) -> usize {
        self.bases.len()
    }

    pub fn begin(&self) -> PagePoolOffset {
        self.begin
    }

    pub fn end(&self) -> PagePoolOffset {
        self.end
    }

    /// Address of page `offset` on `node`.
    pub fn resolve(&self, node: ThreadGroupId, offset: PagePoolOffset) -> *mut u8 {
        debug_assert!((node as usize) < self.bases.len(), "node {node} out of range");
        debug_assert!(
            offset >= self.begin && offset < self.end,
            "page offset {offset} outside [{}, {})",
            self.begin,
            self.end
        );
        // SAFETY: node and offset are within the resolver's range
        // (asserted above); the mapping outlives the engine.
        unsafe {
            self.bases[node as usize]
                .as_ptr()
                .add(offset as usize * PAGE_SIZE)
        }
    }

    pub fn resolve_pointer(&self, pointer: VolatilePagePointer) -> *mut u8 {
        self.resolve(pointer.numa_node, pointer.offset)
    }
}

/// The engine-wide memory manager: one node memory per NUMA node plus
/// the global resolver.
pub struct EngineMemory {
    node_memories: Vec<Arc<NumaNodeMemory>>,
    global_resolver: GlobalPageResolver,
}

impl std::fmt::Debug for EngineMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineMemory").finish_non_exhaustive()
    }
}

impl EngineMemory {
    pub fn initialize(options: &EngineOptions, debug: &DebuggingSupports) -> Result<Self> {
        tracing::info!("initializing engine memory");
        if !debug.is_initialized() {
            bail!(EngineError::DependentModuleUnavailableInit);
        }
        if !numa::numa_available() {
            bail!(EngineError::NumaUnavailable);
        }

        // Can we at least start up?
        let required = options.minimal_page_pool_bytes();
        let configured =
            options.memory.page_pool_size_per_node * u64::from(options.thread.group_count);
        if configured < required {
            bail!(EngineError::PagePoolTooSmall {
                configured,
                required
            });
        }

        let group_count = options.thread.group_count;
        let mut node_memories = Vec::with_capacity(group_count as usize);
        let mut bases = Vec::with_capacity(group_count as usize);
        let mut offset_begin: PagePoolOffset = 0;
        let mut offset_end: PagePoolOffset = 0;
        for node in 0..group_count {
            let node = node as ThreadGroupId;
            let _numa_scope = numa::ScopedNumaPreferred::new(node);
            let node_memory = Arc::new(NumaNodeMemory::initialize(node, options)?);
            let resolver = node_memory.page_pool().resolver();
            bases.push(resolver.base());
            if node == 0 {
                offset_begin = resolver.begin();
                offset_end = resolver.end();
            } else {
                ensure!(
                    offset_begin == resolver.begin() && offset_end == resolver.end(),
                    "page pools must expose identical offset ranges on every node \
                     (node 0: [{offset_begin}, {offset_end}), node {node}: [{}, {}))",
                    resolver.begin(),
                    resolver.end()
                );
            }
            node_memories.push(node_memory);
        }

        Ok(Self {
            node_memories,
            global_resolver: GlobalPageResolver {
                bases,
                begin: offset_begin,
                end: offset_end,
            },
        })
    }

    /// Tears down every node memory, reporting the aggregate.
    pub fn uninitialize(&self, debug: &DebuggingSupports) -> Result<()> {
        tracing::info!("uninitializing engine memory");
        let mut batch = ErrorBatch::new();
        if !debug.is_initialized() {
            batch.push(EngineError::DependentModuleUnavailableUninit.into());
        }
        for node_memory in &self.node_memories {
            batch.push_result(node_memory.uninitialize());
        }
        batch.summarize()
    }

    pub fn node_count(&self) -> usize {
        self.node_memories.len()
    }

    pub fn get_node_memory(&self, node: ThreadGroupId) -> Result<&Arc<NumaNodeMemory>> {
        match self.node_memories.get(node as usize) {
            Some(node_memory) => Ok(node_memory),
            None => bail!("node {node} out of range"),
        }
    }

    /// The core memory for a worker, located via the id's node component.
    pub fn get_core_memory(&self, id: ThreadId) -> Result<Arc<NumaCoreMemory>> {
        let node = decompose_numa_node(id);
        self.get_node_memory(node)?.get_core_memory(id)
    }

    pub fn global_resolver(&self) -> &GlobalPageResolver {
        &self.global_resolver
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::compose_thread_id;

    fn debug_up() -> DebuggingSupports {
        let debug = DebuggingSupports::new();
        debug.initialize().unwrap();
        debug
    }

    fn tiny_options() -> EngineOptions {
        let mut options = EngineOptions::default();
        options.thread.group_count = 1;
        options.thread.thread_count_per_group = 2;
        options.memory.page_pool_size_per_node = 64 * PAGE_SIZE as u64;
        options.memory.private_initial_grab = 2;
        options
    }

    #[test]
    fn refuses_to_start_before_debugging() {
        let debug = DebuggingSupports::new();
        let err = EngineMemory::initialize(&tiny_options(), &debug).unwrap_err();
        assert_eq!(
            err.downcast_ref::<EngineError>(),
            Some(&EngineError::DependentModuleUnavailableInit)
        );
    }

    #[test]
    fn sizing_rule_boundary() {
        if !numa::numa_available() {
            return;
        }
        let debug = debug_up();

        // Exactly minimal: passes.
        let mut options = tiny_options();
        options.memory.page_pool_size_per_node = options.minimal_page_pool_bytes();
        let memory = EngineMemory::initialize(&options, &debug).unwrap();
        memory.uninitialize(&debug).unwrap();

        // One byte below: PagePoolTooSmall.
        options.memory.page_pool_size_per_node -= 1;
        let err = EngineMemory::initialize(&options, &debug).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::PagePoolTooSmall { .. })
        ));
    }

    #[test]
    fn resolver_and_core_lookup() {
        if !numa::numa_available() {
            return;
        }
        let debug = debug_up();
        let memory = EngineMemory::initialize(&tiny_options(), &debug).unwrap();

        assert_eq!(memory.node_count(), 1);
        let resolver = memory.global_resolver();
        assert_eq!(resolver.begin(), 1);
        assert_eq!(resolver.end(), 64);

        let core = memory.get_core_memory(compose_thread_id(0, 1)).unwrap();
        assert_eq!(core.numa_node(), 0);
        assert!(memory.get_core_memory(compose_thread_id(3, 0)).is_err());

        memory.uninitialize(&debug).unwrap();
    }
}
