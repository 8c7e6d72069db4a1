//! # NUMA-Aware Memory Management
//!
//! Everything the engine allocates for data lives in per-node page pools
//! carved out of NUMA-local memory at startup. The hierarchy:
//!
//! ```text
//! EngineMemory
//!   ├── GlobalPageResolver            (node, offset) -> page address
//!   ├── NumaNodeMemory (node 0)
//!   │     ├── PagePool               anonymous mapping, free-list of offsets
//!   │     │     └── LocalPageResolver
//!   │     ├── NumaCoreMemory (core 0) private pages + record-slot allocator
//!   │     └── NumaCoreMemory (core 1)
//!   └── NumaNodeMemory (node 1)
//!         └── ...
//! ```
//!
//! ## Ownership
//!
//! - The engine owns node memories for its whole lifetime; resolvers are
//!   views into mappings that never move.
//! - A core memory belongs to exactly one worker. Only that worker
//!   allocates from it; pages return to the node pool at shutdown only.
//! - Cross-node access goes through the global resolver and is
//!   coordinated entirely by record version words.
//!
//! ## Placement
//!
//! Node structures are built under `ScopedNumaPreferred` and pool regions
//! are `mbind`-ed to their node, so pages fault onto the memory of the
//! node whose workers use them. Placement is best-effort (it degrades to
//! unbound memory in unprivileged environments); topology *absence* is a
//! fatal startup error.

mod core_memory;
mod engine_memory;
mod node_memory;
pub mod numa;
mod page_pool;

pub use core_memory::NumaCoreMemory;
pub use engine_memory::{EngineMemory, GlobalPageResolver};
pub use node_memory::NumaNodeMemory;
pub use page_pool::{
    LocalPageResolver, PagePool, PagePoolOffset, PagePoolOffsetChunk, PageReleaseBatch,
    RoundRobinPageGrabBatch,
};
