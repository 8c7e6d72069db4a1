//! # Engine Configuration
//!
//! Configuration is a plain value ([`EngineOptions`]) handed to
//! `Engine::initialize`, plus a small set of engine-wide constants.
//! There is no configuration-file parsing; callers construct options in
//! code and the engine validates them once at startup.
//!
//! ## Recognized options
//!
//! | Option | Effect |
//! |--------|--------|
//! | `thread.group_count` | NUMA nodes to bind (1..=256) |
//! | `thread.thread_count_per_group` | workers pinned per node |
//! | `memory.page_pool_size_per_node` | bytes of page pool per node |
//! | `memory.private_initial_grab` | pages each worker grabs at init |
//!
//! ## Sizing rule
//!
//! The pools must at least cover every worker's initial private grab:
//!
//! ```text
//! page_pool_size_per_node * group_count
//!     >= group_count * thread_count_per_group    (total workers)
//!        * private_initial_grab * PAGE_SIZE
//! ```
//!
//! Equality passes; one byte less fails with `PagePoolTooSmall`. The
//! check is pure arithmetic on bytes and is enforced by engine-memory
//! startup, not here.

mod constants;
mod options;

pub use constants::{MAX_NUMA_NODES, NIL_PAGE_OFFSET, PAGE_SIZE};
pub use options::{EngineOptions, MemoryOptions, ThreadOptions};
