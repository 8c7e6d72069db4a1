//! Engine-wide constants.
//!
//! Interdependent values live together so a change to one is checked
//! against the others; the compile-time assertions below encode the
//! relationships the rest of the engine assumes.

/// Size in bytes of every page in every pool.
///
/// Record slots, page-pool arithmetic, and the sizing rule in
/// `EngineMemory::initialize` are all in units of this.
pub const PAGE_SIZE: usize = 4096;

/// Upper bound on `group_count`; thread ids reserve 8 bits for the node.
pub const MAX_NUMA_NODES: usize = 256;

/// Page offset 0 is reserved so that a zero offset can serve as nil.
/// Every pool's usable range is `[1, page_count)`.
pub const NIL_PAGE_OFFSET: u32 = 0;

// Record slots carve pages into 8-byte-aligned pieces; a page must hold
// at least one version word plus payload.
const _: () = assert!(PAGE_SIZE % 8 == 0, "PAGE_SIZE must be 8-byte aligned");
const _: () = assert!(PAGE_SIZE >= 64, "PAGE_SIZE too small for record slots");

// The node component of a ThreadId is a u8.
const _: () = assert!(MAX_NUMA_NODES <= 256, "node ids must fit in 8 bits");
