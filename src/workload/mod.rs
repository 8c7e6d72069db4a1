//! # Order-Intake Workload
//!
//! The canonical multi-storage transaction: look up a reference row,
//! then write a primary table *and* its secondary index inside one
//! serializable transaction. Used by the integration tests and as the
//! template for task code against this engine.
//!
//! ```text
//! one transaction (retried on race-abort):
//!   scan order_kinds (a handful of reference records) for the kind code
//!   insert orders[order_id]            = OrderRecord { .. }
//!   insert orders_by_symbol[packed]    = order_id      (secondary index)
//! ```
//!
//! Order ids are worker-partitioned (high bits carry the worker id) so
//! concurrent workers never collide on primary keys; the secondary key
//! packs `(symbol, placed_at, worker)` for the same reason.

mod orders;

pub use orders::{
    pack_symbol_key, place_order, seed_order_kinds, OrderKindRecord, OrderRecord, OrderStorages,
    OrderTask, SecondaryEntry, ORDER_KIND_COUNT,
};
