//! Order-intake routine: reference scan + primary insert + secondary
//! insert in one serializable transaction.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use eyre::{bail, Result};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::storage::{ArrayStorage, KeyedStorage, StorageManager};
use crate::thread::{ImpersonateTask, ThreadContext};
use crate::xct::{retry_on_race_abort, IsolationLevel};

/// Number of rows in the order-kind reference table.
pub const ORDER_KIND_COUNT: u64 = 5;

/// A row of the order-kind reference table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct OrderKindRecord {
    pub code: u32,
    pub is_market: u32,
}

/// A row of the primary `orders` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct OrderRecord {
    pub id: u64,
    pub symbol: u64,
    pub kind: u32,
    pub reserved: u32,
    pub placed_at: u64,
}

/// A row of the `orders_by_symbol` secondary index: the referenced
/// primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct SecondaryEntry {
    pub order_id: u64,
}

/// Handles to the three storages the workload touches.
#[derive(Clone)]
pub struct OrderStorages {
    pub order_kinds: Arc<ArrayStorage>,
    pub orders: Arc<KeyedStorage>,
    pub orders_by_symbol: Arc<KeyedStorage>,
}

impl OrderStorages {
    /// Creates the three storages.
    pub fn create(manager: &StorageManager) -> Result<Self> {
        Ok(Self {
            order_kinds: manager.create_array(
                "order_kinds",
                std::mem::size_of::<OrderKindRecord>(),
                ORDER_KIND_COUNT,
            )?,
            orders: manager.create_keyed("orders", std::mem::size_of::<OrderRecord>())?,
            orders_by_symbol: manager
                .create_keyed("orders_by_symbol", std::mem::size_of::<SecondaryEntry>())?,
        })
    }

    /// Looks the three storages up by name.
    pub fn open(manager: &StorageManager) -> Result<Self> {
        Ok(Self {
            order_kinds: manager.get_array("order_kinds")?,
            orders: manager.get_keyed("orders")?,
            orders_by_symbol: manager.get_keyed("orders_by_symbol")?,
        })
    }
}

/// Seeds the order-kind reference table. Must run inside an active
/// transaction.
pub fn seed_order_kinds(context: &mut ThreadContext, storages: &OrderStorages) -> Result<()> {
    for index in 0..ORDER_KIND_COUNT {
        let record = OrderKindRecord {
            code: 100 + index as u32,
            is_market: (index % 2) as u32,
        };
        storages
            .order_kinds
            .overwrite_record_as(context, index, &record)?;
    }
    Ok(())
}

/// Packs the secondary-index key: symbol in the high bits, placement
/// time in the middle, worker id in the low byte so concurrent workers
/// never collide.
pub fn pack_symbol_key(symbol: u64, placed_at: u64, worker: u8) -> u64 {
    (symbol << 40) | ((placed_at & 0xffff_ffff) << 8) | u64::from(worker)
}

/// The order-intake frame. Must run inside an active transaction:
/// scans the reference table for the kind code, inserts the order, then
/// inserts the secondary-index entry referencing it.
pub fn place_order(
    context: &mut ThreadContext,
    storages: &OrderStorages,
    order_id: u64,
    symbol: u64,
    kind_code: u32,
    placed_at: u64,
) -> Result<()> {
    // The reference table is a handful of records; scan rather than index.
    let mut kind = None;
    for index in 0..ORDER_KIND_COUNT {
        let record: OrderKindRecord = storages.order_kinds.get_record_as(context, index)?;
        if record.code == kind_code {
            kind = Some(record);
            break;
        }
    }
    let Some(kind) = kind else {
        bail!("unknown order kind code {kind_code}");
    };

    let record = OrderRecord {
        id: order_id,
        symbol,
        kind: kind.code,
        reserved: 0,
        placed_at,
    };
    storages.orders.insert_record_as(context, order_id, &record)?;

    let secondary_key = pack_symbol_key(symbol, placed_at, (context.thread_id() & 0xff) as u8);
    storages.orders_by_symbol.insert_record_as(
        context,
        secondary_key,
        &SecondaryEntry { order_id },
    )?;
    Ok(())
}

/// An impersonation task that places `count` orders, one serializable
/// transaction each, retrying on race-abort.
///
/// Each task carries a caller-assigned client id that partitions the
/// order-id space, so any number of tasks can run concurrently (or land
/// on the same worker) without colliding on primary keys.
pub struct OrderTask {
    storages: OrderStorages,
    client_id: u16,
    symbol: u64,
    kind_code: u32,
    count: u64,
    next_sequence: AtomicU64,
}

impl OrderTask {
    pub fn new(
        storages: OrderStorages,
        client_id: u16,
        symbol: u64,
        kind_code: u32,
        count: u64,
    ) -> Self {
        Self {
            storages,
            client_id,
            symbol,
            kind_code,
            count,
            next_sequence: AtomicU64::new(0),
        }
    }

    /// Client-partitioned order id: client in the high 16 bits.
    fn next_order_id(&self) -> u64 {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        (u64::from(self.client_id) << 48) | sequence
    }
}

impl ImpersonateTask for OrderTask {
    fn run(&self, context: &mut ThreadContext) -> Result<()> {
        let xct_manager = context.xct_manager();
        for _ in 0..self.count {
            let order_id = self.next_order_id();
            retry_on_race_abort(context, |context| {
                xct_manager.begin_xct(context, IsolationLevel::Serializable)?;
                let placed_at = xct_manager.current_epoch().value();
                place_order(
                    context,
                    &self.storages,
                    order_id,
                    self.symbol,
                    self.kind_code,
                    placed_at,
                )?;
                xct_manager.precommit_xct(context)?;
                Ok(())
            })?;
        }
        Ok(())
    }
}
