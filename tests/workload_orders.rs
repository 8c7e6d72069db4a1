//! Order-intake workload end-to-end: reference scan plus primary and
//! secondary-index inserts in one serializable transaction, driven from
//! several workers at once.

mod common;

use std::sync::{Arc, Mutex};

use eyre::ensure;
use numadb::workload::{
    pack_symbol_key, place_order, seed_order_kinds, OrderRecord, OrderStorages, OrderTask,
    SecondaryEntry,
};
use numadb::{Engine, IsolationLevel, ThreadContext};

use common::FnTask;

/// Creates and seeds the order storages on a worker.
fn bootstrap(engine: &Engine) {
    engine
        .thread_pool()
        .impersonate(Arc::new(FnTask(|context: &mut ThreadContext| {
            let storages = OrderStorages::create(&context.storage_manager())?;
            let xct_manager = context.xct_manager();
            xct_manager.begin_xct(context, IsolationLevel::Serializable)?;
            seed_order_kinds(context, &storages)?;
            xct_manager.precommit_xct(context)?;
            Ok(())
        })))
        .get_result()
        .unwrap();
}

#[test]
fn single_order_roundtrip() {
    let mut engine = Engine::initialize(common::tiny_options(2)).unwrap();
    bootstrap(&engine);

    engine
        .thread_pool()
        .impersonate(Arc::new(FnTask(|context: &mut ThreadContext| {
            let storages = OrderStorages::open(&context.storage_manager())?;
            let xct_manager = context.xct_manager();
            let order_id = 0xABCD;
            let symbol = 7;
            let placed_at = 42;

            xct_manager.begin_xct(context, IsolationLevel::Serializable)?;
            place_order(context, &storages, order_id, symbol, 101, placed_at)?;
            xct_manager.precommit_xct(context)?;

            // Read both sides back in a second transaction.
            xct_manager.begin_xct(context, IsolationLevel::Serializable)?;
            let order: OrderRecord = storages.orders.get_record_as(context, order_id)?;
            ensure!(order.id == order_id, "primary record id mismatch");
            ensure!(order.symbol == symbol, "primary record symbol mismatch");
            ensure!(order.kind == 101, "primary record kind mismatch");

            let worker = (context.thread_id() & 0xff) as u8;
            let secondary_key = pack_symbol_key(symbol, placed_at, worker);
            let entry: SecondaryEntry = storages
                .orders_by_symbol
                .get_record_as(context, secondary_key)?;
            ensure!(entry.order_id == order_id, "secondary entry points elsewhere");
            xct_manager.precommit_xct(context)?;
            Ok(())
        })))
        .get_result()
        .unwrap();

    engine.uninitialize().unwrap();
}

#[test]
fn unknown_kind_code_fails_the_order() {
    let mut engine = Engine::initialize(common::tiny_options(2)).unwrap();
    bootstrap(&engine);

    let err = engine
        .thread_pool()
        .impersonate(Arc::new(FnTask(|context: &mut ThreadContext| {
            let storages = OrderStorages::open(&context.storage_manager())?;
            let xct_manager = context.xct_manager();
            xct_manager.begin_xct(context, IsolationLevel::Serializable)?;
            let result = place_order(context, &storages, 1, 1, 9999, 1);
            xct_manager.abort_xct(context)?;
            result
        })))
        .get_result()
        .unwrap_err();
    assert!(format!("{err}").contains("unknown order kind"));

    engine.uninitialize().unwrap();
}

#[test]
fn library_order_task_places_orders() {
    let mut engine = Engine::initialize(common::tiny_options(2)).unwrap();
    bootstrap(&engine);

    let storages = OrderStorages::open(engine.storage_manager()).unwrap();
    let before = storages.orders.key_count();

    let task = Arc::new(OrderTask::new(storages.clone(), 77, 9, 102, 10));
    engine
        .thread_pool()
        .impersonate(task)
        .get_result()
        .unwrap();

    assert_eq!(storages.orders.key_count() - before, 10);
    engine.uninitialize().unwrap();
}

#[test]
fn concurrent_workers_place_disjoint_orders() {
    const WORKERS: u8 = 4;
    const ORDERS_EACH: u64 = 25;

    let mut engine = Engine::initialize(common::tiny_options(WORKERS)).unwrap();
    bootstrap(&engine);

    let mut tasks = Vec::new();
    let mut sessions = Vec::new();
    for client in 0..WORKERS {
        let task = Arc::new(OrderTaskWithLedger::new(
            u16::from(client),
            u64::from(client) + 1,
            100 + u32::from(client % 5),
            ORDERS_EACH,
        ));
        let session = engine.thread_pool().impersonate(task.clone());
        assert!(session.is_valid(), "{:?}", session.invalid_cause());
        tasks.push(task);
        sessions.push(session);
    }
    for session in sessions {
        session.get_result().unwrap();
    }

    // Conservation: every placed order is readable through both the
    // primary table and its secondary key, and ids are disjoint.
    let mut all_placed = Vec::new();
    for task in &tasks {
        let placed = task.placed.lock().unwrap().clone();
        assert_eq!(placed.len(), ORDERS_EACH as usize);
        all_placed.extend(placed);
    }
    let mut ids: Vec<u64> = all_placed.iter().map(|(id, _)| *id).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), (WORKERS as usize) * ORDERS_EACH as usize);

    engine
        .thread_pool()
        .impersonate(Arc::new(FnTask(move |context: &mut ThreadContext| {
            let storages = OrderStorages::open(&context.storage_manager())?;
            let xct_manager = context.xct_manager();
            xct_manager.begin_xct(context, IsolationLevel::Serializable)?;
            for (order_id, secondary_key) in &all_placed {
                let order: OrderRecord = storages.orders.get_record_as(context, *order_id)?;
                ensure!(order.id == *order_id, "order {order_id} corrupted");
                let entry: SecondaryEntry = storages
                    .orders_by_symbol
                    .get_record_as(context, *secondary_key)?;
                ensure!(
                    entry.order_id == *order_id,
                    "secondary key {secondary_key} points elsewhere"
                );
            }
            xct_manager.precommit_xct(context)?;
            Ok(())
        })))
        .get_result()
        .unwrap();

    engine.uninitialize().unwrap();
}

/// The library task's shape, plus a ledger of what was committed so the
/// verification pass knows which keys to read back.
struct OrderTaskWithLedger {
    client_id: u16,
    symbol: u64,
    kind_code: u32,
    count: u64,
    placed: Mutex<Vec<(u64, u64)>>,
}

impl OrderTaskWithLedger {
    fn new(client_id: u16, symbol: u64, kind_code: u32, count: u64) -> Self {
        Self {
            client_id,
            symbol,
            kind_code,
            count,
            placed: Mutex::new(Vec::new()),
        }
    }
}

impl numadb::ImpersonateTask for OrderTaskWithLedger {
    fn run(&self, context: &mut ThreadContext) -> eyre::Result<()> {
        let storages = OrderStorages::open(&context.storage_manager())?;
        let xct_manager = context.xct_manager();
        for sequence in 0..self.count {
            let order_id = (u64::from(self.client_id) << 48) | sequence;
            let placed_at = numadb::retry_on_race_abort(context, |context| {
                xct_manager.begin_xct(context, IsolationLevel::Serializable)?;
                let placed_at = xct_manager.current_epoch().value();
                place_order(
                    context,
                    &storages,
                    order_id,
                    self.symbol,
                    self.kind_code,
                    placed_at,
                )?;
                xct_manager.precommit_xct(context)?;
                Ok(placed_at)
            })?;
            let worker = (context.thread_id() & 0xff) as u8;
            self.placed
                .lock()
                .unwrap()
                .push((order_id, pack_symbol_key(self.symbol, placed_at, worker)));
        }
        Ok(())
    }
}
