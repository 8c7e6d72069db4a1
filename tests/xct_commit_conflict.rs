//! Serializable commit under conflict.
//!
//! Ten workers increment ten records through one engine, with the
//! assignment function dialing contention from none (every worker its
//! own record) to extreme (every worker the same record). Each task adds
//! `i * 20 + 4` to its record inside a retried serializable transaction;
//! the final table state must equal the per-record sums regardless of
//! interleaving, and `id` fields must never change.

mod common;

use std::sync::{Arc, Barrier, Mutex};

use eyre::{ensure, Result};
use numadb::{
    retry_on_race_abort, Engine, ImpersonateTask, IsolationLevel, ThreadContext,
};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use common::FnTask;

const RECORDS: u64 = 10;
const THREADS: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
struct Payload {
    id: u64,
    data: u64,
}

const STORAGE: &str = "test";

/// Creates the array and commits the initial payloads.
struct InitTask;

impl ImpersonateTask for InitTask {
    fn run(&self, context: &mut ThreadContext) -> Result<()> {
        let xct_manager = context.xct_manager();
        let storage = context.storage_manager().create_array(
            STORAGE,
            std::mem::size_of::<Payload>(),
            RECORDS,
        )?;

        xct_manager.begin_xct(context, IsolationLevel::Serializable)?;
        for i in 0..RECORDS {
            storage.overwrite_record_as(context, i, &Payload { id: i, data: 0 })?;
        }
        xct_manager.precommit_xct(context)?;
        Ok(())
    }
}

/// Adds `amount` to record `offset` in one retried transaction.
struct IncrementTask {
    offset: u64,
    amount: u64,
    start: Arc<Barrier>,
}

impl ImpersonateTask for IncrementTask {
    fn run(&self, context: &mut ThreadContext) -> Result<()> {
        self.start.wait();
        let xct_manager = context.xct_manager();
        let storage = context.storage_manager().get_array(STORAGE)?;
        retry_on_race_abort(context, |context| {
            xct_manager.begin_xct(context, IsolationLevel::Serializable)?;

            let mut payload: Payload = storage.get_record_as(context, self.offset)?;
            ensure!(payload.id == self.offset, "id field changed under us");
            payload.data += self.amount;
            storage.overwrite_record_as(context, self.offset, &payload)?;

            xct_manager.precommit_xct(context)?;
            Ok(())
        })
    }
}

/// Reads the whole table in one (read-only) transaction.
#[derive(Default)]
struct GetAllRecordsTask {
    records: Mutex<Vec<Payload>>,
}

impl ImpersonateTask for GetAllRecordsTask {
    fn run(&self, context: &mut ThreadContext) -> Result<()> {
        let xct_manager = context.xct_manager();
        let storage = context.storage_manager().get_array(STORAGE)?;
        retry_on_race_abort(context, |context| {
            xct_manager.begin_xct(context, IsolationLevel::Serializable)?;
            let mut snapshot = Vec::with_capacity(RECORDS as usize);
            for i in 0..RECORDS {
                snapshot.push(storage.get_record_as::<Payload>(context, i)?);
            }
            xct_manager.precommit_xct(context)?;
            *self.records.lock().unwrap() = snapshot;
            Ok(())
        })
    }
}

fn run_conflict_test(assign: fn(u64) -> u64) {
    let mut engine = Engine::initialize(common::tiny_options(THREADS)).unwrap();
    engine
        .thread_pool()
        .impersonate(Arc::new(InitTask))
        .get_result()
        .unwrap();

    // Hold every task at the barrier until all ten are impersonated, so
    // the increments genuinely race.
    let start = Arc::new(Barrier::new(THREADS as usize + 1));
    let mut sessions = Vec::new();
    for i in 0..u64::from(THREADS) {
        let task = Arc::new(IncrementTask {
            offset: assign(i),
            amount: i * 20 + 4,
            start: start.clone(),
        });
        let session = engine.thread_pool().impersonate(task);
        assert!(
            session.is_valid(),
            "impersonation {} rejected: {:?}",
            i,
            session.invalid_cause()
        );
        sessions.push(session);
    }
    start.wait();
    for session in sessions {
        session.get_result().unwrap();
    }

    let mut answers = [0u64; RECORDS as usize];
    for i in 0..u64::from(THREADS) {
        answers[assign(i) as usize] += i * 20 + 4;
    }

    let getall = Arc::new(GetAllRecordsTask::default());
    engine
        .thread_pool()
        .impersonate(getall.clone())
        .get_result()
        .unwrap();
    let payloads = getall.records.lock().unwrap().clone();
    assert_eq!(payloads.len(), RECORDS as usize);
    for (i, payload) in payloads.iter().enumerate() {
        assert_eq!(payload.id, i as u64, "id field must never change");
        assert_eq!(payload.data, answers[i], "record {i} sum");
    }

    engine.uninitialize().unwrap();
}

#[test]
fn no_conflict() {
    run_conflict_test(|i| i);
}

#[test]
fn light_conflict() {
    // Two workers per record; records 5..9 stay untouched.
    run_conflict_test(|i| i / 2);
}

#[test]
fn heavy_conflict() {
    // Five workers per record.
    run_conflict_test(|i| i / 5);
}

#[test]
fn extreme_conflict() {
    // All ten workers on record 0.
    run_conflict_test(|_| 0);
}

#[test]
fn light_conflict_expected_sums() {
    // Spot-check the arithmetic the generic harness derives.
    let assign = |i: u64| i / 2;
    let mut answers = [0u64; RECORDS as usize];
    for i in 0..u64::from(THREADS) {
        answers[assign(i) as usize] += i * 20 + 4;
    }
    assert_eq!(&answers[..5], &[28, 112, 192, 272, 352]);
    assert_eq!(&answers[5..], &[0, 0, 0, 0, 0]);
}

#[test]
fn write_twice_commits_second_value() {
    let mut engine = Engine::initialize(common::tiny_options(2)).unwrap();
    engine
        .thread_pool()
        .impersonate(Arc::new(InitTask))
        .get_result()
        .unwrap();

    engine
        .thread_pool()
        .impersonate(Arc::new(FnTask(|context: &mut ThreadContext| {
            let xct_manager = context.xct_manager();
            let storage = context.storage_manager().get_array(STORAGE)?;
            xct_manager.begin_xct(context, IsolationLevel::Serializable)?;
            storage.overwrite_record_as(context, 0, &Payload { id: 0, data: 111 })?;
            storage.overwrite_record_as(context, 0, &Payload { id: 0, data: 222 })?;
            // Within the transaction, the read already sees the second write.
            let pending: Payload = storage.get_record_as(context, 0)?;
            ensure!(pending.data == 222, "read-own-write saw {}", pending.data);
            xct_manager.precommit_xct(context)?;
            Ok(())
        })))
        .get_result()
        .unwrap();

    let getall = Arc::new(GetAllRecordsTask::default());
    engine
        .thread_pool()
        .impersonate(getall.clone())
        .get_result()
        .unwrap();
    assert_eq!(getall.records.lock().unwrap()[0].data, 222);

    engine.uninitialize().unwrap();
}

#[test]
fn write_then_abort_keeps_pre_transaction_value() {
    let mut engine = Engine::initialize(common::tiny_options(2)).unwrap();
    engine
        .thread_pool()
        .impersonate(Arc::new(InitTask))
        .get_result()
        .unwrap();

    // Commit a known value first.
    engine
        .thread_pool()
        .impersonate(Arc::new(FnTask(|context: &mut ThreadContext| {
            let xct_manager = context.xct_manager();
            let storage = context.storage_manager().get_array(STORAGE)?;
            xct_manager.begin_xct(context, IsolationLevel::Serializable)?;
            storage.overwrite_record_as(context, 0, &Payload { id: 0, data: 777 })?;
            xct_manager.precommit_xct(context)?;
            Ok(())
        })))
        .get_result()
        .unwrap();

    // Write then abort: the write must not survive.
    engine
        .thread_pool()
        .impersonate(Arc::new(FnTask(|context: &mut ThreadContext| {
            let xct_manager = context.xct_manager();
            let storage = context.storage_manager().get_array(STORAGE)?;
            xct_manager.begin_xct(context, IsolationLevel::Serializable)?;
            storage.overwrite_record_as(context, 0, &Payload { id: 0, data: 999 })?;
            xct_manager.abort_xct(context)?;
            ensure!(!context.is_running_xct(), "abort left the transaction active");
            Ok(())
        })))
        .get_result()
        .unwrap();

    let getall = Arc::new(GetAllRecordsTask::default());
    engine
        .thread_pool()
        .impersonate(getall.clone())
        .get_result()
        .unwrap();
    assert_eq!(getall.records.lock().unwrap()[0].data, 777);

    engine.uninitialize().unwrap();
}

#[test]
fn commit_epochs_never_decrease() {
    let mut engine = Engine::initialize(common::tiny_options(2)).unwrap();
    engine
        .thread_pool()
        .impersonate(Arc::new(InitTask))
        .get_result()
        .unwrap();

    let epochs = Arc::new(Mutex::new(Vec::new()));
    for round in 0..5u64 {
        let epochs = epochs.clone();
        engine
            .thread_pool()
            .impersonate(Arc::new(FnTask(move |context: &mut ThreadContext| {
                let xct_manager = context.xct_manager();
                let storage = context.storage_manager().get_array(STORAGE)?;
                xct_manager.begin_xct(context, IsolationLevel::Serializable)?;
                storage.overwrite_record_as(context, 1, &Payload { id: 1, data: round })?;
                let epoch = xct_manager.precommit_xct(context)?;
                epochs.lock().unwrap().push(epoch);
                Ok(())
            })))
            .get_result()
            .unwrap();
    }

    let observed = epochs.lock().unwrap().clone();
    assert_eq!(observed.len(), 5);
    for pair in observed.windows(2) {
        assert!(pair[0] <= pair[1], "commit epochs went backwards: {pair:?}");
    }

    engine.uninitialize().unwrap();
}

#[test]
fn nested_begin_is_rejected() {
    let mut engine = Engine::initialize(common::tiny_options(1)).unwrap();
    engine
        .thread_pool()
        .impersonate(Arc::new(FnTask(|context: &mut ThreadContext| {
            let xct_manager = context.xct_manager();
            xct_manager.begin_xct(context, IsolationLevel::Serializable)?;
            ensure!(
                xct_manager
                    .begin_xct(context, IsolationLevel::Serializable)
                    .is_err(),
                "nested begin_xct must fail"
            );
            // The original transaction is still usable.
            ensure!(context.is_running_xct(), "outer transaction lost");
            xct_manager.abort_xct(context)?;
            Ok(())
        })))
        .get_result()
        .unwrap();
    engine.uninitialize().unwrap();
}
