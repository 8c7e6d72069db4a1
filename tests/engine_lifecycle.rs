//! Engine startup and shutdown behavior: worker topology after init,
//! pool-sizing boundaries, busy-pool impersonation, idle shutdown.

mod common;

use std::sync::{Arc, Barrier};

use numadb::thread::{decompose_numa_local_ordinal, decompose_numa_node};
use numadb::{Engine, EngineError, ThreadContext};

use common::FnTask;

#[test]
fn worker_grid_matches_options() {
    let mut engine = Engine::initialize(common::tiny_options(3)).unwrap();

    let pool = engine.thread_pool();
    assert_eq!(pool.worker_count(), 3);

    let ids = pool.thread_ids();
    assert_eq!(ids.len(), 3);
    for (expected_ordinal, id) in ids.iter().enumerate() {
        assert_eq!(decompose_numa_node(*id), 0);
        assert_eq!(decompose_numa_local_ordinal(*id), expected_ordinal as u8);
    }

    engine.uninitialize().unwrap();
}

#[test]
fn shutdown_during_idle_joins_all_workers() {
    let mut engine = Engine::initialize(common::tiny_options(4)).unwrap();
    // No tasks submitted at all.
    engine.uninitialize().unwrap();
    // Idempotent.
    engine.uninitialize().unwrap();
}

#[test]
fn pool_sizing_boundary() {
    // Exactly minimal: initialization succeeds.
    let mut options = common::tiny_options(4);
    options.memory.page_pool_size_per_node = options.minimal_page_pool_bytes();
    let mut engine = Engine::initialize(options.clone()).unwrap();
    engine.uninitialize().unwrap();

    // One byte below minimal: PagePoolTooSmall.
    options.memory.page_pool_size_per_node -= 1;
    let err = Engine::initialize(options).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::PagePoolTooSmall { .. })
    ));
}

#[test]
fn impersonate_on_busy_pool_returns_invalid_session() {
    let mut engine = Engine::initialize(common::tiny_options(1)).unwrap();

    // Park the only worker on a barrier.
    let gate = Arc::new(Barrier::new(2));
    let gate_for_task = gate.clone();
    let busy = engine
        .thread_pool()
        .impersonate(Arc::new(FnTask(move |_context: &mut ThreadContext| {
            gate_for_task.wait();
            Ok(())
        })));
    assert!(busy.is_valid());

    // The pool is saturated: the claim must fail without blocking.
    let rejected = engine
        .thread_pool()
        .impersonate(Arc::new(FnTask(|_context: &mut ThreadContext| Ok(()))));
    assert!(!rejected.is_valid());
    assert_eq!(rejected.invalid_cause(), Some(&EngineError::NoIdleWorker));
    let err = rejected.get_result().unwrap_err();
    assert_eq!(
        err.downcast_ref::<EngineError>(),
        Some(&EngineError::NoIdleWorker)
    );

    // Release the worker; the accepted task completes normally.
    gate.wait();
    busy.get_result().unwrap();

    // Idle again: the next impersonation succeeds.
    let again = engine
        .thread_pool()
        .impersonate(Arc::new(FnTask(|_context: &mut ThreadContext| Ok(()))));
    assert!(again.is_valid());
    again.get_result().unwrap();

    engine.uninitialize().unwrap();
}

#[test]
fn task_errors_surface_through_the_session() {
    let mut engine = Engine::initialize(common::tiny_options(1)).unwrap();
    let session = engine
        .thread_pool()
        .impersonate(Arc::new(FnTask(|_context: &mut ThreadContext| {
            eyre::bail!("task exploded")
        })));
    let err = session.get_result().unwrap_err();
    assert!(format!("{err}").contains("task exploded"));

    // The worker survives a failed task.
    let ok = engine
        .thread_pool()
        .impersonate(Arc::new(FnTask(|_context: &mut ThreadContext| Ok(()))));
    ok.get_result().unwrap();

    engine.uninitialize().unwrap();
}

#[test]
fn context_exposes_worker_identity() {
    let mut engine = Engine::initialize(common::tiny_options(2)).unwrap();
    let session = engine
        .thread_pool()
        .impersonate(Arc::new(FnTask(|context: &mut ThreadContext| {
            eyre::ensure!(
                decompose_numa_node(context.thread_id()) == context.numa_node(),
                "numa_node accessor disagrees with the id decomposition"
            );
            eyre::ensure!(!context.is_running_xct(), "fresh context inside a transaction");
            Ok(())
        })));
    let worker = session.thread_id();
    assert!(worker.is_some());
    session.get_result().unwrap();
    engine.uninitialize().unwrap();
}
