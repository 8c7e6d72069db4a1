//! # Worker
//!
//! One OS thread pinned to a NUMA node, looping over its single-slot
//! inbox. The loop is the whole protocol:
//!
//! 1. Block on the inbox.
//! 2. `None` is the shutdown signal: break.
//! 3. Install a fresh inbox for the next round *before* executing, so
//!    the moment `impersonated` clears there is a channel to publish
//!    into.
//! 4. Run the task against this worker's context.
//! 5. Deposit the status in the outbox, then clear `impersonated` with
//!    release ordering, so the outbox write happens-before any requester's
//!    successful claim.
//!
//! After the loop the worker publishes its `exited` flag with release
//! semantics and the thread ends. `uninitialize` sends `None` and joins.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use eyre::{bail, Result};
use parking_lot::Mutex;

use super::context::{EngineServices, TaskRef, ThreadContext};
use super::oneshot;
use super::{decompose_numa_local_ordinal, decompose_numa_node, ThreadId};
use crate::error::EngineError;
use crate::memory::{numa, NumaCoreMemory};

pub(crate) type TaskResult = Result<()>;

/// Worker state shared between the worker thread, the pool, and
/// sessions.
pub(crate) struct WorkerState {
    id: ThreadId,
    /// True iff the worker holds an unconsumed task or an unread result.
    /// The single contended atomic; requesters claim it by CAS.
    impersonated: AtomicBool,
    exited: AtomicBool,
    /// Sender half of the *current* inbox. Present exactly while the
    /// worker is idle; the claiming requester takes it.
    inbox: Mutex<Option<oneshot::Sender<Option<TaskRef>>>>,
    /// Sender half of the current round's outbox, installed by the
    /// claiming requester, taken by the worker to deposit the result.
    outbox: Mutex<Option<oneshot::Sender<TaskResult>>>,
}

impl WorkerState {
    pub(crate) fn id(&self) -> ThreadId {
        self.id
    }

    pub(crate) fn is_impersonated(&self) -> bool {
        self.impersonated.load(Ordering::Acquire)
    }

    pub(crate) fn has_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    /// Tries to claim this worker for one task. On success the fresh
    /// outbox is installed and the task is published to the inbox; the
    /// returned receiver resolves when the task completes.
    pub(crate) fn try_impersonate(
        &self,
        task: &TaskRef,
    ) -> Option<oneshot::Receiver<TaskResult>> {
        if self
            .impersonated
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // Someone else holds this worker.
            return None;
        }

        let (result_sender, result_receiver) = oneshot::channel();
        *self.outbox.lock() = Some(result_sender);

        // The flag was false, so the worker has already installed the
        // inbox for this round; publishing the task releases the worker.
        let inbox = self.inbox.lock().take();
        debug_assert!(inbox.is_some(), "idle worker without an installed inbox");
        if let Some(inbox) = inbox {
            inbox.send(Some(task.clone()));
        }
        Some(result_receiver)
    }

    /// Sends the shutdown signal. The pool calls this only after the
    /// worker drained (impersonated == false), so the inbox is present.
    fn send_shutdown(&self) {
        if let Some(inbox) = self.inbox.lock().take() {
            inbox.send(None);
        }
    }
}

/// A worker: shared state plus the owned OS thread.
pub(crate) struct Worker {
    state: Arc<WorkerState>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Resolves the worker's core memory, installs the first inbox, and
    /// spawns the worker thread.
    pub(crate) fn initialize(services: &Arc<EngineServices>, id: ThreadId) -> Result<Self> {
        let core_memory = services.memory.get_core_memory(id)?;

        let state = Arc::new(WorkerState {
            id,
            impersonated: AtomicBool::new(false),
            exited: AtomicBool::new(false),
            inbox: Mutex::new(None),
            outbox: Mutex::new(None),
        });
        let (inbox_sender, inbox_receiver) = oneshot::channel();
        *state.inbox.lock() = Some(inbox_sender);

        let thread_state = state.clone();
        let thread_services = services.clone();
        let node = decompose_numa_node(id);
        let ordinal = decompose_numa_local_ordinal(id);
        let spawned = std::thread::Builder::new()
            .name(format!("worker-{node}-{ordinal}"))
            .spawn(move || {
                handle_tasks(thread_state, inbox_receiver, thread_services, core_memory)
            });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => {
                tracing::error!(thread = id, %err, "worker thread spawn failed");
                bail!(EngineError::OutOfMemory);
            }
        };

        Ok(Self {
            state,
            handle: Some(handle),
        })
    }

    pub(crate) fn state(&self) -> &Arc<WorkerState> {
        &self.state
    }

    /// Signals shutdown and joins the thread. The pool guarantees the
    /// worker is idle when this runs.
    pub(crate) fn uninitialize(&mut self) -> Result<()> {
        self.state.send_shutdown();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                bail!("worker {} panicked before joining", self.state.id);
            }
        }
        debug_assert!(self.state.has_exited());
        Ok(())
    }
}

/// The worker loop. Runs on the spawned thread for the engine's
/// lifetime.
fn handle_tasks(
    state: Arc<WorkerState>,
    first_inbox: oneshot::Receiver<Option<TaskRef>>,
    services: Arc<EngineServices>,
    core_memory: Arc<NumaCoreMemory>,
) {
    let id = state.id;
    let node = decompose_numa_node(id);
    tracing::info!(thread = id, numa_node = node, "worker started");
    numa::pin_to_node(node);

    let mut context = ThreadContext::new(id, services, core_memory);
    let mut inbox = first_inbox;
    loop {
        tracing::debug!(thread = id, "waiting for a task");
        let task = inbox.recv();

        // Install the next round's inbox before touching the task, so
        // clearing `impersonated` below never exposes a missing channel.
        let (next_sender, next_receiver) = oneshot::channel();
        *state.inbox.lock() = Some(next_sender);
        inbox = next_receiver;

        let Some(task) = task else {
            // The null task is the shutdown signal.
            break;
        };
        debug_assert!(state.is_impersonated());
        tracing::debug!(thread = id, "task retrieved");

        let result = task.run(&mut context);
        tracing::debug!(thread = id, ok = result.is_ok(), "task finished");

        let outbox = state.outbox.lock().take();
        debug_assert!(outbox.is_some(), "running worker without an outbox");
        if let Some(outbox) = outbox {
            outbox.send(result);
        }
        state.impersonated.store(false, Ordering::Release);
    }

    state.exited.store(true, Ordering::Release);
    tracing::info!(thread = id, "worker exits");
}
