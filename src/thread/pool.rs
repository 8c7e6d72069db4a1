//! # Thread Pool
//!
//! The flat grid of workers, indexed by `(node, ordinal)`, and the
//! `impersonate` entry point. Impersonation never blocks: it scans for a
//! worker whose `impersonated` flag it can flip, hands the task over,
//! and returns; if every worker is busy the session comes back invalid
//! with a `NoIdleWorker` cause and the caller decides whether to retry.
//!
//! ## Shutdown
//!
//! `uninitialize` is serialized against `impersonate` through the
//! `shutdown` RwLock: impersonation holds the read lock across
//! {flag check, scan, handoff}, shutdown takes the write lock to set the
//! flag. Once the flag is up no new task can be accepted; shutdown then
//! waits for each worker to drain its in-flight task before sending the
//! null task and joining. Steady-state impersonations only ever share
//! the read lock, so the non-blocking claim is preserved in practice.

use std::sync::Arc;

use eyre::Result;
use parking_lot::RwLock;

use crate::error::{EngineError, ErrorBatch};

use super::context::{EngineServices, TaskRef};
use super::session::ImpersonateSession;
use super::worker::Worker;
use super::{compose_thread_id, ThreadGroupId, ThreadId};

/// Workers of one NUMA node.
struct ThreadGroup {
    group_id: ThreadGroupId,
    workers: Vec<Worker>,
}

pub struct ThreadPool {
    groups: Vec<ThreadGroup>,
    shutdown: RwLock<bool>,
}

impl ThreadPool {
    /// Spawns `group_count * thread_count_per_group` workers, each
    /// resolving its core memory before its thread starts.
    pub(crate) fn initialize(services: &Arc<EngineServices>) -> Result<Self> {
        let thread_options = &services.options.thread;
        let mut groups = Vec::with_capacity(thread_options.group_count as usize);
        for node in 0..thread_options.group_count {
            let group_id = node as ThreadGroupId;
            let mut workers = Vec::with_capacity(thread_options.thread_count_per_group as usize);
            for ordinal in 0..thread_options.thread_count_per_group {
                workers.push(Worker::initialize(
                    services,
                    compose_thread_id(group_id, ordinal),
                )?);
            }
            groups.push(ThreadGroup { group_id, workers });
        }
        tracing::info!(
            groups = groups.len(),
            per_group = thread_options.thread_count_per_group,
            "thread pool initialized"
        );
        Ok(Self {
            groups,
            shutdown: RwLock::new(false),
        })
    }

    pub fn worker_count(&self) -> usize {
        self.groups.iter().map(|group| group.workers.len()).sum()
    }

    /// Ids of every worker, in `(node, ordinal)` order.
    pub fn thread_ids(&self) -> Vec<ThreadId> {
        self.groups
            .iter()
            .flat_map(|group| group.workers.iter().map(|worker| worker.state().id()))
            .collect()
    }

    /// Hands the task to the first worker whose `impersonated` flag this
    /// call wins. Never blocks; an all-busy pool (or one shutting down)
    /// yields an invalid session.
    pub fn impersonate(&self, task: Arc<dyn super::ImpersonateTask>) -> ImpersonateSession {
        let task: TaskRef = task;
        let shutdown = self.shutdown.read();
        if *shutdown {
            return ImpersonateSession::invalid(EngineError::NoIdleWorker);
        }
        for group in &self.groups {
            for worker in &group.workers {
                if let Some(result) = worker.state().try_impersonate(&task) {
                    return ImpersonateSession::valid(worker.state().id(), result);
                }
            }
        }
        tracing::debug!("impersonation found no idle worker");
        ImpersonateSession::invalid(EngineError::NoIdleWorker)
    }

    /// Stops accepting tasks, waits for in-flight tasks to finish, and
    /// joins every worker. Per-worker failures are aggregated.
    pub(crate) fn uninitialize(&mut self) -> Result<()> {
        {
            let mut shutdown = self.shutdown.write();
            if *shutdown {
                return Ok(());
            }
            *shutdown = true;
        }

        let mut batch = ErrorBatch::new();
        for group in &mut self.groups {
            tracing::info!(group = group.group_id, "shutting down thread group");
            for worker in &mut group.workers {
                // The shutdown flag stops new claims; drain the current one.
                while worker.state().is_impersonated() {
                    std::thread::yield_now();
                }
                batch.push_result(worker.uninitialize());
            }
        }
        batch.summarize()
    }
}
