//! # Worker Context and Task Interface
//!
//! A [`ThreadContext`] is everything a task may touch while it runs on a
//! worker: the engine's service handles, the worker's NUMA-local core
//! memory, and the worker's one transaction record. It is built inside
//! the worker thread and never leaves it; tasks borrow it for the
//! duration of `run` and must not retain it.

use std::sync::Arc;

use eyre::Result;

use crate::config::EngineOptions;
use crate::debugging::DebuggingSupports;
use crate::memory::{EngineMemory, NumaCoreMemory};
use crate::storage::StorageManager;
use crate::xct::{Xct, XctManager};

use super::{decompose_numa_node, ThreadGroupId, ThreadId};

/// The engine's shared services, as seen from worker threads and the
/// engine facade.
pub(crate) struct EngineServices {
    pub(crate) options: EngineOptions,
    pub(crate) debug: Arc<DebuggingSupports>,
    pub(crate) memory: Arc<EngineMemory>,
    pub(crate) storage: Arc<StorageManager>,
    pub(crate) xct_manager: Arc<XctManager>,
}

/// A unit of work submitted through `ThreadPool::impersonate`.
///
/// `run` executes on the impersonated worker's thread with that worker's
/// context. The returned status travels to the caller's session
/// unchanged.
pub trait ImpersonateTask: Send + Sync {
    fn run(&self, context: &mut ThreadContext) -> Result<()>;
}

pub(crate) type TaskRef = Arc<dyn ImpersonateTask>;

/// One worker's execution context.
pub struct ThreadContext {
    id: ThreadId,
    services: Arc<EngineServices>,
    core_memory: Arc<NumaCoreMemory>,
    current_xct: Xct,
}

impl ThreadContext {
    pub(crate) fn new(
        id: ThreadId,
        services: Arc<EngineServices>,
        core_memory: Arc<NumaCoreMemory>,
    ) -> Self {
        Self {
            id,
            services,
            core_memory,
            current_xct: Xct::new(),
        }
    }

    pub fn thread_id(&self) -> ThreadId {
        self.id
    }

    pub fn numa_node(&self) -> ThreadGroupId {
        decompose_numa_node(self.id)
    }

    pub fn options(&self) -> &EngineOptions {
        &self.services.options
    }

    pub fn memory_manager(&self) -> Arc<EngineMemory> {
        self.services.memory.clone()
    }

    pub fn storage_manager(&self) -> Arc<StorageManager> {
        self.services.storage.clone()
    }

    pub fn xct_manager(&self) -> Arc<XctManager> {
        self.services.xct_manager.clone()
    }

    pub(crate) fn core_memory(&self) -> &Arc<NumaCoreMemory> {
        &self.core_memory
    }

    /// True while a transaction is active on this worker.
    pub fn is_running_xct(&self) -> bool {
        self.current_xct.is_active()
    }

    pub fn current_xct(&self) -> &Xct {
        &self.current_xct
    }

    pub(crate) fn current_xct_mut(&mut self) -> &mut Xct {
        &mut self.current_xct
    }
}
