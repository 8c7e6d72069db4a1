//! # Engine Lifecycle
//!
//! The facade that brings the modules up in dependency order and tears
//! them down in reverse:
//!
//! ```text
//! initialize:   debugging ─▶ memory ─▶ storage ─▶ xct ─▶ thread pool
//! uninitialize: thread pool ─▶ storage ─▶ memory ─▶ debugging
//! ```
//!
//! Startup is all-or-nothing: any module failure aborts `initialize` and
//! the caller gets the error. Shutdown keeps going past failures,
//! collecting them into one aggregate report. Dropping an engine that
//! was never uninitialized runs the shutdown path as a safety net and
//! logs, rather than surfaces, its result.

use std::sync::Arc;

use eyre::Result;

use crate::config::EngineOptions;
use crate::debugging::DebuggingSupports;
use crate::error::ErrorBatch;
use crate::memory::EngineMemory;
use crate::storage::StorageManager;
use crate::thread::context::EngineServices;
use crate::thread::ThreadPool;
use crate::xct::XctManager;

/// A fully initialized engine.
pub struct Engine {
    services: Arc<EngineServices>,
    thread_pool: ThreadPool,
    uninitialized: bool,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("uninitialized", &self.uninitialized)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Validates the options and brings every module up. On success all
    /// workers are spawned, pinned, and idle.
    pub fn initialize(options: EngineOptions) -> Result<Engine> {
        options.validate()?;

        let debug = Arc::new(DebuggingSupports::new());
        debug.initialize()?;
        tracing::info!(?options, "initializing engine");

        let memory = Arc::new(EngineMemory::initialize(&options, &debug)?);
        let storage = Arc::new(StorageManager::new(memory.clone()));
        let xct_manager = Arc::new(XctManager::new());

        let services = Arc::new(EngineServices {
            options,
            debug,
            memory,
            storage,
            xct_manager,
        });
        let thread_pool = ThreadPool::initialize(&services)?;

        tracing::info!("engine initialized");
        Ok(Engine {
            services,
            thread_pool,
            uninitialized: false,
        })
    }

    /// Tears the modules down in reverse order, aggregating failures.
    /// Idempotent; later calls are no-ops.
    pub fn uninitialize(&mut self) -> Result<()> {
        if self.uninitialized {
            return Ok(());
        }
        self.uninitialized = true;
        tracing::info!("uninitializing engine");

        let mut batch = ErrorBatch::new();
        batch.push_result(self.thread_pool.uninitialize());
        batch.push_result(self.services.storage.uninitialize());
        batch.push_result(self.services.memory.uninitialize(&self.services.debug));
        self.services.debug.uninitialize();
        batch.summarize()
    }

    pub fn options(&self) -> &EngineOptions {
        &self.services.options
    }

    pub fn thread_pool(&self) -> &ThreadPool {
        &self.thread_pool
    }

    pub fn xct_manager(&self) -> &Arc<XctManager> {
        &self.services.xct_manager
    }

    pub fn storage_manager(&self) -> &Arc<StorageManager> {
        &self.services.storage
    }

    pub fn memory_manager(&self) -> &Arc<EngineMemory> {
        &self.services.memory
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if !self.uninitialized {
            if let Err(err) = self.uninitialize() {
                tracing::error!(%err, "engine shutdown reported errors");
            }
        }
    }
}
