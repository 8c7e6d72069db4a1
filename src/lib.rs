//! # numadb - NUMA-Aware In-Memory OLTP Engine Core
//!
//! numadb is the execution core of a NUMA-aware, in-memory OLTP engine.
//! It is built around three pieces of machinery that together define the
//! engine's execution model:
//!
//! - **The NUMA-pinned worker pool**: the only way user code runs inside
//!   the engine, and the only thing that may touch engine data. One OS
//!   thread per worker, pinned to its node for the engine's lifetime.
//! - **The impersonation handoff**: a single-slot rendezvous by which an
//!   outside caller hands a task to an idle worker and awaits its result.
//! - **The serializable transaction lifecycle**: optimistic validation
//!   with a distinguished race-abort and retry-on-race as the canonical
//!   task idiom.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │            Engine (lifecycle facade)          │
//! ├──────────────────────────────────────────────┤
//! │   ThreadPool ── impersonate ──▶ Session       │
//! │      │ one pinned worker per (node, core)     │
//! ├──────┼───────────────────────────────────────┤
//! │   ThreadContext (per worker)                  │
//! │      ├── current Xct ──▶ XctManager           │
//! │      └── NumaCoreMemory                       │
//! ├──────────────────────────────────────────────┤
//! │   Storages (array / keyed collaborators)      │
//! ├──────────────────────────────────────────────┤
//! │   EngineMemory: per-node page pools           │
//! │      + global page resolver                   │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Execution model
//!
//! External callers never touch engine data. They submit an
//! [`ImpersonateTask`] through [`ThreadPool::impersonate`]; an idle
//! worker is claimed atomically, runs the task inside its NUMA domain,
//! and deposits the status for [`ImpersonateSession::get_result`]. All
//! storage mutations happen on the worker's thread, in memory owned by
//! the worker's node.
//!
//! ## Quick Start
//!
//! ```ignore
//! use numadb::{Engine, EngineOptions};
//!
//! let mut engine = Engine::initialize(EngineOptions::default())?;
//! let session = engine.thread_pool().impersonate(my_task);
//! session.get_result()?;
//! engine.uninitialize()?;
//! ```
//!
//! ## Module Overview
//!
//! - [`engine`]: lifecycle facade (module bring-up and tear-down)
//! - [`memory`]: per-node page pools, core memories, page resolvers
//! - [`thread`]: worker pool, impersonation, thread context
//! - [`xct`]: serializable transactions, commit epochs, retry driver
//! - [`storage`]: array and keyed storage collaborators
//! - [`workload`]: order-intake routine (primary + secondary index)
//! - [`config`], [`error`], [`debugging`]: options, error taxonomy,
//!   observability

pub mod config;
pub mod debugging;
pub mod engine;
pub mod error;
pub mod memory;
pub mod storage;
pub mod thread;
pub mod workload;
pub mod xct;

pub use config::{EngineOptions, MemoryOptions, ThreadOptions};
pub use engine::Engine;
pub use error::{EngineError, ErrorBatch};
pub use thread::{ImpersonateSession, ImpersonateTask, ThreadContext, ThreadPool};
pub use xct::{retry_on_race_abort, Epoch, IsolationLevel, XctManager};
