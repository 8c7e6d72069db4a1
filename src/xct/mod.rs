//! # Serializable Transactions
//!
//! Optimistic concurrency control with commit-time validation and a
//! distinguished, retriable race-abort.
//!
//! ## Lifecycle
//!
//! ```text
//! begin_xct ──▶ get_record / overwrite_record / insert_record ──▶ precommit_xct
//!                    │                                               │
//!                    │ (tracked reads, buffered writes)              ├─ ok: commit epoch
//!                    ▼                                               └─ race: RaceAbort,
//!               abort_xct (discard)                                     caller retries
//! ```
//!
//! A worker has at most one transaction at a time; the record lives in
//! its [`ThreadContext`](crate::thread::ThreadContext) and never crosses
//! threads. Storage operations register reads and writes here; the
//! manager validates and publishes at precommit. The retry driver wraps
//! task bodies and is the single consumer of race-aborts.

mod epoch;
mod manager;
mod retry;
#[allow(clippy::module_inception)]
mod xct;

pub use epoch::Epoch;
pub use manager::XctManager;
pub use retry::retry_on_race_abort;
pub use xct::{IsolationLevel, Xct};

pub(crate) use xct::{word_is_absent, word_is_locked, RecordPtr, WORD_ABSENT};
