//! # Engine Error Taxonomy
//!
//! Errors in this engine are values. They fall into four families:
//!
//! - **Startup-fatal**: the configuration or the machine makes the engine
//!   unusable (`DependentModuleUnavailableInit`, `NumaUnavailable`,
//!   `PagePoolTooSmall`, `OutOfMemory`). `Engine::initialize` surfaces these
//!   and the caller must not proceed.
//! - **Transactional race**: `RaceAbort`, the single retriable condition.
//!   It is produced only by commit-time validation and consumed only by the
//!   retry driver; it never escapes it.
//! - **Transactional fatal**: everything else raised inside a transaction
//!   body (missing storage, missing record, exhausted pools). Workers place
//!   these in the outbox unchanged and they surface from
//!   `ImpersonateSession::get_result`.
//! - **Shutdown-aggregate**: per-node teardown errors collected into an
//!   [`ErrorBatch`] and reported as one summary.
//!
//! ## Propagation
//!
//! Everything travels as `eyre::Report`. The typed [`EngineError`] rides
//! inside the report and is recovered with `downcast_ref` at the one place
//! that must discriminate by kind: the retry driver's race-abort check.
//! All other layers propagate reports unchanged.

use thiserror::Error;

/// Typed error codes surfaced at the engine boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A module this module depends on has not been initialized yet.
    #[error("dependent module is not initialized yet")]
    DependentModuleUnavailableInit,

    /// A module this module depends on was already uninitialized.
    #[error("dependent module was uninitialized before this module")]
    DependentModuleUnavailableUninit,

    /// The machine does not expose a NUMA topology.
    #[error("NUMA topology is unavailable on this machine")]
    NumaUnavailable,

    /// The configured page pools cannot cover the initial per-core grabs.
    #[error(
        "page pool too small: {configured} bytes configured across all nodes, \
         at least {required} required"
    )]
    PagePoolTooSmall { configured: u64, required: u64 },

    /// An allocation (page pool region, worker thread) failed.
    #[error("out of memory")]
    OutOfMemory,

    /// A node's page pool has no free pages left.
    #[error("NUMA node {node} has no free pages")]
    NoFreePages { node: u8 },

    /// `impersonate` found every worker busy.
    #[error("no idle worker to impersonate")]
    NoIdleWorker,

    /// Commit-time validation observed a conflicting concurrent commit.
    /// The caller must abort (if still active) and retry the transaction.
    #[error("serializable transaction aborted by a commit-time race")]
    RaceAbort,

    /// No storage is registered under the given name.
    #[error("no such storage: {name}")]
    StorageNotFound { name: String },

    /// The requested record does not exist (or is an uncommitted insert).
    #[error("record not found")]
    RecordNotFound,

    /// An insert hit a key that already holds a committed record.
    #[error("key {key} already exists")]
    KeyAlreadyExists { key: u64 },
}

impl EngineError {
    /// True iff the report carries the distinguished retriable race-abort.
    ///
    /// This is the only kind-discrimination the engine performs; see the
    /// retry driver.
    pub fn is_race_abort(report: &eyre::Report) -> bool {
        matches!(
            report.downcast_ref::<EngineError>(),
            Some(EngineError::RaceAbort)
        )
    }
}

/// Collects errors across a multi-part shutdown and reports them as one.
///
/// Node memories are uninitialized independently; a failure in one must not
/// prevent tearing down the rest. Every error is recorded here and the
/// aggregate is summarized once at the end.
#[derive(Default)]
pub struct ErrorBatch {
    errors: Vec<eyre::Report>,
}

impl ErrorBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: eyre::Report) {
        self.errors.push(error);
    }

    /// Records the error of a failed step; `Ok` is a no-op.
    pub fn push_result(&mut self, result: eyre::Result<()>) {
        if let Err(error) = result {
            self.errors.push(error);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Consumes the batch: `Ok(())` if nothing failed, otherwise a single
    /// report listing every collected error.
    pub fn summarize(self) -> eyre::Result<()> {
        if self.errors.is_empty() {
            return Ok(());
        }
        let mut message = format!("{} error(s) during shutdown:", self.errors.len());
        for (index, error) in self.errors.iter().enumerate() {
            message.push_str(&format!("\n  [{index}] {error:#}"));
        }
        Err(eyre::eyre!(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eyre::bail;

    fn race() -> eyre::Result<()> {
        bail!(EngineError::RaceAbort)
    }

    #[test]
    fn race_abort_is_discriminated_through_report() {
        let err = race().unwrap_err();
        assert!(EngineError::is_race_abort(&err));

        let other = eyre::eyre!("some other failure");
        assert!(!EngineError::is_race_abort(&other));

        let typed_but_not_race: eyre::Report = EngineError::OutOfMemory.into();
        assert!(!EngineError::is_race_abort(&typed_but_not_race));
    }

    #[test]
    fn error_batch_empty_summarizes_ok() {
        let batch = ErrorBatch::new();
        assert!(batch.is_empty());
        assert!(batch.summarize().is_ok());
    }

    #[test]
    fn error_batch_reports_every_error() {
        let mut batch = ErrorBatch::new();
        batch.push(eyre::eyre!("first"));
        batch.push_result(Err(eyre::eyre!("second")));
        batch.push_result(Ok(()));
        assert_eq!(batch.len(), 2);

        let summary = batch.summarize().unwrap_err();
        let text = format!("{summary}");
        assert!(text.contains("first"));
        assert!(text.contains("second"));
        assert!(text.contains("2 error(s)"));
    }
}
