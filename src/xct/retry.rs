//! # Race-Abort Retry Driver
//!
//! The canonical shape of a transactional task body: run the transaction,
//! retry on the distinguished race-abort, surface everything else.
//!
//! ```text
//! loop:
//!   result = body(context)
//!   ok              -> return it
//!   race-abort      -> abort_xct if still active, try again
//!   any other error -> return it unchanged
//! ```
//!
//! This is the only place in the engine that discriminates errors by
//! kind, and race-aborts never escape it. There is no retry bound and no
//! backoff: the validator's address-ordered locking means some
//! transaction always commits, so each retry observes progress and the
//! loop terminates under bounded contention.

use eyre::Result;

use crate::error::EngineError;
use crate::thread::ThreadContext;

/// Runs `body` until it commits, retrying only on race-abort.
///
/// After a race-abort the driver checks whether a transaction is still
/// active and aborts it before retrying; precommit deactivates on its
/// own failures, but a body may race-abort between operations too.
pub fn retry_on_race_abort<T, F>(context: &mut ThreadContext, mut body: F) -> Result<T>
where
    F: FnMut(&mut ThreadContext) -> Result<T>,
{
    loop {
        let error = match body(context) {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };
        if !EngineError::is_race_abort(&error) {
            return Err(error);
        }
        if context.is_running_xct() {
            let manager = context.xct_manager();
            manager.abort_xct(context)?;
        }
        tracing::trace!(thread = context.thread_id(), "race abort; retrying transaction");
    }
}

#[cfg(test)]
mod tests {
    // The driver's discrimination logic is exercised end-to-end by the
    // conflict scenarios in tests/xct_commit_conflict.rs; the pure
    // error-kind probe it relies on is covered in crate::error.
}
