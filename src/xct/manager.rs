//! # Transaction Manager
//!
//! Drives the per-worker transaction state machine:
//!
//! ```text
//!  inactive ──begin_xct(Serializable)──▶ active
//!  active   ──precommit_xct (ok)──────▶ inactive   (commit epoch returned)
//!  active   ──precommit_xct (race)────▶ inactive   (RaceAbort; caller retries)
//!  active   ──abort_xct───────────────▶ inactive
//! ```
//!
//! ## Optimistic validation
//!
//! Reads run unlocked and are tracked; writes are buffered privately.
//! `precommit_xct` then:
//!
//! 1. locks every write-set record, in ascending address order (the
//!    total order makes concurrent committers deadlock-free);
//! 2. validates the read set: each observed version must be unchanged,
//!    and any lock seen must be our own;
//! 3. draws a commit epoch from the global counter, the serialization
//!    point;
//! 4. copies the buffered images into the records and publishes the new
//!    version words (epoch, flags cleared) with release ordering.
//!
//! A validation miss releases the locks untouched and fails with the
//! distinguished `RaceAbort`; the transaction is inactive afterwards
//! either way. Any interleaving that commits is thus equivalent to the
//! serial order of commit epochs.
//!
//! Read-only transactions skip the lock phase entirely and commit at the
//! current epoch after validating.

use std::sync::atomic::{fence, AtomicU64, Ordering};

use eyre::{bail, ensure, Result};

use crate::error::EngineError;
use crate::thread::ThreadContext;

use super::epoch::Epoch;
use super::xct::{word_is_locked, IsolationLevel, Xct, WORD_EPOCH_MASK, WORD_LOCK};

/// Engine-wide transaction manager. One per engine; all state per worker
/// lives in that worker's [`Xct`].
pub struct XctManager {
    current_epoch: AtomicU64,
}

impl XctManager {
    pub fn new() -> Self {
        Self {
            // Epoch 0 is the pre-history every freshly created record
            // carries; real commits start at 1.
            current_epoch: AtomicU64::new(1),
        }
    }

    /// The latest epoch any transaction could have committed at.
    pub fn current_epoch(&self) -> Epoch {
        Epoch::new(self.current_epoch.load(Ordering::SeqCst))
    }

    /// Transitions the worker's transaction to active. Nesting is
    /// forbidden.
    pub fn begin_xct(&self, context: &mut ThreadContext, isolation: IsolationLevel) -> Result<()> {
        ensure!(
            !context.current_xct().is_active(),
            "a transaction is already running on thread {}",
            context.thread_id()
        );
        context.current_xct_mut().activate(isolation);
        Ok(())
    }

    /// Validates and either publishes the writes at a fresh commit epoch
    /// or fails with `RaceAbort`. Inactive afterwards in both outcomes.
    pub fn precommit_xct(&self, context: &mut ThreadContext) -> Result<Epoch> {
        ensure!(
            context.current_xct().is_active(),
            "precommit without an active transaction on thread {}",
            context.thread_id()
        );
        let result = self.validate_and_apply(context.current_xct_mut());
        context.current_xct_mut().deactivate();
        result
    }

    /// Discards the in-flight transaction.
    pub fn abort_xct(&self, context: &mut ThreadContext) -> Result<()> {
        ensure!(
            context.current_xct().is_active(),
            "abort without an active transaction on thread {}",
            context.thread_id()
        );
        // Buffered images are simply dropped; an uncommitted insert's
        // slot keeps its ABSENT word and stays invisible.
        context.current_xct_mut().deactivate();
        Ok(())
    }

    fn validate_and_apply(&self, xct: &mut Xct) -> Result<Epoch> {
        // Read-only: validate without locking, commit at the current epoch.
        if xct.write_set_mut().is_empty() {
            let epoch = self.current_epoch.load(Ordering::SeqCst);
            return if Self::validate_reads(xct, &[]) {
                Ok(Epoch::new(epoch))
            } else {
                bail!(EngineError::RaceAbort)
            };
        }

        // Lock phase, ascending address order.
        xct.write_set_mut()
            .sort_unstable_by_key(|access| access.record.addr());
        let mut locked_words: smallvec::SmallVec<[usize; 16]> = smallvec::SmallVec::new();
        for access in xct.write_set_mut().iter() {
            lock_record(access.record.word());
            locked_words.push(access.record.addr());
        }
        fence(Ordering::SeqCst);

        if !Self::validate_reads(xct, &locked_words) {
            for access in xct.write_set_mut().iter() {
                unlock_record(access.record.word());
            }
            bail!(EngineError::RaceAbort);
        }

        // Serialization point.
        let epoch = self.current_epoch.fetch_add(1, Ordering::SeqCst);
        debug_assert!(epoch <= WORD_EPOCH_MASK, "commit epoch overflowed the version word");

        for access in xct.write_set_mut().iter() {
            // SAFETY: the payload address was derived from the record
            // slot when the write was buffered, the image length matches
            // the storage's payload size, and the lock bit excludes
            // every other writer while readers verify the version word
            // around their copy.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    access.image.as_ptr(),
                    access.payload,
                    access.image.len(),
                );
            }
            // Publishes the payload: clears LOCK and ABSENT in one store.
            access.record.word().store(epoch, Ordering::Release);
        }
        Ok(Epoch::new(epoch))
    }

    /// True iff every tracked read still holds: version unchanged and no
    /// foreign lock. `own_locks` holds the (sorted) addresses this
    /// transaction locked itself.
    fn validate_reads(xct: &Xct, own_locks: &[usize]) -> bool {
        for read in xct.read_set() {
            let current = read.record.word().load(Ordering::Acquire);
            let own = own_locks.binary_search(&read.record.addr()).is_ok();
            if word_is_locked(current) && !own {
                return false;
            }
            if current & !WORD_LOCK != read.observed & !WORD_LOCK {
                return false;
            }
        }
        true
    }
}

impl Default for XctManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Spins until this thread holds the record's lock bit.
fn lock_record(word: &AtomicU64) {
    loop {
        let current = word.load(Ordering::Relaxed);
        if word_is_locked(current) {
            std::hint::spin_loop();
            continue;
        }
        if word
            .compare_exchange_weak(
                current,
                current | WORD_LOCK,
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .is_ok()
        {
            return;
        }
    }
}

fn unlock_record(word: &AtomicU64) {
    word.fetch_and(!WORD_LOCK, Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_unlock_preserves_the_rest_of_the_word() {
        let word = AtomicU64::new(17);
        lock_record(&word);
        assert!(word_is_locked(word.load(Ordering::Relaxed)));
        unlock_record(&word);
        assert_eq!(word.load(Ordering::Relaxed), 17);
    }

    #[test]
    fn epochs_are_strictly_increasing_across_draws() {
        let manager = XctManager::new();
        let first = manager.current_epoch();
        let drawn = manager.current_epoch.fetch_add(1, Ordering::SeqCst);
        assert!(drawn >= first.value());
        assert!(manager.current_epoch() > first);
    }
}
