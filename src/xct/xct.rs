//! # Per-Worker Transaction Record
//!
//! Each worker carries exactly one [`Xct`]: the read set and write set
//! of its in-flight transaction. Nesting is forbidden (`begin_xct`
//! fails on an active record) and only the owning worker ever touches
//! it, so the record needs no synchronization of its own.
//!
//! ## Version words
//!
//! Every record in every storage is fronted by one 64-bit version word:
//!
//! ```text
//! bit 63        bit 62        bits 61..0
//! ┌──────┐     ┌──────┐     ┌───────────────────────────┐
//! │ LOCK │     │ABSENT│     │ committing epoch           │
//! └──────┘     └──────┘     └───────────────────────────┘
//! ```
//!
//! - LOCK: held by a committing transaction while it validates and
//!   applies. Readers spin past it; validators treat a foreign lock as a
//!   conflict.
//! - ABSENT: an allocated slot whose insert has not committed yet.
//!   Invisible to readers.
//! - epoch: the commit epoch of the version currently in the record.
//!
//! The read set stores `(word address, observed word)`; the write set
//! stores `(word address, payload address, new image)`. Raw addresses
//! are sound here because record slots are address-stable for the
//! engine's lifetime (pool pages and core-memory slots never move or
//! free while workers run), and the record never leaves its thread.

use std::sync::atomic::AtomicU64;

use smallvec::SmallVec;

/// Version-word lock bit: a committer is validating/applying.
pub(crate) const WORD_LOCK: u64 = 1 << 63;
/// Version-word absent bit: slot exists, insert not yet committed.
pub(crate) const WORD_ABSENT: u64 = 1 << 62;
/// Low bits carry the committing epoch.
pub(crate) const WORD_EPOCH_MASK: u64 = WORD_ABSENT - 1;

pub(crate) fn word_is_locked(word: u64) -> bool {
    word & WORD_LOCK != 0
}

pub(crate) fn word_is_absent(word: u64) -> bool {
    word & WORD_ABSENT != 0
}

/// Isolation levels the manager accepts. Only serializable is specified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    #[default]
    Serializable,
}

/// Address of a record's version word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RecordPtr(pub(crate) *const AtomicU64);

impl RecordPtr {
    pub(crate) fn word(&self) -> &AtomicU64 {
        // SAFETY: record slots are address-stable for the engine's
        // lifetime; see the module docs.
        unsafe { &*self.0 }
    }

    pub(crate) fn addr(&self) -> usize {
        self.0 as usize
    }
}

/// One tracked read: the version observed by a consistent read.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReadAccess {
    pub(crate) record: RecordPtr,
    pub(crate) observed: u64,
}

/// One buffered write: the image to publish at commit.
#[derive(Debug)]
pub(crate) struct WriteAccess {
    pub(crate) record: RecordPtr,
    pub(crate) payload: *mut u8,
    pub(crate) image: SmallVec<[u8; 48]>,
}

/// The per-worker transaction record.
pub struct Xct {
    active: bool,
    isolation: IsolationLevel,
    read_set: SmallVec<[ReadAccess; 16]>,
    write_set: SmallVec<[WriteAccess; 16]>,
}

impl Xct {
    pub(crate) fn new() -> Self {
        Self {
            active: false,
            isolation: IsolationLevel::Serializable,
            read_set: SmallVec::new(),
            write_set: SmallVec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn read_set_size(&self) -> usize {
        self.read_set.len()
    }

    pub fn write_set_size(&self) -> usize {
        self.write_set.len()
    }

    pub(crate) fn activate(&mut self, isolation: IsolationLevel) {
        debug_assert!(!self.active, "activating an active transaction");
        self.active = true;
        self.isolation = isolation;
        self.read_set.clear();
        self.write_set.clear();
    }

    pub(crate) fn deactivate(&mut self) {
        debug_assert!(self.active, "deactivating an inactive transaction");
        self.active = false;
        self.read_set.clear();
        self.write_set.clear();
    }

    pub(crate) fn add_read(&mut self, record: RecordPtr, observed: u64) {
        self.read_set.push(ReadAccess { record, observed });
    }

    /// Buffers a write. A second write to the same record replaces the
    /// buffered image: the transaction's last write wins.
    pub(crate) fn add_write(&mut self, record: RecordPtr, payload: *mut u8, image: &[u8]) {
        if let Some(existing) = self
            .write_set
            .iter_mut()
            .find(|access| access.record == record)
        {
            existing.image.clear();
            existing.image.extend_from_slice(image);
            return;
        }
        self.write_set.push(WriteAccess {
            record,
            payload,
            image: SmallVec::from_slice(image),
        });
    }

    /// The image this transaction has buffered for a record, if any.
    /// Gives reads read-your-own-writes visibility.
    pub(crate) fn pending_image(&self, record: RecordPtr) -> Option<&[u8]> {
        self.write_set
            .iter()
            .find(|access| access.record == record)
            .map(|access| access.image.as_ref())
    }

    pub(crate) fn read_set(&self) -> &[ReadAccess] {
        &self.read_set
    }

    pub(crate) fn write_set_mut(&mut self) -> &mut SmallVec<[WriteAccess; 16]> {
        &mut self.write_set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    #[test]
    fn word_bit_helpers() {
        assert!(word_is_locked(WORD_LOCK | 5));
        assert!(!word_is_locked(5));
        assert!(word_is_absent(WORD_ABSENT));
        assert_eq!((WORD_LOCK | WORD_ABSENT | 42) & WORD_EPOCH_MASK, 42);
    }

    #[test]
    fn same_record_write_coalesces_to_last_image() {
        let word = AtomicU64::new(0);
        let mut payload = [0u8; 8];
        let record = RecordPtr(&word as *const AtomicU64);

        let mut xct = Xct::new();
        xct.activate(IsolationLevel::Serializable);
        xct.add_write(record, payload.as_mut_ptr(), &[1u8; 8]);
        xct.add_write(record, payload.as_mut_ptr(), &[2u8; 8]);

        assert_eq!(xct.write_set_size(), 1);
        assert_eq!(xct.pending_image(record).unwrap(), &[2u8; 8]);
    }

    #[test]
    fn deactivate_clears_the_sets() {
        let word = AtomicU64::new(0);
        let record = RecordPtr(&word as *const AtomicU64);

        let mut xct = Xct::new();
        xct.activate(IsolationLevel::Serializable);
        xct.add_read(record, 0);
        xct.deactivate();
        assert_eq!(xct.read_set_size(), 0);
        assert!(!xct.is_active());
    }
}
