//! # Keyed Storage
//!
//! Records addressed by a u64 key. A slot is carved from the *calling
//! worker's* core memory on first insert, so a record's bytes live on
//! the node of the worker that created it. The catalog from key to slot
//! address is a shared map; slots themselves follow the same
//! version-word protocol as every other record.
//!
//! ## Insert visibility
//!
//! `insert_record` allocates (or finds) the slot immediately but leaves
//! its version word ABSENT; the insert is just a tracked read of the
//! absent state plus a buffered write. Commit publishes the payload and
//! clears ABSENT in one release store. Two racing inserters of the same
//! key therefore both observe the absent word, and whichever commits
//! second fails read validation and race-aborts: first committer wins.
//!
//! An insert that loses the *allocation* race (another worker published
//! a slot for the key first) simply uses the published slot; its own
//! carve is abandoned inside the core page. Slots are never reclaimed
//! before shutdown, so a lost carve is bounded waste, not a leak the
//! pool can see.

use std::sync::atomic::{AtomicU64, Ordering};

use eyre::{bail, ensure, Result};
use hashbrown::HashMap;
use parking_lot::RwLock;
use zerocopy::{FromBytes, Immutable, IntoBytes};

use crate::error::EngineError;
use crate::thread::ThreadContext;
use crate::xct::{word_is_absent, word_is_locked, RecordPtr, WORD_ABSENT};

use super::{read_record_consistent, RECORD_HEADER_BYTES};

/// Address of a keyed record's slot (version word first).
#[derive(Debug, Clone, Copy)]
struct SlotAddress(*mut u8);

// SAFETY: a slot address is handed out by a core memory and stays valid
// and fixed until engine shutdown; concurrent access to the slot's bytes
// is coordinated by its version word.
unsafe impl Send for SlotAddress {}
unsafe impl Sync for SlotAddress {}

impl SlotAddress {
    fn word(&self) -> &AtomicU64 {
        // SAFETY: slots are 8-aligned and outlive all workers.
        unsafe { &*(self.0 as *const AtomicU64) }
    }

    fn payload(&self) -> *mut u8 {
        // SAFETY: the slot was allocated with room for word + payload.
        unsafe { self.0.add(RECORD_HEADER_BYTES) }
    }
}

pub struct KeyedStorage {
    name: String,
    payload_size: usize,
    slot_bytes: usize,
    index: RwLock<HashMap<u64, SlotAddress>>,
}

impl KeyedStorage {
    pub(crate) fn create(name: &str, payload_size: usize) -> Self {
        Self {
            name: name.to_owned(),
            payload_size,
            slot_bytes: RECORD_HEADER_BYTES + payload_size.div_ceil(8) * 8,
            index: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload_size(&self) -> usize {
        self.payload_size
    }

    /// Number of keys with a slot (committed or in-flight).
    pub fn key_count(&self) -> usize {
        self.index.read().len()
    }

    /// Finds the key's slot or carves one from the caller's core memory.
    fn lookup_or_allocate(&self, context: &ThreadContext, key: u64) -> Result<SlotAddress> {
        if let Some(slot) = self.index.read().get(&key) {
            return Ok(*slot);
        }
        let raw = context.core_memory().allocate_record_slot(self.slot_bytes)?;
        // Mark absent and zero the payload before the slot becomes
        // reachable through the map.
        // SAFETY: `raw` addresses `slot_bytes` fresh bytes, 8-aligned.
        unsafe {
            (*(raw as *const AtomicU64)).store(WORD_ABSENT, Ordering::Release);
            std::ptr::write_bytes(raw.add(RECORD_HEADER_BYTES), 0, self.slot_bytes - RECORD_HEADER_BYTES);
        }
        let mut index = self.index.write();
        Ok(*index.entry(key).or_insert(SlotAddress(raw)))
    }

    /// Registers an insert in the caller's transaction: a tracked read
    /// of the slot's absent state plus the buffered payload. Visible at
    /// commit; a racing insert of the same key race-aborts at its own
    /// commit.
    pub fn insert_record(&self, context: &mut ThreadContext, key: u64, payload: &[u8]) -> Result<()> {
        ensure!(
            context.is_running_xct(),
            "insert_record requires an active transaction"
        );
        ensure!(
            payload.len() == self.payload_size,
            "payload is {} bytes, record payload is {}",
            payload.len(),
            self.payload_size
        );
        let slot = self.lookup_or_allocate(context, key)?;
        let word = slot.word();

        let observed = loop {
            let current = word.load(Ordering::Acquire);
            if !word_is_locked(current) {
                break current;
            }
            std::hint::spin_loop();
        };
        if !word_is_absent(observed) {
            bail!(EngineError::KeyAlreadyExists { key });
        }

        let record = RecordPtr(word as *const AtomicU64);
        let xct = context.current_xct_mut();
        xct.add_read(record, observed);
        xct.add_write(record, slot.payload(), payload);
        Ok(())
    }

    /// Typed variant of [`insert_record`](Self::insert_record).
    pub fn insert_record_as<T: IntoBytes + Immutable>(
        &self,
        context: &mut ThreadContext,
        key: u64,
        record: &T,
    ) -> Result<()> {
        self.insert_record(context, key, record.as_bytes())
    }

    /// Reads the record's current logical value, tracking the read.
    /// Fails with `RecordNotFound` for unknown keys and uncommitted
    /// inserts of other transactions; sees the caller's own insert.
    pub fn get_record(&self, context: &mut ThreadContext, key: u64, out: &mut [u8]) -> Result<()> {
        ensure!(
            context.is_running_xct(),
            "get_record requires an active transaction"
        );
        ensure!(
            out.len() == self.payload_size,
            "payload buffer is {} bytes, record payload is {}",
            out.len(),
            self.payload_size
        );
        let slot = match self.index.read().get(&key) {
            Some(slot) => *slot,
            None => bail!(EngineError::RecordNotFound),
        };
        let record = RecordPtr(slot.word() as *const AtomicU64);

        if let Some(image) = context.current_xct().pending_image(record) {
            out.copy_from_slice(image);
            return Ok(());
        }

        let observed = read_record_consistent(slot.word(), slot.payload() as *const u8, out);
        context.current_xct_mut().add_read(record, observed);
        if word_is_absent(observed) {
            bail!(EngineError::RecordNotFound);
        }
        Ok(())
    }

    /// Typed variant of [`get_record`](Self::get_record).
    pub fn get_record_as<T: FromBytes + IntoBytes>(
        &self,
        context: &mut ThreadContext,
        key: u64,
    ) -> Result<T> {
        let mut value = T::new_zeroed();
        self.get_record(context, key, value.as_mut_bytes())?;
        Ok(value)
    }
}
