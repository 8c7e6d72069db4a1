//! # Storage Collaborators
//!
//! The transaction core treats storages as collaborators reached through
//! a handful of named operations: `get_record`, `overwrite_record`,
//! `insert_record`. Two concrete storages realize them:
//!
//! - [`ArrayStorage`]: a fixed-size-record array over page-pool pages,
//!   addressed by record index. Backs reference tables and the
//!   conflict-test workloads.
//! - [`KeyedStorage`]: u64-keyed records in slots carved from the
//!   calling worker's core memory. Backs primary tables and secondary
//!   indexes (key → reference payload).
//!
//! Both describe records the same way: a 64-bit version word (lock /
//! absent / epoch, see `crate::xct`) followed by the payload. All
//! operations must run inside an active transaction on the calling
//! worker; reads are tracked in its read set and writes buffered in its
//! write set, so the transaction manager alone decides what becomes
//! visible and when.
//!
//! There are no scans and no deletes; those are outside the engine's
//! surface.

mod array;
mod keyed;

use std::sync::atomic::{fence, AtomicU64, Ordering};
use std::sync::Arc;

use eyre::{bail, ensure, Result};
use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::error::EngineError;
use crate::memory::{EngineMemory, PagePoolOffset, PageReleaseBatch};
use crate::thread::ThreadGroupId;
use crate::xct::word_is_locked;

pub use array::ArrayStorage;
pub use keyed::KeyedStorage;

/// Size in bytes of the version word fronting every record.
pub(crate) const RECORD_HEADER_BYTES: usize = 8;

/// Address of a page in some node's pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VolatilePagePointer {
    pub numa_node: ThreadGroupId,
    pub offset: PagePoolOffset,
}

/// One consistent (version-verified) copy of a record's payload.
///
/// Spins past a held lock, copies the payload, and re-checks the version
/// word; returns the observed word once a copy was not torn by a
/// concurrent commit.
pub(crate) fn read_record_consistent(word: &AtomicU64, payload: *const u8, out: &mut [u8]) -> u64 {
    loop {
        let before = word.load(Ordering::Acquire);
        if word_is_locked(before) {
            std::hint::spin_loop();
            continue;
        }
        // SAFETY: payload points at `out.len()` bytes inside the record
        // slot; a racing commit is detected by the version re-check.
        unsafe {
            std::ptr::copy_nonoverlapping(payload, out.as_mut_ptr(), out.len());
        }
        fence(Ordering::Acquire);
        let after = word.load(Ordering::Acquire);
        if before == after {
            return before;
        }
    }
}

/// Engine-wide storage catalog.
///
/// Creation and lookup may happen from any worker; the maps are behind
/// an RwLock and the storages themselves are shared immutable state.
pub struct StorageManager {
    memory: Arc<EngineMemory>,
    arrays: RwLock<HashMap<String, Arc<ArrayStorage>>>,
    keyed: RwLock<HashMap<String, Arc<KeyedStorage>>>,
}

impl StorageManager {
    pub(crate) fn new(memory: Arc<EngineMemory>) -> Self {
        Self {
            memory,
            arrays: RwLock::new(HashMap::new()),
            keyed: RwLock::new(HashMap::new()),
        }
    }

    fn ensure_name_free(&self, name: &str) -> Result<()> {
        ensure!(
            !self.arrays.read().contains_key(name) && !self.keyed.read().contains_key(name),
            "storage {name:?} already exists"
        );
        Ok(())
    }

    /// Creates an array storage of `array_size` records of
    /// `payload_size` bytes, on pages grabbed round-robin across nodes.
    pub fn create_array(
        &self,
        name: &str,
        payload_size: usize,
        array_size: u64,
    ) -> Result<Arc<ArrayStorage>> {
        self.ensure_name_free(name)?;
        let storage = Arc::new(ArrayStorage::create(
            &self.memory,
            name,
            payload_size,
            array_size,
        )?);
        self.arrays
            .write()
            .insert(name.to_owned(), storage.clone());
        tracing::info!(name, payload_size, array_size, "array storage created");
        Ok(storage)
    }

    /// Creates a keyed storage of `payload_size`-byte records.
    pub fn create_keyed(&self, name: &str, payload_size: usize) -> Result<Arc<KeyedStorage>> {
        self.ensure_name_free(name)?;
        let storage = Arc::new(KeyedStorage::create(name, payload_size));
        self.keyed.write().insert(name.to_owned(), storage.clone());
        tracing::info!(name, payload_size, "keyed storage created");
        Ok(storage)
    }

    pub fn get_array(&self, name: &str) -> Result<Arc<ArrayStorage>> {
        match self.arrays.read().get(name) {
            Some(storage) => Ok(storage.clone()),
            None => bail!(EngineError::StorageNotFound {
                name: name.to_owned()
            }),
        }
    }

    pub fn get_keyed(&self, name: &str) -> Result<Arc<KeyedStorage>> {
        match self.keyed.read().get(name) {
            Some(storage) => Ok(storage.clone()),
            None => bail!(EngineError::StorageNotFound {
                name: name.to_owned()
            }),
        }
    }

    /// Returns array pages to their node pools and drops the catalog.
    /// Runs at engine shutdown, after all workers have joined; any
    /// storage handle still held outside must not be used past this.
    pub(crate) fn uninitialize(&self) -> Result<()> {
        let mut release = PageReleaseBatch::new(&self.memory);
        for storage in self.arrays.read().values() {
            for &page in storage.pages() {
                release.release(page);
            }
        }
        release.release_all();
        self.arrays.write().clear();
        self.keyed.write().clear();
        Ok(())
    }
}
