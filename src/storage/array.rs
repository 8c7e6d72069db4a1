//! # Array Storage
//!
//! A fixed-size-record array addressed by record index. Pages come from
//! the page pools (round-robin across nodes at creation) and every page
//! holds `PAGE_SIZE / record_pitch` slots:
//!
//! ```text
//! page
//! ┌─────────────┬─────────────┬──────
//! │ slot 0      │ slot 1      │ ...
//! │ ┌─────────┐ │             │
//! │ │ version │ │  8 bytes    │
//! │ ├─────────┤ │             │
//! │ │ payload │ │  payload_size, padded to 8
//! │ └─────────┘ │             │
//! └─────────────┴─────────────┴──────
//! ```
//!
//! Freshly created records carry version word 0: committed at epoch 0
//! with a zeroed payload, visible to every transaction. There is no
//! insert into an array; `overwrite_record` is the only mutation.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use eyre::{bail, ensure, Result};
use zerocopy::{FromBytes, Immutable, IntoBytes};

use crate::config::PAGE_SIZE;
use crate::error::EngineError;
use crate::memory::{EngineMemory, GlobalPageResolver, RoundRobinPageGrabBatch};
use crate::thread::ThreadContext;
use crate::xct::{word_is_absent, RecordPtr};

use super::{read_record_consistent, VolatilePagePointer, RECORD_HEADER_BYTES};

pub struct ArrayStorage {
    name: String,
    payload_size: usize,
    record_pitch: usize,
    array_size: u64,
    records_per_page: usize,
    pages: Vec<VolatilePagePointer>,
    resolver: GlobalPageResolver,
}

impl ArrayStorage {
    pub(crate) fn create(
        memory: &Arc<EngineMemory>,
        name: &str,
        payload_size: usize,
        array_size: u64,
    ) -> Result<Self> {
        ensure!(array_size > 0, "array storage needs at least one record");
        let record_pitch = RECORD_HEADER_BYTES + payload_size.div_ceil(8) * 8;
        ensure!(
            record_pitch <= PAGE_SIZE,
            "record of {payload_size} payload bytes does not fit a page"
        );
        let records_per_page = PAGE_SIZE / record_pitch;
        let page_count = (array_size as usize).div_ceil(records_per_page);

        let resolver = memory.global_resolver().clone();
        let mut grab = RoundRobinPageGrabBatch::new(memory);
        let mut pages = Vec::with_capacity(page_count);
        for _ in 0..page_count {
            let pointer = grab.grab()?;
            // SAFETY: the resolver addresses a full page we now own;
            // zeroing makes every slot "committed at epoch 0, payload 0".
            unsafe {
                std::ptr::write_bytes(resolver.resolve_pointer(pointer), 0, PAGE_SIZE);
            }
            pages.push(pointer);
        }

        Ok(Self {
            name: name.to_owned(),
            payload_size,
            record_pitch,
            array_size,
            records_per_page,
            pages,
            resolver,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload_size(&self) -> usize {
        self.payload_size
    }

    pub fn array_size(&self) -> u64 {
        self.array_size
    }

    pub(crate) fn pages(&self) -> &[VolatilePagePointer] {
        &self.pages
    }

    /// Version word and payload address of a record slot.
    fn record_location(&self, index: u64) -> Result<(&AtomicU64, *mut u8)> {
        ensure!(
            index < self.array_size,
            "record index {index} out of range for array {:?} of size {}",
            self.name,
            self.array_size
        );
        let page = self.pages[(index as usize) / self.records_per_page];
        let slot_in_page = (index as usize) % self.records_per_page;
        let page_base = self.resolver.resolve_pointer(page);
        // SAFETY: slot_in_page < records_per_page keeps the slot inside
        // the page; pages are 8-aligned so the word cast is aligned.
        unsafe {
            let slot = page_base.add(slot_in_page * self.record_pitch);
            let word = &*(slot as *const AtomicU64);
            Ok((word, slot.add(RECORD_HEADER_BYTES)))
        }
    }

    /// Reads the record's current logical value into `out` and tracks
    /// the read in the caller's transaction. Sees the caller's own
    /// buffered write, if any.
    pub fn get_record(&self, context: &mut ThreadContext, index: u64, out: &mut [u8]) -> Result<()> {
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
        let (word, payload) = self.record_location(index)?;
        let record = RecordPtr(word as *const AtomicU64);

        if let Some(image) = context.current_xct().pending_image(record) {
            out.copy_from_slice(image);
            return Ok(());
        }

        let observed = read_record_consistent(word, payload as *const u8, out);
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
        index: u64,
    ) -> Result<T> {
        let mut value = T::new_zeroed();
        self.get_record(context, index, value.as_mut_bytes())?;
        Ok(value)
    }

    /// Buffers a full-record overwrite in the caller's transaction; the
    /// new value becomes visible at commit.
    pub fn overwrite_record(
        &self,
        context: &mut ThreadContext,
        index: u64,
        payload: &[u8],
    ) -> Result<()> {
        ensure!(
            context.is_running_xct(),
            "overwrite_record requires an active transaction"
        );
        ensure!(
            payload.len() == self.payload_size,
            "payload is {} bytes, record payload is {}",
            payload.len(),
            self.payload_size
        );
        let (word, payload_address) = self.record_location(index)?;
        context.current_xct_mut().add_write(
            RecordPtr(word as *const AtomicU64),
            payload_address,
            payload,
        );
        Ok(())
    }

    /// Typed variant of [`overwrite_record`](Self::overwrite_record).
    pub fn overwrite_record_as<T: IntoBytes + Immutable>(
        &self,
        context: &mut ThreadContext,
        index: u64,
        record: &T,
    ) -> Result<()> {
        self.overwrite_record(context, index, record.as_bytes())
    }
}
