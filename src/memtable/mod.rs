//! # Memtable Module
//!
//! ## Design Invariants
//!
//! - The memtable holds at most one entry per key; a later `put`
//!   replaces the earlier one in place.
//! - Deletes are represented via tombstone entries, not physical
//!   removal, so a flushed run can mask older on-disk versions.
//! - `accounted_size` tracks the on-disk serialized size of each
//!   resident key's latest entry; a replacement subtracts the old
//!   contribution and adds the new one.
//! - `oversized` is a one-shot latch: it flips `false → true` exactly
//!   once per memtable lifetime, and exactly one caller observes the
//!   transition.
//!
//! ## Concurrency
//!
//! - Reads are wait-free relative to writes (concurrent skip list).
//! - Writes are linearizable per key.
//! - Size accounting and both latches are atomics; no lock is taken
//!   anywhere in this module.
//!
//! ## Sealed Memtable
//!
//! - `seal()` makes a memtable read-only; subsequent `put` calls fail.
//! - [`Memtable::sealed`] constructs the read-only **empty sentinel**
//!   that the engine keeps in the flushing slot while no flush is in
//!   flight.

#[cfg(test)]
mod tests;

use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crossbeam_skiplist::SkipMap;
use thiserror::Error;
use tracing::trace;

use crate::encoding;
use crate::engine::Entry;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by [`Memtable`] operations.
#[derive(Debug, Error)]
pub enum MemtableError {
    /// Mutation attempted on a sealed (read-only) memtable.
    #[error("memtable is read-only")]
    ReadOnly,

    /// Empty keys are reserved for the open scan lower bound and cannot
    /// be stored.
    #[error("empty key")]
    EmptyKey,
}

// ------------------------------------------------------------------------------------------------
// Memtable
// ------------------------------------------------------------------------------------------------

/// The mutable, in-memory write buffer of the storage engine.
///
/// Backed by a lock-free concurrent skip list so that readers never wait
/// on writers and writers never wait on each other. Size accounting and
/// the overflow latch are plain atomics.
pub struct Memtable {
    /// Key → value-or-tombstone. One entry per key; newest wins in place.
    map: SkipMap<Vec<u8>, Option<Vec<u8>>>,

    /// Running sum of the on-disk serialized size of resident entries.
    accounted_size: AtomicUsize,

    /// One-shot overflow latch; flipped by CAS so exactly one caller
    /// observes the transition and schedules the flush.
    oversized: AtomicBool,

    /// Read-only latch; set when the memtable is frozen for flushing.
    sealed: AtomicBool,

    /// Size above which `accounted_size` trips the `oversized` latch.
    flush_threshold: usize,
}

impl Memtable {
    /// Creates an empty, writable memtable with the given flush threshold.
    pub fn new(flush_threshold: usize) -> Self {
        Self {
            map: SkipMap::new(),
            accounted_size: AtomicUsize::new(0),
            oversized: AtomicBool::new(false),
            sealed: AtomicBool::new(false),
            flush_threshold,
        }
    }

    /// Creates the read-only empty sentinel.
    ///
    /// The sentinel rejects every mutation, reports empty on every read,
    /// and its latch never fires.
    pub fn sealed() -> Self {
        Self {
            map: SkipMap::new(),
            accounted_size: AtomicUsize::new(0),
            oversized: AtomicBool::new(true),
            sealed: AtomicBool::new(true),
            flush_threshold: 0,
        }
    }

    /// Inserts or replaces an entry.
    ///
    /// Returns `Ok(true)` iff **this** call transitioned the oversized
    /// latch — the caller is then responsible for scheduling a flush.
    pub fn put(&self, entry: Entry) -> Result<bool, MemtableError> {
        if self.sealed.load(Ordering::Acquire) {
            return Err(MemtableError::ReadOnly);
        }
        if entry.key.is_empty() {
            return Err(MemtableError::EmptyKey);
        }

        let Entry { key, value } = entry;
        let added = encoding::record_encoded_len(key.len(), value.as_ref().map(Vec::len));
        let replaced = self
            .map
            .get(&key)
            .map(|old| encoding::record_encoded_len(key.len(), old.value().as_ref().map(Vec::len)));

        trace!(key = %HexKey(&key), tombstone = value.is_none(), "memtable put");
        self.map.insert(key, value);

        self.accounted_size.fetch_add(added, Ordering::Relaxed);
        if let Some(replaced) = replaced {
            self.accounted_size.fetch_sub(replaced, Ordering::Relaxed);
        }

        if self.accounted_size.load(Ordering::Relaxed) > self.flush_threshold {
            return Ok(self.overflow());
        }
        Ok(false)
    }

    /// Trips the oversized latch without inserting anything.
    ///
    /// Returns `true` iff this call performed the `false → true`
    /// transition. Used to force a flush on demand.
    pub fn overflow(&self) -> bool {
        self.oversized
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Returns the entry stored for `key`, tombstones included.
    pub fn get(&self, key: &[u8]) -> Option<Entry> {
        self.map.get(key).map(|found| Entry {
            key: found.key().clone(),
            value: found.value().clone(),
        })
    }

    /// Collects all entries with `from ≤ key < to` in ascending key order.
    ///
    /// `to = None` means unbounded. The returned vector is a snapshot:
    /// writes that land after the call are not reflected.
    pub fn scan(&self, from: &[u8], to: Option<&[u8]>) -> Vec<Entry> {
        if let Some(to) = to {
            if from >= to {
                return Vec::new();
            }
        }
        let upper = match to {
            Some(to) => Bound::Excluded(to),
            None => Bound::Unbounded,
        };
        self.map
            .range::<[u8], _>((Bound::Included(from), upper))
            .map(|found| Entry {
                key: found.key().clone(),
                value: found.value().clone(),
            })
            .collect()
    }

    /// Collects every entry in ascending key order, tombstones included.
    ///
    /// This is the flush input: the stream a run writer consumes.
    pub fn values(&self) -> Vec<Entry> {
        self.map
            .iter()
            .map(|found| Entry {
                key: found.key().clone(),
                value: found.value().clone(),
            })
            .collect()
    }

    /// Makes this memtable read-only. Called when it is frozen into the
    /// flushing slot; never unset.
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
    }

    /// Returns `true` if the memtable holds no entries.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns `true` if mutations are rejected.
    pub fn is_read_only(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Returns the current accounted on-disk size of resident entries.
    pub fn accounted_size(&self) -> usize {
        self.accounted_size.load(Ordering::Relaxed)
    }
}

// ------------------------------------------------------------------------------------------------
// Tracing Helper
// ------------------------------------------------------------------------------------------------

pub(crate) struct HexKey<'a>(pub(crate) &'a [u8]);

impl std::fmt::Display for HexKey<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.len() <= 32 {
            for byte in self.0 {
                write!(f, "{byte:02x}")?;
            }
        } else {
            for byte in &self.0[..16] {
                write!(f, "{byte:02x}")?;
            }
            write!(f, "...[{} bytes]", self.0.len())?;
        }
        Ok(())
    }
}
