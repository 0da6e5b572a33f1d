//! Sorted run — the immutable, on-disk unit of the storage layer.
//!
//! A run is a single file produced by one flush or one compaction. It
//! holds entries in strictly ascending key order with no duplicate keys,
//! followed by a random-access index.
//!
//! # On-disk layout (little-endian)
//!
//! ```text
//! entries := record*
//! record  := u32 key_len | key_bytes | u8 tag | (u32 val_len | val_bytes)?
//! index   := u64 offset[N]      ── one offset per record, ascending
//! trailer := u64 N              ── record count, at end-of-file
//! ```
//!
//! `tag = 0` → tombstone (no value fields); `tag = 1` → present.
//!
//! # Guarantees
//!
//! - **Immutability** — once written, a run is never modified; readers
//!   share a single memory map with no locking.
//! - **Atomic publication** — [`RunWriter`](writer::RunWriter) streams
//!   into a temp file, syncs, and renames; a partial run is never
//!   visible under its final name.
//! - **Fail-fast corruption handling** — [`SortedRun::open`] walks the
//!   trailer, the index, and every record once; any short read,
//!   truncated record, out-of-range offset, or ordering violation fails
//!   the open with [`RunError::Corrupt`].
//!
//! Runs are totally ordered by their **generation** number: a higher
//! generation is newer and wins on key conflicts.

pub mod iterator;
pub mod writer;

#[cfg(test)]
mod tests;

pub use iterator::RunIterator;
pub use writer::RunWriter;

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;
use thiserror::Error;
use tracing::debug;

use crate::encoding::{self, EncodingError, OFFSET_SIZE};
use crate::engine::Entry;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by sorted-run operations (open, read, write).
#[derive(Debug, Error)]
pub enum RunError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Record decode failure.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Structural damage detected while loading or reading a run file.
    #[error("corrupt run file: {0}")]
    Corrupt(String),

    /// Internal invariant violation (e.g. unsorted writer input).
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// SortedRun — immutable reader
// ------------------------------------------------------------------------------------------------

/// A fully memory-mapped, immutable sorted run.
///
/// The entire file is mapped read-only; record access is
/// `decode(entries[index[i]])`. All structural invariants are verified
/// by [`SortedRun::open`], so iteration after a successful open cannot
/// run out of bounds.
pub struct SortedRun {
    /// Memory-mapped file contents.
    mmap: Mmap,

    /// Decoded record offsets, ascending. `index[i]` points at the
    /// `key_len` field of record `i`.
    index: Vec<u64>,

    /// Byte offset where the entries section ends and the index begins.
    entries_end: usize,

    /// Generation number parsed from the file name; higher is newer.
    generation: u64,

    /// Path the run was opened from.
    path: PathBuf,
}

impl SortedRun {
    /// Opens and fully validates a run file.
    ///
    /// Validation pipeline:
    ///
    /// 1. Map the file and read the trailing record count.
    /// 2. Check the index section fits between the entries and the
    ///    trailer.
    /// 3. Decode all offsets and verify each record starts exactly where
    ///    the previous one ended.
    /// 4. Decode every record header and verify keys are strictly
    ///    ascending and the last record ends exactly at the index.
    ///
    /// Any violation is a fatal [`RunError::Corrupt`].
    ///
    /// # Safety
    ///
    /// Uses `unsafe { Mmap::map(..) }`; this is sound because run files
    /// are never written after the rename that published them and the
    /// map is read-only.
    pub fn open(path: impl AsRef<Path>, generation: u64) -> Result<Self, RunError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        let file_len = mmap.len();
        if file_len < OFFSET_SIZE {
            return Err(RunError::Corrupt("file shorter than trailer".into()));
        }

        let record_count = encoding::read_u64(&mmap[file_len - OFFSET_SIZE..])?;
        let record_count = usize::try_from(record_count)
            .map_err(|_| RunError::Corrupt("record count exceeds addressable range".into()))?;

        let index_len = record_count
            .checked_mul(OFFSET_SIZE)
            .ok_or_else(|| RunError::Corrupt("index length overflow".into()))?;
        let body_len = file_len - OFFSET_SIZE;
        if index_len > body_len {
            return Err(RunError::Corrupt("index extends past start of file".into()));
        }
        let entries_end = body_len - index_len;

        let mut index = Vec::with_capacity(record_count);
        for i in 0..record_count {
            let at = entries_end + i * OFFSET_SIZE;
            index.push(encoding::read_u64(&mmap[at..])?);
        }

        // Walk every record once: offsets must chain without gaps and
        // keys must be strictly ascending.
        let mut cursor = 0usize;
        let mut prev_key: Option<&[u8]> = None;
        for &offset in &index {
            let offset = usize::try_from(offset)
                .map_err(|_| RunError::Corrupt("offset exceeds addressable range".into()))?;
            if offset != cursor {
                return Err(RunError::Corrupt(format!(
                    "index offset {offset} does not match record boundary {cursor}"
                )));
            }
            if offset >= entries_end {
                return Err(RunError::Corrupt("index offset beyond entries section".into()));
            }
            let record = encoding::decode_record(&mmap[offset..entries_end])?;
            if let Some(prev) = prev_key {
                if prev >= record.key {
                    return Err(RunError::Corrupt("record keys out of order".into()));
                }
            }
            prev_key = Some(record.key);
            cursor = offset + record.encoded_len;
        }
        if cursor != entries_end {
            return Err(RunError::Corrupt(
                "entries section does not end at the index".into(),
            ));
        }

        debug!(
            path = %path.display(),
            generation,
            records = record_count,
            bytes = file_len,
            "opened sorted run"
        );

        Ok(Self {
            mmap,
            index,
            entries_end,
            generation,
            path,
        })
    }

    /// Number of records in this run.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns `true` if the run holds no records.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Generation number of this run; higher is newer.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Path the run was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// On-disk size of the run in bytes.
    pub fn file_size(&self) -> u64 {
        self.mmap.len() as u64
    }

    /// Looks up a single key via binary search over the offset index.
    ///
    /// Returns the stored entry — tombstones included — or `None` when
    /// this run holds no record for the key.
    pub fn lookup(&self, key: &[u8]) -> Result<Option<Entry>, RunError> {
        let at = self.lower_bound(key)?;
        if at < self.len() && self.key_at(at)? == key {
            return Ok(Some(self.entry_at(at)?));
        }
        Ok(None)
    }

    /// Returns a lazy iterator over entries with `from ≤ key < to`.
    ///
    /// The iterator holds an `Arc` to this run, so the underlying file
    /// stays open for as long as any scan references it.
    pub fn scan(
        self: &Arc<Self>,
        from: &[u8],
        to: Option<&[u8]>,
    ) -> Result<RunIterator, RunError> {
        let start = self.lower_bound(from)?;
        Ok(RunIterator::new(
            Arc::clone(self),
            start,
            to.map(<[u8]>::to_vec),
        ))
    }

    /// Index of the first record whose key is ≥ `key`.
    fn lower_bound(&self, key: &[u8]) -> Result<usize, RunError> {
        let mut lo = 0usize;
        let mut hi = self.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.key_at(mid)? < key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    /// Borrowed key of record `i`.
    pub(crate) fn key_at(&self, i: usize) -> Result<&[u8], RunError> {
        Ok(self.record_at(i)?.key)
    }

    /// Decoded (owned) entry of record `i`.
    pub(crate) fn entry_at(&self, i: usize) -> Result<Entry, RunError> {
        let record = self.record_at(i)?;
        Ok(Entry {
            key: record.key.to_vec(),
            value: record.value.map(<[u8]>::to_vec),
        })
    }

    fn record_at(&self, i: usize) -> Result<encoding::RecordRef<'_>, RunError> {
        let offset = self.index[i] as usize;
        Ok(encoding::decode_record(&self.mmap[offset..self.entries_end])?)
    }
}

impl std::fmt::Debug for SortedRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SortedRun")
            .field("path", &self.path)
            .field("generation", &self.generation)
            .field("records", &self.len())
            .finish()
    }
}
