//! # LSM Storage Engine
//!
//! This module implements the engine facade and its state machine: an
//! embedded, ordered key-value store coordinating concurrent writers, a
//! single in-flight flush, and the on-disk generation set.
//!
//! ## Design Overview
//!
//! The engine organises data across three layers, queried newest-first:
//!
//! 1. **Active memtable** — a lock-free concurrent sorted map receiving
//!    all writes.
//! 2. **Flushing memtable** — the previous active memtable, frozen and
//!    read-only while the background worker persists it. The slot holds
//!    a read-only empty sentinel when no flush is in flight.
//! 3. **Sorted runs** — immutable on-disk files, newest generation
//!    first.
//!
//! ## Concurrency Model
//!
//! The engine state is an immutable snapshot (`{active, flushing,
//! storage, closed}`) published as an `Arc` behind one reader–writer
//! lock. The lock is used **inversely to intuition, and deliberately
//! so**:
//!
//! - **Upserts acquire the read side.** Writes land in the lock-free
//!   memtable, so any number of them proceed in parallel; holding the
//!   shared lock for the duration of the insert guarantees each write
//!   sees one consistent state triple.
//! - **State transitions acquire the write side.** Freezing the
//!   memtable, installing a new storage set, and closing are rare,
//!   microsecond-scale snapshot replacements.
//!
//! Readers clone the `Arc` once per call and work off that snapshot;
//! scans therefore observe the stores as they were at construction.
//!
//! ## Flush Scheduling
//!
//! A single background worker thread consumes a job queue. The memtable
//! carries a one-shot overflow latch, so exactly one upsert observes
//! the size threshold crossing and schedules the flush. While that
//! flush is in flight a second overflow fails with
//! [`EngineError::TooManyFlushes`] (back-pressure); an explicit
//! [`Engine::flush`] instead awaits the in-flight flush and then runs
//! its own.
//!
//! ## Guarantees
//!
//! - A successful upsert is visible to every subsequent `get`.
//! - For any key the newest write wins: active memtable > flushing
//!   memtable > runs by descending generation.
//! - Background failures close storage and poison the engine; no
//!   operation ever observes a half-installed state.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, info};

use crate::memtable::{Memtable, MemtableError};
use crate::run::{RunError, RunWriter, writer};
use crate::storage::{self, StorageError, StorageSet};

pub mod utils;
pub(crate) mod worker;

pub use utils::{Entry, LiveFilter, MergeIterator};

use worker::{Job, Ticket};

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Error originating from the memtable subsystem.
    #[error("memtable error: {0}")]
    Memtable(#[from] MemtableError),

    /// Error originating from a sorted run.
    #[error("run error: {0}")]
    Run(#[from] RunError),

    /// Error originating from the storage set.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Rejected configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Overflow-triggered flush attempted while another flush is still
    /// in flight. Back-pressure: retry after the in-flight flush
    /// completes, or call [`Engine::flush`] to wait for it.
    #[error("too many flushes")]
    TooManyFlushes,

    /// Operation on a closed (or poisoned) engine.
    #[error("engine is closed")]
    Closed,

    /// A background flush or compaction failed; the engine has been
    /// closed and the original error is carried here.
    #[error("background task failed: {0}")]
    Background(String),

    /// Internal invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Default memtable size threshold that triggers a background flush.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 4 * 1024 * 1024;

/// Configuration for an [`Engine`] instance. Passed to [`Engine::open`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding the run files. Created if missing.
    pub data_dir: PathBuf,

    /// Accounted memtable size (bytes) above which the overflow latch
    /// trips and a background flush is scheduled.
    pub flush_threshold_bytes: usize,
}

impl EngineConfig {
    /// Configuration with the default flush threshold.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            flush_threshold_bytes: DEFAULT_FLUSH_THRESHOLD,
        }
    }

    fn validate(&self) -> Result<(), EngineError> {
        if self.flush_threshold_bytes == 0 {
            return Err(EngineError::InvalidConfig(
                "flush_threshold_bytes must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Statistics
// ------------------------------------------------------------------------------------------------

/// Snapshot of engine statistics returned by [`Engine::stats`].
#[derive(Debug)]
pub struct EngineStats {
    /// Number of sorted runs on disk.
    pub run_count: usize,

    /// Run generations, newest first.
    pub generations: Vec<u64>,

    /// Total on-disk size of all runs in bytes.
    pub total_run_bytes: u64,

    /// Accounted size of the active memtable in bytes.
    pub memtable_bytes: usize,

    /// Whether a flush is currently in flight.
    pub flush_in_progress: bool,
}

// ------------------------------------------------------------------------------------------------
// Engine state — immutable snapshot
// ------------------------------------------------------------------------------------------------

/// One immutable snapshot of the engine's stores.
///
/// Invariant: at most one flush is in progress — `flushing` is either
/// the read-only empty sentinel or a frozen, non-empty memtable. The
/// `closed` flag, once set, never clears.
pub(crate) struct EngineState {
    /// Memtable receiving writes.
    pub(crate) active: Arc<Memtable>,

    /// Frozen memtable being persisted, or the empty sentinel.
    pub(crate) flushing: Arc<Memtable>,

    /// Current on-disk generation set.
    pub(crate) storage: Arc<StorageSet>,

    /// Sticky shutdown/poison flag.
    pub(crate) closed: bool,
}

impl EngineState {
    /// `true` while a frozen memtable occupies the flushing slot.
    pub(crate) fn flush_in_progress(&self) -> bool {
        !self.flushing.is_empty()
    }
}

pub(crate) struct EngineInner {
    /// The published state snapshot. See the module docs for the
    /// inverse read/write discipline on this lock.
    pub(crate) state: RwLock<Arc<EngineState>>,

    /// Completion ticket of the in-flight flush, if any. Explicit
    /// `flush()` callers wait on it instead of failing.
    pub(crate) pending_flush: Mutex<Option<Arc<Ticket>>>,

    pub(crate) config: EngineConfig,
}

impl EngineInner {
    /// Clones the current state snapshot.
    pub(crate) fn snapshot(&self) -> Arc<EngineState> {
        Arc::clone(&self.state.read())
    }
}

// ------------------------------------------------------------------------------------------------
// Engine facade
// ------------------------------------------------------------------------------------------------

/// The main storage engine handle.
///
/// Thread-safe: share it across threads via `Arc`. Reads and writes
/// never block each other; `flush`, `compact`, and `close` block their
/// caller until the corresponding work is durable.
pub struct Engine {
    inner: Arc<EngineInner>,

    /// Sender side of the worker queue; `None` once `close` ran.
    job_tx: Mutex<Option<channel::Sender<Job>>>,

    /// Background worker handle; joined by `close`.
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    /// Opens (or creates) an engine rooted at `config.data_dir`.
    ///
    /// Sweeps temp files from interrupted writers, loads the run set
    /// from the directory listing, and starts the background worker.
    pub fn open(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;
        storage::remove_orphan_temp_files(&config.data_dir)?;

        let storage_set = StorageSet::load(&config.data_dir)?;
        info!(
            dir = %config.data_dir.display(),
            runs = storage_set.run_count(),
            flush_threshold = config.flush_threshold_bytes,
            "engine opened"
        );

        let state = EngineState {
            active: Arc::new(Memtable::new(config.flush_threshold_bytes)),
            flushing: Arc::new(Memtable::sealed()),
            storage: Arc::new(storage_set),
            closed: false,
        };

        let inner = Arc::new(EngineInner {
            state: RwLock::new(Arc::new(state)),
            pending_flush: Mutex::new(None),
            config,
        });

        let (job_tx, job_rx) = channel::unbounded();
        let handle = worker::spawn(Arc::clone(&inner), job_rx)?;

        Ok(Self {
            inner,
            job_tx: Mutex::new(Some(job_tx)),
            worker: Mutex::new(Some(handle)),
        })
    }

    // --------------------------------------------------------------------------------------------
    // Reads
    // --------------------------------------------------------------------------------------------

    /// Looks up a single key.
    ///
    /// Probes active memtable → flushing memtable → runs newest-first
    /// and resolves the first hit. Tombstones mask older versions:
    /// a deleted key returns `Ok(None)`, never the tombstone marker.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError> {
        let state = self.snapshot()?;

        if let Some(entry) = state.active.get(key) {
            return Ok(entry.value);
        }
        if let Some(entry) = state.flushing.get(key) {
            return Ok(entry.value);
        }
        match state.storage.get(key)? {
            Some(entry) => Ok(entry.value),
            None => Ok(None),
        }
    }

    /// Scans all live key-value pairs with `from ≤ key < to`.
    ///
    /// `to = None` scans to the end of the key space; the empty slice
    /// is the open lower bound. The iterator reflects the state
    /// snapshot taken here — writes issued after this call are
    /// invisible to it. Output is strictly ascending by key with
    /// tombstones suppressed.
    pub fn scan(&self, from: &[u8], to: Option<&[u8]>) -> Result<ScanIter, EngineError> {
        let state = self.snapshot()?;

        let mut sources: Vec<Box<dyn Iterator<Item = Entry>>> =
            Vec::with_capacity(2 + state.storage.run_count());
        sources.push(Box::new(state.active.scan(from, to).into_iter()));
        sources.push(Box::new(state.flushing.scan(from, to).into_iter()));
        for run_iter in state.storage.iterate(from, to)? {
            sources.push(Box::new(run_iter));
        }

        Ok(ScanIter {
            inner: LiveFilter::new(MergeIterator::new(sources)),
        })
    }

    /// Returns a snapshot of engine statistics.
    pub fn stats(&self) -> Result<EngineStats, EngineError> {
        let state = self.snapshot()?;
        Ok(EngineStats {
            run_count: state.storage.run_count(),
            generations: state.storage.generations(),
            total_run_bytes: state.storage.total_size(),
            memtable_bytes: state.active.accounted_size(),
            flush_in_progress: state.flush_in_progress(),
        })
    }

    // --------------------------------------------------------------------------------------------
    // Writes
    // --------------------------------------------------------------------------------------------

    /// Inserts an entry — a put or a tombstone.
    ///
    /// The insert happens under the shared side of the coordination
    /// lock, so upserts never wait on each other and never wait on
    /// flush progress. If this upsert tripped the memtable's overflow
    /// latch, it schedules the background flush before returning; when
    /// a previous flush is still in flight that scheduling fails with
    /// [`EngineError::TooManyFlushes`] and the write itself remains
    /// applied.
    pub fn upsert(&self, entry: Entry) -> Result<(), EngineError> {
        let should_flush = {
            let guard = self.inner.state.read();
            if guard.closed {
                return Err(EngineError::Closed);
            }
            guard.active.put(entry)?
        };

        if should_flush {
            self.freeze_and_submit()?;
        }
        Ok(())
    }

    /// Inserts or replaces a key-value pair.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), EngineError> {
        self.upsert(Entry::put(key, value))
    }

    /// Deletes a key by inserting a tombstone.
    pub fn delete(&self, key: &[u8]) -> Result<(), EngineError> {
        self.upsert(Entry::tombstone(key))
    }

    // --------------------------------------------------------------------------------------------
    // Flush / compaction / shutdown
    // --------------------------------------------------------------------------------------------

    /// Forces a flush of the active memtable, regardless of size.
    ///
    /// Synchronous: returns only once the memtable's contents are
    /// durable in a new run and installed in the storage set. If a
    /// flush is already in flight this call first waits for it, then
    /// flushes the current active memtable (no-op when it is empty).
    pub fn flush(&self) -> Result<(), EngineError> {
        loop {
            let pending = {
                let state = self.snapshot()?;
                if state.flush_in_progress() {
                    self.inner.pending_flush.lock().clone()
                } else if state.active.is_empty() {
                    return Ok(());
                } else {
                    None
                }
            };

            if let Some(ticket) = pending {
                ticket.wait().map_err(EngineError::Background)?;
                continue;
            }

            match self.freeze_and_submit() {
                Ok(ticket) => return ticket.wait().map_err(EngineError::Background),
                // Lost the freeze race to an overflowing writer; wait
                // for that flush on the next pass.
                Err(EngineError::TooManyFlushes) => {
                    std::thread::yield_now();
                    continue;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Collapses all sorted runs into at most one, newest-wins.
    ///
    /// Synchronous; runs on the background worker so it serializes with
    /// flushes. No-op when the storage set is already compacted and the
    /// active memtable is empty. The merge covers the storage set only
    /// — memtable contents are not included (flush first if you need
    /// them on disk). Because the result is the oldest and only run,
    /// tombstones are dropped from the output.
    pub fn compact(&self) -> Result<(), EngineError> {
        let state = self.snapshot()?;
        if state.storage.is_compacted() && state.active.is_empty() {
            debug!("storage already compacted and memtable empty; nothing to do");
            return Ok(());
        }

        let ticket = Ticket::new();
        {
            let tx_guard = self.job_tx.lock();
            let Some(job_tx) = tx_guard.as_ref() else {
                return Err(EngineError::Closed);
            };
            job_tx
                .send(Job::Compact {
                    ticket: Arc::clone(&ticket),
                })
                .map_err(|_| EngineError::Closed)?;
        }
        ticket.wait().map_err(EngineError::Background)
    }

    /// Gracefully shuts down the engine. Idempotent.
    ///
    /// Stops the worker queue, waits for in-flight background tasks to
    /// drain, then synchronously flushes whatever the flushing slot and
    /// the active memtable still hold, so a clean shutdown loses
    /// nothing. Subsequent operations fail with [`EngineError::Closed`].
    pub fn close(&self) -> Result<(), EngineError> {
        // Taking the sender disconnects the queue; the worker drains
        // what was already submitted and exits.
        drop(self.job_tx.lock().take());
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            handle
                .join()
                .map_err(|_| EngineError::Internal("background worker panicked".into()))?;
        }

        let mut guard = self.inner.state.write();
        if guard.closed {
            return Ok(());
        }

        let dir = &self.inner.config.data_dir;
        let mut next_generation = guard.storage.next_generation();

        // The flushing slot is normally empty here (the worker drained);
        // it is only populated if a freeze won the race against close,
        // in which case its contents still need to reach disk.
        if !guard.flushing.is_empty() {
            RunWriter::new(storage::run_path(dir, next_generation))
                .build(guard.flushing.values().into_iter())?;
            next_generation += 1;
        }
        if !guard.active.is_empty() {
            RunWriter::new(storage::run_path(dir, next_generation))
                .build(guard.active.values().into_iter())?;
        }
        writer::sync_dir(dir)?;

        let old_storage = Arc::clone(&guard.storage);
        *guard = Arc::new(EngineState {
            active: Arc::new(Memtable::sealed()),
            flushing: Arc::new(Memtable::sealed()),
            storage: Arc::new(StorageSet::empty(dir)),
            closed: true,
        });
        drop(guard);

        old_storage.maybe_close();
        info!(dir = %dir.display(), "engine closed");
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // State transitions
    // --------------------------------------------------------------------------------------------

    /// `idle → flushing`: freezes the active memtable into the flushing
    /// slot, installs a fresh active memtable, and submits the flush
    /// job.
    ///
    /// Fails with [`EngineError::TooManyFlushes`] when a flush is
    /// already in flight — freezing over a frozen memtable would lose
    /// it.
    fn freeze_and_submit(&self) -> Result<Arc<Ticket>, EngineError> {
        let mut guard = self.inner.state.write();
        if guard.closed {
            return Err(EngineError::Closed);
        }
        if guard.flush_in_progress() {
            return Err(EngineError::TooManyFlushes);
        }

        let tx_guard = self.job_tx.lock();
        let Some(job_tx) = tx_guard.as_ref() else {
            return Err(EngineError::Closed);
        };

        let ticket = Ticket::new();
        job_tx
            .send(Job::Flush {
                ticket: Arc::clone(&ticket),
            })
            .map_err(|_| EngineError::Closed)?;

        // The job is queued but the worker cannot observe the frozen
        // memtable until this write guard is released.
        let frozen = Arc::clone(&guard.active);
        frozen.seal();
        debug!(
            frozen_bytes = frozen.accounted_size(),
            "memtable frozen for flush"
        );

        *self.inner.pending_flush.lock() = Some(Arc::clone(&ticket));
        let storage = Arc::clone(&guard.storage);
        *guard = Arc::new(EngineState {
            active: Arc::new(Memtable::new(self.inner.config.flush_threshold_bytes)),
            flushing: frozen,
            storage,
            closed: false,
        });

        Ok(ticket)
    }

    fn snapshot(&self) -> Result<Arc<EngineState>, EngineError> {
        let state = self.inner.snapshot();
        if state.closed {
            return Err(EngineError::Closed);
        }
        Ok(state)
    }
}

// ------------------------------------------------------------------------------------------------
// ScanIter
// ------------------------------------------------------------------------------------------------

/// Iterator returned by [`Engine::scan`]: live `(key, value)` pairs in
/// strictly ascending key order, tombstones suppressed.
pub struct ScanIter {
    inner: LiveFilter<MergeIterator>,
}

impl Iterator for ScanIter {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = self.inner.next()?;
            if let Some(value) = entry.value {
                return Some((entry.key, value));
            }
        }
    }
}
