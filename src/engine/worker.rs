//! Background worker — the single thread executing flushes and
//! compactions.
//!
//! Jobs arrive over a channel and run strictly one at a time, so a
//! flush and a compaction can never interleave on disk. The queue is
//! disconnected by `Engine::close`; the worker drains whatever was
//! already submitted, then exits, and `close` joins it.
//!
//! Each job carries a [`Ticket`]: a one-shot completion cell that any
//! number of callers can wait on. A failed job poisons the engine —
//! the storage set is dropped, the `closed` flag goes up, and every
//! subsequent operation fails — before the error is handed to the
//! waiting callers.

use std::fs;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::Receiver;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info};

use super::{EngineError, EngineInner, EngineState};
use crate::engine::{Entry, LiveFilter, MergeIterator};
use crate::memtable::Memtable;
use crate::run::{RunWriter, writer};
use crate::storage::{self, StorageSet};

// ------------------------------------------------------------------------------------------------
// Ticket — one-shot completion cell
// ------------------------------------------------------------------------------------------------

/// Completion handle for a submitted background job.
///
/// The worker completes it exactly once; any number of threads may
/// `wait` on it, before or after completion.
pub(crate) struct Ticket {
    done: Mutex<Option<Result<(), String>>>,
    signal: Condvar,
}

impl Ticket {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            done: Mutex::new(None),
            signal: Condvar::new(),
        })
    }

    /// Publishes the job result and wakes every waiter.
    pub(crate) fn complete(&self, result: Result<(), String>) {
        let mut done = self.done.lock();
        *done = Some(result);
        self.signal.notify_all();
    }

    /// Blocks until the job completes and returns its result.
    pub(crate) fn wait(&self) -> Result<(), String> {
        let mut done = self.done.lock();
        loop {
            if let Some(result) = done.as_ref() {
                return result.clone();
            }
            self.signal.wait(&mut done);
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Jobs
// ------------------------------------------------------------------------------------------------

/// Work items consumed by the background thread.
pub(crate) enum Job {
    /// Persist the flushing memtable as a new sorted run.
    Flush { ticket: Arc<Ticket> },

    /// Merge all runs into at most one.
    Compact { ticket: Arc<Ticket> },
}

/// Spawns the background worker thread.
pub(crate) fn spawn(
    inner: Arc<EngineInner>,
    jobs: Receiver<Job>,
) -> Result<JoinHandle<()>, io::Error> {
    thread::Builder::new()
        .name("cinderkv-worker".into())
        .spawn(move || worker_loop(inner, jobs))
}

fn worker_loop(inner: Arc<EngineInner>, jobs: Receiver<Job>) {
    while let Ok(job) = jobs.recv() {
        match job {
            Job::Flush { ticket } => {
                let result = run_flush(&inner);
                if let Err(err) = &result {
                    error!(error = %err, "background flush failed; poisoning engine");
                    poison(&inner);
                }
                // Deregister before completing so an explicit flush()
                // that wakes up re-reads a settled state. A follow-up
                // flush may already have registered its own ticket;
                // only clear our own.
                {
                    let mut pending = inner.pending_flush.lock();
                    if pending
                        .as_ref()
                        .is_some_and(|current| Arc::ptr_eq(current, &ticket))
                    {
                        *pending = None;
                    }
                }
                ticket.complete(result.map_err(|e| e.to_string()));
            }
            Job::Compact { ticket } => {
                let result = run_compact(&inner);
                if let Err(err) = &result {
                    error!(error = %err, "background compaction failed; poisoning engine");
                    poison(&inner);
                }
                ticket.complete(result.map_err(|e| e.to_string()));
            }
        }
    }
    debug!("background worker drained and stopped");
}

// ------------------------------------------------------------------------------------------------
// Flush
// ------------------------------------------------------------------------------------------------

/// `flushing → idle`: writes the frozen memtable to a new run, reloads
/// the storage set from the directory, and installs it while emptying
/// the flushing slot.
fn run_flush(inner: &Arc<EngineInner>) -> Result<(), EngineError> {
    let state = inner.snapshot();
    if state.closed {
        return Err(EngineError::Closed);
    }
    let frozen = Arc::clone(&state.flushing);
    if frozen.is_empty() {
        return Ok(());
    }

    let dir = &inner.config.data_dir;
    let generation = state.storage.next_generation();
    let entries = frozen.values();
    info!(
        generation,
        entries = entries.len(),
        bytes = frozen.accounted_size(),
        "flushing memtable to sorted run"
    );

    RunWriter::new(storage::run_path(dir, generation)).build(entries.into_iter())?;
    writer::sync_dir(dir)?;
    let reloaded = StorageSet::load(dir)?;

    let mut guard = inner.state.write();
    let active = Arc::clone(&guard.active);
    let closed = guard.closed;
    *guard = Arc::new(EngineState {
        active,
        flushing: Arc::new(Memtable::sealed()),
        storage: Arc::new(reloaded),
        closed,
    });
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// Compaction
// ------------------------------------------------------------------------------------------------

/// Collapses the entire storage set into at most one run.
///
/// The merge walks every run newest-first through the k-way merge, so
/// each surviving key carries its most recent version. The output is
/// the oldest (and only) run afterwards, so tombstones have nothing
/// left to mask and are dropped. The active and flushing memtables are
/// untouched — they stay newer than the compacted run and keep winning
/// lookups.
fn run_compact(inner: &Arc<EngineInner>) -> Result<(), EngineError> {
    let state = inner.snapshot();
    if state.closed {
        return Err(EngineError::Closed);
    }
    let old_storage = Arc::clone(&state.storage);
    if old_storage.run_count() == 0 {
        return Ok(());
    }

    let dir = &inner.config.data_dir;
    let input_generations = old_storage.generations();
    let output_generation = old_storage.next_generation();

    let sources: Vec<Box<dyn Iterator<Item = Entry>>> = old_storage
        .iterate(&[], None)?
        .into_iter()
        .map(|run_iter| Box::new(run_iter) as Box<dyn Iterator<Item = Entry>>)
        .collect();
    let mut live = LiveFilter::new(MergeIterator::new(sources));

    if live.peek().is_some() {
        info!(
            inputs = input_generations.len(),
            output_generation, "compacting storage set"
        );
        RunWriter::new(storage::run_path(dir, output_generation)).build(live)?;
    } else {
        // All entries were tombstoned; the compacted set is empty.
        info!(
            inputs = input_generations.len(),
            "compaction produced no live entries"
        );
    }

    for generation in input_generations {
        fs::remove_file(storage::run_path(dir, generation))?;
    }
    writer::sync_dir(dir)?;
    let reloaded = StorageSet::load(dir)?;

    let mut guard = inner.state.write();
    let active = Arc::clone(&guard.active);
    let flushing = Arc::clone(&guard.flushing);
    let closed = guard.closed;
    *guard = Arc::new(EngineState {
        active,
        flushing,
        storage: Arc::new(reloaded),
        closed,
    });
    drop(guard);
    drop(state);

    // Deleted files stay readable through existing maps until the last
    // iterator drops its run handle.
    old_storage.maybe_close();
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// Failure handling
// ------------------------------------------------------------------------------------------------

/// Marks the engine unusable after a background failure: storage is
/// dropped and every subsequent operation fails with `Closed`.
fn poison(inner: &Arc<EngineInner>) {
    let mut guard = inner.state.write();
    let active = Arc::clone(&guard.active);
    *guard = Arc::new(EngineState {
        active,
        flushing: Arc::new(Memtable::sealed()),
        storage: Arc::new(StorageSet::empty(&inner.config.data_dir)),
        closed: true,
    });
}
