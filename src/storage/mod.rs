//! Storage set — the ordered collection of sorted runs backing a data
//! directory.
//!
//! There is no manifest: **the directory listing is the source of
//! truth**. A load enumerates `run_<gen>.data` files, orders them by
//! generation, and opens each read-only. Temp files (`.tmp`) left by an
//! interrupted writer are invisible to the loader and swept by the
//! engine at open time.
//!
//! A storage set is immutable once published. Flush and compaction
//! build a *new* set (by reloading the directory) and swap it into the
//! engine state; the old set's run handles stay alive for as long as
//! any scan iterator still references them, because every iterator
//! holds an `Arc` to its run.

#[cfg(test)]
mod tests;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::engine::Entry;
use crate::run::writer::TMP_EXTENSION;
use crate::run::{RunError, RunIterator, SortedRun};

// ------------------------------------------------------------------------------------------------
// File naming
// ------------------------------------------------------------------------------------------------

const RUN_PREFIX: &str = "run_";
const RUN_SUFFIX: &str = ".data";

/// Path of the run file for `generation` inside `dir`.
///
/// Generations are zero-padded so a plain lexicographic directory
/// listing matches numeric order.
pub fn run_path(dir: &Path, generation: u64) -> PathBuf {
    dir.join(format!("{RUN_PREFIX}{generation:06}{RUN_SUFFIX}"))
}

/// Parses the generation out of a run file name, if it is one.
fn parse_generation(name: &str) -> Option<u64> {
    name.strip_prefix(RUN_PREFIX)?
        .strip_suffix(RUN_SUFFIX)?
        .parse()
        .ok()
}

/// Removes `.tmp` leftovers from an interrupted writer.
///
/// Only safe while no writer is active — the engine calls this once at
/// open, before the background worker exists.
pub fn remove_orphan_temp_files(dir: &Path) -> Result<(), StorageError> {
    for dir_entry in fs::read_dir(dir)? {
        let path = dir_entry?.path();
        if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(TMP_EXTENSION) {
            warn!(path = %path.display(), "removing orphan temp run file");
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by storage-set operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A run file failed to open or read.
    #[error("run error: {0}")]
    Run(#[from] RunError),
}

// ------------------------------------------------------------------------------------------------
// StorageSet
// ------------------------------------------------------------------------------------------------

/// An immutable, ordered set of sorted runs, newest first.
pub struct StorageSet {
    /// Open runs, sorted by generation descending (newest first).
    runs: Vec<Arc<SortedRun>>,

    /// Directory the set was loaded from.
    dir: PathBuf,
}

impl StorageSet {
    /// Loads the storage set from a data directory.
    ///
    /// Enumerates `run_<gen>.data` files, sorts them by generation, and
    /// opens each one. Corruption in any run fails the whole load — a
    /// damaged directory must not silently serve partial data.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();

        let mut generations: Vec<u64> = Vec::new();
        for dir_entry in fs::read_dir(&dir)? {
            let path = dir_entry?.path();
            if !path.is_file() {
                continue;
            }
            if let Some(generation) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(parse_generation)
            {
                generations.push(generation);
            }
        }
        // Newest first: higher generation wins on key conflicts.
        generations.sort_unstable_by(|a, b| b.cmp(a));

        let mut runs = Vec::with_capacity(generations.len());
        for generation in generations {
            let run = SortedRun::open(run_path(&dir, generation), generation)?;
            runs.push(Arc::new(run));
        }

        info!(
            dir = %dir.display(),
            runs = runs.len(),
            "storage set loaded"
        );

        Ok(Self { runs, dir })
    }

    /// Creates an empty set bound to `dir` without touching the disk.
    pub fn empty(dir: impl AsRef<Path>) -> Self {
        Self {
            runs: Vec::new(),
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Probes runs newest-first and returns the first hit — tombstones
    /// included, so a deletion in a newer run masks older values.
    pub fn get(&self, key: &[u8]) -> Result<Option<Entry>, StorageError> {
        for run in &self.runs {
            if let Some(entry) = run.lookup(key)? {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// Returns one scan iterator per run, newest first.
    ///
    /// The ordering matters: callers feed these into a merge iterator
    /// where lower source index means higher priority.
    pub fn iterate(
        &self,
        from: &[u8],
        to: Option<&[u8]>,
    ) -> Result<Vec<RunIterator>, StorageError> {
        self.runs
            .iter()
            .map(|run| run.scan(from, to).map_err(StorageError::from))
            .collect()
    }

    /// Returns `true` iff the set holds at most one run.
    pub fn is_compacted(&self) -> bool {
        self.runs.len() <= 1
    }

    /// Number of runs in the set.
    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    /// Generations of all runs, newest first.
    pub fn generations(&self) -> Vec<u64> {
        self.runs.iter().map(|run| run.generation()).collect()
    }

    /// The generation the next flush or compaction should use.
    pub fn next_generation(&self) -> u64 {
        self.runs
            .first()
            .map(|newest| newest.generation() + 1)
            .unwrap_or(1)
    }

    /// Total on-disk size of all runs in bytes.
    pub fn total_size(&self) -> u64 {
        self.runs.iter().map(|run| run.file_size()).sum()
    }

    /// Directory this set was loaded from.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Releases the run handles if this is the last holder of the set.
    ///
    /// Returns `true` when the handles were released now; `false` when
    /// other holders (typically live scan iterators via their per-run
    /// `Arc`s, or a concurrently published engine state) keep them open.
    /// In the latter case release happens automatically when the last
    /// holder drops.
    pub fn maybe_close(self: Arc<Self>) -> bool {
        match Arc::try_unwrap(self) {
            Ok(set) => {
                debug!(dir = %set.dir.display(), runs = set.runs.len(), "storage set closed");
                drop(set);
                true
            }
            Err(still_shared) => {
                debug!(
                    dir = %still_shared.dir.display(),
                    "storage set still referenced; deferring close"
                );
                false
            }
        }
    }
}
