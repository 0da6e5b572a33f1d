//! Lazy scan iterator over a sorted run.
//!
//! Entries are decoded on demand, one record per `next()` call. The
//! iterator shares ownership of the run via `Arc`, so the memory map
//! outlives any storage-set swap that drops the run from the published
//! state.

use std::sync::Arc;

use tracing::error;

use super::SortedRun;
use crate::engine::Entry;

/// Iterator over a contiguous key range of one run.
///
/// Produced by [`SortedRun::scan`]: positioned at the first record whose
/// key is ≥ the scan's lower bound, and exhausted once a key reaches the
/// exclusive upper bound (or the run ends).
pub struct RunIterator {
    run: Arc<SortedRun>,
    next_index: usize,
    /// Exclusive upper bound; `None` scans to the end of the run.
    to: Option<Vec<u8>>,
}

impl RunIterator {
    pub(crate) fn new(run: Arc<SortedRun>, start: usize, to: Option<Vec<u8>>) -> Self {
        Self {
            run,
            next_index: start,
            to,
        }
    }
}

impl Iterator for RunIterator {
    type Item = Entry;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_index >= self.run.len() {
            return None;
        }

        // Record boundaries were validated when the run was opened, so a
        // decode failure here means the file changed underneath the map.
        // End the scan rather than yield garbage.
        let entry = match self.run.entry_at(self.next_index) {
            Ok(entry) => entry,
            Err(err) => {
                error!(
                    path = %self.run.path().display(),
                    index = self.next_index,
                    error = %err,
                    "run record unreadable mid-scan"
                );
                self.next_index = self.run.len();
                return None;
            }
        };

        if let Some(to) = &self.to {
            if entry.key.as_slice() >= to.as_slice() {
                self.next_index = self.run.len();
                return None;
            }
        }

        self.next_index += 1;
        Some(entry)
    }
}
