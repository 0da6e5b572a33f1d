//! Run writer — builds a complete sorted-run file from a sorted entry
//! stream.
//!
//! # Input requirements
//!
//! Entries must arrive in **strictly ascending key order** with no
//! duplicates: upstream merge iterators have already collapsed versions
//! newest-wins. A violation aborts the build with
//! [`RunError::Internal`].
//!
//! # Atomicity
//!
//! 1. Stream all records into `<path with .tmp extension>`, collecting
//!    the offset of each record.
//! 2. Append the offset index and the trailing record count.
//! 3. Flush and `sync_all` the file.
//! 4. Rename the temp file onto the final path.
//!
//! A crash at any point leaves either no file or an invisible `.tmp`
//! leftover — never a partial run under the final name. On any build
//! error the temp file is removed.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::{debug, warn};

use super::RunError;
use crate::encoding;
use crate::engine::Entry;

/// Extension used for in-flight run files. Files carrying it are
/// ignored by the storage loader.
pub const TMP_EXTENSION: &str = "tmp";

/// Builds a complete sorted-run file on disk.
///
/// # Example
///
/// ```rust,ignore
/// RunWriter::new(&path).build(entries.into_iter())?;
/// ```
pub struct RunWriter<P: AsRef<Path>> {
    path: P,
}

impl<P: AsRef<Path>> RunWriter<P> {
    /// Create a writer targeting the given output path.
    pub fn new(path: P) -> Self {
        Self { path }
    }

    /// Consume a sorted entry stream and write a complete run.
    ///
    /// An empty stream produces a valid run with zero records.
    pub fn build(self, entries: impl Iterator<Item = Entry>) -> Result<(), RunError> {
        let final_path = self.path.as_ref();
        let tmp_path = final_path.with_extension(TMP_EXTENSION);

        let result = write_run(&tmp_path, final_path, entries);
        if result.is_err() {
            if let Err(remove_err) = fs::remove_file(&tmp_path) {
                warn!(
                    path = %tmp_path.display(),
                    error = %remove_err,
                    "failed to remove temp run file after aborted build"
                );
            }
        }
        result
    }
}

fn write_run(
    tmp_path: &Path,
    final_path: &Path,
    entries: impl Iterator<Item = Entry>,
) -> Result<(), RunError> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(tmp_path)?;

    let mut writer = BufWriter::new(&mut file);
    let mut offsets: Vec<u64> = Vec::new();
    let mut position: u64 = 0;
    let mut prev_key: Option<Vec<u8>> = None;
    let mut record_buf = Vec::new();

    for entry in entries {
        if let Some(prev) = &prev_key {
            if prev.as_slice() >= entry.key.as_slice() {
                return Err(RunError::Internal(
                    "run writer input must be strictly ascending by key".into(),
                ));
            }
        }

        record_buf.clear();
        encoding::encode_record(&entry.key, entry.value.as_deref(), &mut record_buf);
        offsets.push(position);
        writer.write_all(&record_buf)?;
        position += record_buf.len() as u64;
        prev_key = Some(entry.key);
    }

    for offset in &offsets {
        writer.write_all(&offset.to_le_bytes())?;
    }
    writer.write_all(&(offsets.len() as u64).to_le_bytes())?;
    writer.flush()?;
    drop(writer);

    // The data must be durable before the rename publishes it.
    file.sync_all()?;
    drop(file);
    fs::rename(tmp_path, final_path)?;

    debug!(
        path = %final_path.display(),
        records = offsets.len(),
        "sorted run written"
    );

    Ok(())
}

/// Syncs the directory containing freshly renamed run files so the
/// rename itself is durable.
pub fn sync_dir(dir: &Path) -> Result<(), RunError> {
    File::open(dir)?.sync_all()?;
    Ok(())
}
