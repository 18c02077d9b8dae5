//! File locking for document files.
//!
//! Two layers: an in-process table that serializes every access to one path
//! (so a write and its index update finish before the next reader of that
//! document starts), and advisory `flock`-style locks via `fs2` for other
//! processes sharing the workspace.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, PoisonError};

use fs2::FileExt;

use crate::error::{TreeError, TreeResult};

/// Per-path lock table shared by every store in the process.
#[derive(Debug, Default)]
pub struct FileLocks {
    held: Mutex<HashSet<PathBuf>>,
    released: Condvar,
}

impl FileLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until `path` is free, then hold it until the guard drops.
    pub fn acquire(&self, path: &Path) -> TreeResult<FileGuard<'_>> {
        let mut held = self
            .held
            .lock()
            .map_err(|e| TreeError::LockPoisoned(e.to_string()))?;
        while held.contains(path) {
            held = self
                .released
                .wait(held)
                .map_err(|e| TreeError::LockPoisoned(e.to_string()))?;
        }
        held.insert(path.to_path_buf());
        Ok(FileGuard {
            locks: self,
            path: path.to_path_buf(),
        })
    }

    /// Number of paths currently held.
    pub fn held_count(&self) -> usize {
        self.held.lock().map(|h| h.len()).unwrap_or(0)
    }
}

/// Holds one path in a [`FileLocks`] table.
#[must_use = "the path is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct FileGuard<'a> {
    locks: &'a FileLocks,
    path: PathBuf,
}

impl FileGuard<'_> {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileGuard<'_> {
    fn drop(&mut self) {
        let mut held = self.locks.held.lock().unwrap_or_else(PoisonError::into_inner);
        held.remove(&self.path);
        drop(held);
        self.locks.released.notify_all();
    }
}

/// Read a whole file under a shared lock.
pub fn locked_read(path: &Path) -> std::io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    file.lock_shared()?;
    let mut buf = Vec::new();
    let result = file.read_to_end(&mut buf);
    let _ = file.unlock();
    result.map(|_| buf)
}

/// Replace a file's contents under an exclusive lock.
///
/// The file is opened without truncation and only cut to length once the
/// lock is held, so a concurrent reader never sees it empty mid-write.
pub fn locked_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let file = OpenOptions::new().write(true).create(true).truncate(false).open(path)?;
    file.lock_exclusive()?;
    let result = (|| {
        file.set_len(0)?;
        let mut writer = BufWriter::new(&file);
        writer.write_all(data)?;
        writer.flush()?;
        drop(writer);
        file.sync_data()
    })();
    let _ = file.unlock();
    result
}
