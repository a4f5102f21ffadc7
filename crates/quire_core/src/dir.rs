//! Journal directory management.
//!
//! The lock file ensures only one process writes journal files in a
//! directory at a time. See [`crate::journal::files`] for the layout.

use crate::error::{CoreError, CoreResult};
use crate::journal::files::{self, LOCK_FILE_NAME};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// An exclusively locked journal directory.
///
/// # Thread Safety
///
/// Only one `JournalDir` can exist per directory at a time, across
/// processes. The lock is released when the value is dropped.
#[derive(Debug)]
pub struct JournalDir {
    /// Directory path.
    path: PathBuf,
    /// Lock file handle (held for exclusive access).
    _lock_file: File,
}

impl JournalDir {
    /// Opens a journal directory, creating it if needed, and locks it.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The path exists but is not a directory
    /// - Another process holds the lock (returns `JournalLocked`)
    /// - I/O errors occur
    pub fn open(path: &Path) -> CoreResult<Self> {
        fs::create_dir_all(path)?;

        if !path.is_dir() {
            return Err(CoreError::invalid_argument(format!(
                "journal path is not a directory: {}",
                path.display()
            )));
        }

        let lock_path = path.join(LOCK_FILE_NAME);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::JournalLocked { path: lock_path });
        }

        debug!(path = %path.display(), "locked journal directory");
        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path of the lock file.
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.path.join(LOCK_FILE_NAME)
    }

    /// Makes file creations, renames and removals in the directory durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be synced.
    pub fn sync(&self) -> CoreResult<()> {
        files::sync_directory(&self.path)
    }
}
