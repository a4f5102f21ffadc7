//! Journal configuration.

use std::path::{Path, PathBuf};

/// One mebibyte.
const MIB: u64 = 1024 * 1024;

/// Configuration for opening a journal.
///
/// Values are read once, when the journal is opened.
#[derive(Debug, Clone)]
pub struct JournalConfig {
    /// Data directory of the database.
    pub data_dir: PathBuf,

    /// Directory for journal files. `None` means the data directory;
    /// relative paths are resolved against the data directory.
    pub journal_dir: Option<PathBuf>,

    /// Minimum size a journal file must reach before a checkpoint may
    /// replace it with a new file. `0` always permits rotation.
    pub min_size: u64,

    /// Size at which a flush rotates to a new journal file.
    pub max_size: u64,

    /// Whether to fsync the journal on every commit (safer but slower).
    pub sync_on_commit: bool,

    /// Size of the in-memory write buffer in bytes.
    pub buffer_size: usize,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            journal_dir: None,
            min_size: MIB,
            max_size: 100 * MIB,
            sync_on_commit: true,
            buffer_size: MIB as usize,
        }
    }
}

impl JournalConfig {
    /// Creates a configuration for the given data directory.
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Sets the journal directory.
    #[must_use]
    pub fn journal_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.journal_dir = Some(dir.into());
        self
    }

    /// Sets the minimum size before rotation is permitted.
    #[must_use]
    pub const fn min_size(mut self, size: u64) -> Self {
        self.min_size = size;
        self
    }

    /// Sets the size that forces rotation.
    #[must_use]
    pub const fn max_size(mut self, size: u64) -> Self {
        self.max_size = size;
        self
    }

    /// Sets whether to sync the journal on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the write buffer size.
    #[must_use]
    pub const fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Returns the directory journal files live in.
    #[must_use]
    pub fn resolved_journal_dir(&self) -> PathBuf {
        match &self.journal_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => self.data_dir.join(dir),
            None => self.data_dir.clone(),
        }
    }

    /// Returns the data directory.
    #[must_use]
    pub fn data_path(&self) -> &Path {
        &self.data_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = JournalConfig::default();
        assert!(config.sync_on_commit);
        assert_eq!(config.min_size, 1024 * 1024);
        assert_eq!(config.max_size, 100 * 1024 * 1024);
        assert!(config.journal_dir.is_none());
    }

    #[test]
    fn builder_pattern() {
        let config = JournalConfig::new("/var/db")
            .min_size(0)
            .max_size(4096)
            .sync_on_commit(false)
            .buffer_size(512);

        assert_eq!(config.min_size, 0);
        assert_eq!(config.max_size, 4096);
        assert!(!config.sync_on_commit);
        assert_eq!(config.buffer_size, 512);
    }

    #[test]
    fn journal_dir_defaults_to_data_dir() {
        let config = JournalConfig::new("/var/db");
        assert_eq!(config.resolved_journal_dir(), PathBuf::from("/var/db"));
    }

    #[test]
    fn relative_journal_dir_resolves_against_data_dir() {
        let config = JournalConfig::new("/var/db").journal_dir("journal");
        assert_eq!(config.resolved_journal_dir(), PathBuf::from("/var/db/journal"));
    }

    #[test]
    fn absolute_journal_dir_is_kept() {
        let config = JournalConfig::new("/var/db").journal_dir("/mnt/fast/journal");
        assert_eq!(
            config.resolved_journal_dir(),
            PathBuf::from("/mnt/fast/journal")
        );
    }
}
