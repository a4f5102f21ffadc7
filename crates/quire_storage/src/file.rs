//! File-based page store for persistent storage.

use crate::error::{StorageError, StorageResult};
use crate::store::{apply_write, PageNum, PageStore};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Magic bytes at the start of a page snapshot file.
const SNAPSHOT_MAGIC: [u8; 4] = *b"QPGS";

/// Current snapshot format version.
const SNAPSHOT_VERSION: u16 = 1;

/// magic (4) + version (2) + page count (8)
const SNAPSHOT_HEADER_LEN: usize = 14;

/// A page store persisted as a single snapshot file.
///
/// Mutations are applied in memory. `sync()` writes the whole snapshot to a
/// temporary file, syncs it, and renames it over the previous snapshot, so
/// the file on disk always holds the state of some completed `sync()`.
///
/// # Snapshot Format
///
/// ```text
/// | magic (4) | version (2) | count (8) | { page (8) | len (4) | bytes }* | crc32 (4) |
/// ```
///
/// # Example
///
/// ```no_run
/// use quire_storage::{FilePageStore, PageNum, PageStore};
/// use std::path::Path;
///
/// let mut store = FilePageStore::open(Path::new("pages.dat")).unwrap();
/// store.write_at(PageNum::new(1), 0, b"persistent").unwrap();
/// store.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FilePageStore {
    path: PathBuf,
    pages: RwLock<BTreeMap<PageNum, Vec<u8>>>,
}

impl FilePageStore {
    /// Opens the snapshot at `path`, or starts empty if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or fails
    /// validation.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let pages = if path.exists() {
            decode_snapshot(&fs::read(path)?)?
        } else {
            BTreeMap::new()
        };

        debug!(path = %path.display(), pages = pages.len(), "opened page store");

        Ok(Self {
            path: path.to_path_buf(),
            pages: RwLock::new(pages),
        })
    }

    /// Opens the snapshot, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or the file cannot
    /// be opened.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Returns the path to the snapshot file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    #[cfg(unix)]
    fn sync_parent_directory(&self) -> StorageResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            File::open(parent)?.sync_all()?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_parent_directory(&self) -> StorageResult<()> {
        Ok(())
    }
}

impl PageStore for FilePageStore {
    fn read_page(&self, page: PageNum) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.pages.read().get(&page).cloned())
    }

    fn create_page(&mut self, page: PageNum) -> StorageResult<bool> {
        let mut pages = self.pages.write();
        if pages.contains_key(&page) {
            return Ok(false);
        }
        pages.insert(page, Vec::new());
        Ok(true)
    }

    fn write_at(&mut self, page: PageNum, offset: usize, data: &[u8]) -> StorageResult<()> {
        let mut pages = self.pages.write();
        apply_write(pages.entry(page).or_default(), page, offset, data)
    }

    fn put_page(&mut self, page: PageNum, data: Vec<u8>) -> StorageResult<()> {
        self.pages.write().insert(page, data);
        Ok(())
    }

    fn free_page(&mut self, page: PageNum) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.pages.write().remove(&page))
    }

    fn page_numbers(&self) -> StorageResult<Vec<PageNum>> {
        Ok(self.pages.read().keys().copied().collect())
    }

    fn sync(&mut self) -> StorageResult<()> {
        let data = encode_snapshot(&self.pages.read());
        let temp_path = self.temp_path();

        let mut file = File::create(&temp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &self.path)?;
        self.sync_parent_directory()?;

        debug!(path = %self.path.display(), bytes = data.len(), "page store synced");
        Ok(())
    }
}

fn encode_snapshot(pages: &BTreeMap<PageNum, Vec<u8>>) -> Vec<u8> {
    let body_len: usize = pages.values().map(|p| 12 + p.len()).sum();
    let mut buf = Vec::with_capacity(SNAPSHOT_HEADER_LEN + body_len + 4);

    buf.extend_from_slice(&SNAPSHOT_MAGIC);
    buf.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
    buf.extend_from_slice(&(pages.len() as u64).to_le_bytes());

    for (page, data) in pages {
        buf.extend_from_slice(&page.as_u64().to_le_bytes());
        // apply_write caps pages at u32::MAX bytes
        buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
        buf.extend_from_slice(data);
    }

    let crc = crc32fast::hash(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    buf
}

fn decode_snapshot(data: &[u8]) -> StorageResult<BTreeMap<PageNum, Vec<u8>>> {
    if data.len() < SNAPSHOT_HEADER_LEN + 4 {
        return Err(StorageError::Corrupted(format!(
            "snapshot too short: {} bytes",
            data.len()
        )));
    }

    let (body, crc_bytes) = data.split_at(data.len() - 4);
    let stored_crc = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
    let computed_crc = crc32fast::hash(body);
    if stored_crc != computed_crc {
        return Err(StorageError::Corrupted(format!(
            "snapshot checksum mismatch: stored {stored_crc:08x}, computed {computed_crc:08x}"
        )));
    }

    if body[0..4] != SNAPSHOT_MAGIC {
        return Err(StorageError::Corrupted("invalid snapshot magic".into()));
    }
    let version = u16::from_le_bytes([body[4], body[5]]);
    if version != SNAPSHOT_VERSION {
        return Err(StorageError::Corrupted(format!(
            "unsupported snapshot version {version}"
        )));
    }

    let mut count_bytes = [0u8; 8];
    count_bytes.copy_from_slice(&body[6..14]);
    let count = u64::from_le_bytes(count_bytes);

    let mut pages = BTreeMap::new();
    let mut cursor = SNAPSHOT_HEADER_LEN;
    for _ in 0..count {
        if cursor + 12 > body.len() {
            return Err(StorageError::Corrupted("unexpected end of page table".into()));
        }
        let mut page_bytes = [0u8; 8];
        page_bytes.copy_from_slice(&body[cursor..cursor + 8]);
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&body[cursor + 8..cursor + 12]);
        cursor += 12;

        let len = u32::from_le_bytes(len_bytes) as usize;
        if cursor + len > body.len() {
            return Err(StorageError::Corrupted("unexpected end of page data".into()));
        }
        pages.insert(
            PageNum::new(u64::from_le_bytes(page_bytes)),
            body[cursor..cursor + len].to_vec(),
        );
        cursor += len;
    }

    if cursor != body.len() {
        return Err(StorageError::Corrupted(format!(
            "trailing bytes in snapshot: expected {cursor}, got {}",
            body.len()
        )));
    }

    Ok(pages)
}
