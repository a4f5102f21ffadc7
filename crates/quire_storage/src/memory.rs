//! In-memory page store for testing.

use crate::error::StorageResult;
use crate::store::{apply_write, PageNum, PageStore};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// An in-memory page store.
///
/// This store keeps all pages in memory and is suitable for:
/// - Unit tests
/// - Recovery tests that inspect the state after redo/undo
/// - Ephemeral databases that don't need persistence
///
/// # Thread Safety
///
/// This store is thread-safe and can be shared across threads.
///
/// # Example
///
/// ```rust
/// use quire_storage::{InMemoryPageStore, PageNum, PageStore};
///
/// let mut store = InMemoryPageStore::new();
/// assert!(store.create_page(PageNum::new(1)).unwrap());
/// assert!(!store.create_page(PageNum::new(1)).unwrap());
/// assert_eq!(store.page_count(), 1);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryPageStore {
    pages: RwLock<BTreeMap<PageNum, Vec<u8>>>,
}

impl InMemoryPageStore {
    /// Creates a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store with pre-existing pages.
    ///
    /// Useful for testing recovery scenarios.
    #[must_use]
    pub fn with_pages(pages: impl IntoIterator<Item = (PageNum, Vec<u8>)>) -> Self {
        Self {
            pages: RwLock::new(pages.into_iter().collect()),
        }
    }

    /// Returns a copy of all pages.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<PageNum, Vec<u8>> {
        self.pages.read().clone()
    }

    /// Returns the number of pages present.
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.pages.read().len()
    }
}

impl PageStore for InMemoryPageStore {
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
        let buf = pages.entry(page).or_default();
        apply_write(buf, page, offset, data)
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
        // Nothing is ever pending in memory
        Ok(())
    }
}
