//! Page store trait definition.

use crate::error::{StorageError, StorageResult};
use std::fmt;

/// Identifier of a page in a [`PageStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageNum(pub u64);

impl PageNum {
    /// Creates a new page number.
    #[must_use]
    pub const fn new(page: u64) -> Self {
        Self(page)
    }

    /// Returns the raw page number.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PageNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page:{}", self.0)
    }
}

/// A page-addressed store that journal records are applied to.
///
/// Pages are variable-length byte vectors. Stores are **dumb**: they apply
/// whatever bytes they are handed and never interpret them.
///
/// # Invariants
///
/// - `write_at` on a missing page creates it, zero-filled up to `offset`
/// - `write_at` past the end of a page extends it with zeroes
/// - `create_page` and `free_page` are no-ops when the page is already in
///   the requested state, so redo can be applied more than once
/// - After `sync` returns, every previous mutation survives a crash
///
/// # Implementors
///
/// - [`super::InMemoryPageStore`] - For testing
/// - [`super::FilePageStore`] - For persistent storage
pub trait PageStore: Send + Sync {
    /// Returns a copy of the page, or `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the page cannot be read.
    fn read_page(&self, page: PageNum) -> StorageResult<Option<Vec<u8>>>;

    /// Creates an empty page.
    ///
    /// Returns `false` if the page already existed (it is left untouched).
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be modified.
    fn create_page(&mut self, page: PageNum) -> StorageResult<bool>;

    /// Writes `data` into the page starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::OutOfRange`] if the write would grow the page
    /// past [`MAX_PAGE_LEN`].
    fn write_at(&mut self, page: PageNum, offset: usize, data: &[u8]) -> StorageResult<()>;

    /// Replaces the whole page contents, creating the page if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be modified.
    fn put_page(&mut self, page: PageNum, data: Vec<u8>) -> StorageResult<()>;

    /// Removes a page, returning its previous contents.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be modified.
    fn free_page(&mut self, page: PageNum) -> StorageResult<Option<Vec<u8>>>;

    /// Returns all page numbers currently present, in ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn page_numbers(&self) -> StorageResult<Vec<PageNum>>;

    /// Makes all previous mutations durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the data cannot be persisted.
    fn sync(&mut self) -> StorageResult<()>;
}

/// Largest size a single page may grow to.
pub const MAX_PAGE_LEN: usize = u32::MAX as usize;

/// Applies a positional write to an in-memory page buffer.
pub(crate) fn apply_write(
    buf: &mut Vec<u8>,
    page: PageNum,
    offset: usize,
    data: &[u8],
) -> StorageResult<()> {
    let end = offset
        .checked_add(data.len())
        .filter(|end| *end <= MAX_PAGE_LEN)
        .ok_or(StorageError::OutOfRange {
            page: page.as_u64(),
            offset,
            len: data.len(),
        })?;

    if buf.len() < end {
        buf.resize(end, 0);
    }
    buf[offset..end].copy_from_slice(data);
    Ok(())
}
