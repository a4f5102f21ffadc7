//! Log sequence numbers.
//!
//! An [`Lsn`] addresses one record in the journal as a `(file number, byte
//! offset)` pair. LSNs order by file number first and offset second, so every
//! record in a newer file sorts after every record in an older one.
//!
//! There is no in-band "invalid" LSN. Code that may not have an LSN yet uses
//! `Option<Lsn>`, whose ordering already puts `None` before every real value
//! and makes `None == None`.

use crate::error::{CoreError, CoreResult};
use std::fmt;

/// Number of a journal file, in `0..=32767`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileNumber(u16);

impl FileNumber {
    /// The first file number.
    pub const ZERO: Self = Self(0);

    /// The largest file number; rotation wraps from here back to zero.
    pub const MAX: Self = Self(i16::MAX as u16);

    /// Creates a file number, rejecting values outside `0..=32767`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] for out-of-range values.
    pub fn new(value: i64) -> CoreResult<Self> {
        if (0..=i64::from(Self::MAX.0)).contains(&value) {
            Ok(Self(value as u16))
        } else {
            Err(CoreError::invalid_argument(format!(
                "journal file number {value} is outside 0..={}",
                Self::MAX.0
            )))
        }
    }

    /// Returns the raw number.
    #[must_use]
    pub const fn get(self) -> u16 {
        self.0
    }

    /// Returns the file number after this one, wrapping to zero after
    /// [`FileNumber::MAX`].
    #[must_use]
    pub const fn next(self) -> Self {
        if self.0 >= Self::MAX.0 {
            Self::ZERO
        } else {
            Self(self.0 + 1)
        }
    }
}

impl TryFrom<i32> for FileNumber {
    type Error = CoreError;

    fn try_from(value: i32) -> CoreResult<Self> {
        Self::new(i64::from(value))
    }
}

impl fmt::Display for FileNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of a record in the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Lsn {
    // Field order drives the derived ordering.
    file: FileNumber,
    offset: u64,
}

impl Lsn {
    /// Creates an LSN.
    #[must_use]
    pub const fn new(file: FileNumber, offset: u64) -> Self {
        Self { file, offset }
    }

    /// Returns the journal file the record lives in.
    #[must_use]
    pub const fn file_number(self) -> FileNumber {
        self.file
    }

    /// Returns the byte offset of the record within its file.
    #[must_use]
    pub const fn offset(self) -> u64 {
        self.offset
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.offset)
    }
}
