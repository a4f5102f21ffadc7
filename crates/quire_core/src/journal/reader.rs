//! Sequential journal file reader.
//!
//! ## Recovery Policy
//!
//! Tolerated conditions end the stream cleanly (`Ok(None)`):
//!
//! - a zero tag byte where the next record would start
//! - fewer bytes left than a record header
//! - a record whose declared length runs past the end of the file
//!
//! These are what a crash mid-write leaves behind.
//!
//! Fatal conditions return an error: an unknown tag
//! ([`CoreError::UnknownLogType`]), a checksum mismatch, a bad back link, or
//! a payload the decoder does not consume exactly.

use crate::error::{CoreError, CoreResult};
use crate::journal::files::{parse_file_number, resolve_file, validate_header, HEADER_LEN};
use crate::journal::loggable::{LogType, Loggable};
use crate::journal::record::{decode_record, RecordHeader, RECORD_HEADER_LEN, RECORD_TRAILER_LEN};
use crate::lsn::{FileNumber, Lsn};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::warn;

/// A decoded record and where it was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    /// Position of the record.
    pub lsn: Lsn,
    /// The record.
    pub loggable: Loggable,
}

/// Reads the records of one journal file.
///
/// The reader sees the file as it was when opened; bytes appended later are
/// not visited.
#[derive(Debug)]
pub struct JournalReader {
    file_number: FileNumber,
    path: PathBuf,
    reader: BufReader<File>,
    /// Offset of the next record to read.
    position: u64,
    /// Offset the underlying reader is at.
    stream_position: u64,
    len: u64,
    /// Set once the iterator has returned an error.
    failed: bool,
}

impl JournalReader {
    /// Opens journal file `number` in `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or its header is bad.
    pub fn open(dir: &Path, number: FileNumber) -> CoreResult<Self> {
        Self::open_path(&resolve_file(dir, number))
    }

    /// Opens the journal file at `path`; the number comes from its name.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is not a journal file name, the file
    /// cannot be opened, or its header is bad.
    pub fn open_path(path: &Path) -> CoreResult<Self> {
        let file_number = parse_file_number(path)?;
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        validate_header(&mut reader)?;

        Ok(Self {
            file_number,
            path: path.to_path_buf(),
            reader,
            position: HEADER_LEN,
            stream_position: HEADER_LEN,
            len,
            failed: false,
        })
    }

    /// Returns the number of the file being read.
    #[must_use]
    pub fn file_number(&self) -> FileNumber {
        self.file_number
    }

    /// Returns the path of the file being read.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the offset of the next record.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Returns true if unread bytes remain after the current position.
    #[must_use]
    pub fn has_trailing_bytes(&self) -> bool {
        self.position < self.len
    }

    /// Reads the record at the current position and moves past it.
    ///
    /// Returns `Ok(None)` at the end of the data, including a truncated
    /// final record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is corrupt or reading fails.
    pub fn next_entry(&mut self) -> CoreResult<Option<JournalEntry>> {
        let start = self.position;
        match self.read_at(start)? {
            Some((loggable, end)) => {
                self.position = end;
                Ok(Some(JournalEntry {
                    lsn: Lsn::new(self.file_number, start),
                    loggable,
                }))
            }
            None => Ok(None),
        }
    }

    /// Reads the record that ends at the current position and moves to its
    /// start, so the following `next_entry` returns it again.
    ///
    /// Returns `Ok(None)` at the first record.
    ///
    /// # Errors
    ///
    /// Returns an error if the back link or the record is corrupt.
    pub fn previous_entry(&mut self) -> CoreResult<Option<JournalEntry>> {
        let end = self.position;
        if end <= HEADER_LEN {
            return Ok(None);
        }
        if end < HEADER_LEN + (RECORD_HEADER_LEN + RECORD_TRAILER_LEN) as u64 {
            return Err(self.corruption(end, "no room for a record before this position"));
        }

        let mut link = [0u8; 4];
        self.read_exact_at(end - RECORD_TRAILER_LEN as u64, &mut link)?;
        let back_link = u64::from(u32::from_le_bytes(link));
        let start = (end - RECORD_TRAILER_LEN as u64)
            .checked_sub(back_link)
            .filter(|&s| s >= HEADER_LEN)
            .ok_or_else(|| self.corruption(end, "back link points before the first record"))?;

        match self.read_at(start)? {
            Some((loggable, record_end)) if record_end == end => {
                self.position = start;
                Ok(Some(JournalEntry {
                    lsn: Lsn::new(self.file_number, start),
                    loggable,
                }))
            }
            _ => Err(self.corruption(start, "back link does not lead to a record")),
        }
    }

    /// Reads to the end of the valid data and returns the last record.
    ///
    /// # Errors
    ///
    /// Returns an error if any record on the way is corrupt.
    pub fn last_entry(&mut self) -> CoreResult<Option<JournalEntry>> {
        let mut last = None;
        while let Some(entry) = self.next_entry()? {
            last = Some(entry);
        }
        Ok(last)
    }

    /// Positions the reader at a record previously returned for this file.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] if the LSN belongs to another
    /// file or lies outside the data.
    pub fn seek(&mut self, lsn: Lsn) -> CoreResult<()> {
        if lsn.file_number() != self.file_number {
            return Err(CoreError::invalid_argument(format!(
                "LSN {lsn} is not in journal file {}",
                self.file_number
            )));
        }
        if lsn.offset() < HEADER_LEN || lsn.offset() > self.len {
            return Err(CoreError::invalid_argument(format!(
                "LSN {lsn} is outside journal file {} of {} bytes",
                self.file_number, self.len
            )));
        }
        self.position = lsn.offset();
        Ok(())
    }

    /// Reads the record starting at `offset`. Returns the record and the
    /// offset just past it, or `None` at the end of the data.
    fn read_at(&mut self, offset: u64) -> CoreResult<Option<(Loggable, u64)>> {
        let available = self.len.saturating_sub(offset);
        if available == 0 {
            return Ok(None);
        }

        let mut tag = [0u8; 1];
        self.read_exact_at(offset, &mut tag)?;
        if tag[0] == 0 {
            return Ok(None);
        }
        if LogType::from_byte(tag[0]).is_none() {
            return Err(CoreError::UnknownLogType {
                tag: tag[0],
                offset,
            });
        }

        if available < RECORD_HEADER_LEN as u64 {
            warn!(file = %self.path.display(), offset, "truncated record header at end of journal file");
            return Ok(None);
        }
        let mut header_bytes = [0u8; RECORD_HEADER_LEN];
        header_bytes[0] = tag[0];
        self.read_exact_at(offset + 1, &mut header_bytes[1..])?;
        let header = RecordHeader::parse(&header_bytes, offset)?;

        let record_len = header.record_len();
        if available < record_len {
            warn!(
                file = %self.path.display(),
                offset,
                record_len,
                available,
                "truncated record at end of journal file"
            );
            return Ok(None);
        }

        let mut record = vec![0u8; record_len as usize];
        record[..RECORD_HEADER_LEN].copy_from_slice(&header_bytes);
        self.read_exact_at(offset + RECORD_HEADER_LEN as u64, &mut record[RECORD_HEADER_LEN..])?;

        let loggable = decode_record(&record, offset)?;
        Ok(Some((loggable, offset + record_len)))
    }

    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> CoreResult<()> {
        if offset != self.stream_position {
            self.reader.seek(SeekFrom::Start(offset))?;
        }
        self.reader.read_exact(buf)?;
        self.stream_position = offset + buf.len() as u64;
        Ok(())
    }

    fn corruption(&self, offset: u64, message: &str) -> CoreError {
        CoreError::journal_corruption(format!(
            "{} at offset {offset}: {message}",
            self.path.display()
        ))
    }
}

impl Iterator for JournalReader {
    type Item = CoreResult<JournalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_entry() {
            Ok(entry) => entry.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
