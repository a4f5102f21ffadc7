//! Journal file naming, discovery and headers.
//!
//! ```text
//! <journal dir>/
//! ├─ journal.lck        # advisory lock held by the open journal
//! ├─ 0000000000.log     # journal files, numbered in lowercase hex
//! ├─ 0000000001.log
//! └─ 0000000001.log.bak # file that was sitting at a rotation target
//! ```
//!
//! Every journal file starts with a six byte header: four magic bytes, then
//! the format version as `[0x00, VERSION]`.

use crate::error::{CoreError, CoreResult};
use crate::lsn::FileNumber;
use std::ffi::OsString;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// Magic bytes at the start of every journal file.
pub const JOURNAL_MAGIC: [u8; 4] = [0x0E, 0x0D, 0x0B, 0x01];

/// Current journal format version.
pub const JOURNAL_VERSION: u8 = 1;

/// Length of the file header.
pub const HEADER_LEN: u64 = 6;

/// Extension of journal files.
pub const FILE_SUFFIX: &str = ".log";

/// Suffix appended to a file moved out of a rotation target.
pub const BACKUP_SUFFIX: &str = ".bak";

/// Name of the directory lock file.
pub const LOCK_FILE_NAME: &str = "journal.lck";

/// Number of hex digits in a journal file name.
const NAME_DIGITS: usize = 10;

/// Returns the file name for a journal file number.
///
/// # Errors
///
/// Returns [`CoreError::InvalidArgument`] if `number` is outside
/// `0..=32767`.
pub fn file_name(number: i64) -> CoreResult<String> {
    FileNumber::new(number).map(name_of)
}

/// Returns the file name for an already validated file number.
#[must_use]
pub fn name_of(number: FileNumber) -> String {
    format!("{:0width$x}{FILE_SUFFIX}", number.get(), width = NAME_DIGITS)
}

/// Returns true if `name` is exactly a journal file name.
#[must_use]
pub fn is_journal_file_name(name: &str) -> bool {
    name.len() == NAME_DIGITS + FILE_SUFFIX.len()
        && name.ends_with(FILE_SUFFIX)
        && name[..NAME_DIGITS]
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Parses the file number out of a journal file path.
///
/// # Errors
///
/// Returns [`CoreError::InvalidArgument`] if the name is not a journal file
/// name or the number is outside `0..=32767`.
pub fn parse_file_number(path: &Path) -> CoreResult<FileNumber> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| is_journal_file_name(n))
        .ok_or_else(|| {
            CoreError::invalid_argument(format!("not a journal file: {}", path.display()))
        })?;
    let number = i64::from_str_radix(&name[..NAME_DIGITS], 16).map_err(|e| {
        CoreError::invalid_argument(format!("bad journal file number in {name}: {e}"))
    })?;
    FileNumber::new(number)
}

/// Lists the journal files in `dir`, in no particular order.
///
/// Backups, index files and the lock file are skipped. A missing directory
/// has no journal files.
///
/// # Errors
///
/// Returns an error if the directory cannot be read.
pub fn list_journal_files(dir: &Path) -> CoreResult<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        let matches = entry.file_name().to_str().is_some_and(is_journal_file_name);
        if matches && entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    Ok(files)
}

/// Returns the greatest file number among `files`, or `None` when empty.
///
/// # Errors
///
/// Returns an error if any path is not a journal file.
pub fn find_last_file_number<I, P>(files: I) -> CoreResult<Option<FileNumber>>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let mut last = None;
    for file in files {
        let number = parse_file_number(file.as_ref())?;
        last = last.max(Some(number));
    }
    Ok(last)
}

/// Returns the path of journal file `number` in `dir`. The file need not exist.
#[must_use]
pub fn resolve_file(dir: &Path, number: FileNumber) -> PathBuf {
    dir.join(name_of(number))
}

/// Returns the backup path for a journal file.
#[must_use]
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

/// Sorts file numbers into replay order.
///
/// Numbers ascend, except that a sequence which wrapped past
/// [`FileNumber::MAX`] (both `0` and `MAX` present) starts right after the
/// first gap, so `[0, 1, 32766, 32767]` replays as `[32766, 32767, 0, 1]`.
#[must_use]
pub fn replay_order(mut numbers: Vec<FileNumber>) -> Vec<FileNumber> {
    numbers.sort_unstable();
    numbers.dedup();
    let wrapped = numbers.first() == Some(&FileNumber::ZERO)
        && numbers.last() == Some(&FileNumber::MAX);
    if wrapped {
        let gap = numbers
            .windows(2)
            .position(|pair| pair[0].next() != pair[1]);
        if let Some(i) = gap {
            numbers.rotate_left(i + 1);
        }
    }
    numbers
}

/// Writes the file header.
///
/// # Errors
///
/// Returns an error if the write fails.
pub fn write_header(writer: &mut impl Write) -> CoreResult<()> {
    let mut header = [0u8; HEADER_LEN as usize];
    header[..4].copy_from_slice(&JOURNAL_MAGIC);
    header[4] = 0;
    header[5] = JOURNAL_VERSION;
    writer.write_all(&header)?;
    Ok(())
}

/// Reads and checks the file header.
///
/// # Errors
///
/// Returns [`CoreError::JournalCorruption`] if the header is short or the
/// magic or version does not match.
pub fn validate_header(reader: &mut impl Read) -> CoreResult<()> {
    let mut header = [0u8; HEADER_LEN as usize];
    if let Err(e) = reader.read_exact(&mut header) {
        return Err(if e.kind() == io::ErrorKind::UnexpectedEof {
            CoreError::journal_corruption("journal file is shorter than its header")
        } else {
            e.into()
        });
    }

    if header[..4] != JOURNAL_MAGIC {
        return Err(CoreError::journal_corruption(format!(
            "bad journal magic {:02x?}",
            &header[..4]
        )));
    }
    let version = u16::from_be_bytes([header[4], header[5]]);
    if version != u16::from(JOURNAL_VERSION) {
        return Err(CoreError::journal_corruption(format!(
            "unsupported journal version {version}, expected {JOURNAL_VERSION}"
        )));
    }
    Ok(())
}

/// Fsyncs a directory so renames and new files inside it are durable.
///
/// # Errors
///
/// Returns an error if the directory cannot be opened or synced.
#[cfg(unix)]
pub fn sync_directory(dir: &Path) -> CoreResult<()> {
    fs::File::open(dir)?.sync_all()?;
    Ok(())
}

/// Fsyncs a directory so renames and new files inside it are durable.
///
/// # Errors
///
/// Never fails on this platform.
#[cfg(not(unix))]
pub fn sync_directory(_dir: &Path) -> CoreResult<()> {
    Ok(())
}
