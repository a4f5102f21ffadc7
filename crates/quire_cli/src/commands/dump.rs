//! Dump command implementation.

use super::journal_files;
use quire_core::{FileNumber, JournalEntry, JournalReader, Loggable};
use serde::Serialize;
use std::path::Path;

/// A journal entry as printed.
#[derive(Debug, Serialize)]
pub struct EntryInfo {
    /// LSN as `file:offset`.
    pub lsn: String,
    /// Record kind.
    pub kind: &'static str,
    /// Transaction ID.
    pub txn: u64,
    /// Page (if applicable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u64>,
    /// Update offset (if applicable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
    /// Length of the before image (if applicable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before_len: Option<usize>,
    /// Length of the after image or initial contents (if applicable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after_len: Option<usize>,
}

impl From<&JournalEntry> for EntryInfo {
    fn from(entry: &JournalEntry) -> Self {
        let loggable = &entry.loggable;
        let mut info = Self {
            lsn: entry.lsn.to_string(),
            kind: loggable.log_type().name(),
            txn: loggable.transaction_id().as_u64(),
            page: loggable.page().map(|p| p.as_u64()),
            offset: None,
            before_len: None,
            after_len: None,
        };
        match loggable {
            Loggable::CreatePage { data, .. } => info.after_len = Some(data.len()),
            Loggable::UpdatePage {
                offset,
                before,
                after,
                ..
            } => {
                info.offset = Some(*offset);
                info.before_len = Some(before.len());
                info.after_len = Some(after.len());
            }
            Loggable::FreePage { before, .. } => info.before_len = Some(before.len()),
            _ => {}
        }
        info
    }
}

/// Runs the dump command.
///
/// Dumps file `number`, or the newest file when `None`.
pub fn run(
    dir: &Path,
    number: Option<u16>,
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let number = match number {
        Some(n) => FileNumber::new(i64::from(n))?,
        None => *journal_files(dir)?
            .last()
            .ok_or_else(|| format!("no journal files in {}", dir.display()))?,
    };

    let (entries, error) = read_entries(dir, number, limit)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&entries)?),
        _ => {
            println!("Journal file {number} ({} entries)", entries.len());
            println!("================");
            for entry in &entries {
                print_entry(entry);
            }
        }
    }

    match error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

/// Reads up to `limit` entries of file `number`.
///
/// Entries before a corrupt record are returned together with the error.
pub fn read_entries(
    dir: &Path,
    number: FileNumber,
    limit: Option<usize>,
) -> Result<(Vec<EntryInfo>, Option<String>), Box<dyn std::error::Error>> {
    let reader = JournalReader::open(dir, number)?;
    let mut entries = Vec::new();
    for entry in reader.take(limit.unwrap_or(usize::MAX)) {
        match entry {
            Ok(entry) => entries.push(EntryInfo::from(&entry)),
            Err(e) => return Ok((entries, Some(e.to_string()))),
        }
    }
    Ok((entries, None))
}

fn print_entry(entry: &EntryInfo) {
    print!("[{:>16}] {:12} txn={}", entry.lsn, entry.kind, entry.txn);
    if let Some(page) = entry.page {
        print!(" page={page}");
    }
    if let Some(offset) = entry.offset {
        print!(" offset={offset}");
    }
    if let Some(len) = entry.before_len {
        print!(" before={len}B");
    }
    if let Some(len) = entry.after_len {
        print!(" after={len}B");
    }
    println!();
}
