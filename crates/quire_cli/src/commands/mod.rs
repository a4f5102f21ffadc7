//! CLI command implementations.

pub mod dump;
pub mod list;
pub mod verify;

use quire_core::journal::files::{list_journal_files, parse_file_number, replay_order};
use quire_core::FileNumber;
use std::path::Path;

/// Returns the journal file numbers in `dir`, in replay order.
pub fn journal_files(dir: &Path) -> Result<Vec<FileNumber>, Box<dyn std::error::Error>> {
    let numbers = list_journal_files(dir)?
        .iter()
        .map(|path| parse_file_number(path))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(replay_order(numbers))
}
