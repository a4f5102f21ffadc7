//! Verify command implementation.

use super::journal_files;
use quire_core::{FileNumber, JournalReader};
use std::path::Path;

/// Verification result for one journal file.
#[derive(Debug)]
pub struct FileReport {
    /// File number.
    pub number: FileNumber,
    /// Number of records read.
    pub entries: usize,
    /// Whether bytes follow the last complete record.
    pub truncated: bool,
    /// The corruption that stopped reading, if any.
    pub error: Option<String>,
}

impl FileReport {
    fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Runs the verify command.
pub fn run(dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying journal at {}", dir.display());
    println!();

    let reports = verify_dir(dir)?;
    for report in &reports {
        print_report(report);
    }

    let entries: usize = reports.iter().map(|r| r.entries).sum();
    let corrupt = reports.iter().filter(|r| !r.is_ok()).count();
    println!();
    println!(
        "{} files, {entries} entries, {corrupt} corrupt",
        reports.len()
    );

    if corrupt == 0 {
        println!("✓ Journal verification passed");
        Ok(())
    } else {
        println!("✗ Journal verification failed");
        Err("Verification failed".into())
    }
}

/// Reads every journal file in `dir`, in replay order.
pub fn verify_dir(dir: &Path) -> Result<Vec<FileReport>, Box<dyn std::error::Error>> {
    Ok(journal_files(dir)?
        .into_iter()
        .map(|number| verify_file(dir, number))
        .collect())
}

/// Reads one journal file to its end.
pub fn verify_file(dir: &Path, number: FileNumber) -> FileReport {
    let mut report = FileReport {
        number,
        entries: 0,
        truncated: false,
        error: None,
    };

    let mut reader = match JournalReader::open(dir, number) {
        Ok(reader) => reader,
        Err(e) => {
            report.error = Some(e.to_string());
            return report;
        }
    };

    loop {
        match reader.next_entry() {
            Ok(Some(_)) => report.entries += 1,
            Ok(None) => break,
            Err(e) => {
                report.error = Some(e.to_string());
                return report;
            }
        }
    }
    report.truncated = reader.has_trailing_bytes();
    report
}

fn print_report(report: &FileReport) {
    print!("  file {:>5}: {} entries", report.number, report.entries);
    if report.truncated {
        print!(", truncated tail");
    }
    println!();
    if let Some(error) = &report.error {
        println!("    ERROR: {error}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quire_core::journal::files::resolve_file;
    use quire_core::{Journal, JournalConfig, Loggable, TransactionId};
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::TempDir;

    fn journal_with_records(temp_dir: &TempDir) -> FileNumber {
        let journal = Journal::open(JournalConfig::new(temp_dir.path())).unwrap();
        let number = journal.switch_files().unwrap();
        let txn = TransactionId::new(1);
        journal.append(&Loggable::TxnStart { txn }).unwrap();
        journal.append(&Loggable::TxnCommit { txn }).unwrap();
        journal.shutdown(TransactionId::RESERVED, false).unwrap();
        number
    }

    fn append(path: &Path, bytes: &[u8]) {
        let mut file = OpenOptions::new().append(true).open(path).unwrap();
        file.write_all(bytes).unwrap();
    }

    #[test]
    fn clean_journal_verifies() {
        let temp_dir = TempDir::new().unwrap();
        let number = journal_with_records(&temp_dir);

        let report = verify_file(temp_dir.path(), number);
        assert!(report.is_ok());
        assert_eq!(report.entries, 2);
        assert!(!report.truncated);
        assert!(run(temp_dir.path()).is_ok());
    }

    #[test]
    fn truncated_tail_is_not_corruption() {
        let temp_dir = TempDir::new().unwrap();
        let number = journal_with_records(&temp_dir);
        append(&resolve_file(temp_dir.path(), number), &[1, 0, 0]);

        let report = verify_file(temp_dir.path(), number);
        assert!(report.is_ok());
        assert!(report.truncated);
        assert_eq!(report.entries, 2);
    }

    #[test]
    fn unknown_tag_fails_verification() {
        let temp_dir = TempDir::new().unwrap();
        let number = journal_with_records(&temp_dir);
        append(&resolve_file(temp_dir.path(), number), &[0x7F; 32]);

        let report = verify_file(temp_dir.path(), number);
        assert!(!report.is_ok());
        assert_eq!(report.entries, 2);
        assert!(run(temp_dir.path()).is_err());
    }
}
