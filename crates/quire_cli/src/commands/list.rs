//! List command implementation.

use super::journal_files;
use quire_core::journal::files::{resolve_file, validate_header};
use serde::Serialize;
use std::fs::File;
use std::path::Path;

/// One journal file as listed.
#[derive(Debug, Serialize)]
pub struct FileInfo {
    /// File number.
    pub number: u16,
    /// File name.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// Whether the header is valid.
    pub header_ok: bool,
    /// Why the header is invalid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header_error: Option<String>,
}

/// Runs the list command.
pub fn run(dir: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let files = list_files(dir)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&files)?),
        _ => {
            println!("Journal files in {} ({} total)", dir.display(), files.len());
            for file in &files {
                let status = match &file.header_error {
                    None => "ok".to_string(),
                    Some(e) => format!("BAD HEADER: {e}"),
                };
                println!("  {:>5}  {}  {:>12} bytes  {status}", file.number, file.name, file.size);
            }
        }
    }
    Ok(())
}

/// Collects [`FileInfo`] for every journal file in `dir`, in replay order.
pub fn list_files(dir: &Path) -> Result<Vec<FileInfo>, Box<dyn std::error::Error>> {
    let mut files = Vec::new();
    for number in journal_files(dir)? {
        let path = resolve_file(dir, number);
        let mut file = File::open(&path)?;
        let size = file.metadata()?.len();
        let header_error = validate_header(&mut file).err().map(|e| e.to_string());
        files.push(FileInfo {
            number: number.get(),
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            size,
            header_ok: header_error.is_none(),
            header_error,
        });
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quire_core::{Journal, JournalConfig};
    use tempfile::TempDir;

    #[test]
    fn lists_files_in_replay_order() {
        let temp_dir = TempDir::new().unwrap();
        let journal = Journal::open(JournalConfig::new(temp_dir.path())).unwrap();
        journal.switch_files().unwrap();
        journal.switch_files().unwrap();
        std::fs::write(temp_dir.path().join("0000000007.log"), b"junk").unwrap();

        let files = list_files(journal.dir()).unwrap();
        let numbers: Vec<u16> = files.iter().map(|f| f.number).collect();
        assert_eq!(numbers, vec![0, 1, 7]);
        assert!(files[0].header_ok);
        assert_eq!(files[0].size, 6);
        assert!(!files[2].header_ok);
    }

    #[test]
    fn missing_directory_lists_nothing() {
        let temp_dir = TempDir::new().unwrap();
        assert!(list_files(&temp_dir.path().join("nope")).unwrap().is_empty());
    }
}
