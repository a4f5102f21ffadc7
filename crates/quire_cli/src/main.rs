//! Quire CLI
//!
//! Command-line tools for inspecting Quire journals.
//!
//! # Commands
//!
//! - `list` - List journal files with sizes and header status
//! - `dump` - Print the entries of one journal file
//! - `verify` - Read every journal file and report corruption

mod commands;

use clap::{Parser, Subcommand};
use quire_core::JournalConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Quire journal inspection tools.
#[derive(Parser)]
#[command(name = "quire")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the database directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Journal directory, if not the database directory (relative paths
    /// resolve against it)
    #[arg(global = true, short, long)]
    journal_dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn journal_path(&self, command: &str) -> Result<PathBuf, String> {
        let path = self
            .path
            .clone()
            .ok_or_else(|| format!("Database path required for {command}"))?;
        let mut config = JournalConfig::new(path);
        if let Some(dir) = &self.journal_dir {
            config = config.journal_dir(dir);
        }
        Ok(config.resolved_journal_dir())
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List journal files with sizes and header status
    List {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print the entries of a journal file
    Dump {
        /// File number to dump (defaults to the newest file)
        #[arg(long)]
        file: Option<u16>,

        /// Maximum number of entries to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Read every journal file and report truncation and corruption
    Verify,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Commands::List { format } => {
            let dir = cli.journal_path("list")?;
            commands::list::run(&dir, format)?;
        }
        Commands::Dump {
            file,
            limit,
            format,
        } => {
            let dir = cli.journal_path("dump")?;
            commands::dump::run(&dir, *file, *limit, format)?;
        }
        Commands::Verify => {
            let dir = cli.journal_path("verify")?;
            commands::verify::run(&dir)?;
        }
        Commands::Version => {
            println!("Quire CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Quire Core v{}", quire_core::VERSION);
        }
    }

    Ok(())
}
