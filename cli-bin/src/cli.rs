// cli-bin/src/cli.rs

pub mod library;
pub mod rescan;
pub mod watch;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use libshelf::{Catalog, Library, LibraryId, Shelf};
use serde::Serialize;

/// Output format for commands.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    Text,
    Json,
}

/// Shelf – keeps a book catalog in sync with the folders it lives in
#[derive(Parser, Debug)]
#[command(name = "shelf", author, version, about)]
pub struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = Format::Text)]
    pub format: Format,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialise the catalog database (idempotent)
    Init,

    /// Manage libraries and their directories
    #[command(subcommand)]
    Library(library::LibraryCmd),

    /// Reconcile the catalog with what is on disk
    ///
    /// Example:
    ///     shelf rescan comics
    ///     shelf rescan --all
    Rescan(rescan::RescanArgs),

    /// Monitor every watched library until Ctrl+C
    Watch(watch::WatchArgs),

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Print `value` as one JSON line.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

/// Expand `~` and resolve to an existing directory.
pub fn expand_dir(raw: &str) -> Result<PathBuf> {
    let expanded = shellexpand::tilde(raw).into_owned();
    let path = std::fs::canonicalize(&expanded)
        .with_context(|| format!("no such directory: {expanded}"))?;
    anyhow::ensure!(path.is_dir(), "not a directory: {}", path.display());
    Ok(path)
}

/// Find a library by numeric id or by name.
pub fn find_library(shelf: &Shelf, key: &str) -> Result<Library> {
    let libraries = shelf.catalog().libraries()?;
    let by_id = key.parse::<i64>().ok().map(LibraryId);
    libraries
        .into_iter()
        .find(|l| Some(l.id) == by_id || l.name == key)
        .with_context(|| format!("library not found: {key}"))
}
