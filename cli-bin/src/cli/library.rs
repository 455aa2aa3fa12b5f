//! `shelf library …` – create, list and remove libraries.

use anyhow::Result;
use clap::{Args, Subcommand};
use libshelf::{Catalog, Library, Shelf};
use serde::Serialize;

use crate::cli::{expand_dir, find_library, print_json, Format};

#[derive(Subcommand, Debug)]
pub enum LibraryCmd {
    /// Create a library from one or more directories
    Add(AddArgs),
    /// List libraries with their directories and book counts
    Ls,
    /// Delete a library and its catalog entries (files on disk are kept)
    Rm { library: String },
    /// Add another directory to an existing library
    AddPath { library: String, path: String },
    /// Turn live monitoring on or off for a library
    SetWatch {
        library: String,
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },
}

#[derive(Args, Debug)]
pub struct AddArgs {
    pub name: String,
    #[arg(required = true)]
    pub paths: Vec<String>,
    /// Catalog only; never monitor this library live
    #[arg(long)]
    pub no_watch: bool,
}

#[derive(Serialize)]
struct LibraryRow<'a> {
    #[serde(flatten)]
    library: &'a Library,
    books: usize,
}

pub fn run(cmd: &LibraryCmd, shelf: &Shelf, fmt: Format) -> Result<()> {
    let catalog = shelf.catalog();
    match cmd {
        /* ── library add ──────────────────────────────────────────── */
        LibraryCmd::Add(a) => {
            let paths = a
                .paths
                .iter()
                .map(|p| expand_dir(p))
                .collect::<Result<Vec<_>>>()?;
            let lib = catalog.create_library(&a.name, &paths, !a.no_watch)?;
            match fmt {
                Format::Text => println!(
                    "Created library '{}' (#{}) with {} path(s)",
                    lib.name,
                    lib.id,
                    lib.paths.len()
                ),
                Format::Json => print_json(&lib)?,
            }
        }

        /* ── library ls ───────────────────────────────────────────── */
        LibraryCmd::Ls => {
            let libraries = catalog.libraries()?;
            let mut rows = Vec::with_capacity(libraries.len());
            for library in &libraries {
                rows.push(LibraryRow {
                    library,
                    books: catalog.count_books(library.id)?,
                });
            }
            match fmt {
                Format::Text => {
                    for r in &rows {
                        let watch = if r.library.watch { "watched" } else { "manual" };
                        println!(
                            "{}\t{}\t{}\t{} book(s)",
                            r.library.id, r.library.name, watch, r.books
                        );
                        for p in &r.library.paths {
                            println!("\t{}", p.path.display());
                        }
                    }
                }
                Format::Json => print_json(&rows)?,
            }
        }

        /* ── library rm ───────────────────────────────────────────── */
        LibraryCmd::Rm { library } => {
            let lib = find_library(shelf, library)?;
            catalog.delete_library(lib.id)?;
            match fmt {
                Format::Text => println!("Removed library '{}'", lib.name),
                Format::Json => print_json(&serde_json::json!({ "removed": lib.id }))?,
            }
        }

        /* ── library add-path ─────────────────────────────────────── */
        LibraryCmd::AddPath { library, path } => {
            let lib = find_library(shelf, library)?;
            let dir = expand_dir(path)?;
            let lp = catalog.add_library_path(lib.id, &dir)?;
            match fmt {
                Format::Text => println!("Added {} → '{}'", lp.path.display(), lib.name),
                Format::Json => print_json(&lp)?,
            }
        }

        /* ── library set-watch ────────────────────────────────────── */
        LibraryCmd::SetWatch { library, enabled } => {
            let lib = find_library(shelf, library)?;
            catalog.set_watch(lib.id, *enabled)?;
            match fmt {
                Format::Text => println!(
                    "Monitoring {} for '{}'",
                    if *enabled { "enabled" } else { "disabled" },
                    lib.name
                ),
                Format::Json => print_json(&serde_json::json!({
                    "library": lib.id,
                    "watch": enabled,
                }))?,
            }
        }
    }
    Ok(())
}
