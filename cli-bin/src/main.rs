//! Shelf CLI entry-point
//!
//! All heavy lifting lives in the `libshelf` crate; this file handles
//! argument parsing, logging and dispatch to the sub-command modules.

mod cli; // sub-command definitions and argument structs

use std::{env, io};

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use libshelf::{logging, Shelf};
use tracing::info;

use cli::{print_json, Cli, Commands, Format};

fn main() -> Result<()> {
    /* ── CLI parsing & logging ────────────────────────────────── */
    let args = Cli::parse();
    if args.verbose {
        env::set_var("RUST_LOG", "debug");
    }
    logging::init();

    /* ── shell-completion shortcut ────────────────────────────── */
    if let Commands::Completions { shell } = &args.command {
        let mut cmd = Cli::command();
        generate(*shell, &mut cmd, "shelf", &mut io::stdout());
        return Ok(());
    }

    /* ── config & DB (runs migrations) ───────────────────────── */
    let shelf = Shelf::open_default()?;

    /* ── command dispatch ────────────────────────────────────── */
    match &args.command {
        Commands::Completions { .. } => {} // handled above

        Commands::Init => {
            let db_path = &shelf.config().db_path;
            info!("Catalog initialised at {}", db_path.display());
            match args.format {
                Format::Text => println!("Catalog ready at {}", db_path.display()),
                Format::Json => print_json(&serde_json::json!({ "db_path": db_path }))?,
            }
        }

        Commands::Library(cmd) => cli::library::run(cmd, &shelf, args.format)?,
        Commands::Rescan(opts) => cli::rescan::run(opts, &shelf, args.format)?,
        Commands::Watch(opts) => cli::watch::run(opts, &shelf, args.format)?,
    }

    Ok(())
}
