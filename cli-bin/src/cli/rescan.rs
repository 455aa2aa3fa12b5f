//! `shelf rescan …` – on-demand reconciliation.

use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use libshelf::{Shelf, TracingNotifier};

use crate::cli::{find_library, print_json, Format};

#[derive(Args, Debug)]
pub struct RescanArgs {
    /// Library name or id
    #[arg(required_unless_present = "all", conflicts_with = "all")]
    pub library: Option<String>,

    /// Rescan every library
    #[arg(long)]
    pub all: bool,
}

pub fn run(args: &RescanArgs, shelf: &Shelf, fmt: Format) -> Result<()> {
    let notifier = Arc::new(TracingNotifier);
    let reports = match &args.library {
        Some(key) if !args.all => {
            let lib = find_library(shelf, key)?;
            vec![shelf.rescan(lib.id, notifier)?]
        }
        _ => shelf.rescan_all(notifier)?,
    };

    match fmt {
        Format::Text => {
            for r in &reports {
                let id = r
                    .library_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "?".into());
                println!(
                    "library {id}: {} moved, {} deleted, {} added, {} failed",
                    r.moved, r.deleted, r.added, r.failed
                );
            }
        }
        Format::Json => print_json(&reports)?,
    }
    Ok(())
}
