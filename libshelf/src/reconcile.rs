//! Full-library reconciliation.
//!
//! A rescan walks every configured path of a library and diffs what is on
//! disk against the catalog in three committed phases:
//!
//! 1. entries whose file is gone but whose name shows up elsewhere are
//!    moved (identity kept),
//! 2. entries whose name is gone everywhere are deleted in one batch,
//! 3. names on disk that the catalog does not know are ingested.
//!
//! Files are matched by name only. Within one library the first location in
//! sorted walk order wins for duplicated names.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::catalog::Catalog;
use crate::config::MonitorConfig;
use crate::error::{Error, Result};
use crate::file_type::is_ignored_name;
use crate::model::{
    BookId, CatalogEntry, Library, LibraryFile, LibraryPath, LibraryPathId, RescanReport,
};
use crate::notifier::{Notification, Notifier};
use crate::processor::FileProcessor;
use crate::utils::canonicalize_lossy;

/// What a walk of the library found on disk.
#[derive(Debug, Default)]
struct DiskIndex {
    by_name: BTreeMap<String, LibraryFile>,
    present: HashSet<PathBuf>,
    roots: HashMap<LibraryPathId, PathBuf>,
    unavailable: HashSet<LibraryPathId>,
}

pub struct ReconciliationEngine {
    catalog: Arc<dyn Catalog>,
    processor: Arc<dyn FileProcessor>,
    notifier: Arc<dyn Notifier>,
    config: MonitorConfig,
    running: Mutex<()>,
}

impl ReconciliationEngine {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        processor: Arc<dyn FileProcessor>,
        notifier: Arc<dyn Notifier>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            catalog,
            processor,
            notifier,
            config,
            running: Mutex::new(()),
        }
    }

    /// Bring the catalog in line with the library's paths on disk.
    ///
    /// Per-file ingestion failures are reported and counted, never returned.
    /// Entries under a root that is currently missing (unmounted share, ...)
    /// are left alone.
    pub fn rescan(&self, library: &Library) -> Result<RescanReport> {
        let _running = self
            .running
            .lock()
            .map_err(|_| Error::poisoned("rescan"))?;

        info!(library = %library.id, name = %library.name, "rescan started");
        self.notifier
            .publish(Notification::info(format!("Rescanning library {}", library.name)));

        let disk = self.walk(library);
        let entries = self.catalog.find_all_for_library(library.id)?;
        let mut report = RescanReport {
            library_id: Some(library.id),
            ..Default::default()
        };

        let moved = self.detect_moved(&disk, &entries)?;
        report.moved = moved.len();

        let (deleted, known) = self.detect_deleted(&disk, &entries, &moved)?;
        report.deleted = deleted;

        let (added, failed) = self.detect_new(&disk, &known);
        report.added = added;
        report.failed = failed;

        info!(
            library = %library.id,
            moved = report.moved,
            deleted = report.deleted,
            added = report.added,
            failed = report.failed,
            "rescan finished"
        );
        self.notifier.publish(Notification::info(format!(
            "Rescan of {} finished: {} moved, {} deleted, {} added, {} failed",
            library.name, report.moved, report.deleted, report.added, report.failed
        )));
        Ok(report)
    }

    fn walk(&self, library: &Library) -> DiskIndex {
        let mut disk = DiskIndex::default();
        let mut roots: Vec<LibraryPath> = library
            .paths
            .iter()
            .map(|lp| LibraryPath {
                path: canonicalize_lossy(&lp.path),
                ..lp.clone()
            })
            .collect();
        roots.sort_by(|a, b| a.path.cmp(&b.path));

        for root in &roots {
            disk.roots.insert(root.id, root.path.clone());
            if !root.path.is_dir() {
                warn!(path = %root.path.display(), library = %library.id, "library path unavailable; leaving its entries untouched");
                disk.unavailable.insert(root.id);
                continue;
            }
            let walker = WalkDir::new(&root.path)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| {
                    e.depth() == 0 || !is_ignored_name(&e.file_name().to_string_lossy())
                });
            for entry in walker {
                let entry = match entry {
                    Ok(e) => e,
                    Err(e) => {
                        debug!(error = %e, "skipping unreadable entry");
                        continue;
                    }
                };
                if !entry.file_type().is_file() || self.config.is_ignored(entry.path()) {
                    continue;
                }
                let Some(file) = LibraryFile::locate(root, entry.path()) else {
                    continue;
                };
                disk.present.insert(file.path.clone());
                disk.by_name.entry(file.file_name.clone()).or_insert(file);
            }
        }
        debug!(library = %library.id, files = disk.present.len(), names = disk.by_name.len(), "walk complete");
        disk
    }

    /// Phase 1. Returns the ids of moved entries.
    fn detect_moved(&self, disk: &DiskIndex, entries: &[CatalogEntry]) -> Result<HashSet<BookId>> {
        let mut claimed: HashSet<PathBuf> = entries
            .iter()
            .filter_map(|e| recorded_path(disk, e))
            .filter(|p| disk.present.contains(p))
            .collect();

        let mut updates = Vec::new();
        for entry in entries {
            if disk.unavailable.contains(&entry.library_path_id) {
                continue;
            }
            let recorded = recorded_path(disk, entry);
            if recorded.as_ref().is_some_and(|p| disk.present.contains(p)) {
                continue;
            }
            let Some(found) = disk.by_name.get(&entry.file_name) else {
                continue;
            };
            if !claimed.insert(found.path.clone()) {
                continue;
            }
            debug!(
                book = %entry.id,
                from = ?recorded,
                to = %found.path.display(),
                "detected move"
            );
            updates.push(CatalogEntry {
                library_path_id: found.library_path_id,
                sub_path: found.sub_path.clone(),
                ..entry.clone()
            });
        }

        if !updates.is_empty() {
            self.catalog.save_all(&updates)?;
        }
        Ok(updates.iter().map(|e| e.id).collect())
    }

    /// Phase 2. Returns the number removed and the names still catalogued.
    fn detect_deleted(
        &self,
        disk: &DiskIndex,
        entries: &[CatalogEntry],
        moved: &HashSet<BookId>,
    ) -> Result<(usize, HashSet<String>)> {
        let mut known = HashSet::new();
        let mut gone = Vec::new();
        for entry in entries {
            let removable = !moved.contains(&entry.id)
                && !disk.unavailable.contains(&entry.library_path_id)
                && !disk.by_name.contains_key(&entry.file_name);
            if removable {
                gone.push(entry.id);
            } else {
                known.insert(entry.file_name.clone());
            }
        }

        if gone.is_empty() {
            return Ok((0, known));
        }
        let removed = self.catalog.delete_by_ids(&gone)?;
        debug!(count = removed, "removed entries missing from disk");
        self.notifier.publish(Notification::BooksRemoved(gone));
        Ok((removed, known))
    }

    /// Phase 3. Returns `(added, failed)`.
    fn detect_new(&self, disk: &DiskIndex, known: &HashSet<String>) -> (usize, usize) {
        let mut added = 0;
        let mut failed = 0;
        for (name, file) in &disk.by_name {
            if known.contains(name) {
                continue;
            }
            match self.processor.process(file) {
                Ok(entry) => {
                    added += 1;
                    self.notifier.publish(Notification::BookAdded(entry));
                }
                Err(e) => {
                    failed += 1;
                    warn!(file = %file.path.display(), error = %e, "failed to ingest");
                    self.notifier.publish(Notification::warn(format!(
                        "Failed to ingest {}: {e}",
                        file.path.display()
                    )));
                }
            }
        }
        (added, failed)
    }
}

fn recorded_path(disk: &DiskIndex, entry: &CatalogEntry) -> Option<PathBuf> {
    disk.roots
        .get(&entry.library_path_id)
        .map(|root| entry.full_path(root))
}
