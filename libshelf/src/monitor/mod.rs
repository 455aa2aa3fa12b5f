//! Live library monitoring.
//!
//! [`LibraryMonitor`] wires the pieces together:
//!
//! ```text
//! notify ──raw──▶ RawEventWatcher ──FileChangeEvent──▶ EventDispatcher ──▶ process_file
//!                        ▲                                                   │
//!                 WatchRegistry                          DebounceScheduler ◀─┘ (deletes)
//! ```
//!
//! Full rescans go through the [`ReconciliationEngine`] and do not depend on
//! live events. Bulk filesystem operations pause the monitor through the
//! reference-counted [`PauseController`].

pub mod debounce;
pub mod dispatcher;
pub mod pause;
pub mod registry;
mod watcher;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crossbeam_channel::{bounded, Sender};
use serde::Serialize;
use tracing::{debug, info, trace, warn};
use walkdir::WalkDir;

use crate::catalog::Catalog;
use crate::config::MonitorConfig;
use crate::error::Result;
use crate::file_type::{is_book_file, is_ignored_name};
use crate::model::{
    CatalogEntry, ChangeKind, FileChangeEvent, Library, LibraryFile, LibraryId, LibraryPath,
    RescanReport, WatchedPath,
};
use crate::notifier::{Notification, Notifier, TracingNotifier};
use crate::processor::{FileProcessor, HashingProcessor};
use crate::reconcile::ReconciliationEngine;
use crate::scheduler::TaskScheduler;
use crate::utils::{canonicalize_lossy, file_name_str};

use self::debounce::DebounceScheduler;
use self::dispatcher::{DispatchStats, EventDispatcher, EventHandler};
use self::pause::{PauseController, PendingResume};
use self::registry::{WatchBackend, WatchRegistry};
use self::watcher::{RawContext, RawEvent, RawEventWatcher};

/// Snapshot returned by [`LibraryMonitor::status`].
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub paused: bool,
    pub pause_holders: usize,
    pub watched: Vec<WatchedPath>,
    pub pending_deletions: usize,
    /// Raw OS events dropped because the raw queue was full.
    pub raw_dropped: usize,
    pub dispatch: DispatchStats,
}

/// State shared by the dispatcher thread, deferred deletions and the
/// public handle.
struct Core {
    me: Weak<Core>,
    config: MonitorConfig,
    catalog: Arc<dyn Catalog>,
    processor: Arc<dyn FileProcessor>,
    notifier: Arc<dyn Notifier>,
    registry: Arc<WatchRegistry>,
    pause: Arc<PauseController>,
    scheduler: Arc<TaskScheduler>,
    debounce: DebounceScheduler,
    engine: ReconciliationEngine,
}

impl EventHandler for Core {
    fn handle(&self, event: &FileChangeEvent) -> Result<()> {
        trace!(
            path = %event.file_path.display(),
            waited = ?event.observed_at.elapsed(),
            "handling event"
        );
        self.process_file(
            event.kind,
            event.library_id,
            &event.watched_folder,
            &event.file_path,
        )
    }
}

impl Core {
    fn process_file(
        &self,
        kind: ChangeKind,
        library_id: LibraryId,
        watched_folder: &Path,
        file_path: &Path,
    ) -> Result<()> {
        match kind {
            ChangeKind::Created => self.on_created(library_id, watched_folder, file_path),
            ChangeKind::Deleted => self.on_deleted(library_id, file_path),
        }
    }

    fn on_created(&self, library_id: LibraryId, watched_folder: &Path, file_path: &Path) -> Result<()> {
        if self.debounce.cancel(file_path) {
            debug!(path = %file_path.display(), "recreated within debounce window; keeping entry");
        }
        if !is_book_file(file_path) {
            return Ok(());
        }
        if !file_path.is_file() {
            debug!(path = %file_path.display(), "gone before it could be processed");
            return Ok(());
        }

        let library = self.catalog.library(library_id)?;
        let Some(file) = locate(&library, file_path) else {
            debug!(
                path = %file_path.display(),
                watched = %watched_folder.display(),
                library = %library_id,
                "not under any path of the library"
            );
            return Ok(());
        };

        let Some(entry) = self
            .catalog
            .find_by_file_name_and_library(&file.file_name, library_id)?
        else {
            let entry = self.processor.process(&file)?;
            info!(book = %entry.id, path = %file.path.display(), "book added");
            self.notifier.publish(Notification::BookAdded(entry));
            return Ok(());
        };

        match recorded_path(&library, &entry) {
            Some(old) if old == file.path => {
                trace!(book = %entry.id, "already catalogued at this path");
            }
            Some(old) if old.exists() => {
                debug!(
                    book = %entry.id,
                    existing = %old.display(),
                    duplicate = %file.path.display(),
                    "file name already catalogued elsewhere; skipping"
                );
            }
            old => {
                if let Some(old) = &old {
                    self.debounce.cancel(old);
                }
                let moved = CatalogEntry {
                    library_path_id: file.library_path_id,
                    sub_path: file.sub_path.clone(),
                    ..entry
                };
                self.catalog.save(&moved)?;
                info!(
                    book = %moved.id,
                    from = ?old,
                    to = %file.path.display(),
                    "book moved"
                );
            }
        }
        Ok(())
    }

    fn on_deleted(&self, library_id: LibraryId, file_path: &Path) -> Result<()> {
        if !is_book_file(file_path) {
            return self.on_tree_deleted(library_id, file_path);
        }
        let Some(name) = file_name_str(file_path).map(str::to_owned) else {
            return Ok(());
        };
        self.schedule_deletion(library_id, file_path.to_path_buf(), name)?;
        Ok(())
    }

    /// A directory left the tree. Every book recorded beneath it gets a
    /// deletion of its own, so a move back within the window still cancels.
    fn on_tree_deleted(&self, library_id: LibraryId, dir: &Path) -> Result<()> {
        let library = self.catalog.library(library_id)?;
        let mut scheduled = 0usize;
        for entry in self.catalog.find_all_for_library(library_id)? {
            let Some(path) = recorded_path(&library, &entry) else {
                continue;
            };
            if path != dir
                && path.starts_with(dir)
                && self.schedule_deletion(library_id, path, entry.file_name)?
            {
                scheduled += 1;
            }
        }
        if scheduled > 0 {
            debug!(dir = %dir.display(), scheduled, "directory gone; books pending deletion");
        }
        Ok(())
    }

    fn schedule_deletion(&self, library_id: LibraryId, path: PathBuf, name: String) -> Result<bool> {
        let me = self.me.clone();
        let key = path.clone();
        self.debounce.schedule(key, move || match me.upgrade() {
            Some(core) => core.confirm_deletion(library_id, &path, &name),
            None => Ok(()),
        })
    }

    /// Runs once the debounce window has passed without a matching create.
    fn confirm_deletion(&self, library_id: LibraryId, path: &Path, name: &str) -> Result<()> {
        if path.exists() {
            debug!(path = %path.display(), "file is back; nothing to delete");
            return Ok(());
        }
        let Some(entry) = self.catalog.find_by_file_name_and_library(name, library_id)? else {
            debug!(path = %path.display(), "not catalogued; nothing to delete");
            return Ok(());
        };

        let mut roots = self.registry.paths_for_library(library_id)?;
        if roots.is_empty() {
            roots = self
                .catalog
                .library(library_id)?
                .paths
                .iter()
                .map(|lp| canonicalize_lossy(&lp.path))
                .collect();
        }
        if let Some(found) = find_named(&roots, name, &self.config) {
            debug!(
                book = %entry.id,
                found = %found.display(),
                "file still present in the library; keeping entry"
            );
            return Ok(());
        }

        let removed = self.catalog.delete_by_ids(&[entry.id])?;
        if removed > 0 {
            info!(book = %entry.id, path = %path.display(), "book removed");
            self.notifier
                .publish(Notification::BooksRemoved(vec![entry.id]));
        }
        Ok(())
    }
}

/// Library path (canonicalized) containing `file`, deepest first.
fn locate(library: &Library, file: &Path) -> Option<LibraryFile> {
    library
        .paths
        .iter()
        .map(|lp| LibraryPath {
            path: canonicalize_lossy(&lp.path),
            ..lp.clone()
        })
        .filter(|lp| file.starts_with(&lp.path))
        .max_by_key(|lp| lp.path.components().count())
        .and_then(|lp| LibraryFile::locate(&lp, file))
}

fn recorded_path(library: &Library, entry: &CatalogEntry) -> Option<PathBuf> {
    library
        .paths
        .iter()
        .find(|lp| lp.id == entry.library_path_id)
        .map(|lp| entry.full_path(&canonicalize_lossy(&lp.path)))
}

/// First file called `name` below any of `roots`.
fn find_named(roots: &[PathBuf], name: &str, config: &MonitorConfig) -> Option<PathBuf> {
    roots.iter().filter(|r| r.is_dir()).find_map(|root| {
        WalkDir::new(root)
            .into_iter()
            .filter_entry(|e| {
                e.depth() == 0 || !is_ignored_name(&e.file_name().to_string_lossy())
            })
            .filter_map(|e| e.ok())
            .find(|e| {
                e.file_type().is_file()
                    && e.file_name().to_str() == Some(name)
                    && !config.is_ignored(e.path())
            })
            .map(|e| e.into_path())
    })
}

/// Builder for [`LibraryMonitor`]. Only the catalog is required; the rest
/// defaults to [`HashingProcessor`], [`TracingNotifier`] and the platform's
/// recommended `notify` watcher.
pub struct MonitorBuilder {
    config: MonitorConfig,
    catalog: Arc<dyn Catalog>,
    processor: Option<Arc<dyn FileProcessor>>,
    notifier: Option<Arc<dyn Notifier>>,
    backend: Option<Box<dyn WatchBackend>>,
}

impl MonitorBuilder {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self {
            config: MonitorConfig::default(),
            catalog,
            processor: None,
            notifier: None,
            backend: None,
        }
    }

    pub fn config(mut self, config: MonitorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn processor(mut self, processor: Arc<dyn FileProcessor>) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Replace the OS watcher. Raw events then have to be fed through
    /// [`LibraryMonitor::inject`].
    pub fn backend(mut self, backend: Box<dyn WatchBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn start(self) -> Result<LibraryMonitor> {
        let config = self.config;
        let catalog = self.catalog;
        let processor = self
            .processor
            .unwrap_or_else(|| Arc::new(HashingProcessor::new(Arc::clone(&catalog))) as Arc<dyn FileProcessor>);
        let notifier = self
            .notifier
            .unwrap_or_else(|| Arc::new(TracingNotifier) as Arc<dyn Notifier>);

        let (raw_tx, raw_rx) = bounded::<RawEvent>(config.raw_queue_capacity.max(1));
        let raw_dropped = Arc::new(AtomicUsize::new(0));
        let backend: Box<dyn WatchBackend> = match self.backend {
            Some(b) => b,
            None => Box::new(watcher::os_watcher(raw_tx.clone(), Arc::clone(&raw_dropped))?),
        };

        let registry = Arc::new(WatchRegistry::new(backend));
        let pause = Arc::new(PauseController::new());
        let scheduler = Arc::new(TaskScheduler::start(config.scheduler_workers)?);
        let debounce = DebounceScheduler::new(Arc::clone(&scheduler), config.debounce);
        let engine = ReconciliationEngine::new(
            Arc::clone(&catalog),
            Arc::clone(&processor),
            Arc::clone(&notifier),
            config.clone(),
        );

        let core = Arc::new_cyclic(|me| Core {
            me: me.clone(),
            config: config.clone(),
            catalog,
            processor,
            notifier,
            registry: Arc::clone(&registry),
            pause: Arc::clone(&pause),
            scheduler,
            debounce,
            engine,
        });

        let dispatcher = EventDispatcher::start(config.queue_capacity, core.clone())?;
        let raw = RawEventWatcher::spawn(
            raw_rx,
            RawContext {
                registry,
                pause,
                publisher: dispatcher.publisher(),
                config,
            },
        )?;

        info!("library monitor started");
        Ok(LibraryMonitor {
            core,
            dispatcher,
            raw,
            raw_tx,
            raw_dropped,
        })
    }
}

/// Entry point for everything outside the sync core.
pub struct LibraryMonitor {
    core: Arc<Core>,
    dispatcher: EventDispatcher,
    raw: RawEventWatcher,
    raw_tx: Sender<RawEvent>,
    raw_dropped: Arc<AtomicUsize>,
}

impl LibraryMonitor {
    pub fn builder(catalog: Arc<dyn Catalog>) -> MonitorBuilder {
        MonitorBuilder::new(catalog)
    }

    /// Watch every path of every library that has monitoring enabled.
    /// Returns how many paths were newly registered.
    pub fn register_libraries_for_monitoring(&self, libraries: &[Library]) -> Result<usize> {
        let mut registered = 0;
        for library in libraries {
            if !library.watch {
                debug!(library = %library.id, "monitoring disabled; skipping");
                continue;
            }
            for lp in &library.paths {
                if self.core.registry.register(&lp.path, library.id)? {
                    registered += 1;
                }
            }
        }
        Ok(registered)
    }

    pub fn register_path(&self, path: &Path, library_id: LibraryId) -> Result<bool> {
        self.core.registry.register(path, library_id)
    }

    /// Stop watching `path` and drop deletions still pending beneath it.
    pub fn unregister_path(&self, path: &Path) -> Result<bool> {
        let root = canonicalize_lossy(path);
        let cancelled = self.core.debounce.cancel_under(&root);
        if cancelled > 0 {
            debug!(path = %root.display(), cancelled, "dropped pending deletions");
        }
        self.core.registry.unregister(path)
    }

    pub fn unregister_library(&self, library_id: LibraryId) -> Result<usize> {
        for root in self.core.registry.paths_for_library(library_id)? {
            self.core.debounce.cancel_under(&root);
        }
        self.core.registry.unregister_library(library_id)
    }

    pub fn is_paused(&self) -> bool {
        self.core.pause.is_paused()
    }

    pub fn pause_monitoring(&self) {
        self.core.pause.pause();
    }

    pub fn resume_monitoring(&self) {
        self.core.pause.resume();
    }

    /// Release one pause after `delay` (the configured grace period when
    /// `None`).
    pub fn resume_monitoring_after(&self, delay: Option<Duration>) -> Result<PendingResume> {
        let delay = delay.unwrap_or(self.core.config.resume_grace);
        self.core.pause.resume_after(&self.core.scheduler, delay)
    }

    /// Run a bulk filesystem operation with monitoring paused. The caller
    /// is expected to reconcile the files it touches itself; live
    /// monitoring comes back after the grace period, even if `op` fails or
    /// panics.
    pub fn with_monitoring_paused<T, F>(&self, op: F) -> Result<(T, PendingResume)>
    where
        F: FnOnce() -> Result<T>,
    {
        self.pause_monitoring();
        let guard = ResumeOnDrop {
            monitor: self,
            armed: true,
        };
        let outcome = op();
        let pending = guard.release()?;
        outcome.map(|v| (v, pending))
    }

    /// Schedule the grace-period resume, or resume at once if the
    /// scheduler is gone.
    fn resume_after_grace(&self) -> Result<PendingResume> {
        self.resume_monitoring_after(None).map_err(|e| {
            self.resume_monitoring();
            e
        })
    }

    pub fn rescan_library(&self, library_id: LibraryId) -> Result<RescanReport> {
        let library = self.core.catalog.library(library_id)?;
        self.core.engine.rescan(&library)
    }

    /// Rescan every library. A library that fails is logged and skipped.
    pub fn rescan_all(&self) -> Result<Vec<RescanReport>> {
        let mut reports = Vec::new();
        for library in self.core.catalog.libraries()? {
            match self.core.engine.rescan(&library) {
                Ok(r) => reports.push(r),
                Err(e) => warn!(library = %library.id, error = %e, "rescan failed"),
            }
        }
        Ok(reports)
    }

    /// Handle one change synchronously, bypassing the queue.
    pub fn process_file(
        &self,
        kind: ChangeKind,
        library_id: LibraryId,
        watched_folder: &Path,
        file_path: &Path,
    ) -> Result<()> {
        self.core
            .process_file(kind, library_id, watched_folder, file_path)
    }

    /// Feed a raw `notify` event as if the OS watcher had reported it.
    /// Returns `false` if the raw queue is full or the monitor has shut
    /// down.
    pub fn inject(&self, event: notify::Event) -> bool {
        watcher::forward(&self.raw_tx, &self.raw_dropped, Ok(event))
    }

    pub fn status(&self) -> Result<MonitorStatus> {
        Ok(MonitorStatus {
            paused: self.core.pause.is_paused(),
            pause_holders: self.core.pause.holders(),
            watched: self.core.registry.watched_paths()?,
            pending_deletions: self.core.debounce.pending_count(),
            raw_dropped: self.raw_dropped.load(Ordering::Relaxed),
            dispatch: self.dispatcher.stats(),
        })
    }

    /// Stop the raw watcher, the dispatcher and the scheduler, joining
    /// their threads. Pending deletions are dropped.
    pub fn shutdown(&self) {
        self.raw.shutdown();
        self.dispatcher.shutdown();
        let dropped = self.core.debounce.cancel_all();
        if dropped > 0 {
            debug!(dropped, "pending deletions discarded");
        }
        self.core.scheduler.shutdown();
        debug!("library monitor stopped");
    }
}

/// Releases the pause taken by `with_monitoring_paused` when the
/// operation unwinds.
struct ResumeOnDrop<'a> {
    monitor: &'a LibraryMonitor,
    armed: bool,
}

impl ResumeOnDrop<'_> {
    fn release(mut self) -> Result<PendingResume> {
        self.armed = false;
        self.monitor.resume_after_grace()
    }
}

impl Drop for ResumeOnDrop<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!("bulk operation aborted; resuming monitoring after the grace period");
        if let Err(e) = self.monitor.resume_after_grace() {
            warn!(error = %e, "delayed resume failed; resumed immediately");
        }
    }
}

impl Drop for LibraryMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
