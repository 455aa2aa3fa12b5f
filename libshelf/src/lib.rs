//! libshelf – public API surface for the shelf sync core.
//!
//! Keeps a catalog of book files consistent with the directories they live
//! in: live monitoring through [`LibraryMonitor`], on-demand reconciliation
//! through [`ReconciliationEngine`], and a pause/resume contract for bulk
//! operations that move files around themselves.
//!
//! Down-stream crates (`cli-bin`, tests) should depend on the items
//! re-exported here rather than reaching into internal modules.

pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod file_type;
pub mod logging;
pub mod model;
pub mod monitor;
pub mod notifier;
pub mod processor;
pub mod reconcile;
pub mod scheduler;
pub mod utils;

#[cfg(test)]
mod config_tests;
#[cfg(test)]
mod logging_tests;
#[cfg(test)]
mod test_utils;

use std::path::Path;
use std::sync::Arc;

pub use catalog::Catalog;
pub use config::{Config, MonitorConfig};
pub use db::SqliteCatalog;
pub use error::{Error, Result};
pub use file_type::BookFileType;
pub use model::{
    BookId, CatalogEntry, ChangeKind, FileChangeEvent, Library, LibraryFile, LibraryId,
    LibraryPath, LibraryPathId, RescanReport, WatchedPath,
};
pub use monitor::pause::{PauseController, PendingResume};
pub use monitor::{LibraryMonitor, MonitorBuilder, MonitorStatus};
pub use notifier::{ChannelNotifier, Notification, Notifier, TracingNotifier};
pub use processor::{FileProcessor, HashingProcessor};
pub use reconcile::ReconciliationEngine;

/// Primary façade – open the catalog, then rescan or start monitoring.
pub struct Shelf {
    cfg: Config,
    catalog: Arc<SqliteCatalog>,
}

impl Shelf {
    /// Load configuration from the environment and open (or create) the DB.
    pub fn open_default() -> anyhow::Result<Self> {
        let cfg = Config::load()?;
        let catalog = Arc::new(SqliteCatalog::open(&cfg.db_path)?);
        Ok(Self { cfg, catalog })
    }

    /// Open an explicit DB path – handy for tests or headless tools.
    pub fn open_at<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let cfg = Config {
            db_path: path.as_ref().to_path_buf(),
            monitor: MonitorConfig::from_env()?,
        };
        let catalog = Arc::new(SqliteCatalog::open(&cfg.db_path)?);
        Ok(Self { cfg, catalog })
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn catalog(&self) -> &Arc<SqliteCatalog> {
        &self.catalog
    }

    /// One-off reconciliation without live monitoring.
    pub fn rescan(&self, library_id: LibraryId, notifier: Arc<dyn Notifier>) -> Result<RescanReport> {
        let library = self.catalog.library(library_id)?;
        self.engine(notifier).rescan(&library)
    }

    /// Rescan every library, skipping (and logging) the ones that fail.
    pub fn rescan_all(&self, notifier: Arc<dyn Notifier>) -> Result<Vec<RescanReport>> {
        let engine = self.engine(notifier);
        let mut reports = Vec::new();
        for library in self.catalog.libraries()? {
            match engine.rescan(&library) {
                Ok(r) => reports.push(r),
                Err(e) => tracing::warn!(library = %library.id, error = %e, "rescan failed"),
            }
        }
        Ok(reports)
    }

    /// Start live monitoring and register every library with watching
    /// enabled. `config` usually starts from [`Config::monitor`].
    pub fn start_monitor(
        &self,
        config: MonitorConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Result<LibraryMonitor> {
        let catalog: Arc<dyn Catalog> = self.catalog.clone();
        let monitor = LibraryMonitor::builder(catalog)
            .config(config)
            .notifier(notifier)
            .start()?;
        let libraries = self.catalog.libraries()?;
        let watched = monitor.register_libraries_for_monitoring(&libraries)?;
        tracing::info!(libraries = libraries.len(), paths = watched, "monitoring registered");
        Ok(monitor)
    }

    fn engine(&self, notifier: Arc<dyn Notifier>) -> ReconciliationEngine {
        let catalog: Arc<dyn Catalog> = self.catalog.clone();
        let processor = Arc::new(HashingProcessor::new(Arc::clone(&catalog)));
        ReconciliationEngine::new(catalog, processor, notifier, self.cfg.monitor.clone())
    }
}
