//! Persistence seam used by the monitor and the reconciliation engine.
//!
//! The sync core never owns catalog rows; it looks them up, moves them and
//! deletes them only through this trait. Every call is its own transaction.

use crate::error::Result;
use crate::model::{BookId, CatalogEntry, Library, LibraryId, NewCatalogEntry};

pub trait Catalog: Send + Sync {
    /// Errors with [`crate::Error::LibraryNotFound`] when the library is gone.
    fn library(&self, id: LibraryId) -> Result<Library>;

    fn libraries(&self) -> Result<Vec<Library>>;

    /// First entry (lowest id) with this file name in the library.
    fn find_by_file_name_and_library(
        &self,
        file_name: &str,
        library_id: LibraryId,
    ) -> Result<Option<CatalogEntry>>;

    fn find_all_for_library(&self, library_id: LibraryId) -> Result<Vec<CatalogEntry>>;

    fn insert(&self, entry: NewCatalogEntry) -> Result<CatalogEntry>;

    /// Persist location and content fields of an existing entry.
    fn save(&self, entry: &CatalogEntry) -> Result<()>;

    /// Save several entries in one transaction.
    fn save_all(&self, entries: &[CatalogEntry]) -> Result<()> {
        for e in entries {
            self.save(e)?;
        }
        Ok(())
    }

    /// Returns the number of rows removed.
    fn delete_by_ids(&self, ids: &[BookId]) -> Result<usize>;
}
