//! Ingestion of newly discovered files.
//!
//! Format-specific metadata extraction lives outside the sync core; the
//! monitor only needs something that turns a [`LibraryFile`] into a
//! persisted [`CatalogEntry`].

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::model::{CatalogEntry, LibraryFile, NewCatalogEntry};

pub trait FileProcessor: Send + Sync {
    fn process(&self, file: &LibraryFile) -> Result<CatalogEntry>;
}

/// Default processor: records location, type, size and a SHA-256 of the
/// file contents.
pub struct HashingProcessor {
    catalog: Arc<dyn Catalog>,
}

impl HashingProcessor {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self { catalog }
    }
}

impl FileProcessor for HashingProcessor {
    fn process(&self, file: &LibraryFile) -> Result<CatalogEntry> {
        let meta = std::fs::metadata(&file.path)?;
        if !meta.is_file() {
            return Err(Error::Processing {
                path: file.path.clone(),
                reason: "not a regular file".into(),
            });
        }
        let hash = content_hash(&file.path)?;
        debug!(file = %file.path.display(), %hash, "hashed");

        self.catalog.insert(NewCatalogEntry {
            library_id: file.library_id,
            library_path_id: file.library_path_id,
            file_name: file.file_name.clone(),
            sub_path: file.sub_path.clone(),
            file_type: file.file_type,
            content_hash: Some(hash),
            size: Some(meta.len()),
        })
    }
}

/// Lower-case hex SHA-256 of the file contents.
pub fn content_hash(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
