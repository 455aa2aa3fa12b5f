//! Which directories are watched, and for which library.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::model::{LibraryId, WatchedPath};
use crate::utils::canonicalize_lossy;

/// The OS-level subscription primitive.
pub trait WatchBackend: Send {
    fn watch(&mut self, path: &Path) -> Result<()>;
    fn unwatch(&mut self, path: &Path) -> Result<()>;
}

impl WatchBackend for RecommendedWatcher {
    fn watch(&mut self, path: &Path) -> Result<()> {
        Watcher::watch(self, path, RecursiveMode::Recursive).map_err(Error::from)
    }

    fn unwatch(&mut self, path: &Path) -> Result<()> {
        Watcher::unwatch(self, path).map_err(Error::from)
    }
}

#[derive(Default)]
struct Paths {
    watched: HashMap<PathBuf, LibraryId>,
    /// Claimed by a `register` whose OS subscription is still in progress.
    reserved: HashSet<PathBuf>,
}

/// Path bookkeeping and the OS subscription sit behind separate locks. The
/// backend may wait on the thread that delivers raw events, and the raw
/// loop needs `paths` to resolve them, so `paths` is never held across a
/// backend call.
pub struct WatchRegistry {
    paths: Mutex<Paths>,
    backend: Mutex<Box<dyn WatchBackend>>,
}

impl WatchRegistry {
    pub fn new(backend: Box<dyn WatchBackend>) -> Self {
        Self {
            paths: Mutex::new(Paths::default()),
            backend: Mutex::new(backend),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Paths>> {
        self.paths.lock().map_err(|_| Error::poisoned("watch registry"))
    }

    fn backend(&self) -> Result<MutexGuard<'_, Box<dyn WatchBackend>>> {
        self.backend.lock().map_err(|_| Error::poisoned("watch backend"))
    }

    /// Subscribe `path` (recursively) for `library_id`.
    ///
    /// Returns `false` without side effects when the path is already
    /// watched, overlaps another watched tree, is not a directory, or the
    /// OS subscription fails.
    pub fn register(&self, path: &Path, library_id: LibraryId) -> Result<bool> {
        if !path.is_dir() {
            warn!(path = %path.display(), library = %library_id, "not a directory; not watching");
            return Ok(false);
        }
        let path = canonicalize_lossy(path);

        {
            let mut paths = self.lock()?;
            if let Some(owner) = paths.watched.get(&path) {
                warn!(path = %path.display(), owner = %owner, "path already watched");
                return Ok(false);
            }
            if paths.reserved.contains(&path) {
                warn!(path = %path.display(), "path is being registered already");
                return Ok(false);
            }
            let taken = paths
                .watched
                .iter()
                .map(|(p, owner)| (p, Some(*owner)))
                .chain(paths.reserved.iter().map(|p| (p, None)))
                .find(|(p, _)| overlaps(p, &path))
                .map(|(p, owner)| (p.clone(), owner));
            if let Some((other, owner)) = taken {
                warn!(
                    path = %path.display(),
                    existing = %other.display(),
                    owner = ?owner,
                    "path overlaps an already watched tree"
                );
                return Ok(false);
            }
            paths.reserved.insert(path.clone());
        }

        let subscribed = self.backend().and_then(|mut b| b.watch(&path));

        let mut paths = self.lock()?;
        paths.reserved.remove(&path);
        if let Err(e) = subscribed {
            warn!(path = %path.display(), error = %e, "failed to watch path");
            return Ok(false);
        }
        paths.watched.insert(path.clone(), library_id);
        info!(path = %path.display(), library = %library_id, "watching");
        Ok(true)
    }

    /// Returns whether anything was removed.
    pub fn unregister(&self, path: &Path) -> Result<bool> {
        let key = {
            let mut paths = self.lock()?;
            let key = if paths.watched.contains_key(path) {
                path.to_path_buf()
            } else {
                canonicalize_lossy(path)
            };
            if paths.watched.remove(&key).is_none() {
                debug!(path = %path.display(), "unregister: not watched");
                return Ok(false);
            }
            key
        };
        if let Err(e) = self.backend()?.unwatch(&key) {
            // the directory may already be gone; the OS drops the watch itself
            debug!(path = %key.display(), error = %e, "unwatch failed");
        }
        info!(path = %key.display(), "stopped watching");
        Ok(true)
    }

    pub fn unregister_library(&self, library_id: LibraryId) -> Result<usize> {
        let mut removed = 0;
        for p in self.paths_for_library(library_id)? {
            if self.unregister(&p)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Deepest watched root containing `file`.
    pub fn resolve(&self, file: &Path) -> Result<Option<WatchedPath>> {
        let paths = self.lock()?;
        Ok(paths
            .watched
            .iter()
            .filter(|(root, _)| file.starts_with(root))
            .max_by_key(|(root, _)| root.components().count())
            .map(|(root, id)| WatchedPath {
                path: root.clone(),
                library_id: *id,
            }))
    }

    pub fn paths_for_library(&self, library_id: LibraryId) -> Result<Vec<PathBuf>> {
        let paths = self.lock()?;
        let mut out: Vec<PathBuf> = paths
            .watched
            .iter()
            .filter(|(_, id)| **id == library_id)
            .map(|(p, _)| p.clone())
            .collect();
        out.sort();
        Ok(out)
    }

    pub fn watched_paths(&self) -> Result<Vec<WatchedPath>> {
        let paths = self.lock()?;
        let mut out: Vec<WatchedPath> = paths
            .watched
            .iter()
            .map(|(p, id)| WatchedPath {
                path: p.clone(),
                library_id: *id,
            })
            .collect();
        out.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(out)
    }

    pub fn is_watched(&self, path: &Path) -> bool {
        self.lock()
            .map(|paths| {
                paths.watched.contains_key(path)
                    || paths.watched.contains_key(&canonicalize_lossy(path))
            })
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.lock().map(|paths| paths.watched.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn overlaps(existing: &Path, candidate: &Path) -> bool {
    if existing.starts_with(candidate) || candidate.starts_with(existing) {
        return true;
    }
    // same directory reached through a different spelling (bind mount, ...)
    same_file::is_same_file(existing, candidate).unwrap_or(false)
}
