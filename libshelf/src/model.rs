//! Plain data shared between the catalog, the monitor and the CLI.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;

use crate::file_type::BookFileType;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(LibraryId);
id_newtype!(LibraryPathId);
id_newtype!(BookId);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LibraryPath {
    pub id: LibraryPathId,
    pub library_id: LibraryId,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Library {
    pub id: LibraryId,
    pub name: String,
    /// Whether live filesystem monitoring is enabled for this library.
    pub watch: bool,
    pub paths: Vec<LibraryPath>,
}

impl Library {
    /// The configured root that contains `file`, deepest root first.
    pub fn path_containing(&self, file: &Path) -> Option<&LibraryPath> {
        self.paths
            .iter()
            .filter(|lp| file.starts_with(&lp.path))
            .max_by_key(|lp| lp.path.components().count())
    }
}

/// A directory registered with the OS watch primitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct WatchedPath {
    pub path: PathBuf,
    pub library_id: LibraryId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Deleted,
}

#[derive(Debug, Clone)]
pub struct FileChangeEvent {
    pub file_path: PathBuf,
    pub kind: ChangeKind,
    pub watched_folder: PathBuf,
    pub library_id: LibraryId,
    pub observed_at: Instant,
}

/// One persisted book file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    pub id: BookId,
    pub library_id: LibraryId,
    pub library_path_id: LibraryPathId,
    pub file_name: String,
    /// Parent directory relative to the library path, `/`-separated.
    pub sub_path: String,
    pub file_type: BookFileType,
    pub content_hash: Option<String>,
    pub size: Option<u64>,
}

impl CatalogEntry {
    /// Absolute location of the entry given the root of its library path.
    pub fn full_path(&self, root: &Path) -> PathBuf {
        join_sub_path(root, &self.sub_path).join(&self.file_name)
    }
}

/// Insert payload for [`crate::catalog::Catalog::insert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCatalogEntry {
    pub library_id: LibraryId,
    pub library_path_id: LibraryPathId,
    pub file_name: String,
    pub sub_path: String,
    pub file_type: BookFileType,
    pub content_hash: Option<String>,
    pub size: Option<u64>,
}

/// A file discovered on disk that belongs to a library path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryFile {
    pub library_id: LibraryId,
    pub library_path_id: LibraryPathId,
    pub root: PathBuf,
    pub path: PathBuf,
    pub file_name: String,
    pub sub_path: String,
    pub file_type: BookFileType,
}

impl LibraryFile {
    /// Build the descriptor for `path` under `library_path`, or `None` when
    /// the path is outside the root, has no file name or an unknown extension.
    pub fn locate(library_path: &LibraryPath, path: &Path) -> Option<Self> {
        let file_type = BookFileType::from_path(path)?;
        let file_name = path.file_name()?.to_str()?.to_owned();
        let sub_path = sub_path_of(&library_path.path, path)?;
        Some(Self {
            library_id: library_path.library_id,
            library_path_id: library_path.id,
            root: library_path.path.clone(),
            path: path.to_path_buf(),
            file_name,
            sub_path,
            file_type,
        })
    }
}

/// Outcome of a full-library reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RescanReport {
    pub library_id: Option<LibraryId>,
    pub moved: usize,
    pub deleted: usize,
    pub added: usize,
    pub failed: usize,
}

impl RescanReport {
    pub fn mutations(&self) -> usize {
        self.moved + self.deleted + self.added
    }
}

/// Parent directory of `file` relative to `root`, using `/` separators.
pub fn sub_path_of(root: &Path, file: &Path) -> Option<String> {
    let parent = file.parent()?.strip_prefix(root).ok()?;
    let parts: Vec<String> = parent
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

pub fn join_sub_path(root: &Path, sub_path: &str) -> PathBuf {
    sub_path
        .split('/')
        .filter(|s| !s.is_empty())
        .fold(root.to_path_buf(), |acc, seg| acc.join(seg))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lp(id: i64, path: &str) -> LibraryPath {
        LibraryPath {
            id: LibraryPathId(id),
            library_id: LibraryId(1),
            path: PathBuf::from(path),
        }
    }

    #[test]
    fn sub_path_is_relative_parent() {
        let root = Path::new("/lib");
        assert_eq!(sub_path_of(root, Path::new("/lib/a.epub")).unwrap(), "");
        assert_eq!(
            sub_path_of(root, Path::new("/lib/x/y/a.epub")).unwrap(),
            "x/y"
        );
        assert!(sub_path_of(root, Path::new("/other/a.epub")).is_none());
    }

    #[test]
    fn full_path_round_trips_sub_path() {
        let entry = CatalogEntry {
            id: BookId(1),
            library_id: LibraryId(1),
            library_path_id: LibraryPathId(1),
            file_name: "book.epub".into(),
            sub_path: "a/b".into(),
            file_type: BookFileType::Epub,
            content_hash: None,
            size: None,
        };
        assert_eq!(
            entry.full_path(Path::new("/lib")),
            PathBuf::from("/lib/a/b/book.epub")
        );
    }

    #[test]
    fn locate_rejects_unknown_extension() {
        let root = lp(1, "/lib");
        assert!(LibraryFile::locate(&root, Path::new("/lib/notes.txt")).is_none());
        let f = LibraryFile::locate(&root, Path::new("/lib/sci-fi/dune.EPUB")).unwrap();
        assert_eq!(f.file_name, "dune.EPUB");
        assert_eq!(f.sub_path, "sci-fi");
        assert_eq!(f.file_type, BookFileType::Epub);
    }

    #[test]
    fn path_containing_prefers_deepest_root() {
        let lib = Library {
            id: LibraryId(1),
            name: "main".into(),
            watch: true,
            paths: vec![lp(1, "/lib"), lp(2, "/lib/comics")],
        };
        let hit = lib.path_containing(Path::new("/lib/comics/x.cbz")).unwrap();
        assert_eq!(hit.id, LibraryPathId(2));
        assert!(lib.path_containing(Path::new("/elsewhere/x.cbz")).is_none());
    }
}
