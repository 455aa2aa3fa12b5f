//! SQLite-backed [`Catalog`] plus the library administration the CLI needs.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::Local;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::file_type::BookFileType;
use crate::model::{
    BookId, CatalogEntry, Library, LibraryId, LibraryPath, LibraryPathId, NewCatalogEntry,
};
use crate::utils::to_db_path;

const ENTRY_COLUMNS: &str =
    "id, library_id, library_path_id, file_name, sub_path, file_type, content_hash, size";

pub struct SqliteCatalog {
    conn: Mutex<Connection>,
}

impl SqliteCatalog {
    /// Open (or create) the catalog at `path`, running migrations.
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        Ok(Self::from_connection(super::open(path)?))
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        Self::open(":memory:")
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| Error::poisoned("catalog"))
    }

    /* ─── library administration ──────────────────────────────────── */

    pub fn create_library(&self, name: &str, paths: &[PathBuf], watch: bool) -> Result<Library> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO libraries(name, watch, created_at) VALUES (?1, ?2, ?3)",
            params![name, watch, Local::now().to_rfc3339()],
        )?;
        let id = LibraryId(tx.last_insert_rowid());
        for p in paths {
            tx.execute(
                "INSERT INTO library_paths(library_id, path) VALUES (?1, ?2)",
                params![id.0, to_db_path(p)],
            )?;
        }
        tx.commit()?;
        info!(library = %id, name, paths = paths.len(), "library created");
        load_library(&conn, id)
    }

    pub fn add_library_path(&self, library_id: LibraryId, path: &Path) -> Result<LibraryPath> {
        let conn = self.conn()?;
        ensure_library(&conn, library_id)?;
        conn.execute(
            "INSERT INTO library_paths(library_id, path) VALUES (?1, ?2)",
            params![library_id.0, to_db_path(path)],
        )?;
        Ok(LibraryPath {
            id: LibraryPathId(conn.last_insert_rowid()),
            library_id,
            path: path.to_path_buf(),
        })
    }

    pub fn set_watch(&self, library_id: LibraryId, watch: bool) -> Result<()> {
        let conn = self.conn()?;
        let n = conn.execute(
            "UPDATE libraries SET watch = ?1 WHERE id = ?2",
            params![watch, library_id.0],
        )?;
        if n == 0 {
            return Err(Error::LibraryNotFound(library_id));
        }
        Ok(())
    }

    /// Deletes the library; its paths and books cascade.
    pub fn delete_library(&self, library_id: LibraryId) -> Result<()> {
        let conn = self.conn()?;
        let n = conn.execute("DELETE FROM libraries WHERE id = ?1", [library_id.0])?;
        if n == 0 {
            return Err(Error::LibraryNotFound(library_id));
        }
        info!(library = %library_id, "library deleted");
        Ok(())
    }

    pub fn count_books(&self, library_id: LibraryId) -> Result<usize> {
        let conn = self.conn()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM books WHERE library_id = ?1",
            [library_id.0],
            |r| r.get(0),
        )?;
        Ok(n as usize)
    }
}

impl Catalog for SqliteCatalog {
    fn library(&self, id: LibraryId) -> Result<Library> {
        let conn = self.conn()?;
        load_library(&conn, id)
    }

    fn libraries(&self) -> Result<Vec<Library>> {
        let conn = self.conn()?;
        let ids: Vec<i64> = conn
            .prepare("SELECT id FROM libraries ORDER BY id")?
            .query_map([], |r| r.get(0))?
            .collect::<std::result::Result<_, _>>()?;
        ids.into_iter()
            .map(|id| load_library(&conn, LibraryId(id)))
            .collect()
    }

    fn find_by_file_name_and_library(
        &self,
        file_name: &str,
        library_id: LibraryId,
    ) -> Result<Option<CatalogEntry>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM books
             WHERE library_id = ?1 AND file_name = ?2
             ORDER BY id LIMIT 1"
        );
        let raw = conn
            .query_row(&sql, params![library_id.0, file_name], RawEntry::from_row)
            .optional()?;
        raw.map(RawEntry::into_entry).transpose()
    }

    fn find_all_for_library(&self, library_id: LibraryId) -> Result<Vec<CatalogEntry>> {
        let conn = self.conn()?;
        ensure_library(&conn, library_id)?;
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM books WHERE library_id = ?1 ORDER BY id");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([library_id.0], RawEntry::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawEntry::into_entry).collect()
    }

    fn insert(&self, entry: NewCatalogEntry) -> Result<CatalogEntry> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO books(library_id, library_path_id, file_name, sub_path,
                               file_type, content_hash, size, added_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.library_id.0,
                entry.library_path_id.0,
                entry.file_name,
                entry.sub_path,
                entry.file_type.as_str(),
                entry.content_hash,
                entry.size.map(|s| s as i64),
                Local::now().to_rfc3339(),
            ],
        )?;
        let id = BookId(conn.last_insert_rowid());
        debug!(book = %id, file = %entry.file_name, "catalog insert");
        Ok(CatalogEntry {
            id,
            library_id: entry.library_id,
            library_path_id: entry.library_path_id,
            file_name: entry.file_name,
            sub_path: entry.sub_path,
            file_type: entry.file_type,
            content_hash: entry.content_hash,
            size: entry.size,
        })
    }

    fn save(&self, entry: &CatalogEntry) -> Result<()> {
        let conn = self.conn()?;
        update_entry(&conn, entry)
    }

    fn save_all(&self, entries: &[CatalogEntry]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for e in entries {
            update_entry(&tx, e)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn delete_by_ids(&self, ids: &[BookId]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut removed = 0usize;
        // stay well below SQLITE_MAX_VARIABLE_NUMBER
        for chunk in ids.chunks(500) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let sql = format!("DELETE FROM books WHERE id IN ({placeholders})");
            removed += tx.execute(&sql, params_from_iter(chunk.iter().map(|id| id.0)))?;
        }
        tx.commit()?;
        Ok(removed)
    }
}

/* ─── row helpers ─────────────────────────────────────────────────── */

fn ensure_library(conn: &Connection, id: LibraryId) -> Result<()> {
    let found: Option<i64> = conn
        .query_row("SELECT id FROM libraries WHERE id = ?1", [id.0], |r| r.get(0))
        .optional()?;
    found.map(|_| ()).ok_or(Error::LibraryNotFound(id))
}

fn load_library(conn: &Connection, id: LibraryId) -> Result<Library> {
    let head: Option<(String, bool)> = conn
        .query_row(
            "SELECT name, watch FROM libraries WHERE id = ?1",
            [id.0],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let (name, watch) = head.ok_or(Error::LibraryNotFound(id))?;

    let mut stmt =
        conn.prepare("SELECT id, path FROM library_paths WHERE library_id = ?1 ORDER BY id")?;
    let paths = stmt
        .query_map([id.0], |r| {
            Ok(LibraryPath {
                id: LibraryPathId(r.get(0)?),
                library_id: id,
                path: PathBuf::from(r.get::<_, String>(1)?),
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(Library {
        id,
        name,
        watch,
        paths,
    })
}

fn update_entry(conn: &Connection, entry: &CatalogEntry) -> Result<()> {
    let n = conn.execute(
        "UPDATE books
            SET library_path_id = ?1, file_name = ?2, sub_path = ?3,
                content_hash = ?4, size = ?5
          WHERE id = ?6",
        params![
            entry.library_path_id.0,
            entry.file_name,
            entry.sub_path,
            entry.content_hash,
            entry.size.map(|s| s as i64),
            entry.id.0,
        ],
    )?;
    if n == 0 {
        return Err(Error::EntryNotFound(entry.id));
    }
    Ok(())
}

struct RawEntry {
    id: i64,
    library_id: i64,
    library_path_id: i64,
    file_name: String,
    sub_path: String,
    file_type: String,
    content_hash: Option<String>,
    size: Option<i64>,
}

impl RawEntry {
    fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            library_id: r.get(1)?,
            library_path_id: r.get(2)?,
            file_name: r.get(3)?,
            sub_path: r.get(4)?,
            file_type: r.get(5)?,
            content_hash: r.get(6)?,
            size: r.get(7)?,
        })
    }

    fn into_entry(self) -> Result<CatalogEntry> {
        let file_type: BookFileType = self.file_type.parse().map_err(Error::Database)?;
        Ok(CatalogEntry {
            id: BookId(self.id),
            library_id: LibraryId(self.library_id),
            library_path_id: LibraryPathId(self.library_path_id),
            file_name: self.file_name,
            sub_path: self.sub_path,
            file_type,
            content_hash: self.content_hash,
            size: self.size.map(|s| s as u64),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(lib: &Library, name: &str, sub: &str) -> NewCatalogEntry {
        NewCatalogEntry {
            library_id: lib.id,
            library_path_id: lib.paths[0].id,
            file_name: name.into(),
            sub_path: sub.into(),
            file_type: BookFileType::Epub,
            content_hash: None,
            size: Some(3),
        }
    }

    #[test]
    fn create_and_load_library() {
        let cat = SqliteCatalog::open_in_memory().unwrap();
        let lib = cat
            .create_library("main", &[PathBuf::from("/a"), PathBuf::from("/b")], true)
            .unwrap();
        assert_eq!(lib.paths.len(), 2);
        assert_eq!(cat.library(lib.id).unwrap(), lib);
        assert_eq!(cat.libraries().unwrap(), vec![lib]);
    }

    #[test]
    fn missing_library_is_typed() {
        let cat = SqliteCatalog::open_in_memory().unwrap();
        let err = cat.library(LibraryId(42)).unwrap_err();
        assert!(matches!(err, Error::LibraryNotFound(LibraryId(42))));
        assert!(cat.find_all_for_library(LibraryId(42)).unwrap_err().is_data_access());
    }

    #[test]
    fn insert_find_save_delete() {
        let cat = SqliteCatalog::open_in_memory().unwrap();
        let lib = cat.create_library("main", &[PathBuf::from("/a")], true).unwrap();

        let e = cat.insert(entry(&lib, "dune.epub", "")).unwrap();
        let mut found = cat
            .find_by_file_name_and_library("dune.epub", lib.id)
            .unwrap()
            .unwrap();
        assert_eq!(found, e);

        found.sub_path = "sci-fi".into();
        cat.save(&found).unwrap();
        assert_eq!(cat.find_all_for_library(lib.id).unwrap()[0].sub_path, "sci-fi");

        assert_eq!(cat.delete_by_ids(&[e.id, BookId(999)]).unwrap(), 1);
        assert!(cat
            .find_by_file_name_and_library("dune.epub", lib.id)
            .unwrap()
            .is_none());
        assert_eq!(cat.delete_by_ids(&[]).unwrap(), 0);
    }

    #[test]
    fn save_of_deleted_row_fails() {
        let cat = SqliteCatalog::open_in_memory().unwrap();
        let lib = cat.create_library("main", &[PathBuf::from("/a")], true).unwrap();
        let e = cat.insert(entry(&lib, "x.epub", "")).unwrap();
        cat.delete_by_ids(&[e.id]).unwrap();
        let err = cat.save(&e).unwrap_err();
        assert!(matches!(err, Error::EntryNotFound(id) if id == e.id));
        assert!(err.is_data_access());
        assert!(cat.save_all(std::slice::from_ref(&e)).unwrap_err().is_data_access());
    }

    #[test]
    fn deleting_library_cascades_books() {
        let cat = SqliteCatalog::open_in_memory().unwrap();
        let lib = cat.create_library("main", &[PathBuf::from("/a")], true).unwrap();
        cat.insert(entry(&lib, "x.epub", "")).unwrap();
        cat.delete_library(lib.id).unwrap();
        assert!(cat.delete_library(lib.id).is_err());
        let conn = cat.conn().unwrap();
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM books", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn insert_into_deleted_library_is_data_access() {
        let cat = SqliteCatalog::open_in_memory().unwrap();
        let lib = cat.create_library("main", &[PathBuf::from("/a")], true).unwrap();
        cat.delete_library(lib.id).unwrap();
        let err = cat.insert(entry(&lib, "x.epub", "")).unwrap_err();
        assert!(err.is_data_access(), "got: {err}");
    }
}
