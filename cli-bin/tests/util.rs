//! tests/util.rs
//! Small helpers shared across integration tests.

#![allow(dead_code)]

use assert_cmd::Command;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Absolute path to the freshly-built `shelf` binary.
pub fn bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_shelf"))
}

/// Build a `Command` for `shelf` whose `SHELF_DB_PATH` is
/// `<tmp>/shelf.db`.
pub fn shelf(tmp: &TempDir) -> Command {
    let db_path: &Path = &tmp.path().join("shelf.db");
    let mut cmd = Command::new(bin());
    cmd.env("SHELF_DB_PATH", db_path);
    cmd.env_remove("SHELF_IGNORE");
    cmd
}

/// Create `<tmp>/<name>` with the given book files (relative paths).
pub fn library_dir(tmp: &TempDir, name: &str, files: &[&str]) -> PathBuf {
    let root = tmp.path().join(name);
    std::fs::create_dir_all(&root).unwrap();
    for f in files {
        let p = root.join(f);
        std::fs::create_dir_all(p.parent().unwrap()).unwrap();
        std::fs::write(&p, f.as_bytes()).unwrap();
    }
    root
}
