//! tests neg.rs
//! Negative-path integration tests (“should fail”).

use predicates::str;
use tempfile::tempdir;

mod util;
use util::{library_dir, shelf};

#[test]
fn add_library_with_missing_dir_should_fail() {
    let tmp = tempdir().unwrap();
    shelf(&tmp)
        .args(["library", "add", "main", "/definitely/not/here"])
        .assert()
        .failure()
        .stderr(str::contains("no such directory"));
}

#[test]
fn duplicate_library_path_should_fail() {
    let tmp = tempdir().unwrap();
    let root = library_dir(&tmp, "books", &[]);
    shelf(&tmp)
        .args(["library", "add", "one", &root.to_string_lossy()])
        .assert()
        .success();
    shelf(&tmp)
        .args(["library", "add", "two", &root.to_string_lossy()])
        .assert()
        .failure();
}

#[test]
fn rescan_unknown_library_should_fail() {
    let tmp = tempdir().unwrap();
    shelf(&tmp).arg("init").assert().success();
    shelf(&tmp)
        .args(["rescan", "nope"])
        .assert()
        .failure()
        .stderr(str::contains("library not found"));
}

#[test]
fn rescan_needs_a_target() {
    let tmp = tempdir().unwrap();
    shelf(&tmp).arg("rescan").assert().failure();
}

#[test]
fn bad_env_config_should_fail() {
    let tmp = tempdir().unwrap();
    shelf(&tmp)
        .env("SHELF_DEBOUNCE_MS", "soon")
        .arg("init")
        .assert()
        .failure()
        .stderr(str::contains("SHELF_DEBOUNCE_MS"));
}
