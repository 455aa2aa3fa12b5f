//! tests cli_library.rs
//! Library management, rescans and the watch loop end to end.

use predicates::prelude::*;
use predicates::str;
use tempfile::tempdir;

mod util;
use util::{library_dir, shelf};

/* ───────────────────────── LIBRARY ───────────────────────────── */

#[test]
fn init_is_idempotent() {
    let tmp = tempdir().unwrap();
    shelf(&tmp).arg("init").assert().success();
    shelf(&tmp)
        .arg("init")
        .assert()
        .success()
        .stdout(str::contains("Catalog ready"));
    assert!(tmp.path().join("shelf.db").exists());
}

#[test]
fn add_list_and_remove_library() {
    let tmp = tempdir().unwrap();
    let root = library_dir(&tmp, "books", &[]);
    let more = library_dir(&tmp, "more", &[]);

    shelf(&tmp)
        .args(["library", "add", "main", &root.to_string_lossy()])
        .assert()
        .success()
        .stdout(str::contains("Created library 'main'"));

    shelf(&tmp)
        .args(["library", "add-path", "main", &more.to_string_lossy()])
        .assert()
        .success();

    shelf(&tmp)
        .args(["library", "set-watch", "main", "false"])
        .assert()
        .success()
        .stdout(str::contains("disabled"));

    shelf(&tmp)
        .args(["library", "ls"])
        .assert()
        .success()
        .stdout(str::contains("main").and(str::contains("manual")))
        .stdout(str::contains("more"));

    shelf(&tmp)
        .args(["--format", "json", "library", "ls"])
        .assert()
        .success()
        .stdout(str::contains("\"name\":\"main\"").and(str::contains("\"books\":0")));

    shelf(&tmp)
        .args(["library", "rm", "main"])
        .assert()
        .success();
    shelf(&tmp)
        .args(["library", "ls"])
        .assert()
        .success()
        .stdout(str::is_empty());
}

/* ───────────────────────── RESCAN ────────────────────────────── */

#[test]
fn rescan_ingests_then_is_quiet() {
    let tmp = tempdir().unwrap();
    let root = library_dir(
        &tmp,
        "books",
        &["dune.epub", "comics/watchmen.cbz", "notes.txt"],
    );
    shelf(&tmp)
        .args(["library", "add", "main", &root.to_string_lossy()])
        .assert()
        .success();

    shelf(&tmp)
        .args(["rescan", "main"])
        .assert()
        .success()
        .stdout(str::contains("0 moved, 0 deleted, 2 added, 0 failed"));

    std::fs::create_dir_all(root.join("sci-fi")).unwrap();
    std::fs::rename(root.join("dune.epub"), root.join("sci-fi/dune.epub")).unwrap();

    shelf(&tmp)
        .args(["rescan", "--all"])
        .assert()
        .success()
        .stdout(str::contains("1 moved, 0 deleted, 0 added"));

    shelf(&tmp)
        .args(["--format", "json", "rescan", "1"])
        .assert()
        .success()
        .stdout(str::contains("\"moved\":0").and(str::contains("\"added\":0")));
}

/* ───────────────────────── WATCH ─────────────────────────────── */

#[test]
fn watch_reports_rescan_results_and_exits() {
    let tmp = tempdir().unwrap();
    let root = library_dir(&tmp, "books", &["a.epub", "b.pdf"]);
    shelf(&tmp)
        .args(["library", "add", "main", &root.to_string_lossy()])
        .assert()
        .success();

    shelf(&tmp)
        .args(["watch", "--rescan-first", "--exit-after", "1"])
        .assert()
        .success()
        .stdout(str::contains("added").and(str::contains("a.epub")));

    shelf(&tmp)
        .args(["library", "ls"])
        .assert()
        .success()
        .stdout(str::contains("2 book(s)"));
}

#[test]
fn completions_do_not_need_a_database() {
    let tmp = tempdir().unwrap();
    shelf(&tmp)
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(str::contains("shelf"));
    assert!(!tmp.path().join("shelf.db").exists());
}
