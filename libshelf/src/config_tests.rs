// libshelf/src/config_tests.rs

use super::config::{parse_ignore, Config, MonitorConfig};
use crate::test_utils::ENV_MUTEX;
use std::env;
use std::path::Path;
use std::time::Duration;
use tempfile::tempdir;

const MONITOR_VARS: [&str; 5] = [
    "SHELF_DEBOUNCE_MS",
    "SHELF_RESUME_GRACE_MS",
    "SHELF_QUEUE_CAPACITY",
    "SHELF_RESCAN_INTERVAL_SECS",
    "SHELF_IGNORE",
];

fn clear_monitor_vars() {
    for k in MONITOR_VARS {
        env::remove_var(k);
    }
}

#[test]
fn load_env_override() {
    let _guard = ENV_MUTEX.lock().unwrap();
    clear_monitor_vars();
    let tmp = tempdir().unwrap();
    let db = tmp.path().join("nested").join("custom.db");
    env::set_var("SHELF_DB_PATH", &db);
    let cfg = Config::load().unwrap();
    assert_eq!(cfg.db_path, db);
    assert!(db.parent().unwrap().is_dir());
    env::remove_var("SHELF_DB_PATH");
}

#[test]
fn load_xdg_or_fallback() {
    let _guard = ENV_MUTEX.lock().unwrap();
    clear_monitor_vars();
    env::remove_var("SHELF_DB_PATH");
    let cfg = Config::load().unwrap();
    assert!(cfg.db_path.to_string_lossy().ends_with("shelf.db"));
}

#[test]
fn monitor_defaults() {
    let cfg = MonitorConfig::default();
    assert_eq!(cfg.debounce, Duration::from_secs(3));
    assert_eq!(cfg.resume_grace, Duration::from_secs(5));
    assert_eq!(cfg.queue_capacity, 1_024);
    assert_eq!(cfg.scheduler_workers, 2);
    assert!(cfg.rescan_interval.is_none());
}

#[test]
fn monitor_env_overrides() {
    let _guard = ENV_MUTEX.lock().unwrap();
    clear_monitor_vars();
    env::set_var("SHELF_DEBOUNCE_MS", "250");
    env::set_var("SHELF_RESUME_GRACE_MS", "1000");
    env::set_var("SHELF_QUEUE_CAPACITY", "16");
    env::set_var("SHELF_RESCAN_INTERVAL_SECS", "3600");
    env::set_var("SHELF_IGNORE", "*/@eaDir/*, */trash/*");

    let cfg = MonitorConfig::from_env().unwrap();
    assert_eq!(cfg.debounce, Duration::from_millis(250));
    assert_eq!(cfg.resume_grace, Duration::from_secs(1));
    assert_eq!(cfg.queue_capacity, 16);
    assert_eq!(cfg.rescan_interval, Some(Duration::from_secs(3600)));
    assert!(cfg.is_ignored(Path::new("/lib/@eaDir/x.epub")));
    assert!(!cfg.is_ignored(Path::new("/lib/books/x.epub")));

    clear_monitor_vars();
}

#[test]
fn monitor_env_rejects_garbage() {
    let _guard = ENV_MUTEX.lock().unwrap();
    clear_monitor_vars();
    env::set_var("SHELF_DEBOUNCE_MS", "soon");
    let err = MonitorConfig::from_env().unwrap_err();
    assert!(err.to_string().contains("SHELF_DEBOUNCE_MS"), "got: {err}");
    env::set_var("SHELF_DEBOUNCE_MS", "10");
    env::set_var("SHELF_QUEUE_CAPACITY", "0");
    assert!(MonitorConfig::from_env().is_err());
    clear_monitor_vars();
}

#[test]
fn parse_ignore_rejects_bad_glob() {
    assert!(parse_ignore("[unclosed").is_err());
    assert_eq!(parse_ignore(" , */tmp/* ,").unwrap().len(), 1);
}
