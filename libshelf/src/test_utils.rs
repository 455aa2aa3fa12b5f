use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use lazy_static::lazy_static;
use tempfile::TempDir;

use crate::config::MonitorConfig;
use crate::db::SqliteCatalog;
use crate::model::Library;
use crate::notifier::{ChannelNotifier, Notification};

lazy_static! {
    /// Global mutex to serialize environment-variable modifications in tests.
    pub static ref ENV_MUTEX: Mutex<()> = Mutex::new(());
}

/// A library with one path in a temp dir, an in-memory catalog and a
/// subscribed notifier.
pub struct Fixture {
    _tmp: TempDir,
    pub root: PathBuf,
    pub catalog: Arc<SqliteCatalog>,
    pub notifier: Arc<ChannelNotifier>,
    pub notifications: Receiver<Notification>,
    pub library: Library,
}

impl Fixture {
    pub fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let root = std::fs::canonicalize(tmp.path()).unwrap().join("books");
        std::fs::create_dir_all(&root).unwrap();
        let catalog = Arc::new(SqliteCatalog::open_in_memory().unwrap());
        let library = catalog
            .create_library("main", &[root.clone()], true)
            .unwrap();
        let notifier = Arc::new(ChannelNotifier::new());
        let notifications = notifier.subscribe();
        Self {
            _tmp: tmp,
            root,
            catalog,
            notifier,
            notifications,
            library,
        }
    }

    /// Write `contents` to `rel` under the library root, creating parents.
    pub fn write(&self, rel: &str, contents: &[u8]) -> PathBuf {
        let p = self.root.join(rel);
        if let Some(parent) = p.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&p, contents).unwrap();
        p
    }

    pub fn rename(&self, from: &str, to: &str) -> (PathBuf, PathBuf) {
        let (a, b) = (self.root.join(from), self.root.join(to));
        if let Some(parent) = b.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::rename(&a, &b).unwrap();
        (a, b)
    }

    /// Everything published so far.
    pub fn drain(&self) -> Vec<Notification> {
        self.notifications.try_iter().collect()
    }

    pub fn removals(notifications: &[Notification]) -> usize {
        notifications
            .iter()
            .filter(|n| matches!(n, Notification::BooksRemoved(_)))
            .count()
    }

    pub fn additions(notifications: &[Notification]) -> usize {
        notifications
            .iter()
            .filter(|n| matches!(n, Notification::BookAdded(_)))
            .count()
    }
}

/// Short windows so threaded tests finish quickly.
pub fn fast_config() -> MonitorConfig {
    MonitorConfig {
        debounce: Duration::from_millis(150),
        resume_grace: Duration::from_millis(150),
        ..MonitorConfig::default()
    }
}

/// Poll `cond` every 20ms until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    loop {
        if cond() {
            return true;
        }
        if start.elapsed() > timeout {
            return false;
        }
        thread::sleep(Duration::from_millis(20));
    }
}
