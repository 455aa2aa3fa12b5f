//! Delayed delete handling.
//!
//! Editors and sync tools often delete and recreate a file when saving it.
//! A delete is therefore parked for a fixed window and only acted on if no
//! create for the same path shows up in the meantime.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::scheduler::{TaskHandle, TaskScheduler};

struct PendingDeletion {
    token: u64,
    task: TaskHandle,
}

type PendingMap = Arc<Mutex<HashMap<PathBuf, PendingDeletion>>>;

pub struct DebounceScheduler {
    scheduler: Arc<TaskScheduler>,
    delay: Duration,
    pending: PendingMap,
    next_token: AtomicU64,
}

impl DebounceScheduler {
    pub fn new(scheduler: Arc<TaskScheduler>, delay: Duration) -> Self {
        Self {
            scheduler,
            delay,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_token: AtomicU64::new(1),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<PathBuf, PendingDeletion>>> {
        self.pending
            .lock()
            .map_err(|_| Error::poisoned("pending deletions"))
    }

    /// Park `action` for `path` unless a deletion is already pending for it
    /// (first-scheduled wins). Returns whether a new task was scheduled.
    pub fn schedule<F>(&self, path: PathBuf, action: F) -> Result<bool>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let mut pending = self.lock()?;
        if pending.contains_key(&path) {
            debug!(path = %path.display(), "deletion already pending");
            return Ok(false);
        }

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let map = Arc::clone(&self.pending);
        let key = path.clone();
        let task = self.scheduler.schedule(self.delay, move || {
            // the entry goes away whatever the action does
            if let Ok(mut m) = map.lock() {
                if m.get(&key).is_some_and(|p| p.token == token) {
                    m.remove(&key);
                }
            }
            if let Err(e) = action() {
                if e.is_data_access() {
                    debug!(path = %key.display(), error = %e, "deferred delete skipped");
                } else {
                    warn!(path = %key.display(), error = %e, "deferred delete failed");
                }
            }
        })?;

        debug!(path = %path.display(), delay = ?self.delay, "deletion scheduled");
        pending.insert(path, PendingDeletion { token, task });
        Ok(true)
    }

    /// Cancel the pending deletion for `path`. Returns `true` if one was
    /// pending and had not started yet.
    pub fn cancel(&self, path: &Path) -> bool {
        let Ok(mut pending) = self.lock() else {
            return false;
        };
        match pending.remove(path) {
            Some(p) => {
                let cancelled = p.task.cancel();
                debug!(path = %path.display(), cancelled, "pending deletion cancelled");
                cancelled
            }
            None => false,
        }
    }

    /// Cancel every pending deletion under `root`.
    pub fn cancel_under(&self, root: &Path) -> usize {
        let Ok(mut pending) = self.lock() else {
            return 0;
        };
        let keys: Vec<PathBuf> = pending
            .keys()
            .filter(|p| p.starts_with(root))
            .cloned()
            .collect();
        keys.iter()
            .filter_map(|k| pending.remove(k))
            .filter(|p| p.task.cancel())
            .count()
    }

    pub fn cancel_all(&self) -> usize {
        let Ok(mut pending) = self.lock() else {
            return 0;
        };
        pending.drain().filter(|(_, p)| p.task.cancel()).count()
    }

    pub fn is_pending(&self, path: &Path) -> bool {
        self.lock().map(|p| p.contains_key(path)).unwrap_or(false)
    }

    pub fn pending_count(&self) -> usize {
        self.lock().map(|p| p.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Instant;

    fn debouncer(ms: u64) -> DebounceScheduler {
        let sched = Arc::new(TaskScheduler::start(1).unwrap());
        DebounceScheduler::new(sched, Duration::from_millis(ms))
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let start = Instant::now();
        while !cond() {
            assert!(start.elapsed() < Duration::from_secs(5), "timed out");
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn fires_once_and_clears_entry() {
        let d = debouncer(50);
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let p = PathBuf::from("/lib/a.epub");
        assert!(d
            .schedule(p.clone(), move || {
                h.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap());
        assert!(d.is_pending(&p));
        wait_until(|| hits.load(Ordering::SeqCst) == 1);
        wait_until(|| !d.is_pending(&p));
        assert_eq!(d.pending_count(), 0);
    }

    #[test]
    fn first_scheduled_wins() {
        let d = debouncer(50);
        let hits = Arc::new(AtomicUsize::new(0));
        let p = PathBuf::from("/lib/a.epub");
        for _ in 0..3 {
            let h = hits.clone();
            d.schedule(p.clone(), move || {
                h.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        }
        assert_eq!(d.pending_count(), 1);
        wait_until(|| !d.is_pending(&p));
        thread::sleep(Duration::from_millis(100));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_prevents_action() {
        let d = debouncer(100);
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let p = PathBuf::from("/lib/a.epub");
        d.schedule(p.clone(), move || {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        assert!(d.cancel(&p));
        assert!(!d.cancel(&p));
        assert!(!d.is_pending(&p));
        thread::sleep(Duration::from_millis(250));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failing_action_still_clears_entry() {
        let d = debouncer(20);
        let p = PathBuf::from("/lib/a.epub");
        d.schedule(p.clone(), || Err(Error::Other("nope".into())))
            .unwrap();
        wait_until(|| !d.is_pending(&p));
        // can be scheduled again afterwards
        assert!(d.schedule(p.clone(), || Ok(())).unwrap());
    }

    #[test]
    fn cancel_under_root() {
        let d = debouncer(10_000);
        d.schedule(PathBuf::from("/a/x.epub"), || Ok(())).unwrap();
        d.schedule(PathBuf::from("/a/sub/y.epub"), || Ok(())).unwrap();
        d.schedule(PathBuf::from("/b/z.epub"), || Ok(())).unwrap();
        assert_eq!(d.cancel_under(Path::new("/a")), 2);
        assert_eq!(d.pending_count(), 1);
        assert_eq!(d.cancel_all(), 1);
        assert_eq!(d.pending_count(), 0);
    }
}
