//! Pause/resume contract for bulk filesystem operations.
//!
//! Pausing is reference counted: every `pause()` must be matched by one
//! `resume()`, and live monitoring only restarts when the last holder has
//! resumed. Two overlapping bulk operations therefore cannot un-pause each
//! other.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::scheduler::{TaskHandle, TaskScheduler, TaskState};

#[derive(Debug, Default)]
pub struct PauseController {
    holders: AtomicUsize,
}

impl PauseController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        let before = self.holders.fetch_add(1, Ordering::SeqCst);
        if before == 0 {
            info!("file monitoring paused");
        } else {
            debug!(holders = before + 1, "pause re-entered");
        }
    }

    /// Release one pause. Extra resumes are ignored with a warning.
    pub fn resume(&self) {
        let released = self
            .holders
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match released {
            Ok(1) => info!("file monitoring resumed"),
            Ok(n) => debug!(holders = n - 1, "pause released, still held"),
            Err(_) => warn!("resume called while monitoring was not paused"),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.holders.load(Ordering::SeqCst) > 0
    }

    pub fn holders(&self) -> usize {
        self.holders.load(Ordering::SeqCst)
    }

    /// Schedule the matching `resume()` after `delay` so events the OS
    /// already buffered for the bulk operation are discarded while paused.
    pub fn resume_after(
        self: &Arc<Self>,
        scheduler: &TaskScheduler,
        delay: Duration,
    ) -> Result<PendingResume> {
        let me = Arc::clone(self);
        let task = scheduler.schedule(delay, move || me.resume())?;
        debug!(task = task.id(), ?delay, "resume scheduled");
        Ok(PendingResume {
            controller: Arc::clone(self),
            task,
        })
    }
}

/// A scheduled resume owned by the pauser. Exactly one `resume()` happens
/// per instance, either when the timer fires or through
/// [`resume_now`](Self::resume_now).
#[derive(Debug)]
pub struct PendingResume {
    controller: Arc<PauseController>,
    task: TaskHandle,
}

impl PendingResume {
    pub fn wait(&self) -> TaskState {
        self.task.wait()
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<TaskState> {
        self.task.wait_timeout(timeout)
    }

    pub fn is_done(&self) -> bool {
        self.task.is_finished()
    }

    /// Skip the grace period. Returns `false` if the timer already fired.
    pub fn resume_now(&self) -> bool {
        if self.task.cancel() {
            self.controller.resume();
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pause_is_reference_counted() {
        let p = PauseController::new();
        assert!(!p.is_paused());
        p.pause();
        p.pause();
        assert!(p.is_paused());
        p.resume();
        assert!(p.is_paused(), "first resume must not un-pause a second holder");
        p.resume();
        assert!(!p.is_paused());
    }

    #[test]
    fn extra_resume_does_not_underflow() {
        let p = PauseController::new();
        p.resume();
        assert_eq!(p.holders(), 0);
        p.pause();
        assert!(p.is_paused());
    }

    #[test]
    fn resume_after_fires_once() {
        let sched = TaskScheduler::start(1).unwrap();
        let p = Arc::new(PauseController::new());
        p.pause();
        let pending = p.resume_after(&sched, Duration::from_millis(50)).unwrap();
        assert!(p.is_paused());
        assert_eq!(pending.wait(), TaskState::Completed);
        assert!(!p.is_paused());
        assert!(!pending.resume_now());
        assert_eq!(p.holders(), 0);
    }

    #[test]
    fn resume_now_short_circuits_timer() {
        let sched = TaskScheduler::start(1).unwrap();
        let p = Arc::new(PauseController::new());
        p.pause();
        let pending = p.resume_after(&sched, Duration::from_secs(30)).unwrap();
        assert!(pending.resume_now());
        assert!(!p.is_paused());
        assert_eq!(pending.wait(), TaskState::Cancelled);
    }

    #[test]
    fn overlapping_bulk_operations() {
        let sched = TaskScheduler::start(1).unwrap();
        let p = Arc::new(PauseController::new());
        p.pause();
        p.pause();
        let first = p.resume_after(&sched, Duration::from_millis(10)).unwrap();
        first.wait();
        assert!(p.is_paused());
        p.resume();
        assert!(!p.is_paused());
    }
}
