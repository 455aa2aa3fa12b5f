//! Small delayed-task pool.
//!
//! One timer thread keeps pending tasks ordered by deadline and hands due
//! ones to a fixed set of worker threads, so a slow task never delays the
//! timer. Every task is tracked by a [`TaskHandle`] that can be cancelled
//! while still pending, or waited on.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use priority_queue::PriorityQueue;
use tracing::{debug, error, trace};

use crate::error::{Error, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    /// The job panicked.
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

struct TaskShared {
    state: Mutex<TaskState>,
    changed: Condvar,
}

/// Handle to one scheduled task. Cloning shares the same task.
#[derive(Clone)]
pub struct TaskHandle {
    id: u64,
    shared: Arc<TaskShared>,
}

impl TaskHandle {
    fn new(id: u64) -> Self {
        Self {
            id,
            shared: Arc::new(TaskShared {
                state: Mutex::new(TaskState::Pending),
                changed: Condvar::new(),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> TaskState {
        self.shared
            .state
            .lock()
            .map(|g| *g)
            .unwrap_or(TaskState::Failed)
    }

    pub fn is_finished(&self) -> bool {
        self.state().is_finished()
    }

    /// Cancel a task that has not started yet. Returns `false` once the
    /// job is running or finished.
    pub fn cancel(&self) -> bool {
        self.transition(TaskState::Pending, TaskState::Cancelled)
    }

    /// Block until the task completes, fails or is cancelled.
    pub fn wait(&self) -> TaskState {
        let Ok(mut guard) = self.shared.state.lock() else {
            return TaskState::Failed;
        };
        while !guard.is_finished() {
            guard = match self.shared.changed.wait(guard) {
                Ok(g) => g,
                Err(_) => return TaskState::Failed,
            };
        }
        *guard
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`, returning
    /// `None` if the task is still pending or running.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<TaskState> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.shared.state.lock().ok()?;
        while !guard.is_finished() {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return None;
            }
            guard = self.shared.changed.wait_timeout(guard, left).ok()?.0;
        }
        Some(*guard)
    }

    fn transition(&self, from: TaskState, to: TaskState) -> bool {
        let Ok(mut guard) = self.shared.state.lock() else {
            return false;
        };
        if *guard != from {
            return false;
        }
        *guard = to;
        self.shared.changed.notify_all();
        true
    }

    fn set(&self, to: TaskState) {
        if let Ok(mut guard) = self.shared.state.lock() {
            *guard = to;
            self.shared.changed.notify_all();
        }
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

struct ScheduledTask {
    deadline: Instant,
    job: Job,
    handle: TaskHandle,
}

enum Command {
    Schedule(ScheduledTask),
    Shutdown,
}

pub struct TaskScheduler {
    commands: Sender<Command>,
    next_id: AtomicU64,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskScheduler {
    /// Start the timer thread and `workers` worker threads (at least one).
    pub fn start(workers: usize) -> Result<Self> {
        let (cmd_tx, cmd_rx) = unbounded::<Command>();
        let (work_tx, work_rx) = unbounded::<ScheduledTask>();

        let mut threads = Vec::new();
        for n in 0..workers.max(1) {
            let rx = work_rx.clone();
            threads.push(
                thread::Builder::new()
                    .name(format!("shelf-task-{n}"))
                    .spawn(move || worker_loop(rx))?,
            );
        }
        threads.push(
            thread::Builder::new()
                .name("shelf-timer".into())
                .spawn(move || timer_loop(cmd_rx, work_tx))?,
        );

        Ok(Self {
            commands: cmd_tx,
            next_id: AtomicU64::new(1),
            threads: Mutex::new(threads),
        })
    }

    /// Run `job` on a worker once `delay` has elapsed.
    pub fn schedule<F>(&self, delay: Duration, job: F) -> Result<TaskHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = TaskHandle::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let task = ScheduledTask {
            deadline: Instant::now() + delay,
            job: Box::new(job),
            handle: handle.clone(),
        };
        self.commands
            .send(Command::Schedule(task))
            .map_err(|_| Error::InvalidState("task scheduler is shut down".into()))?;
        trace!(task = handle.id, ?delay, "scheduled");
        Ok(handle)
    }

    /// Stop the timer, cancel everything still pending and join all threads.
    /// Jobs already handed to a worker run to completion.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
        let threads = match self.threads.lock() {
            Ok(mut g) => std::mem::take(&mut *g),
            Err(_) => return,
        };
        for t in threads {
            let _ = t.join();
        }
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn timer_loop(commands: Receiver<Command>, work: Sender<ScheduledTask>) {
    let mut queue: PriorityQueue<u64, Reverse<Instant>> = PriorityQueue::new();
    let mut tasks: HashMap<u64, ScheduledTask> = HashMap::new();

    loop {
        let next = queue
            .peek()
            .map(|(_, Reverse(d))| d.saturating_duration_since(Instant::now()));
        let received = match next {
            Some(wait) => match commands.recv_timeout(wait) {
                Ok(cmd) => Some(cmd),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match commands.recv() {
                Ok(cmd) => Some(cmd),
                Err(_) => break,
            },
        };

        match received {
            Some(Command::Schedule(task)) => {
                let id = task.handle.id;
                queue.push(id, Reverse(task.deadline));
                tasks.insert(id, task);
            }
            Some(Command::Shutdown) => break,
            None => {}
        }

        let now = Instant::now();
        while queue.peek().is_some_and(|(_, Reverse(d))| *d <= now) {
            let Some((id, _)) = queue.pop() else { break };
            let Some(task) = tasks.remove(&id) else {
                continue;
            };
            if task.handle.state() == TaskState::Cancelled {
                trace!(task = id, "skipping cancelled task");
                continue;
            }
            if work.send(task).is_err() {
                error!("task workers are gone; dropping due task");
            }
        }
    }

    debug!(pending = tasks.len(), "timer stopping");
    for (_, task) in tasks.drain() {
        task.handle.cancel();
    }
    // dropping `work` lets the workers drain and exit
}

fn worker_loop(work: Receiver<ScheduledTask>) {
    for task in work.iter() {
        if !task.handle.transition(TaskState::Pending, TaskState::Running) {
            continue;
        }
        let outcome = panic::catch_unwind(AssertUnwindSafe(task.job));
        match outcome {
            Ok(()) => task.handle.set(TaskState::Completed),
            Err(_) => {
                error!(task = task.handle.id, "scheduled task panicked");
                task.handle.set(TaskState::Failed);
            }
        }
    }
}
