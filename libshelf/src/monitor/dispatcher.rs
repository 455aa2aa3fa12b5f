//! Bounded event queue with a single consumer thread.
//!
//! Publishing never blocks: when the queue is full the event is dropped and
//! counted. A later rescan restores consistency.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use serde::Serialize;
use tracing::{debug, error, trace, warn};

use crate::error::Result;
use crate::model::FileChangeEvent;

pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &FileChangeEvent) -> Result<()>;
}

#[derive(Debug, Default)]
struct Counters {
    published: AtomicUsize,
    dropped: AtomicUsize,
    processed: AtomicUsize,
    failed: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DispatchStats {
    pub published: usize,
    pub dropped: usize,
    pub processed: usize,
    pub failed: usize,
    pub queued: usize,
}

/// Cheap, cloneable producer side of the dispatcher.
#[derive(Clone)]
pub struct EventPublisher {
    tx: Sender<FileChangeEvent>,
    counters: Arc<Counters>,
}

impl EventPublisher {
    /// Offer an event without blocking. Returns `false` if it was dropped.
    pub fn publish(&self, event: FileChangeEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => {
                self.counters.published.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(ev)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    path = %ev.file_path.display(),
                    kind = ?ev.kind,
                    "event queue full; dropping event"
                );
                false
            }
            Err(TrySendError::Disconnected(ev)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(path = %ev.file_path.display(), "dispatcher stopped; dropping event");
                false
            }
        }
    }
}

pub struct EventDispatcher {
    publisher: EventPublisher,
    shutdown: Sender<()>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl EventDispatcher {
    pub fn start(capacity: usize, handler: Arc<dyn EventHandler>) -> Result<Self> {
        let (tx, rx) = bounded::<FileChangeEvent>(capacity.max(1));
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let counters = Arc::new(Counters::default());

        let loop_counters = counters.clone();
        let consumer = thread::Builder::new()
            .name("shelf-dispatch".into())
            .spawn(move || consume(rx, shutdown_rx, handler, loop_counters))?;

        Ok(Self {
            publisher: EventPublisher { tx, counters },
            shutdown: shutdown_tx,
            consumer: Mutex::new(Some(consumer)),
        })
    }

    pub fn publisher(&self) -> EventPublisher {
        self.publisher.clone()
    }

    pub fn publish(&self, event: FileChangeEvent) -> bool {
        self.publisher.publish(event)
    }

    pub fn stats(&self) -> DispatchStats {
        let c = &self.publisher.counters;
        DispatchStats {
            published: c.published.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            processed: c.processed.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            queued: self.publisher.tx.len(),
        }
    }

    /// Stop the consumer after the event it is currently handling. Queued
    /// events are discarded.
    pub fn shutdown(&self) {
        let _ = self.shutdown.try_send(());
        let handle = self.consumer.lock().ok().and_then(|mut g| g.take());
        if let Some(h) = handle {
            let _ = h.join();
        }
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn consume(
    rx: Receiver<FileChangeEvent>,
    shutdown: Receiver<()>,
    handler: Arc<dyn EventHandler>,
    counters: Arc<Counters>,
) {
    debug!("dispatcher started");
    loop {
        select! {
            recv(shutdown) -> _ => break,
            recv(rx) -> msg => {
                let Ok(event) = msg else { break };
                trace!(path = %event.file_path.display(), kind = ?event.kind, "dispatching");

                let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&event)));
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) if e.is_data_access() => {
                        counters.failed.fetch_add(1, Ordering::Relaxed);
                        debug!(path = %event.file_path.display(), error = %e, "event dropped; catalog changed underneath");
                    }
                    Ok(Err(e)) => {
                        counters.failed.fetch_add(1, Ordering::Relaxed);
                        warn!(path = %event.file_path.display(), error = %e, "event handling failed");
                    }
                    Err(_) => {
                        counters.failed.fetch_add(1, Ordering::Relaxed);
                        error!(path = %event.file_path.display(), "event handler panicked");
                    }
                }
                counters.processed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
    debug!("dispatcher stopped");
}
