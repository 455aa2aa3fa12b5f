//! Fire-and-forget change notifications.
//!
//! Delivery is best effort and not transactional with catalog mutation;
//! subscribers must tolerate duplicates.

use std::fmt;
use std::sync::Mutex;

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::model::{BookId, CatalogEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogLine {
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Notification {
    BookAdded(CatalogEntry),
    BooksRemoved(Vec<BookId>),
    Log(LogLine),
}

impl Notification {
    pub fn info(message: impl Into<String>) -> Self {
        Self::Log(LogLine {
            level: LogLevel::Info,
            message: message.into(),
        })
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self::Log(LogLine {
            level: LogLevel::Warn,
            message: message.into(),
        })
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BookAdded(e) => write!(f, "added #{} {}", e.id, e.file_name),
            Self::BooksRemoved(ids) => {
                let ids: Vec<String> = ids.iter().map(|i| i.to_string()).collect();
                write!(f, "removed {}", ids.join(","))
            }
            Self::Log(line) => f.write_str(&line.message),
        }
    }
}

pub trait Notifier: Send + Sync {
    fn publish(&self, notification: Notification);
}

/// Writes every notification to the tracing subscriber.
#[derive(Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn publish(&self, notification: Notification) {
        match &notification {
            Notification::Log(LogLine {
                level: LogLevel::Warn,
                ..
            }) => warn!("{notification}"),
            Notification::Log(LogLine {
                level: LogLevel::Error,
                ..
            }) => error!("{notification}"),
            _ => info!("{notification}"),
        }
    }
}

/// Fans notifications out to every live subscriber channel.
#[derive(Default)]
pub struct ChannelNotifier {
    subscribers: Mutex<Vec<Sender<Notification>>>,
}

impl ChannelNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<Notification> {
        let (tx, rx) = unbounded();
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(tx);
        }
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl Notifier for ChannelNotifier {
    fn publish(&self, notification: Notification) {
        let Ok(mut subs) = self.subscribers.lock() else {
            return;
        };
        // dropped receivers unsubscribe implicitly
        subs.retain(|tx| tx.send(notification.clone()).is_ok());
        debug!(subscribers = subs.len(), "{notification}");
    }
}
