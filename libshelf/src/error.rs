//! Error types for the shelf sync core
//!
//! Bootstrap helpers (config, DB open) stay on `anyhow`; everything that
//! runs inside the monitor returns this typed error so callers can tell a
//! stale library apart from a genuine failure.

use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::model::{BookId, LibraryId};

/// Result type for the sync core - convenience wrapper around Result<T, Error>
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// An IO error
    Io(io::Error),

    /// A database error
    Database(String),

    /// An error from the notify library
    Watch(String),

    /// The library referenced by an event or rescan no longer exists
    LibraryNotFound(LibraryId),

    /// The catalog entry was removed while an update for it was in flight
    EntryNotFound(BookId),

    /// The file does not carry a recognized book extension
    UnsupportedFile(PathBuf),

    /// The file processor rejected a file
    Processing { path: PathBuf, reason: String },

    /// Invalid state for the requested operation
    InvalidState(String),

    /// Invalid configuration
    Config(String),

    /// Other errors
    Other(String),
}

impl Error {
    /// Errors caused by catalog rows disappearing underneath an in-flight
    /// event (library, path or book deleted concurrently).
    pub fn is_data_access(&self) -> bool {
        match self {
            Self::LibraryNotFound(_) | Self::EntryNotFound(_) => true,
            Self::Database(msg) => {
                msg.contains("FOREIGN KEY constraint failed")
                    || msg.contains("Query returned no rows")
            }
            _ => false,
        }
    }

    pub(crate) fn poisoned(what: &str) -> Self {
        Self::InvalidState(format!("{what} mutex poisoned"))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "IO error: {}", err),
            Self::Database(msg) => write!(f, "Database error: {}", msg),
            Self::Watch(msg) => write!(f, "Watch error: {}", msg),
            Self::LibraryNotFound(id) => write!(f, "Library not found: {}", id),
            Self::EntryNotFound(id) => write!(f, "Book not found: {}", id),
            Self::UnsupportedFile(path) => {
                write!(f, "Unsupported file type: {}", path.display())
            }
            Self::Processing { path, reason } => {
                write!(f, "Failed to process {}: {}", path.display(), reason)
            }
            Self::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Self::Config(msg) => write!(f, "Configuration error: {}", msg),
            Self::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<notify::Error> for Error {
    fn from(err: notify::Error) -> Self {
        Self::Watch(err.to_string())
    }
}

impl From<walkdir::Error> for Error {
    fn from(err: walkdir::Error) -> Self {
        match err.into_io_error() {
            Some(io) => Self::Io(io),
            None => Self::Other("filesystem loop detected while walking".into()),
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(format!("{err:#}"))
    }
}
