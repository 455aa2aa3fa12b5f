//! Misc shared helpers.

use std::path::{Path, PathBuf};

/// Canonicalize when possible, otherwise hand the input back unchanged
/// (the path may already be gone by the time an event is handled).
pub fn canonicalize_lossy<P: AsRef<Path>>(p: P) -> PathBuf {
    let p = p.as_ref();
    std::fs::canonicalize(p).unwrap_or_else(|_| p.to_path_buf())
}

/// String form used for path columns in the catalog.
pub fn to_db_path<P: AsRef<Path>>(p: P) -> String {
    p.as_ref().to_string_lossy().into_owned()
}

/// File name as UTF-8, if it has one.
pub fn file_name_str(p: &Path) -> Option<&str> {
    p.file_name().and_then(|n| n.to_str())
}
