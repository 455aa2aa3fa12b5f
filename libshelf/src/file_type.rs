//! Recognized book formats and the name-level ignore rule.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BookFileType {
    Epub,
    Pdf,
    Cbz,
    Cbr,
    Cb7,
    Fb2,
    Mobi,
    Azw,
    Azw3,
}

impl BookFileType {
    pub const ALL: [BookFileType; 9] = [
        Self::Epub,
        Self::Pdf,
        Self::Cbz,
        Self::Cbr,
        Self::Cb7,
        Self::Fb2,
        Self::Mobi,
        Self::Azw,
        Self::Azw3,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Epub => "epub",
            Self::Pdf => "pdf",
            Self::Cbz => "cbz",
            Self::Cbr => "cbr",
            Self::Cb7 => "cb7",
            Self::Fb2 => "fb2",
            Self::Mobi => "mobi",
            Self::Azw => "azw",
            Self::Azw3 => "azw3",
        }
    }

    /// Detect the format from the extension, case-insensitively. Ignored
    /// names (see [`is_ignored_name`]) never match.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        if is_ignored_name(name) {
            return None;
        }
        let ext = path.extension()?.to_str()?;
        ext.parse().ok()
    }
}

impl fmt::Display for BookFileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookFileType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == lower)
            .ok_or_else(|| format!("unknown book file type `{s}`"))
    }
}

/// Hidden files and in-progress downloads/saves.
pub fn is_ignored_name(name: &str) -> bool {
    name.starts_with('.')
        || name.ends_with('~')
        || name.ends_with(".part")
        || name.ends_with(".crdownload")
}

pub fn is_book_file(path: &Path) -> bool {
    BookFileType::from_path(path).is_some()
}
