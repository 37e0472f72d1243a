//! Entry kinds and path helpers shared by the local and remote trees.
//!
//! Paths use the local-store convention: forward-slash separated, relative
//! to the vault root, with the root itself being the empty string.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Whether an entry is a file or a folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntryKind {
    File,
    Folder,
}

impl EntryKind {
    pub fn is_folder(self) -> bool {
        matches!(self, EntryKind::Folder)
    }

    pub fn is_file(self) -> bool {
        matches!(self, EntryKind::File)
    }
}

impl Display for EntryKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::File => write!(f, "file"),
            EntryKind::Folder => write!(f, "folder"),
        }
    }
}

/// Hidden entries (leading dot) are never synced.
pub fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Whether a name can be used as a single local path segment.
///
/// Remote stores accept names that would address another directory once
/// joined onto a local path (`a/../b`, `..`, `C:\x`); those are never synced.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\', '\0'])
}

/// Join a child name onto a directory path. The root is the empty path.
pub fn join_path(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Last segment of a path.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Human-readable form of a directory path for logs ("/" for the root).
pub fn display_dir(path: &str) -> &str {
    if path.is_empty() { "/" } else { path }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_path_root() {
        assert_eq!(join_path("", "a.md"), "a.md");
    }

    #[test]
    fn test_join_path_nested() {
        assert_eq!(join_path("notes/daily", "a.md"), "notes/daily/a.md");
    }

    #[test]
    fn test_file_name() {
        assert_eq!(file_name("notes/daily/a.md"), "a.md");
        assert_eq!(file_name("a.md"), "a.md");
    }

    #[test]
    fn test_hidden_names() {
        assert!(is_hidden(".obsidian"));
        assert!(is_hidden(".drive-sync"));
        assert!(!is_hidden("notes"));
    }

    #[test]
    fn test_valid_names() {
        assert!(is_valid_name("a.md"));
        assert!(is_valid_name("notes with spaces"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("."));
        assert!(!is_valid_name(".."));
        assert!(!is_valid_name("x/../../escaped.md"));
        assert!(!is_valid_name("/etc/passwd"));
        assert!(!is_valid_name("a\\b"));
        assert!(!is_valid_name("a\0b"));
    }

    #[test]
    fn test_kind_serializes_camel_case() {
        let json = serde_json::to_string(&EntryKind::Folder).unwrap();
        assert_eq!(json, "\"folder\"");
    }
}
