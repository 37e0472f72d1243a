//! FileSystem trait abstraction for the local side of a sync.
//!
//! Implementations:
//! - `InMemoryFs` - For testing
//! - `NativeFs` (in drive-sync) - Uses tokio::fs

use crate::entry::{file_name, EntryKind};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Is a directory: {0}")]
    IsDirectory(String),

    #[error("Not a directory: {0}")]
    NotDirectory(String),

    #[error("Directory not empty: {0}")]
    NotEmpty(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("IO error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, FsError>;

/// A direct child of a local directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEntry {
    /// Path relative to the vault root
    pub path: String,
    /// Last path segment
    pub name: String,
    pub kind: EntryKind,
    /// Modification time in milliseconds since epoch (0 for folders)
    pub modified_at_millis: i64,
}

/// Platform-independent filesystem abstraction.
///
/// Paths are relative to the vault root; the root is `""`.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// List the immediate children of a directory
    async fn list(&self, path: &str) -> Result<Vec<LocalEntry>>;

    /// Read file contents
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Write file contents, creating or overwriting (creates parent directories if needed)
    async fn write(&self, path: &str, content: &[u8]) -> Result<()>;

    /// Create directory (and parents if needed)
    async fn mkdir(&self, path: &str) -> Result<()>;

    /// Delete a file, or a directory (`recursive` is required for non-empty directories)
    async fn delete(&self, path: &str, recursive: bool) -> Result<()>;

    /// Check if path exists
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Set a file's modification time
    async fn set_modified(&self, path: &str, mtime_millis: i64) -> Result<()>;
}

/// In-memory filesystem for testing
pub struct InMemoryFs {
    files: RwLock<HashMap<String, Vec<u8>>>,
    dirs: RwLock<HashSet<String>>,
    /// Tracks file modification times (path -> mtime in ms)
    mtimes: RwLock<HashMap<String, i64>>,
}

impl InMemoryFs {
    pub fn new() -> Self {
        let mut dirs = HashSet::new();
        dirs.insert(String::new()); // Root directory
        Self {
            files: RwLock::new(HashMap::new()),
            dirs: RwLock::new(dirs),
            mtimes: RwLock::new(HashMap::new()),
        }
    }

    /// Set a specific mtime for testing tolerance-window decisions
    pub fn set_mtime(&self, path: &str, mtime: i64) {
        let path = Self::normalize_path(path);
        let mut mtimes = self.mtimes.write().unwrap_or_else(PoisonError::into_inner);
        mtimes.insert(path, mtime);
    }

    /// Modification time of a file, if it exists
    pub fn mtime(&self, path: &str) -> Option<i64> {
        let path = Self::normalize_path(path);
        let mtimes = self.mtimes.read().unwrap_or_else(PoisonError::into_inner);
        mtimes.get(&path).copied()
    }

    /// All file paths, sorted
    pub fn file_paths(&self) -> Vec<String> {
        let files = self.files.read().unwrap_or_else(PoisonError::into_inner);
        let mut paths: Vec<String> = files.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// All directory paths except the root, sorted
    pub fn dir_paths(&self) -> Vec<String> {
        let dirs = self.dirs.read().unwrap_or_else(PoisonError::into_inner);
        let mut paths: Vec<String> = dirs.iter().filter(|d| !d.is_empty()).cloned().collect();
        paths.sort();
        paths
    }

    fn current_time_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn normalize_path(path: &str) -> String {
        path.trim_matches('/').to_string()
    }

    fn parent_path(path: &str) -> Option<String> {
        let normalized = Self::normalize_path(path);
        if normalized.is_empty() {
            None
        } else {
            match normalized.rfind('/') {
                Some(pos) => Some(normalized[..pos].to_string()),
                None => Some(String::new()),
            }
        }
    }

    fn is_file(&self, path: &str) -> bool {
        let files = self.files.read().unwrap_or_else(PoisonError::into_inner);
        files.contains_key(path)
    }

    fn is_dir(&self, path: &str) -> bool {
        let dirs = self.dirs.read().unwrap_or_else(PoisonError::into_inner);
        dirs.contains(path)
    }
}

impl Default for InMemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileSystem for InMemoryFs {
    async fn list(&self, path: &str) -> Result<Vec<LocalEntry>> {
        let path = Self::normalize_path(path);
        if self.is_file(&path) {
            return Err(FsError::NotDirectory(path));
        }
        if !self.is_dir(&path) {
            return Err(FsError::NotFound(path));
        }

        let mut entries = Vec::new();

        let files = self.files.read().unwrap_or_else(PoisonError::into_inner);
        let mtimes = self.mtimes.read().unwrap_or_else(PoisonError::into_inner);
        for file_path in files.keys() {
            if Self::parent_path(file_path).as_deref() == Some(path.as_str()) {
                entries.push(LocalEntry {
                    path: file_path.clone(),
                    name: file_name(file_path).to_string(),
                    kind: EntryKind::File,
                    modified_at_millis: mtimes.get(file_path).copied().unwrap_or(0),
                });
            }
        }

        let dirs = self.dirs.read().unwrap_or_else(PoisonError::into_inner);
        for dir_path in dirs.iter() {
            if Self::parent_path(dir_path).as_deref() == Some(path.as_str()) {
                entries.push(LocalEntry {
                    path: dir_path.clone(),
                    name: file_name(dir_path).to_string(),
                    kind: EntryKind::Folder,
                    modified_at_millis: 0,
                });
            }
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let path = Self::normalize_path(path);
        if self.is_dir(&path) {
            return Err(FsError::IsDirectory(path));
        }
        let files = self.files.read().unwrap_or_else(PoisonError::into_inner);
        files
            .get(&path)
            .cloned()
            .ok_or_else(|| FsError::NotFound(path))
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        let path = Self::normalize_path(path);
        if self.is_dir(&path) {
            return Err(FsError::IsDirectory(path));
        }

        // Create parent directories
        if let Some(parent) = Self::parent_path(&path) {
            self.mkdir(&parent).await?;
        }

        let mut files = self.files.write().unwrap_or_else(PoisonError::into_inner);
        files.insert(path.clone(), content.to_vec());
        drop(files);

        let mut mtimes = self.mtimes.write().unwrap_or_else(PoisonError::into_inner);
        mtimes.insert(path, Self::current_time_ms());
        Ok(())
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        let path = Self::normalize_path(path);
        if path.is_empty() {
            return Ok(()); // Root always exists
        }
        if self.is_file(&path) {
            return Err(FsError::NotDirectory(path));
        }

        // Create parent first
        if let Some(parent) = Self::parent_path(&path) {
            Box::pin(self.mkdir(&parent)).await?;
        }

        let mut dirs = self.dirs.write().unwrap_or_else(PoisonError::into_inner);
        dirs.insert(path);
        Ok(())
    }

    async fn delete(&self, path: &str, recursive: bool) -> Result<()> {
        let path = Self::normalize_path(path);
        if path.is_empty() {
            return Err(FsError::Io("Refusing to delete the vault root".into()));
        }

        {
            let mut files = self.files.write().unwrap_or_else(PoisonError::into_inner);
            if files.remove(&path).is_some() {
                drop(files);
                let mut mtimes = self.mtimes.write().unwrap_or_else(PoisonError::into_inner);
                mtimes.remove(&path);
                return Ok(());
            }
        }

        if !self.is_dir(&path) {
            return Err(FsError::NotFound(path));
        }

        let prefix = format!("{}/", path);
        let mut files = self.files.write().unwrap_or_else(PoisonError::into_inner);
        let mut dirs = self.dirs.write().unwrap_or_else(PoisonError::into_inner);
        let has_children = files.keys().any(|f| f.starts_with(&prefix))
            || dirs.iter().any(|d| d.starts_with(&prefix));
        if has_children && !recursive {
            return Err(FsError::NotEmpty(path));
        }

        files.retain(|f, _| !f.starts_with(&prefix));
        dirs.retain(|d| d != &path && !d.starts_with(&prefix));
        drop(files);
        drop(dirs);

        let mut mtimes = self.mtimes.write().unwrap_or_else(PoisonError::into_inner);
        mtimes.retain(|f, _| !f.starts_with(&prefix));
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let path = Self::normalize_path(path);
        Ok(self.is_file(&path) || self.is_dir(&path))
    }

    async fn set_modified(&self, path: &str, mtime_millis: i64) -> Result<()> {
        let path = Self::normalize_path(path);
        if !self.is_file(&path) {
            return Err(FsError::NotFound(path));
        }
        self.set_mtime(&path, mtime_millis);
        Ok(())
    }
}

// Implement FileSystem for Arc<T> where T: FileSystem
// This allows a test to keep a handle on the filesystem it hands to the orchestrator
#[async_trait]
impl<T: FileSystem + ?Sized> FileSystem for std::sync::Arc<T> {
    async fn list(&self, path: &str) -> Result<Vec<LocalEntry>> {
        (**self).list(path).await
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        (**self).read(path).await
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        (**self).write(path, content).await
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        (**self).mkdir(path).await
    }

    async fn delete(&self, path: &str, recursive: bool) -> Result<()> {
        (**self).delete(path, recursive).await
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        (**self).exists(path).await
    }

    async fn set_modified(&self, path: &str, mtime_millis: i64) -> Result<()> {
        (**self).set_modified(path, mtime_millis).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_inmemory_fs_basic_operations() {
        let fs = InMemoryFs::new();

        fs.write("test.md", b"hello world").await.unwrap();

        let content = fs.read("test.md").await.unwrap();
        assert_eq!(content, b"hello world");

        assert!(fs.exists("test.md").await.unwrap());
        assert!(!fs.exists("nonexistent.md").await.unwrap());

        fs.delete("test.md", false).await.unwrap();
        assert!(!fs.exists("test.md").await.unwrap());
    }

    #[tokio::test]
    async fn test_inmemory_fs_directories() {
        let fs = InMemoryFs::new();

        // Write creates parent directories
        fs.write("a/b/c.md", b"content").await.unwrap();

        assert!(fs.exists("a").await.unwrap());
        assert!(fs.exists("a/b").await.unwrap());

        let entries = fs.list("a").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "b");
        assert_eq!(entries[0].path, "a/b");
        assert_eq!(entries[0].kind, EntryKind::Folder);

        let entries = fs.list("a/b").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "c.md");
        assert_eq!(entries[0].path, "a/b/c.md");
        assert_eq!(entries[0].kind, EntryKind::File);
    }

    #[tokio::test]
    async fn test_list_root_reports_mtimes() {
        let fs = InMemoryFs::new();
        fs.write("a.md", b"a").await.unwrap();
        fs.set_mtime("a.md", 42_000);

        let entries = fs.list("").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].modified_at_millis, 42_000);
    }

    #[tokio::test]
    async fn test_list_file_is_not_directory() {
        let fs = InMemoryFs::new();
        fs.write("a.md", b"a").await.unwrap();

        let err = fs.list("a.md").await.unwrap_err();
        assert!(matches!(err, FsError::NotDirectory(_)));
    }

    #[tokio::test]
    async fn test_delete_non_empty_dir_requires_recursive() {
        let fs = InMemoryFs::new();
        fs.write("sub/inner/x.md", b"x").await.unwrap();

        let err = fs.delete("sub", false).await.unwrap_err();
        assert!(matches!(err, FsError::NotEmpty(_)));

        fs.delete("sub", true).await.unwrap();
        assert!(!fs.exists("sub").await.unwrap());
        assert!(!fs.exists("sub/inner").await.unwrap());
        assert!(!fs.exists("sub/inner/x.md").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_does_not_touch_sibling_prefix() {
        let fs = InMemoryFs::new();
        fs.write("sub/x.md", b"x").await.unwrap();
        fs.write("subway/y.md", b"y").await.unwrap();

        fs.delete("sub", true).await.unwrap();
        assert!(fs.exists("subway/y.md").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_modified_requires_file() {
        let fs = InMemoryFs::new();
        fs.mkdir("folder").await.unwrap();

        assert!(fs.set_modified("folder", 1).await.is_err());

        fs.write("folder/a.md", b"a").await.unwrap();
        fs.set_modified("folder/a.md", 1_234).await.unwrap();
        assert_eq!(fs.mtime("folder/a.md"), Some(1_234));
    }
}
