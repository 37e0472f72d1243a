//! Native filesystem implementation using tokio::fs.

use async_trait::async_trait;
use drive_sync_core::entry::{join_path, EntryKind};
use drive_sync_core::fs::{FileSystem, FsError, LocalEntry, Result};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs;
use tracing::warn;

/// Vault directory on the local disk
pub struct NativeFs {
    base_path: PathBuf,
}

impl NativeFs {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Resolve a vault-relative path, refusing anything that could leave the vault.
    fn full_path(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        if !relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
        {
            return Err(FsError::InvalidPath(path.to_string()));
        }
        Ok(self.base_path.join(relative))
    }
}

fn map_io(path: &str, e: std::io::Error) -> FsError {
    match e.kind() {
        ErrorKind::NotFound => FsError::NotFound(path.to_string()),
        ErrorKind::AlreadyExists => FsError::AlreadyExists(path.to_string()),
        _ => FsError::Io(format!("{}: {}", path, e)),
    }
}

fn millis_since_epoch(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i64,
        Err(e) => -(e.duration().as_millis() as i64),
    }
}

fn system_time_from_millis(millis: i64) -> SystemTime {
    let offset = Duration::from_millis(millis.unsigned_abs());
    if millis >= 0 {
        UNIX_EPOCH + offset
    } else {
        UNIX_EPOCH - offset
    }
}

#[async_trait]
impl FileSystem for NativeFs {
    async fn list(&self, path: &str) -> Result<Vec<LocalEntry>> {
        let full_path = self.full_path(path)?;
        let metadata = fs::metadata(&full_path)
            .await
            .map_err(|e| map_io(path, e))?;
        if !metadata.is_dir() {
            return Err(FsError::NotDirectory(path.to_string()));
        }

        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&full_path)
            .await
            .map_err(|e| map_io(path, e))?;

        while let Some(entry) = dir.next_entry().await.map_err(|e| map_io(path, e))? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                warn!(
                    "Skipping non-UTF-8 name in {}: {:?}",
                    full_path.display(),
                    entry.file_name()
                );
                continue;
            };
            let child_path = join_path(path, &name);
            let metadata = entry
                .metadata()
                .await
                .map_err(|e| map_io(&child_path, e))?;

            let (kind, modified_at_millis) = if metadata.is_dir() {
                (EntryKind::Folder, 0)
            } else {
                let mtime = metadata.modified().map(millis_since_epoch).unwrap_or(0);
                (EntryKind::File, mtime)
            };

            entries.push(LocalEntry {
                path: child_path,
                name,
                kind,
                modified_at_millis,
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let full_path = self.full_path(path)?;
        if full_path.is_dir() {
            return Err(FsError::IsDirectory(path.to_string()));
        }
        fs::read(&full_path).await.map_err(|e| map_io(path, e))
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        let full_path = self.full_path(path)?;
        if full_path.is_dir() {
            return Err(FsError::IsDirectory(path.to_string()));
        }

        // Create parent directories if needed
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| map_io(path, e))?;
        }

        fs::write(&full_path, content)
            .await
            .map_err(|e| map_io(path, e))
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        let full_path = self.full_path(path)?;
        if full_path.is_file() {
            return Err(FsError::NotDirectory(path.to_string()));
        }
        fs::create_dir_all(&full_path)
            .await
            .map_err(|e| map_io(path, e))
    }

    async fn delete(&self, path: &str, recursive: bool) -> Result<()> {
        if path.is_empty() {
            return Err(FsError::Io("Refusing to delete the vault root".into()));
        }

        let full_path = self.full_path(path)?;
        let metadata = fs::symlink_metadata(&full_path)
            .await
            .map_err(|e| map_io(path, e))?;

        if !metadata.is_dir() {
            return fs::remove_file(&full_path)
                .await
                .map_err(|e| map_io(path, e));
        }

        if recursive {
            fs::remove_dir_all(&full_path)
                .await
                .map_err(|e| map_io(path, e))
        } else {
            fs::remove_dir(&full_path).await.map_err(|e| {
                if e.kind() == ErrorKind::DirectoryNotEmpty {
                    FsError::NotEmpty(path.to_string())
                } else {
                    map_io(path, e)
                }
            })
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        fs::try_exists(self.full_path(path)?)
            .await
            .map_err(|e| map_io(path, e))
    }

    async fn set_modified(&self, path: &str, mtime_millis: i64) -> Result<()> {
        let full_path = self.full_path(path)?;
        let time = system_time_from_millis(mtime_millis);

        tokio::task::spawn_blocking(move || {
            std::fs::File::options()
                .write(true)
                .open(&full_path)?
                .set_modified(time)
        })
        .await
        .map_err(|e| FsError::Io(format!("{}: {}", path, e)))?
        .map_err(|e| map_io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn vault() -> (TempDir, NativeFs) {
        let dir = TempDir::new().unwrap();
        let fs = NativeFs::new(dir.path().to_path_buf());
        (dir, fs)
    }

    #[tokio::test]
    async fn test_write_creates_parents_and_lists_sorted() {
        let (_dir, fs) = vault();
        fs.write("b.md", b"b").await.unwrap();
        fs.write("a/nested.md", b"n").await.unwrap();

        let root = fs.list("").await.unwrap();
        let names: Vec<_> = root.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["a", "b.md"]);
        assert_eq!(root[0].kind, EntryKind::Folder);
        assert_eq!(root[1].kind, EntryKind::File);
        assert!(root[1].modified_at_millis > 0);

        let nested = fs.list("a").await.unwrap();
        assert_eq!(nested[0].path, "a/nested.md");
    }

    #[tokio::test]
    async fn test_list_file_is_not_directory() {
        let (_dir, fs) = vault();
        fs.write("note.md", b"x").await.unwrap();

        assert!(matches!(
            fs.list("note.md").await,
            Err(FsError::NotDirectory(_))
        ));
        assert!(matches!(fs.list("missing").await, Err(FsError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_set_modified_round_trips_through_list() {
        let (_dir, fs) = vault();
        fs.write("a.md", b"a").await.unwrap();
        fs.set_modified("a.md", 1_600_000_000_000).await.unwrap();

        let entries = fs.list("").await.unwrap();
        assert_eq!(entries[0].modified_at_millis, 1_600_000_000_000);
    }

    #[tokio::test]
    async fn test_delete_directory_requires_recursive() {
        let (_dir, fs) = vault();
        fs.write("sub/inner/x.md", b"x").await.unwrap();

        assert!(matches!(
            fs.delete("sub", false).await,
            Err(FsError::NotEmpty(_))
        ));
        fs.delete("sub", true).await.unwrap();
        assert!(!fs.exists("sub").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_root_is_refused() {
        let (_dir, fs) = vault();
        assert!(fs.delete("", true).await.is_err());
        assert!(fs.exists("").await.unwrap());
    }

    #[tokio::test]
    async fn test_read_missing_is_not_found() {
        let (_dir, fs) = vault();
        assert!(matches!(fs.read("nope.md").await, Err(FsError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_paths_leaving_the_vault_are_refused() {
        let dir = TempDir::new().unwrap();
        let vault_path = dir.path().join("vault");
        std::fs::create_dir(&vault_path).unwrap();
        let fs = NativeFs::new(vault_path);

        for path in ["../escaped.md", "x/../../escaped.md", "/tmp/escaped.md", "./a.md"] {
            assert!(
                matches!(fs.write(path, b"x").await, Err(FsError::InvalidPath(_))),
                "{} was accepted",
                path
            );
        }
        assert!(matches!(fs.read("../vault").await, Err(FsError::InvalidPath(_))));
        assert!(!dir.path().join("escaped.md").exists());
    }

    #[test]
    fn test_time_conversion_handles_pre_epoch() {
        assert_eq!(millis_since_epoch(system_time_from_millis(-5_000)), -5_000);
        assert_eq!(millis_since_epoch(system_time_from_millis(42)), 42);
    }
}
