//! Persistence for sync state.
//!
//! Credentials, the paired remote root folder and the last committed snapshot
//! are stored in `state.json` inside the config directory. Every write
//! replaces the file atomically, so a crash mid-write keeps the previous state.

use async_trait::async_trait;
use drive_sync_core::snapshot::SyncSnapshot;
use drive_sync_core::state::{Credentials, Result, StateError, StateStore, SyncState};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

/// State file name within the config directory
pub const STATE_FILE: &str = "state.json";

/// `StateStore` backed by a JSON file.
pub struct JsonStateStore {
    /// Path to the storage file.
    path: PathBuf,
    /// In-memory copy of what is on disk; the lock also serializes writers.
    state: Mutex<SyncState>,
}

impl JsonStateStore {
    /// Open the store in `config_dir`, loading `state.json` if present.
    pub async fn open(config_dir: &Path) -> Result<Self> {
        let path = config_dir.join(STATE_FILE);
        let state = Self::read(&path).await?;
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(path: &Path) -> Result<SyncState> {
        match fs::read_to_string(path).await {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SyncState::default()),
            Err(e) => Err(StateError::Io(format!("{}: {}", path.display(), e))),
        }
    }

    /// Apply `update` to a copy of the state, persist it, then adopt it.
    async fn modify(&self, update: impl FnOnce(&mut SyncState) + Send) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        update(&mut next);
        self.persist(&next).await?;
        *state = next;
        Ok(())
    }

    async fn persist(&self, state: &SyncState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let contents = serde_json::to_string_pretty(state)?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, contents).await?;
        fs::rename(&tmp_path, &self.path).await?;

        debug!("Saved state to {}", self.path.display());
        Ok(())
    }
}

#[async_trait]
impl StateStore for JsonStateStore {
    async fn load(&self) -> Result<SyncState> {
        Ok(self.state.lock().await.clone())
    }

    async fn save_credentials(&self, credentials: &Credentials) -> Result<()> {
        self.modify(|state| state.credentials = credentials.clone())
            .await
    }

    async fn save_root_folder_id(&self, folder_id: &str) -> Result<()> {
        self.modify(|state| state.remote_root_folder_id = Some(folder_id.to_string()))
            .await
    }

    async fn commit_snapshot(&self, snapshot: &SyncSnapshot) -> Result<()> {
        self.modify(|state| state.snapshot = snapshot.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn snapshot(paths: &[&str]) -> SyncSnapshot {
        SyncSnapshot {
            known_paths: paths.iter().map(|p| p.to_string()).collect(),
            last_sync_at_millis: 1_700_000_000_000,
            root_folder_id: Some("root-1".into()),
        }
    }

    #[tokio::test]
    async fn test_missing_file_loads_default() {
        let dir = TempDir::new().unwrap();
        let store = JsonStateStore::open(dir.path()).await.unwrap();

        assert_eq!(store.load().await.unwrap(), SyncState::default());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = JsonStateStore::open(dir.path()).await.unwrap();
            store
                .save_credentials(&Credentials {
                    access_token: Some("access".into()),
                    refresh_token: Some("refresh".into()),
                })
                .await
                .unwrap();
            store.save_root_folder_id("root-1").await.unwrap();
            store.commit_snapshot(&snapshot(&["a.md", "sub"])).await.unwrap();
        }

        let reopened = JsonStateStore::open(dir.path()).await.unwrap();
        let state = reopened.load().await.unwrap();
        assert!(state.credentials.has_access_token());
        assert_eq!(state.remote_root_folder_id.as_deref(), Some("root-1"));
        assert_eq!(state.snapshot, snapshot(&["a.md", "sub"]));
    }

    #[tokio::test]
    async fn test_file_format_is_camel_case() {
        let dir = TempDir::new().unwrap();
        let store = JsonStateStore::open(dir.path()).await.unwrap();
        store.commit_snapshot(&snapshot(&["a.md"])).await.unwrap();

        let contents = std::fs::read_to_string(store.path()).unwrap();
        assert!(contents.contains("\"knownPaths\""));
        assert!(contents.contains("\"lastSyncAtMillis\""));
        assert!(contents.contains("\"remoteRootFolderId\""));
        assert!(!dir.path().join("state.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(STATE_FILE), "{ not json").unwrap();

        assert!(matches!(
            JsonStateStore::open(dir.path()).await,
            Err(StateError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_write_keeps_cached_state() {
        let dir = TempDir::new().unwrap();
        let store = JsonStateStore::open(dir.path()).await.unwrap();
        store.commit_snapshot(&snapshot(&["a.md"])).await.unwrap();

        // A directory where the temp file should go makes the write fail
        std::fs::create_dir(dir.path().join("state.json.tmp")).unwrap();
        assert!(store.commit_snapshot(&snapshot(&["b.md"])).await.is_err());

        assert_eq!(store.load().await.unwrap().snapshot, snapshot(&["a.md"]));
    }
}
