//! Persisted sync state and the store that owns it.
//!
//! The state is written only at defined points: when credentials change, when
//! the remote root folder is chosen, and when a run commits its snapshot.

use crate::snapshot::SyncSnapshot;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{PoisonError, RwLock};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<std::io::Error> for StateError {
    fn from(e: std::io::Error) -> Self {
        StateError::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StateError>;

/// OAuth tokens for the remote store.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl Credentials {
    pub fn has_access_token(&self) -> bool {
        self.access_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

// Tokens never reach logs.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Everything a vault persists between runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    #[serde(default)]
    pub credentials: Credentials,
    /// Remote folder the vault root is paired with
    #[serde(default)]
    pub remote_root_folder_id: Option<String>,
    #[serde(default)]
    pub snapshot: SyncSnapshot,
}

/// Durable storage for `SyncState`.
///
/// Each write replaces one part of the state; a failed write leaves the
/// previously stored value in place.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self) -> Result<SyncState>;

    async fn save_credentials(&self, credentials: &Credentials) -> Result<()>;

    async fn save_root_folder_id(&self, folder_id: &str) -> Result<()>;

    /// Replace the snapshot wholesale at the end of a successful run
    async fn commit_snapshot(&self, snapshot: &SyncSnapshot) -> Result<()>;
}

#[async_trait]
impl<T: StateStore + ?Sized> StateStore for std::sync::Arc<T> {
    async fn load(&self) -> Result<SyncState> {
        (**self).load().await
    }

    async fn save_credentials(&self, credentials: &Credentials) -> Result<()> {
        (**self).save_credentials(credentials).await
    }

    async fn save_root_folder_id(&self, folder_id: &str) -> Result<()> {
        (**self).save_root_folder_id(folder_id).await
    }

    async fn commit_snapshot(&self, snapshot: &SyncSnapshot) -> Result<()> {
        (**self).commit_snapshot(snapshot).await
    }
}

/// In-memory state store for testing
#[derive(Default)]
pub struct InMemoryStateStore {
    state: RwLock<SyncState>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: SyncState) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }

    /// Store holding an access token and nothing else
    pub fn logged_in() -> Self {
        Self::with_state(SyncState {
            credentials: Credentials {
                access_token: Some("test-access-token".into()),
                refresh_token: Some("test-refresh-token".into()),
            },
            ..SyncState::default()
        })
    }

    /// Current state
    pub fn state(&self) -> SyncState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the stored snapshot directly
    pub fn set_snapshot(&self, snapshot: SyncSnapshot) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot = snapshot;
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn load(&self) -> Result<SyncState> {
        Ok(self.state())
    }

    async fn save_credentials(&self, credentials: &Credentials) -> Result<()> {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .credentials = credentials.clone();
        Ok(())
    }

    async fn save_root_folder_id(&self, folder_id: &str) -> Result<()> {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remote_root_folder_id = Some(folder_id.to_string());
        Ok(())
    }

    async fn commit_snapshot(&self, snapshot: &SyncSnapshot) -> Result<()> {
        self.set_snapshot(snapshot.clone());
        Ok(())
    }
}
