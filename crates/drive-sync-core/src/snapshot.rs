//! Known-path snapshots: the only memory a sync run has of the previous one.
//!
//! A path in `SyncSnapshot::known_paths` was present on both sides (or created
//! on one side to match the other) when the last successful run finished. A
//! name seen on only one side is a deletion if its path is known, and a new
//! entry otherwise.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Set of vault-relative paths.
pub type KnownPaths = BTreeSet<String>;

/// State committed at the end of the last successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSnapshot {
    /// Paths reconciled by the last successful run
    #[serde(default)]
    pub known_paths: KnownPaths,
    /// When that run finished (0 = never)
    #[serde(default)]
    pub last_sync_at_millis: i64,
    /// Remote root folder the paths were reconciled against
    #[serde(default)]
    pub root_folder_id: Option<String>,
}

impl SyncSnapshot {
    pub fn contains(&self, path: &str) -> bool {
        self.known_paths.contains(path)
    }

    /// True before the first successful run
    pub fn is_empty(&self) -> bool {
        self.known_paths.is_empty() && self.last_sync_at_millis == 0
    }

    /// Whether this snapshot can serve as the baseline for a run against `root_id`.
    ///
    /// Snapshots written before the root was recorded are accepted.
    pub fn matches_root(&self, root_id: &str) -> bool {
        self.root_folder_id
            .as_deref()
            .is_none_or(|snapshot_root| snapshot_root == root_id)
    }
}

/// Paths reconciled during the current run.
///
/// Append-only. Built fresh every run so that anything not visited simply
/// drops out of the next snapshot.
#[derive(Debug, Default)]
pub struct PendingSnapshot {
    paths: KnownPaths,
}

impl PendingSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, path: impl Into<String>) {
        self.paths.insert(path.into());
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.contains(path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn paths(&self) -> &KnownPaths {
        &self.paths
    }

    /// Seal the run's paths into the snapshot that replaces the previous one.
    pub fn into_snapshot(self, root_folder_id: impl Into<String>, now_millis: i64) -> SyncSnapshot {
        SyncSnapshot {
            known_paths: self.paths,
            last_sync_at_millis: now_millis,
            root_folder_id: Some(root_folder_id.into()),
        }
    }
}
