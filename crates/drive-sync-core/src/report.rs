//! Per-run tally of what reconciliation did.

use crate::entry::EntryKind;
use serde::Serialize;
use std::fmt::{self, Display, Formatter};

/// A localized problem that skipped part of the tree without aborting the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncIssue {
    /// Same name, different kinds on the two sides
    TypeConflict {
        path: String,
        #[serde(rename = "localKind")]
        local_kind: EntryKind,
        #[serde(rename = "remoteKind")]
        remote_kind: EntryKind,
    },
    /// A path expected to be a local folder is not one
    NotAFolder { path: String },
    /// A remote name that cannot be a local path segment
    InvalidName { path: String },
}

impl SyncIssue {
    pub fn path(&self) -> &str {
        match self {
            SyncIssue::TypeConflict { path, .. }
            | SyncIssue::NotAFolder { path }
            | SyncIssue::InvalidName { path } => path,
        }
    }
}

impl Display for SyncIssue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SyncIssue::TypeConflict {
                local_kind,
                remote_kind,
                ..
            } => write!(f, "{} locally but {} remotely", local_kind, remote_kind),
            SyncIssue::NotAFolder { .. } => write!(f, "expected a folder"),
            SyncIssue::InvalidName { .. } => {
                write!(f, "remote name cannot be used as a local file name")
            }
        }
    }
}

/// Report from a reconciliation run
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// New local files pushed to the remote
    pub uploaded: Vec<String>,
    /// Local files newer than their remote copy, pushed
    pub updated: Vec<String>,
    /// Remote files written locally (new or newer)
    pub downloaded: Vec<String>,
    /// Local entries removed because they were deleted remotely
    pub deleted_local: Vec<String>,
    /// Remote entries trashed because they were deleted locally
    pub deleted_remote: Vec<String>,
    /// Folders created on either side
    pub folders_created: Vec<String>,
    /// Subtrees left untouched this run
    pub issues: Vec<SyncIssue>,
}

impl SyncReport {
    /// Number of operations that changed either side
    pub fn mutations(&self) -> usize {
        self.uploaded.len()
            + self.updated.len()
            + self.downloaded.len()
            + self.deleted_local.len()
            + self.deleted_remote.len()
            + self.folders_created.len()
    }

    /// Check if any changes were made
    pub fn has_changes(&self) -> bool {
        self.mutations() > 0
    }
}
