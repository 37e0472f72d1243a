//! Event infrastructure for drive-sync-core.
//!
//! Provides `SyncEvent` for user-facing notifications and `EventBus` for
//! subscriptions. Events are observational: nothing in the reconciliation
//! depends on who is listening.

use crate::report::SyncReport;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

/// Which side of the sync an action touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Side {
    Local,
    Remote,
}

/// Notifications emitted during a sync run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEvent {
    /// No access token is stored; nothing was done.
    AuthMissing,
    /// A run began.
    Started,
    /// The remote root folder was created (or adopted) and recorded.
    RootFolderCreated {
        #[serde(rename = "folderId")]
        folder_id: String,
        name: String,
    },
    /// A new local file was uploaded.
    Uploaded { path: String },
    /// A local file newer than its remote copy was pushed.
    Updated { path: String },
    /// A remote file was written locally.
    Downloaded {
        path: String,
        /// True when the file did not exist locally
        #[serde(rename = "isNew")]
        is_new: bool,
    },
    /// A file or folder was deleted because the other side deleted it.
    Deleted {
        path: String,
        /// Side the deletion was applied to
        side: Side,
    },
    /// A folder was created to mirror the other side.
    FolderCreated { path: String, side: Side },
    /// A name is a file on one side and a folder on the other; left untouched.
    Conflict { path: String, message: String },
    /// A run finished and its snapshot was committed.
    Completed {
        /// Number of mutating operations applied
        changes: usize,
        /// Number of conflicts or skipped subtrees
        issues: usize,
    },
    /// A run aborted; the previous snapshot was kept.
    Failed { message: String },
}

impl SyncEvent {
    pub fn completed(report: &SyncReport) -> Self {
        SyncEvent::Completed {
            changes: report.mutations(),
            issues: report.issues.len(),
        }
    }

    /// Human-readable notification text.
    pub fn message(&self) -> String {
        match self {
            SyncEvent::AuthMissing => "Please log in to Google Drive first.".to_string(),
            SyncEvent::Started => "Starting sync...".to_string(),
            SyncEvent::RootFolderCreated { name, .. } => {
                format!("Created \"{}\" folder in Google Drive.", name)
            }
            SyncEvent::Uploaded { path } => format!("Uploading {}...", path),
            SyncEvent::Updated { path } => format!("Updating {} (local is newer)...", path),
            SyncEvent::Downloaded { path, is_new: true } => {
                format!("Downloading new file {}...", path)
            }
            SyncEvent::Downloaded { path, is_new: false } => {
                format!("Downloading {} (remote is newer)...", path)
            }
            SyncEvent::Deleted {
                path,
                side: Side::Local,
            } => format!("Deleting local {} (remote deletion detected)...", path),
            SyncEvent::Deleted {
                path,
                side: Side::Remote,
            } => format!("Deleting remote {} (local deletion detected)...", path),
            SyncEvent::FolderCreated {
                path,
                side: Side::Local,
            } => format!("Creating local folder {}...", path),
            SyncEvent::FolderCreated {
                path,
                side: Side::Remote,
            } => format!("Creating remote folder {}...", path),
            SyncEvent::Conflict { path, message } => format!("Conflict at {}: {}", path, message),
            SyncEvent::Completed { changes, issues: 0 } => {
                format!("Sync completed ({} change(s)).", changes)
            }
            SyncEvent::Completed { changes, issues } => format!(
                "Sync completed ({} change(s), {} item(s) skipped).",
                changes, issues
            ),
            SyncEvent::Failed { message } => {
                format!("Sync failed: {}. Check the log for details.", message)
            }
        }
    }
}

/// Subscription handle that unsubscribes automatically when dropped.
///
/// Follows the disposer pattern: hold this value to keep receiving events,
/// drop it (or let it go out of scope) to unsubscribe.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

type Callback = Arc<dyn Fn(SyncEvent) + Send + Sync>;

/// Event bus for publishing sync events to subscribers.
///
/// Thread-safe for use in multi-threaded Tokio runtime.
/// Wrap in `Arc` to enable subscriptions.
pub struct EventBus {
    callbacks: RwLock<Vec<(usize, Callback)>>,
    next_id: AtomicUsize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
    ///
    /// Requires `self` to be wrapped in `Arc`.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(SyncEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(callback)));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        // Use try_write to avoid deadlock if Drop runs during panic unwinding
        // while a read lock is held (e.g., during emit).
        if let Ok(mut guard) = self.callbacks.try_write() {
            guard.retain(|(i, _)| *i != id);
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: SyncEvent) {
        // Clone the callback list to prevent deadlock if a callback calls subscribe.
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(event.clone());
        }
    }
}
