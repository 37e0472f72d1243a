//! File watcher with debouncing for vault changes.
//!
//! Uses notify-debouncer-mini for efficient file change detection. Events only
//! signal that a sync is due; the reconciler works out what changed.

use anyhow::Result;
use drive_sync_core::entry::is_hidden;
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebouncedEvent};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tracing::{debug, error};

/// File event from the watcher.
#[derive(Debug, Clone)]
pub struct FileEvent {
    /// Path relative to vault root
    pub path: String,
    /// Type of event
    pub kind: FileEventKind,
}

/// Type of file event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    /// File or folder was created or modified
    Modified,
    /// File or folder was deleted
    Deleted,
}

/// File watcher that monitors the vault directory.
pub struct FileWatcher {
    /// Vault base path
    vault_path: PathBuf,
    /// Debouncer handle (must keep alive)
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
    /// Receiver for file events
    event_rx: mpsc::UnboundedReceiver<FileEvent>,
}

/// Track last seen mtime to filter spurious events (Docker volume bug workaround)
type MtimeCache = Arc<Mutex<HashMap<PathBuf, SystemTime>>>;

/// Vault-relative path of a watched path, or `None` if it is never synced.
///
/// Anything under a hidden segment (including the config directory when it
/// lives in the vault) is ignored.
pub fn sync_relative_path(path: &Path, vault_path: &Path) -> Option<String> {
    let relative = path.strip_prefix(vault_path).ok()?;
    let mut segments = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(segment) => {
                let segment = segment.to_str()?;
                if is_hidden(segment) {
                    return None;
                }
                segments.push(segment);
            }
            _ => return None,
        }
    }
    if segments.is_empty() {
        return None;
    }
    Some(segments.join("/"))
}

impl FileWatcher {
    /// Create a new file watcher for the vault.
    ///
    /// Changes are delivered once no further change happened for `debounce`.
    pub fn new(vault_path: PathBuf, debounce: Duration) -> Result<Self> {
        // Canonicalize the path to resolve symlinks. On macOS, /var/folders/...
        // is actually /private/var/folders/..., and FSEvents needs the real path.
        let vault_path = vault_path.canonicalize().unwrap_or(vault_path);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let vault_path_clone = vault_path.clone();

        let mtime_cache: MtimeCache = Arc::new(Mutex::new(HashMap::new()));
        let mtime_cache_clone = Arc::clone(&mtime_cache);

        let mut debouncer = new_debouncer(
            debounce,
            move |result: Result<Vec<DebouncedEvent>, notify::Error>| match result {
                Ok(events) => {
                    for event in events {
                        if let Some(file_event) =
                            Self::process_event(&event, &vault_path_clone, &mtime_cache_clone)
                        {
                            if event_tx.send(file_event).is_err() {
                                // Receiver dropped
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    error!("File watcher error: {}", e);
                }
            },
        )?;

        debouncer
            .watcher()
            .watch(&vault_path, RecursiveMode::Recursive)?;

        Ok(Self {
            vault_path,
            _debouncer: debouncer,
            event_rx,
        })
    }

    /// Process a single debounced event, returning a FileEvent if relevant.
    fn process_event(
        event: &DebouncedEvent,
        vault_path: &Path,
        mtime_cache: &MtimeCache,
    ) -> Option<FileEvent> {
        let path = &event.path;
        let relative = sync_relative_path(path, vault_path)?;

        let kind = if path.exists() {
            FileEventKind::Modified
        } else {
            FileEventKind::Deleted
        };

        // Uses relative path as key so cache is bounded by vault size
        let key = PathBuf::from(&relative);
        let mut cache = mtime_cache.lock().unwrap_or_else(PoisonError::into_inner);
        match kind {
            FileEventKind::Modified => {
                if let Ok(mtime) = std::fs::metadata(path).and_then(|m| m.modified()) {
                    if cache.get(&key) == Some(&mtime) {
                        // Mtime unchanged - spurious event, skip it
                        return None;
                    }
                    cache.insert(key, mtime);
                }
            }
            FileEventKind::Deleted => {
                cache.remove(&key);
            }
        }

        debug!("File event: {:?} - {}", kind, relative);

        Some(FileEvent {
            path: relative,
            kind,
        })
    }

    /// Get the receiver for file events.
    pub fn event_rx(&mut self) -> &mut mpsc::UnboundedReceiver<FileEvent> {
        &mut self.event_rx
    }

    /// Discard queued events, returning how many were dropped.
    ///
    /// Used after a sync run so the run's own writes do not trigger another one.
    pub fn drain(&mut self) -> usize {
        let mut dropped = 0;
        while self.event_rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }

    /// Get the vault path.
    pub fn vault_path(&self) -> &Path {
        &self.vault_path
    }
}
