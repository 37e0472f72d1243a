//! Run lifecycle: authentication check, remote root resolution, reconciliation
//! and snapshot commit.
//!
//! At most one run is active per orchestrator. The stored snapshot is replaced
//! only after the whole tree has been reconciled; an aborted run leaves it as
//! it was.

use crate::error::{Result, SyncError, TransferOp};
use crate::events::{EventBus, SyncEvent};
use crate::fs::FileSystem;
use crate::reconciler::{Reconciler, SyncOptions};
use crate::remote::{RemoteError, RemoteStore};
use crate::report::SyncReport;
use crate::snapshot::{KnownPaths, PendingSnapshot};
use crate::state::StateStore;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use tracing::{error, info, warn};

/// Folder created at the top of the drive when no root is recorded yet.
pub const DEFAULT_ROOT_FOLDER_NAME: &str = "ObsidianVault";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorOptions {
    pub sync: SyncOptions,
    /// Name used to find or create the remote root folder
    pub root_folder_name: String,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            sync: SyncOptions::default(),
            root_folder_name: DEFAULT_ROOT_FOLDER_NAME.to_string(),
        }
    }
}

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SyncPhase {
    Idle = 0,
    Authenticating = 1,
    EnsuringRootFolder = 2,
    Reconciling = 3,
    Committing = 4,
}

impl SyncPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SyncPhase::Authenticating,
            2 => SyncPhase::EnsuringRootFolder,
            3 => SyncPhase::Reconciling,
            4 => SyncPhase::Committing,
            _ => SyncPhase::Idle,
        }
    }
}

/// Clears the running flag and resets the phase when a run ends, however it ends.
struct RunGuard<'a> {
    running: &'a AtomicBool,
    phase: &'a AtomicU8,
}

impl<'a> RunGuard<'a> {
    fn acquire(running: &'a AtomicBool, phase: &'a AtomicU8) -> Option<Self> {
        running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard { running, phase })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.phase.store(SyncPhase::Idle as u8, Ordering::Release);
        self.running.store(false, Ordering::Release);
    }
}

/// Drives sync runs for one vault.
pub struct SyncOrchestrator<L, R, S> {
    local: L,
    remote: R,
    state: S,
    events: Arc<EventBus>,
    options: OrchestratorOptions,
    running: AtomicBool,
    phase: AtomicU8,
}

impl<L, R, S> SyncOrchestrator<L, R, S>
where
    L: FileSystem,
    R: RemoteStore,
    S: StateStore,
{
    pub fn new(local: L, remote: R, state: S, events: Arc<EventBus>, options: OrchestratorOptions) -> Self {
        Self {
            local,
            remote,
            state,
            events,
            options,
            running: AtomicBool::new(false),
            phase: AtomicU8::new(SyncPhase::Idle as u8),
        }
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn local(&self) -> &L {
        &self.local
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn phase(&self) -> SyncPhase {
        SyncPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run one full sync.
    ///
    /// Returns `SyncError::AlreadyRunning` without touching anything if another
    /// run on this orchestrator has not finished.
    pub async fn run(&self) -> Result<SyncReport> {
        let Some(_guard) = RunGuard::acquire(&self.running, &self.phase) else {
            warn!("Sync requested while a run is in progress, ignoring");
            return Err(SyncError::AlreadyRunning);
        };

        match self.run_exclusive().await {
            Ok(report) => {
                info!(
                    "Sync completed: {} change(s), {} issue(s)",
                    report.mutations(),
                    report.issues.len()
                );
                self.events.emit(SyncEvent::completed(&report));
                Ok(report)
            }
            Err(SyncError::AuthMissing) => {
                warn!("No access token stored, log in first");
                self.events.emit(SyncEvent::AuthMissing);
                Err(SyncError::AuthMissing)
            }
            Err(e) => {
                error!("Sync failed: {}", e);
                self.events.emit(SyncEvent::Failed {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn run_exclusive(&self) -> Result<SyncReport> {
        self.set_phase(SyncPhase::Authenticating);
        let state = self.state.load().await?;
        if !state.credentials.has_access_token() {
            return Err(SyncError::AuthMissing);
        }
        self.events.emit(SyncEvent::Started);

        self.set_phase(SyncPhase::EnsuringRootFolder);
        let root_id = self
            .resolve_root(state.remote_root_folder_id.as_deref())
            .await?;

        let baseline = if state.snapshot.matches_root(&root_id) {
            state.snapshot.known_paths
        } else {
            warn!(
                "Stored snapshot belongs to another remote root, treating every entry as new"
            );
            KnownPaths::new()
        };

        self.set_phase(SyncPhase::Reconciling);
        let mut pending = PendingSnapshot::new();
        let mut reconciler =
            Reconciler::new(&self.local, &self.remote, &self.events, self.options.sync);
        reconciler
            .reconcile("", &root_id, &baseline, &mut pending)
            .await?;
        let report = reconciler.into_report();

        self.set_phase(SyncPhase::Committing);
        let known = pending.len();
        let snapshot = pending.into_snapshot(root_id, chrono::Utc::now().timestamp_millis());
        self.state.commit_snapshot(&snapshot).await?;
        info!("Committed snapshot with {} known path(s)", known);

        Ok(report)
    }

    /// Validate the recorded root folder, or find/create one and record it.
    ///
    /// A recorded root that was deleted or trashed is replaced; the stored
    /// snapshot then no longer matches the root, so nothing is deleted.
    async fn resolve_root(&self, recorded: Option<&str>) -> Result<String> {
        if let Some(root_id) = recorded {
            match self.remote.fetch_metadata(root_id).await {
                Ok(entry) if entry.kind.is_folder() => return Ok(root_id.to_string()),
                Ok(_) => return Err(SyncError::InvalidRoot(root_id.to_string())),
                Err(RemoteError::NotFound(_)) => {
                    warn!(
                        "Remote root folder {} no longer exists, resolving a new one",
                        root_id
                    );
                }
                Err(e) => return Err(SyncError::transfer(TransferOp::ResolveRoot, root_id)(e)),
            }
        }

        let name = &self.options.root_folder_name;
        let folder = self
            .remote
            .ensure_root_folder(name)
            .await
            .map_err(SyncError::transfer(TransferOp::ResolveRoot, name))?;
        self.state.save_root_folder_id(&folder.remote_id).await?;

        info!("Using remote root folder {} ({})", name, folder.remote_id);
        self.events.emit(SyncEvent::RootFolderCreated {
            folder_id: folder.remote_id.clone(),
            name: name.clone(),
        });
        Ok(folder.remote_id)
    }

    fn set_phase(&self, phase: SyncPhase) {
        self.phase.store(phase as u8, Ordering::Release);
    }
}
