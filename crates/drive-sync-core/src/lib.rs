//! drive-sync-core: two-way synchronization between a local vault and a
//! remote object store.
//!
//! This crate provides:
//! - FileSystem, RemoteStore and StateStore trait abstractions
//! - The known-paths snapshot that tells deletions from creations
//! - The tree reconciler and the run orchestrator that drives it
//! - Event notifications for observers of a run

pub mod entry;
pub mod error;
pub mod events;
pub mod fs;
pub mod mime;
pub mod orchestrator;
pub mod reconciler;
pub mod remote;
pub mod report;
pub mod snapshot;
pub mod state;

pub use entry::EntryKind;
pub use error::{SyncError, TransferOp, TransferSource};
pub use events::{EventBus, Side, Subscription, SyncEvent};
pub use fs::{FileSystem, FsError, InMemoryFs, LocalEntry};
pub use orchestrator::{OrchestratorOptions, SyncOrchestrator, SyncPhase, DEFAULT_ROOT_FOLDER_NAME};
pub use reconciler::{compare_timestamps, FileDecision, Reconciler, SyncOptions, DEFAULT_TOLERANCE_MS};
pub use remote::{InMemoryRemote, RemoteEntry, RemoteError, RemoteStore};
pub use report::{SyncIssue, SyncReport};
pub use snapshot::{KnownPaths, PendingSnapshot, SyncSnapshot};
pub use state::{Credentials, InMemoryStateStore, StateError, StateStore, SyncState};
