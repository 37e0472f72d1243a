//! Tree reconciliation between a local directory and its paired remote folder.
//!
//! Each level is processed in three steps:
//! 1. the remote folder's children are indexed by name,
//! 2. every visible local child is matched against that index and the match
//!    is removed from it,
//! 3. whatever is left in the index exists only remotely.
//!
//! A name present on one side only is classified with the previous run's
//! known paths: known means the other side deleted it, unknown means it is new.
//! Matched subfolders are recursed into after their level is classified, so the
//! walk is depth-first and strictly sequential.

use crate::entry::{display_dir, is_hidden, is_valid_name, join_path, EntryKind};
use crate::error::{Result, SyncError, TransferOp};
use crate::events::{EventBus, Side, SyncEvent};
use crate::fs::{FileSystem, FsError, LocalEntry};
use crate::mime::mime_type_for;
use crate::remote::{RemoteEntry, RemoteStore};
use crate::report::{SyncIssue, SyncReport};
use crate::snapshot::{KnownPaths, PendingSnapshot};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, info, warn};

/// Modification times closer than this are considered equal.
pub const DEFAULT_TOLERANCE_MS: i64 = 5000;

/// Tuning for a reconciliation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Timestamp window absorbing clock and propagation skew
    pub tolerance_ms: i64,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            tolerance_ms: DEFAULT_TOLERANCE_MS,
        }
    }
}

/// What to do with a file present on both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileDecision {
    /// Local copy is newer: push it
    PushLocal,
    /// Remote copy is newer: pull it
    PullRemote,
    /// Within tolerance: leave both alone
    InSync,
}

/// Compare modification times with a tolerance window. Ties go to `InSync`.
pub fn compare_timestamps(local_millis: i64, remote_millis: i64, tolerance_ms: i64) -> FileDecision {
    if local_millis > remote_millis.saturating_add(tolerance_ms) {
        FileDecision::PushLocal
    } else if remote_millis > local_millis.saturating_add(tolerance_ms) {
        FileDecision::PullRemote
    } else {
        FileDecision::InSync
    }
}

type LevelFuture<'s> = Pin<Box<dyn Future<Output = Result<()>> + Send + 's>>;

/// Applies one run's worth of reconciliation and tallies what it did.
pub struct Reconciler<'a, L: ?Sized, R: ?Sized> {
    local: &'a L,
    remote: &'a R,
    events: &'a EventBus,
    options: SyncOptions,
    report: SyncReport,
}

impl<'a, L, R> Reconciler<'a, L, R>
where
    L: FileSystem + ?Sized,
    R: RemoteStore + ?Sized,
{
    pub fn new(local: &'a L, remote: &'a R, events: &'a EventBus, options: SyncOptions) -> Self {
        Self {
            local,
            remote,
            events,
            options,
            report: SyncReport::default(),
        }
    }

    pub fn report(&self) -> &SyncReport {
        &self.report
    }

    pub fn into_report(self) -> SyncReport {
        self.report
    }

    /// Reconcile `local_dir` (the vault root is `""`) with `remote_folder_id`.
    ///
    /// `known` is the previous run's snapshot and is only read. Every path this
    /// run leaves present on both sides is recorded in `pending`. Any transfer
    /// failure aborts the whole walk.
    pub fn reconcile<'s>(
        &'s mut self,
        local_dir: &'s str,
        remote_folder_id: &'s str,
        known: &'s KnownPaths,
        pending: &'s mut PendingSnapshot,
    ) -> LevelFuture<'s> {
        Box::pin(async move {
            debug!("Reconciling {}", display_dir(local_dir));

            let remote_children = self
                .remote
                .list_children(remote_folder_id)
                .await
                .map_err(SyncError::transfer(TransferOp::ListRemote, display_dir(local_dir)))?;
            let RemoteIndex {
                by_name: mut remote_by_name,
                invalid_names,
            } = index_remote_children(local_dir, remote_children);
            for name in &invalid_names {
                self.record_issue(SyncIssue::InvalidName {
                    path: join_path(local_dir, name),
                });
            }

            let local_children = match self.local.list(local_dir).await {
                Ok(children) => children,
                Err(FsError::NotDirectory(_)) => {
                    warn!("Local path {} is not a folder, skipping", display_dir(local_dir));
                    self.record_issue(SyncIssue::NotAFolder {
                        path: local_dir.to_string(),
                    });
                    return Ok(());
                }
                Err(e) => {
                    return Err(SyncError::transfer(TransferOp::ListLocal, display_dir(local_dir))(e));
                }
            };

            let visible = local_children
                .iter()
                .filter(|c| !is_hidden(&c.name) && !invalid_names.contains(&c.name));
            for child in visible {
                let remote_match = remote_by_name.remove(&child.name);

                match (child.kind, remote_match) {
                    (EntryKind::File, None) => {
                        self.local_only_file(child, remote_folder_id, known, pending)
                            .await?;
                    }
                    (EntryKind::File, Some(remote)) if remote.kind.is_file() => {
                        self.matched_file(child, &remote, pending).await?;
                    }
                    (EntryKind::Folder, None) => {
                        if known.contains(&child.path) {
                            self.delete_local(&child.path, EntryKind::Folder).await?;
                            continue;
                        }

                        let folder = self
                            .remote
                            .create_folder(&child.name, remote_folder_id)
                            .await
                            .map_err(SyncError::transfer(TransferOp::CreateRemoteFolder, &child.path))?;
                        info!("Created remote folder {}", child.path);
                        self.report.folders_created.push(child.path.clone());
                        self.events.emit(SyncEvent::FolderCreated {
                            path: child.path.clone(),
                            side: Side::Remote,
                        });
                        pending.record(child.path.clone());

                        // Nothing under a fresh folder can have been known
                        let fresh = KnownPaths::new();
                        self.reconcile(&child.path, &folder.remote_id, &fresh, pending)
                            .await?;
                    }
                    (EntryKind::Folder, Some(remote)) if remote.kind.is_folder() => {
                        pending.record(child.path.clone());
                        self.reconcile(&child.path, &remote.remote_id, known, pending)
                            .await?;
                    }
                    (local_kind, Some(remote)) => {
                        warn!(
                            "Conflict: {} is {} locally but {} remotely",
                            child.path, local_kind, remote.kind
                        );
                        self.record_issue(SyncIssue::TypeConflict {
                            path: child.path.clone(),
                            local_kind,
                            remote_kind: remote.kind,
                        });
                    }
                }
            }

            // Whatever is left exists only remotely
            for (name, remote) in remote_by_name {
                let path = join_path(local_dir, &name);

                if known.contains(&path) {
                    self.delete_remote(&path, &remote).await?;
                    continue;
                }

                match remote.kind {
                    EntryKind::Folder => {
                        if !self
                            .local
                            .exists(&path)
                            .await
                            .map_err(SyncError::transfer(TransferOp::CreateLocalFolder, &path))?
                        {
                            self.local
                                .mkdir(&path)
                                .await
                                .map_err(SyncError::transfer(TransferOp::CreateLocalFolder, &path))?;
                            info!("Created local folder {}", path);
                            self.report.folders_created.push(path.clone());
                            self.events.emit(SyncEvent::FolderCreated {
                                path: path.clone(),
                                side: Side::Local,
                            });
                        }
                        pending.record(path.clone());

                        // Known descendants of an unknown folder still count as
                        // local deletions
                        self.reconcile(&path, &remote.remote_id, known, pending)
                            .await?;
                    }
                    EntryKind::File => {
                        self.pull(&path, &remote, true).await?;
                        pending.record(path);
                    }
                }
            }

            Ok(())
        })
    }

    /// A local file with no remote counterpart: deleted remotely, or new here.
    async fn local_only_file(
        &mut self,
        child: &LocalEntry,
        remote_folder_id: &str,
        known: &KnownPaths,
        pending: &mut PendingSnapshot,
    ) -> Result<()> {
        if known.contains(&child.path) {
            return self.delete_local(&child.path, EntryKind::File).await;
        }

        self.events.emit(SyncEvent::Uploaded {
            path: child.path.clone(),
        });
        let content = self
            .local
            .read(&child.path)
            .await
            .map_err(SyncError::transfer(TransferOp::Read, &child.path))?;
        self.remote
            .upload(
                &child.name,
                remote_folder_id,
                &content,
                mime_type_for(&child.path),
                child.modified_at_millis,
            )
            .await
            .map_err(SyncError::transfer(TransferOp::Upload, &child.path))?;

        info!("Uploaded {} ({} bytes)", child.path, content.len());
        self.report.uploaded.push(child.path.clone());
        pending.record(child.path.clone());
        Ok(())
    }

    /// A file present on both sides: newest wins outside the tolerance window.
    async fn matched_file(
        &mut self,
        child: &LocalEntry,
        remote: &RemoteEntry,
        pending: &mut PendingSnapshot,
    ) -> Result<()> {
        let decision = compare_timestamps(
            child.modified_at_millis,
            remote.modified_at_millis,
            self.options.tolerance_ms,
        );

        match decision {
            FileDecision::PushLocal => {
                self.events.emit(SyncEvent::Updated {
                    path: child.path.clone(),
                });
                let content = self
                    .local
                    .read(&child.path)
                    .await
                    .map_err(SyncError::transfer(TransferOp::Read, &child.path))?;
                self.remote
                    .update(
                        &remote.remote_id,
                        &content,
                        mime_type_for(&child.path),
                        child.modified_at_millis,
                    )
                    .await
                    .map_err(SyncError::transfer(TransferOp::Update, &child.path))?;
                info!("Updated remote {} (local is newer)", child.path);
                self.report.updated.push(child.path.clone());
            }
            FileDecision::PullRemote => {
                self.pull(&child.path, remote, false).await?;
            }
            FileDecision::InSync => {
                debug!("{} is in sync", child.path);
            }
        }

        pending.record(child.path.clone());
        Ok(())
    }

    /// Download a remote file over `path` and stamp it with the remote mtime.
    async fn pull(&mut self, path: &str, remote: &RemoteEntry, is_new: bool) -> Result<()> {
        self.events.emit(SyncEvent::Downloaded {
            path: path.to_string(),
            is_new,
        });
        let content = self
            .remote
            .download(&remote.remote_id)
            .await
            .map_err(SyncError::transfer(TransferOp::Download, path))?;
        self.local
            .write(path, &content)
            .await
            .map_err(SyncError::transfer(TransferOp::Write, path))?;
        self.local
            .set_modified(path, remote.modified_at_millis)
            .await
            .map_err(SyncError::transfer(TransferOp::Write, path))?;

        info!(
            "Downloaded {} ({} bytes, {})",
            path,
            content.len(),
            if is_new { "new" } else { "remote is newer" }
        );
        self.report.downloaded.push(path.to_string());
        Ok(())
    }

    /// Apply a remote deletion locally. The path is not carried forward.
    async fn delete_local(&mut self, path: &str, kind: EntryKind) -> Result<()> {
        self.events.emit(SyncEvent::Deleted {
            path: path.to_string(),
            side: Side::Local,
        });
        self.local
            .delete(path, kind.is_folder())
            .await
            .map_err(SyncError::transfer(TransferOp::DeleteLocal, path))?;
        info!("Deleted local {} {} (remote deletion detected)", kind, path);
        self.report.deleted_local.push(path.to_string());
        Ok(())
    }

    /// Apply a local deletion remotely by trashing. The path is not carried forward.
    async fn delete_remote(&mut self, path: &str, remote: &RemoteEntry) -> Result<()> {
        self.events.emit(SyncEvent::Deleted {
            path: path.to_string(),
            side: Side::Remote,
        });
        self.remote
            .soft_delete(&remote.remote_id)
            .await
            .map_err(SyncError::transfer(TransferOp::DeleteRemote, path))?;
        info!("Trashed remote {} {} (local deletion detected)", remote.kind, path);
        self.report.deleted_remote.push(path.to_string());
        Ok(())
    }

    fn record_issue(&mut self, issue: SyncIssue) {
        self.events.emit(SyncEvent::Conflict {
            path: issue.path().to_string(),
            message: issue.to_string(),
        });
        self.report.issues.push(issue);
    }
}

/// Remote children of one folder, keyed by name.
struct RemoteIndex {
    by_name: BTreeMap<String, RemoteEntry>,
    /// Names that are never synced, along with any local entry of the same name
    invalid_names: BTreeSet<String>,
}

/// Index remote children by name, dropping hidden names and later duplicates.
fn index_remote_children(local_dir: &str, children: Vec<RemoteEntry>) -> RemoteIndex {
    let mut by_name: BTreeMap<String, RemoteEntry> = BTreeMap::new();
    let mut invalid_names = BTreeSet::new();
    for child in children {
        if !is_valid_name(&child.name) {
            warn!(
                "Remote name {:?} in {} cannot be a local path, skipping {}",
                child.name,
                display_dir(local_dir),
                child.remote_id
            );
            invalid_names.insert(child.name);
            continue;
        }
        if is_hidden(&child.name) {
            continue;
        }
        if let Some(first) = by_name.get(&child.name) {
            warn!(
                "Duplicate remote name {} (keeping {}, ignoring {})",
                join_path(local_dir, &child.name),
                first.remote_id,
                child.remote_id
            );
            continue;
        }
        by_name.insert(child.name.clone(), child);
    }
    RemoteIndex {
        by_name,
        invalid_names,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::InMemoryFs;
    use crate::remote::{InMemoryRemote, RemoteOp, ROOT_ID};

    const T: i64 = 1_700_000_000_000;

    struct Fixture {
        fs: InMemoryFs,
        remote: InMemoryRemote,
        events: EventBus,
        root: String,
    }

    impl Fixture {
        fn new() -> Self {
            let remote = InMemoryRemote::new();
            let root = remote.add_folder(ROOT_ID, "ObsidianVault");
            Self {
                fs: InMemoryFs::new(),
                remote,
                events: EventBus::new(),
                root,
            }
        }

        async fn write_local(&self, path: &str, content: &[u8], mtime: i64) {
            self.fs.write(path, content).await.unwrap();
            self.fs.set_mtime(path, mtime);
        }

        async fn run(&self, known: &KnownPaths) -> (SyncReport, PendingSnapshot) {
            let mut pending = PendingSnapshot::new();
            let mut reconciler =
                Reconciler::new(&self.fs, &self.remote, &self.events, SyncOptions::default());
            reconciler
                .reconcile("", &self.root, known, &mut pending)
                .await
                .unwrap();
            (reconciler.into_report(), pending)
        }
    }

    fn known(paths: &[&str]) -> KnownPaths {
        paths.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_compare_timestamps_window() {
        assert_eq!(compare_timestamps(T, T + 3000, 5000), FileDecision::InSync);
        assert_eq!(compare_timestamps(T, T + 5000, 5000), FileDecision::InSync);
        assert_eq!(compare_timestamps(T, T + 6000, 5000), FileDecision::PullRemote);
        assert_eq!(compare_timestamps(T + 6000, T, 5000), FileDecision::PushLocal);
    }

    #[test]
    fn test_compare_timestamps_does_not_overflow() {
        assert_eq!(compare_timestamps(i64::MAX, i64::MAX, 5000), FileDecision::InSync);
    }

    #[tokio::test]
    async fn test_new_local_file_is_uploaded() {
        let fx = Fixture::new();
        fx.write_local("a.md", b"hello", T).await;

        let (report, pending) = fx.run(&KnownPaths::new()).await;

        assert_eq!(report.uploaded, vec!["a.md"]);
        assert!(pending.contains("a.md"));
        let entry = fx.remote.find_path(&fx.root, "a.md").unwrap();
        assert_eq!(fx.remote.content(&entry.remote_id).unwrap(), b"hello");
        assert_eq!(entry.modified_at_millis, T);
        assert_eq!(
            fx.remote.mime_type(&entry.remote_id).as_deref(),
            Some("text/markdown")
        );
    }

    #[tokio::test]
    async fn test_known_local_file_missing_remotely_is_deleted_locally() {
        let fx = Fixture::new();
        fx.write_local("a.md", b"hello", T).await;

        let (report, pending) = fx.run(&known(&["a.md"])).await;

        assert_eq!(report.deleted_local, vec!["a.md"]);
        assert!(!fx.fs.exists("a.md").await.unwrap());
        assert!(!pending.contains("a.md"));
        assert_eq!(fx.remote.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_known_local_folder_missing_remotely_is_deleted_recursively() {
        let fx = Fixture::new();
        fx.write_local("sub/inner/x.md", b"x", T).await;

        let (report, pending) = fx.run(&known(&["sub", "sub/inner", "sub/inner/x.md"])).await;

        assert_eq!(report.deleted_local, vec!["sub"]);
        assert!(!fx.fs.exists("sub").await.unwrap());
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_new_local_folder_is_created_remotely_with_contents() {
        let fx = Fixture::new();
        fx.write_local("sub/b.md", b"b", T).await;

        let (report, pending) = fx.run(&KnownPaths::new()).await;

        assert_eq!(report.folders_created, vec!["sub"]);
        assert_eq!(report.uploaded, vec!["sub/b.md"]);
        assert!(pending.contains("sub"));
        assert!(pending.contains("sub/b.md"));
        assert!(fx.remote.find_path(&fx.root, "sub/b.md").is_some());
    }

    #[tokio::test]
    async fn test_fresh_local_folder_ignores_stale_known_children() {
        let fx = Fixture::new();
        fx.write_local("sub/b.md", b"b", T).await;

        // "sub/b.md" is known but "sub" is not: the folder is new, so is its content
        let (report, _) = fx.run(&known(&["sub/b.md"])).await;

        assert_eq!(report.uploaded, vec!["sub/b.md"]);
        assert!(fx.fs.exists("sub/b.md").await.unwrap());
    }

    #[tokio::test]
    async fn test_tie_break_within_tolerance_is_noop() {
        let fx = Fixture::new();
        fx.write_local("a.md", b"local", T).await;
        fx.remote.add_file(&fx.root, "a.md", b"remote", T + 3000);

        let (report, pending) = fx.run(&known(&["a.md"])).await;

        assert!(!report.has_changes());
        assert!(pending.contains("a.md"));
        assert_eq!(fx.fs.read("a.md").await.unwrap(), b"local");
        assert!(fx.remote.operations().is_empty());
    }

    #[tokio::test]
    async fn test_remote_newer_beyond_tolerance_is_downloaded() {
        let fx = Fixture::new();
        fx.write_local("a.md", b"local", T).await;
        fx.remote.add_file(&fx.root, "a.md", b"remote", T + 6000);

        let (report, pending) = fx.run(&known(&["a.md"])).await;

        assert_eq!(report.downloaded, vec!["a.md"]);
        assert!(pending.contains("a.md"));
        assert_eq!(fx.fs.read("a.md").await.unwrap(), b"remote");
        assert_eq!(fx.fs.mtime("a.md"), Some(T + 6000));
    }

    #[tokio::test]
    async fn test_local_newer_beyond_tolerance_is_pushed() {
        let fx = Fixture::new();
        fx.write_local("a.md", b"local", T + 6000).await;
        let id = fx.remote.add_file(&fx.root, "a.md", b"remote", T);

        let (report, _) = fx.run(&known(&["a.md"])).await;

        assert_eq!(report.updated, vec!["a.md"]);
        assert_eq!(fx.remote.content(&id).unwrap(), b"local");
        assert_eq!(fx.remote.operations(), vec![RemoteOp::Update { id: id.clone() }]);
        assert_eq!(
            fx.remote.fetch_metadata(&id).await.unwrap().modified_at_millis,
            T + 6000
        );
    }

    #[tokio::test]
    async fn test_type_conflict_local_folder_remote_file() {
        let fx = Fixture::new();
        fx.write_local("notes/x.md", b"x", T).await;
        let remote_file = fx.remote.add_file(&fx.root, "notes", b"file", T);

        // Even a known path must not be touched while the kinds disagree
        let (report, pending) = fx.run(&known(&["notes"])).await;

        assert_eq!(
            report.issues,
            vec![SyncIssue::TypeConflict {
                path: "notes".into(),
                local_kind: EntryKind::Folder,
                remote_kind: EntryKind::File,
            }]
        );
        assert!(!report.has_changes());
        assert!(!pending.contains("notes"));
        assert!(fx.fs.exists("notes/x.md").await.unwrap());
        assert!(!fx.remote.is_trashed(&remote_file));
        assert_eq!(fx.remote.content(&remote_file).unwrap(), b"file");
        assert!(fx.remote.operations().is_empty());
    }

    #[tokio::test]
    async fn test_type_conflict_local_file_remote_folder() {
        let fx = Fixture::new();
        fx.write_local("notes", b"file", T).await;
        let folder = fx.remote.add_folder(&fx.root, "notes");
        fx.remote.add_file(&folder, "x.md", b"x", T);

        let (report, _) = fx.run(&KnownPaths::new()).await;

        assert_eq!(report.issues.len(), 1);
        assert!(!report.has_changes());
        assert_eq!(fx.fs.read("notes").await.unwrap(), b"file");
        assert!(fx.remote.operations().is_empty());
    }

    #[tokio::test]
    async fn test_new_remote_folder_and_file_are_created_locally() {
        let fx = Fixture::new();
        let notes = fx.remote.add_folder(&fx.root, "notes");
        fx.remote.add_file(&notes, "x.md", b"x", T);

        let (report, pending) = fx.run(&KnownPaths::new()).await;

        assert!(fx.fs.exists("notes").await.unwrap());
        assert_eq!(fx.fs.read("notes/x.md").await.unwrap(), b"x");
        assert_eq!(report.folders_created, vec!["notes"]);
        assert_eq!(report.downloaded, vec!["notes/x.md"]);
        assert!(pending.contains("notes"));
        assert!(pending.contains("notes/x.md"));
    }

    #[tokio::test]
    async fn test_known_remote_entry_missing_locally_is_trashed() {
        let fx = Fixture::new();
        let gone = fx.remote.add_file(&fx.root, "gone.md", b"g", T);
        let sub = fx.remote.add_folder(&fx.root, "sub");

        let (report, pending) = fx.run(&known(&["gone.md", "sub"])).await;

        assert!(fx.remote.is_trashed(&gone));
        assert!(fx.remote.is_trashed(&sub));
        assert_eq!(report.deleted_remote, vec!["gone.md", "sub"]);
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_hidden_entries_are_ignored_on_both_sides() {
        let fx = Fixture::new();
        fx.write_local(".obsidian/workspace.json", b"{}", T).await;
        let hidden = fx.remote.add_file(&fx.root, ".trash-me", b"x", T);

        let (report, pending) = fx.run(&known(&[".trash-me"])).await;

        assert!(!report.has_changes());
        assert!(pending.is_empty());
        assert!(!fx.remote.is_trashed(&hidden));
        assert!(fx.remote.find_path(&fx.root, ".obsidian").is_none());
    }

    #[tokio::test]
    async fn test_remote_names_that_are_not_path_segments_are_skipped() {
        let fx = Fixture::new();
        let escaping = fx.remote.add_file(&fx.root, "x/../../escaped.md", b"x", T);
        let parent = fx.remote.add_folder(&fx.root, "..");
        let backslash = fx.remote.add_file(&fx.root, "a\\b.md", b"remote", T);
        fx.write_local("a\\b.md", b"local", T).await;

        // Known or not, such names are neither pulled, pushed nor trashed
        let (report, pending) = fx.run(&known(&["x/../../escaped.md"])).await;

        assert_eq!(
            report.issues,
            vec![
                SyncIssue::InvalidName { path: "..".into() },
                SyncIssue::InvalidName { path: "a\\b.md".into() },
                SyncIssue::InvalidName { path: "x/../../escaped.md".into() },
            ]
        );
        assert!(!report.has_changes());
        assert!(pending.is_empty());
        assert!(fx.remote.operations().is_empty());
        assert!(!fx.remote.is_trashed(&escaping));
        assert!(!fx.remote.is_trashed(&parent));
        assert_eq!(fx.remote.content(&backslash).unwrap(), b"remote");
        assert_eq!(fx.fs.file_paths(), vec!["a\\b.md"]);
    }

    #[tokio::test]
    async fn test_local_path_that_is_a_file_is_reported_and_skipped() {
        let fx = Fixture::new();
        fx.write_local("a.md", b"a", T).await;
        fx.remote.add_file(&fx.root, "b.md", b"b", T);

        let mut pending = PendingSnapshot::new();
        let mut reconciler =
            Reconciler::new(&fx.fs, &fx.remote, &fx.events, SyncOptions::default());
        reconciler
            .reconcile("a.md", &fx.root, &known(&["b.md"]), &mut pending)
            .await
            .unwrap();
        let report = reconciler.into_report();

        assert_eq!(
            report.issues,
            vec![SyncIssue::NotAFolder {
                path: "a.md".into()
            }]
        );
        assert!(!report.has_changes());
        assert!(pending.is_empty());
        assert!(fx.remote.operations().is_empty());
        assert_eq!(fx.fs.read("a.md").await.unwrap(), b"a");
        assert_eq!(fx.fs.file_paths(), vec!["a.md"]);
    }

    #[tokio::test]
    async fn test_duplicate_remote_names_use_first_and_ignore_rest() {
        let fx = Fixture::new();
        fx.remote.add_file(&fx.root, "a.md", b"first", T);
        let second = fx.remote.add_file(&fx.root, "a.md", b"second", T);

        let (report, _) = fx.run(&KnownPaths::new()).await;

        assert_eq!(report.downloaded, vec!["a.md"]);
        assert_eq!(fx.fs.read("a.md").await.unwrap(), b"first");
        assert!(!fx.remote.is_trashed(&second));
    }

    #[tokio::test]
    async fn test_transfer_failure_aborts_walk() {
        let fx = Fixture::new();
        fx.write_local("broken.md", b"x", T).await;
        fx.remote.fail_transfers_of("broken.md");

        let mut pending = PendingSnapshot::new();
        let mut reconciler =
            Reconciler::new(&fx.fs, &fx.remote, &fx.events, SyncOptions::default());
        let err = reconciler
            .reconcile("", &fx.root, &KnownPaths::new(), &mut pending)
            .await
            .unwrap_err();

        match err {
            SyncError::Transfer {
                operation, path, ..
            } => {
                assert_eq!(operation, TransferOp::Upload);
                assert_eq!(path, "broken.md");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_second_pass_is_idempotent() {
        let fx = Fixture::new();
        fx.write_local("local.md", b"l", T).await;
        fx.write_local("both/shared.md", b"s", T).await;
        let remote_dir = fx.remote.add_folder(&fx.root, "remote-dir");
        fx.remote.add_file(&remote_dir, "r.md", b"r", T - 60_000);

        let (first, pending) = fx.run(&KnownPaths::new()).await;
        assert!(first.has_changes());

        fx.remote.clear_operations();
        let (second, second_pending) = fx.run(pending.paths()).await;

        assert_eq!(second.mutations(), 0, "second pass changed: {second:?}");
        assert!(fx.remote.operations().is_empty());
        assert_eq!(second_pending.paths(), pending.paths());
    }
}
