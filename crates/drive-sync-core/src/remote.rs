//! RemoteStore trait for the object-storage side of a sync.
//!
//! Implementations:
//! - `InMemoryRemote` - For testing
//! - `DriveClient` (in drive-sync) - Google Drive v3 over HTTPS
//!
//! Authentication and token refresh are the implementation's concern: callers
//! only ever see entries and content.

use crate::entry::EntryKind;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use thiserror::Error;

/// Parent ID of top-level entries in `InMemoryRemote`.
pub const ROOT_ID: &str = "root";

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Not authorized: {0}")]
    Unauthorized(String),

    #[error("Remote entry not found: {0}")]
    NotFound(String),

    #[error("Malformed remote payload: {0}")]
    Decode(String),

    #[error("Remote request failed with status {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, RemoteError>;

/// A file or folder in the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub remote_id: String,
    pub name: String,
    pub kind: EntryKind,
    /// Modification time in milliseconds since epoch
    pub modified_at_millis: i64,
    /// Content checksum, when the store reports one
    pub content_hash: Option<String>,
}

/// Remote object-store client consumed by the reconciler.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// List the non-trashed immediate children of a folder
    async fn list_children(&self, folder_id: &str) -> Result<Vec<RemoteEntry>>;

    /// Fetch a single entry's metadata
    async fn fetch_metadata(&self, id: &str) -> Result<RemoteEntry>;

    /// Download a file's content
    async fn download(&self, id: &str) -> Result<Vec<u8>>;

    /// Upload a new file into `parent_id`
    async fn upload(
        &self,
        name: &str,
        parent_id: &str,
        content: &[u8],
        mime_type: &str,
        modified_at_millis: i64,
    ) -> Result<RemoteEntry>;

    /// Replace an existing file's content
    async fn update(
        &self,
        id: &str,
        content: &[u8],
        mime_type: &str,
        modified_at_millis: i64,
    ) -> Result<RemoteEntry>;

    /// Move an entry to the trash
    async fn soft_delete(&self, id: &str) -> Result<()>;

    /// Create a folder inside `parent_id`
    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<RemoteEntry>;

    /// Find or create the top-level folder the vault syncs into
    async fn ensure_root_folder(&self, name: &str) -> Result<RemoteEntry>;
}

#[async_trait]
impl<T: RemoteStore + ?Sized> RemoteStore for std::sync::Arc<T> {
    async fn list_children(&self, folder_id: &str) -> Result<Vec<RemoteEntry>> {
        (**self).list_children(folder_id).await
    }

    async fn fetch_metadata(&self, id: &str) -> Result<RemoteEntry> {
        (**self).fetch_metadata(id).await
    }

    async fn download(&self, id: &str) -> Result<Vec<u8>> {
        (**self).download(id).await
    }

    async fn upload(
        &self,
        name: &str,
        parent_id: &str,
        content: &[u8],
        mime_type: &str,
        modified_at_millis: i64,
    ) -> Result<RemoteEntry> {
        (**self)
            .upload(name, parent_id, content, mime_type, modified_at_millis)
            .await
    }

    async fn update(
        &self,
        id: &str,
        content: &[u8],
        mime_type: &str,
        modified_at_millis: i64,
    ) -> Result<RemoteEntry> {
        (**self).update(id, content, mime_type, modified_at_millis).await
    }

    async fn soft_delete(&self, id: &str) -> Result<()> {
        (**self).soft_delete(id).await
    }

    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<RemoteEntry> {
        (**self).create_folder(name, parent_id).await
    }

    async fn ensure_root_folder(&self, name: &str) -> Result<RemoteEntry> {
        (**self).ensure_root_folder(name).await
    }
}

/// A call made against `InMemoryRemote`, recorded for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteOp {
    Upload { name: String, parent_id: String },
    Update { id: String },
    Download { id: String },
    SoftDelete { id: String },
    CreateFolder { name: String, parent_id: String },
}

impl RemoteOp {
    /// Whether the call changed remote state
    pub fn is_mutation(&self) -> bool {
        !matches!(self, RemoteOp::Download { .. })
    }
}

#[derive(Debug, Clone)]
struct Node {
    name: String,
    parent: Option<String>,
    kind: EntryKind,
    content: Vec<u8>,
    mime_type: Option<String>,
    modified_at_millis: i64,
    trashed: bool,
}

impl Node {
    fn to_entry(&self, id: &str) -> RemoteEntry {
        RemoteEntry {
            remote_id: id.to_string(),
            name: self.name.clone(),
            kind: self.kind,
            modified_at_millis: self.modified_at_millis,
            content_hash: match self.kind {
                EntryKind::File => Some(format!("{:016x}", fnv1a(&self.content))),
                EntryKind::Folder => None,
            },
        }
    }
}

/// In-memory remote store for testing.
///
/// Starts with a single folder, `ROOT_ID`, standing in for the top of the drive.
pub struct InMemoryRemote {
    nodes: RwLock<BTreeMap<String, Node>>,
    next_id: AtomicU64,
    operations: RwLock<Vec<RemoteOp>>,
    /// Names whose transfers fail, for exercising abort paths
    failing: RwLock<HashSet<String>>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            ROOT_ID.to_string(),
            Node {
                name: String::new(),
                parent: None,
                kind: EntryKind::Folder,
                content: Vec::new(),
                mime_type: None,
                modified_at_millis: 0,
                trashed: false,
            },
        );
        Self {
            nodes: RwLock::new(nodes),
            next_id: AtomicU64::new(1),
            operations: RwLock::new(Vec::new()),
            failing: RwLock::new(HashSet::new()),
        }
    }

    /// Seed a folder without recording an operation
    pub fn add_folder(&self, parent_id: &str, name: &str) -> String {
        self.insert_node(parent_id, name, EntryKind::Folder, Vec::new(), None, 0)
    }

    /// Seed a file without recording an operation
    pub fn add_file(&self, parent_id: &str, name: &str, content: &[u8], modified_at_millis: i64) -> String {
        self.insert_node(
            parent_id,
            name,
            EntryKind::File,
            content.to_vec(),
            None,
            modified_at_millis,
        )
    }

    /// Change an entry's modification time
    pub fn set_modified(&self, id: &str, modified_at_millis: i64) {
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(node) = nodes.get_mut(id) {
            node.modified_at_millis = modified_at_millis;
        }
    }

    /// Overwrite a file's content and modification time, as another device would
    pub fn edit_file(&self, id: &str, content: &[u8], modified_at_millis: i64) {
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(node) = nodes.get_mut(id) {
            node.content = content.to_vec();
            node.modified_at_millis = modified_at_millis;
        }
    }

    /// Trash an entry without recording an operation
    pub fn trash(&self, id: &str) {
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(node) = nodes.get_mut(id) {
            node.trashed = true;
        }
    }

    /// Resolve a slash-separated path below `folder_id` to a non-trashed entry
    pub fn find_path(&self, folder_id: &str, path: &str) -> Option<RemoteEntry> {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        let mut current = folder_id.to_string();
        for segment in path.split('/') {
            let (id, _) = nodes.iter().find(|(_, node)| {
                !node.trashed && node.parent.as_deref() == Some(current.as_str()) && node.name == segment
            })?;
            current = id.clone();
        }
        nodes.get(&current).map(|node| node.to_entry(&current))
    }

    /// Content of a file by ID
    pub fn content(&self, id: &str) -> Option<Vec<u8>> {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        nodes.get(id).map(|node| node.content.clone())
    }

    /// MIME type recorded for an uploaded file
    pub fn mime_type(&self, id: &str) -> Option<String> {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        nodes.get(id).and_then(|node| node.mime_type.clone())
    }

    pub fn is_trashed(&self, id: &str) -> bool {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        nodes.get(id).is_some_and(|node| node.trashed)
    }

    /// Sorted, non-trashed paths below `folder_id` with their kinds
    pub fn tree(&self, folder_id: &str) -> Vec<(String, EntryKind)> {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        let mut out = Vec::new();
        let mut stack = vec![(folder_id.to_string(), String::new())];
        while let Some((id, prefix)) = stack.pop() {
            for (child_id, node) in nodes.iter() {
                if node.trashed || node.parent.as_deref() != Some(id.as_str()) {
                    continue;
                }
                let path = crate::entry::join_path(&prefix, &node.name);
                if node.kind.is_folder() {
                    stack.push((child_id.clone(), path.clone()));
                }
                out.push((path, node.kind));
            }
        }
        out.sort();
        out
    }

    /// Every recorded call, in order
    pub fn operations(&self) -> Vec<RemoteOp> {
        self.operations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of recorded calls that changed remote state
    pub fn mutation_count(&self) -> usize {
        self.operations().iter().filter(|op| op.is_mutation()).count()
    }

    pub fn clear_operations(&self) {
        self.operations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Make uploads, updates and downloads of `name` fail
    pub fn fail_transfers_of(&self, name: &str) {
        self.failing
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string());
    }

    fn insert_node(
        &self,
        parent_id: &str,
        name: &str,
        kind: EntryKind,
        content: Vec<u8>,
        mime_type: Option<String>,
        modified_at_millis: i64,
    ) -> String {
        let id = format!("id-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        nodes.insert(
            id.clone(),
            Node {
                name: name.to_string(),
                parent: Some(parent_id.to_string()),
                kind,
                content,
                mime_type,
                modified_at_millis,
                trashed: false,
            },
        );
        id
    }

    fn record(&self, op: RemoteOp) {
        self.operations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(op);
    }

    fn check_transfer(&self, name: &str) -> Result<()> {
        let failing = self.failing.read().unwrap_or_else(PoisonError::into_inner);
        if failing.contains(name) {
            return Err(RemoteError::Transport(format!("simulated failure for {}", name)));
        }
        Ok(())
    }

    fn live_node(&self, id: &str) -> Result<Node> {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        match nodes.get(id) {
            Some(node) if !node.trashed => Ok(node.clone()),
            _ => Err(RemoteError::NotFound(id.to_string())),
        }
    }

    fn require_folder(&self, id: &str) -> Result<()> {
        let node = self.live_node(id)?;
        if !node.kind.is_folder() {
            return Err(RemoteError::Http {
                status: 400,
                message: format!("{} is not a folder", id),
            });
        }
        Ok(())
    }
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemote {
    async fn list_children(&self, folder_id: &str) -> Result<Vec<RemoteEntry>> {
        self.require_folder(folder_id)?;
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        Ok(nodes
            .iter()
            .filter(|(_, node)| !node.trashed && node.parent.as_deref() == Some(folder_id))
            .map(|(id, node)| node.to_entry(id))
            .collect())
    }

    async fn fetch_metadata(&self, id: &str) -> Result<RemoteEntry> {
        self.live_node(id).map(|node| node.to_entry(id))
    }

    async fn download(&self, id: &str) -> Result<Vec<u8>> {
        let node = self.live_node(id)?;
        self.check_transfer(&node.name)?;
        self.record(RemoteOp::Download { id: id.to_string() });
        Ok(node.content)
    }

    async fn upload(
        &self,
        name: &str,
        parent_id: &str,
        content: &[u8],
        mime_type: &str,
        modified_at_millis: i64,
    ) -> Result<RemoteEntry> {
        self.require_folder(parent_id)?;
        self.check_transfer(name)?;
        self.record(RemoteOp::Upload {
            name: name.to_string(),
            parent_id: parent_id.to_string(),
        });
        let id = self.insert_node(
            parent_id,
            name,
            EntryKind::File,
            content.to_vec(),
            Some(mime_type.to_string()),
            modified_at_millis,
        );
        self.fetch_metadata(&id).await
    }

    async fn update(
        &self,
        id: &str,
        content: &[u8],
        mime_type: &str,
        modified_at_millis: i64,
    ) -> Result<RemoteEntry> {
        let node = self.live_node(id)?;
        self.check_transfer(&node.name)?;
        self.record(RemoteOp::Update { id: id.to_string() });
        {
            let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(node) = nodes.get_mut(id) {
                node.content = content.to_vec();
                node.mime_type = Some(mime_type.to_string());
                node.modified_at_millis = modified_at_millis;
            }
        }
        self.fetch_metadata(id).await
    }

    async fn soft_delete(&self, id: &str) -> Result<()> {
        self.live_node(id)?;
        self.record(RemoteOp::SoftDelete { id: id.to_string() });
        self.trash(id);
        Ok(())
    }

    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<RemoteEntry> {
        self.require_folder(parent_id)?;
        self.record(RemoteOp::CreateFolder {
            name: name.to_string(),
            parent_id: parent_id.to_string(),
        });
        let id = self.insert_node(
            parent_id,
            name,
            EntryKind::Folder,
            Vec::new(),
            None,
            chrono::Utc::now().timestamp_millis(),
        );
        self.fetch_metadata(&id).await
    }

    async fn ensure_root_folder(&self, name: &str) -> Result<RemoteEntry> {
        let existing = self
            .list_children(ROOT_ID)
            .await?
            .into_iter()
            .find(|entry| entry.kind.is_folder() && entry.name == name);
        match existing {
            Some(entry) => Ok(entry),
            None => self.create_folder(name, ROOT_ID).await,
        }
    }
}

/// FNV-1a, standing in for a real content checksum.
fn fnv1a(bytes: &[u8]) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    let mut hash = FNV_OFFSET;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}
