//! Errors that abort a sync run.
//!
//! Problems confined to one subtree (type conflicts, non-folder paths) are not
//! errors; they are recorded as `SyncIssue`s and the run continues.

use crate::fs::FsError;
use crate::remote::RemoteError;
use crate::state::StateError;
use std::fmt::{self, Display, Formatter};
use thiserror::Error;

/// The operation a transfer failure interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOp {
    ListLocal,
    ListRemote,
    Read,
    Write,
    Upload,
    Update,
    Download,
    DeleteLocal,
    DeleteRemote,
    CreateLocalFolder,
    CreateRemoteFolder,
    ResolveRoot,
}

impl Display for TransferOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let verb = match self {
            TransferOp::ListLocal => "list local folder",
            TransferOp::ListRemote => "list remote folder",
            TransferOp::Read => "read",
            TransferOp::Write => "write",
            TransferOp::Upload => "upload",
            TransferOp::Update => "update",
            TransferOp::Download => "download",
            TransferOp::DeleteLocal => "delete local",
            TransferOp::DeleteRemote => "delete remote",
            TransferOp::CreateLocalFolder => "create local folder",
            TransferOp::CreateRemoteFolder => "create remote folder",
            TransferOp::ResolveRoot => "resolve remote root folder",
        };
        f.write_str(verb)
    }
}

/// Underlying cause of a transfer failure.
#[derive(Debug, Error)]
pub enum TransferSource {
    #[error(transparent)]
    Local(#[from] FsError),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Not logged in to the remote store")]
    AuthMissing,

    #[error("A sync run is already in progress")]
    AlreadyRunning,

    #[error("Remote root {0} is not a folder")]
    InvalidRoot(String),

    #[error("Failed to {operation} {path}: {source}")]
    Transfer {
        operation: TransferOp,
        path: String,
        #[source]
        source: TransferSource,
    },

    #[error("State error: {0}")]
    State(#[from] StateError),
}

impl SyncError {
    /// Build a mapper for `map_err` that tags an I/O failure with its operation and path.
    pub fn transfer<E: Into<TransferSource>>(
        operation: TransferOp,
        path: &str,
    ) -> impl FnOnce(E) -> SyncError + '_ {
        move |e| SyncError::Transfer {
            operation,
            path: path.to_string(),
            source: e.into(),
        }
    }

    /// True when the remote rejected our credentials
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            SyncError::AuthMissing
                | SyncError::Transfer {
                    source: TransferSource::Remote(RemoteError::Unauthorized(_)),
                    ..
                }
        )
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_error_message_has_context() {
        let err: SyncError = Err::<(), _>(RemoteError::Transport("timed out".into()))
            .map_err(SyncError::transfer(TransferOp::Upload, "notes/a.md"))
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "Failed to upload notes/a.md: Transport error: timed out"
        );
    }

    #[test]
    fn test_auth_failure_detection() {
        let err: SyncError = Err::<(), _>(RemoteError::Unauthorized("expired".into()))
            .map_err(SyncError::transfer(TransferOp::ListRemote, "/"))
            .unwrap_err();
        assert!(err.is_auth_failure());
        assert!(SyncError::AuthMissing.is_auth_failure());
        assert!(!SyncError::AlreadyRunning.is_auth_failure());
    }
}
