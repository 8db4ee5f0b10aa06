//! Request and response types of the endpoint operations.
//!
//! These are the values the RPC layer marshals over its wire; stream bytes
//! travel separately as [`StreamCopier`](crate::zfs::StreamCopier)s.

use crate::zfs::version::FilesystemVersion;

/// One filesystem as reported by `ListFilesystems`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filesystem {
    /// Client-relative on the receiver, absolute on the sender.
    pub path: String,
    /// Receiver-only; sender entries are never placeholders.
    pub is_placeholder: bool,
    /// Receiver-only; `None` when there is no resumable receive state.
    pub resume_token: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SendRequest {
    pub filesystem: String,
    /// `@snap`, `#bookmark`, or `None` for a full send.
    pub from: Option<String>,
    /// `@`- or `#`-prefixed; in practice a snapshot.
    pub to: String,
    /// Opaque resume token supplied by the peer; untrusted.
    pub resume_token: Option<String>,
    pub dry_run: bool,
    /// Request an encrypted raw send.
    pub encrypted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendResponse {
    /// Estimated stream size; `0` means no estimate is available.
    pub expected_size: u64,
    pub used_resume_token: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ReceiveRequest {
    /// Client-relative filesystem path.
    pub filesystem: String,
    /// Discard partial receive state before streaming.
    pub clear_resume_token: bool,
}

#[derive(Debug, Clone)]
pub struct DestroySnapshotsRequest {
    pub filesystem: String,
    pub snapshots: Vec<FilesystemVersion>,
}

/// Per-snapshot outcome of a batch destroy; partial failure is expected.
#[derive(Debug, Clone)]
pub struct DestroySnapshotResult {
    pub snapshot: FilesystemVersion,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReplicationCursorRequest {
    pub filesystem: String,
    pub op: ReplicationCursorOp,
}

#[derive(Debug, Clone)]
pub enum ReplicationCursorOp {
    Get,
    Set {
        /// Snapshot short name the cursor should point at.
        snapshot: String,
        /// GUID the caller resolved for that snapshot; the move fails if
        /// the snapshot's current GUID differs.
        expected_guid: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationCursorResult {
    Guid(u64),
    NotExist,
}
