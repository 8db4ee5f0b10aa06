//! Volume-manager adapter.
//!
//! Everything the endpoints need from the volume manager goes through the
//! [`VolumeManager`] trait; [`ZfsCli`] is the production implementation that
//! shells out to the `zfs` binary. Operations are named by intent, never by
//! CLI flag, and every failure is a typed [`ZfsError`].

pub mod cli;
pub mod copier;
pub mod cursor;
pub mod encryption;
pub mod error;
pub mod path;
pub mod placeholder;
pub mod recv;
pub mod resume_token;
pub mod send;
pub mod version;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub use cli::{PropertySource, ZfsCli};
pub use copier::{BytesStreamCopier, CopierError, SendStream, StreamCopier};
pub use cursor::{
    get_replication_cursor, set_replication_cursor, REPLICATION_CURSOR_BOOKMARK_NAME,
};
pub use error::{DestroySnapshotsError, ZfsError};
pub use path::{DatasetPath, DatasetPathError, DatasetPathForest};
pub use placeholder::{PlaceholderState, PLACEHOLDER_PROPERTY_NAME};
pub use resume_token::{ResumeToken, ResumeTokenError, TokenMismatch};
pub use send::{DrySendInfo, DrySendType, SendArgVersion, SendArgs};
pub use version::{decompose_version_string, FilesystemVersion, VersionType};

/// Dataset-access capability: decides which local filesystems an endpoint
/// is allowed to touch.
pub trait DatasetFilter: Send + Sync {
    fn filter(&self, path: &DatasetPath) -> anyhow::Result<bool>;
}

/// Receive options for materialising a stream into a filesystem.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecvOptions {
    /// Roll back to the earliest existing snapshot, destroy it, then
    /// receive with force. Existing local property values are kept.
    pub rollback_and_force: bool,
    /// Keep partial receive state around so an interrupted stream can be
    /// resumed.
    pub save_partial_recv_state: bool,
}

/// `createtxg` and `guid` of one dataset, fetched together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateTxgAndGuid {
    pub createtxg: u64,
    pub guid: u64,
}

/// Capability set over the volume manager.
///
/// Implementations must be safe to share across concurrent requests; the
/// caller is responsible for not issuing overlapping writes to the same
/// filesystem.
#[async_trait]
pub trait VolumeManager: Send + Sync {
    /// All filesystems passing `filter`, in undefined order.
    async fn list_filesystems(
        &self,
        filter: &dyn DatasetFilter,
    ) -> Result<Vec<DatasetPath>, ZfsError>;

    /// Snapshots and bookmarks of `fs`, in undefined order.
    async fn list_filesystem_versions(
        &self,
        fs: &DatasetPath,
    ) -> Result<Vec<FilesystemVersion>, ZfsError>;

    /// Dry-run probe for a send; never produces stream bytes.
    async fn send_dry(&self, args: &SendArgs) -> Result<DrySendInfo, ZfsError>;

    /// Start a send and return the stream handle. The producer runs until
    /// the handle is closed.
    async fn send(
        &self,
        args: &SendArgs,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn StreamCopier>, ZfsError>;

    /// Drain `stream` into `fs`. Concurrent receives into the same
    /// filesystem are undefined and must be prevented by the caller.
    async fn recv(
        &self,
        fs: &DatasetPath,
        stream: &mut dyn StreamCopier,
        opts: RecvOptions,
        cancel: &CancellationToken,
    ) -> Result<(), ZfsError>;

    /// The receive resume token of `fs`, or `None` when there is no
    /// resumable state or the installation cannot resume at all.
    async fn recv_resume_token(&self, fs: &DatasetPath) -> Result<Option<String>, ZfsError>;

    /// Discard partial receive state. Idempotent: the absence of resumable
    /// state is not an error.
    async fn recv_clear_resume_token(&self, fs: &DatasetPath) -> Result<(), ZfsError>;

    /// Place a named hold on `fs@snap`. Holding a non-snapshot fails.
    async fn hold(&self, fs: &DatasetPath, snap: &str, tag: &str) -> Result<(), ZfsError>;

    /// Release a named hold.
    async fn release(&self, fs: &DatasetPath, snap: &str, tag: &str) -> Result<(), ZfsError>;

    /// Tags currently holding `fs@snap`.
    async fn holds(&self, fs: &DatasetPath, snap: &str) -> Result<Vec<String>, ZfsError>;

    /// Create bookmark `fs#bookmark` of `fs@snap`. The bookmark captures
    /// the snapshot's GUID atomically at creation.
    async fn bookmark(&self, fs: &DatasetPath, snap: &str, bookmark: &str)
        -> Result<(), ZfsError>;

    /// Destroy a filesystem, snapshot, bookmark, or comma-batched snapshot
    /// list. Batch snapshot failures come back as
    /// [`ZfsError::DestroySnapshots`].
    async fn destroy(&self, path: &str) -> Result<(), ZfsError>;

    /// Roll `fs` back to snapshot `to`.
    async fn rollback(
        &self,
        fs: &DatasetPath,
        to: &FilesystemVersion,
        destroy_more_recent: bool,
    ) -> Result<(), ZfsError>;

    /// GUID of `fs` + `rel_name` (`@snap` or `#bookmark`).
    async fn get_guid(&self, fs: &str, rel_name: &str) -> Result<u64, ZfsError>;

    async fn get_createtxg_and_guid(&self, path: &str) -> Result<CreateTxgAndGuid, ZfsError>;

    /// Whether `fs` is encrypted. `Ok(false)` when the installation has no
    /// encryption support at all.
    async fn encryption_enabled(&self, fs: &str) -> Result<bool, ZfsError>;

    /// Existence and placeholder marking of `path`. A filesystem that does
    /// not exist is never a placeholder.
    async fn placeholder_state(&self, path: &DatasetPath) -> Result<PlaceholderState, ZfsError>;

    /// Create `path` as a marked placeholder filesystem.
    async fn create_placeholder(&self, path: &DatasetPath) -> Result<(), ZfsError>;

    /// Set or clear the placeholder marking of an existing filesystem.
    async fn set_placeholder(
        &self,
        path: &DatasetPath,
        is_placeholder: bool,
    ) -> Result<(), ZfsError>;

    /// Whether this installation supports resumable send.
    async fn resume_send_supported(&self) -> Result<bool, ZfsError>;

    /// Whether receives into `fs` can save resumable state.
    async fn resume_recv_supported(&self, fs: &DatasetPath) -> Result<bool, ZfsError>;

    /// Decode an opaque resume token. The result is untrusted and must be
    /// cross-checked against the request it claims to describe.
    async fn parse_resume_token(&self, token: &str) -> Result<ResumeToken, ResumeTokenError>;
}
