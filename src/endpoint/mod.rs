//! Replication endpoints: the RPC-facing sender and receiver services.

pub mod error;
pub mod gate;
pub mod pdu;
pub mod receiver;
pub mod safety;
pub mod sender;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::zfs::path::DatasetPath;
use crate::zfs::version::{FilesystemVersion, VersionType};
use crate::zfs::{StreamCopier, VolumeManager, ZfsError};

pub use error::EndpointError;
pub use gate::{recv_gate, send_gate, Gate};
pub use receiver::Receiver;
pub use sender::Sender;

/// Per-request state attached by the RPC layer.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Authenticated identity of the calling client, when the transport
    /// provides one.
    pub client_identity: Option<String>,
    /// Cancelling this token aborts the operation: child processes are
    /// terminated, pipes closed, gate slots released.
    pub cancel: CancellationToken,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client_identity(identity: impl Into<String>) -> Self {
        Self {
            client_identity: Some(identity.into()),
            cancel: CancellationToken::new(),
        }
    }
}

/// The operation surface both endpoint sides expose to the RPC layer.
///
/// Operations that make no sense on one side (`Send` on a receiver,
/// `Receive` and `ReplicationCursor` on a sender) fail with
/// [`EndpointError::NotSupported`].
#[async_trait]
pub trait ReplicationEndpoint: Send + Sync {
    async fn list_filesystems(
        &self,
        ctx: &RequestContext,
    ) -> Result<Vec<pdu::Filesystem>, EndpointError>;

    async fn list_filesystem_versions(
        &self,
        ctx: &RequestContext,
        filesystem: &str,
    ) -> Result<Vec<FilesystemVersion>, EndpointError>;

    /// Start (or dry-run) a send. The stream handle is `None` for dry
    /// runs; otherwise it owns a send-gate slot until closed.
    async fn send(
        &self,
        ctx: &RequestContext,
        req: pdu::SendRequest,
    ) -> Result<(pdu::SendResponse, Option<Box<dyn StreamCopier>>), EndpointError>;

    /// Materialise `stream` into the requested filesystem.
    async fn receive(
        &self,
        ctx: &RequestContext,
        req: pdu::ReceiveRequest,
        stream: Box<dyn StreamCopier>,
    ) -> Result<(), EndpointError>;

    async fn destroy_snapshots(
        &self,
        ctx: &RequestContext,
        req: pdu::DestroySnapshotsRequest,
    ) -> Result<Vec<pdu::DestroySnapshotResult>, EndpointError>;

    async fn replication_cursor(
        &self,
        ctx: &RequestContext,
        req: pdu::ReplicationCursorRequest,
    ) -> Result<pdu::ReplicationCursorResult, EndpointError>;

    async fn ping(&self, ctx: &RequestContext, message: &str) -> Result<String, EndpointError>;

    async fn ping_dataconn(
        &self,
        ctx: &RequestContext,
        message: &str,
    ) -> Result<String, EndpointError>;

    /// No-op on the server side; connectivity is established by the fact
    /// that the call arrived.
    async fn wait_for_connectivity(&self, ctx: &RequestContext) -> Result<(), EndpointError>;
}

// =============================================================================
// Client identity mapping
// =============================================================================

/// Resolve the root all paths of one client are mapped under.
pub(crate) fn client_root(
    root_fs: &DatasetPath,
    client_identity: &str,
) -> Result<DatasetPath, EndpointError> {
    let joined = format!("{root_fs}/{client_identity}");
    let root = DatasetPath::parse(&joined)?;
    if root.length() != root_fs.length() + 1 {
        return Err(EndpointError::Validation(format!(
            "client identity {client_identity:?} must be a single dataset path component"
        )));
    }
    Ok(root)
}

/// Validate a client identity before accepting its connection. Usable by
/// the RPC layer during handshake.
pub fn test_client_identity(
    root_fs: &DatasetPath,
    client_identity: &str,
) -> Result<(), EndpointError> {
    client_root(root_fs, client_identity).map(|_| ())
}

// =============================================================================
// Batch snapshot destroy
// =============================================================================

pub(crate) async fn do_destroy_snapshots(
    zfs: &dyn VolumeManager,
    fs: &DatasetPath,
    snapshots: Vec<FilesystemVersion>,
) -> Result<Vec<pdu::DestroySnapshotResult>, EndpointError> {
    for v in &snapshots {
        if v.kind != VersionType::Snapshot {
            return Err(EndpointError::Validation(format!(
                "version {:?} is not a snapshot",
                v.name
            )));
        }
    }
    if snapshots.is_empty() {
        return Ok(Vec::new());
    }

    let names: Vec<&str> = snapshots.iter().map(|v| v.name.as_str()).collect();
    let batch_arg = format!("{}@{}", fs, names.join(","));
    let batch_err = match zfs.destroy(&batch_arg).await {
        Ok(()) => None,
        Err(e) => Some(e),
    };

    let results = snapshots
        .into_iter()
        .map(|snapshot| {
            let error = match &batch_err {
                None => None,
                Some(ZfsError::DestroySnapshots(batch)) => batch
                    .undestroyable
                    .iter()
                    .position(|name| *name == snapshot.name)
                    .map(|i| batch.reasons[i].clone()),
                // unstructured failure: we cannot tell which snapshots
                // survived, report the error for all of them
                Some(other) => Some(other.to_string()),
            };
            pdu::DestroySnapshotResult { snapshot, error }
        })
        .collect();
    Ok(results)
}
