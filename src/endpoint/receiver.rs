//! Receiving-side endpoint.
//!
//! All client paths are mapped beneath a configured root filesystem
//! (optionally extended by a per-connection client identity). Missing
//! intermediate datasets are materialised as marked placeholders before
//! the stream is handed to the volume manager.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::endpoint::error::EndpointError;
use crate::endpoint::gate::{recv_gate, Gate};
use crate::endpoint::{client_root, do_destroy_snapshots, pdu, ReplicationEndpoint, RequestContext};
use crate::zfs::path::{DatasetPath, DatasetPathForest};
use crate::zfs::version::FilesystemVersion;
use crate::zfs::{DatasetFilter, RecvOptions, StreamCopier, VolumeManager};

/// Filter-and-map capability scoping one client to a subtree: passes
/// strict descendants of the local root, and maps client-relative paths
/// below it.
struct SubRoot {
    local_root: DatasetPath,
}

impl DatasetFilter for SubRoot {
    fn filter(&self, path: &DatasetPath) -> anyhow::Result<bool> {
        Ok(path.has_prefix(&self.local_root) && *path != self.local_root)
    }
}

impl SubRoot {
    fn map_to_local(&self, fs: &str) -> Result<DatasetPath, EndpointError> {
        let relative = DatasetPath::parse(fs)?;
        if relative.is_empty() {
            return Err(EndpointError::Validation(
                "cannot map empty filesystem".to_string(),
            ));
        }
        let mut local = self.local_root.clone();
        local.extend(&relative);
        Ok(local)
    }
}

/// Replication endpoint for the receiving side.
pub struct Receiver {
    zfs: Arc<dyn VolumeManager>,
    root_without_client_component: DatasetPath,
    append_client_identity: bool,
    recv_gate: Gate,
    /// Dataset hierarchy mutation happens exclusively under this lock.
    ///
    /// TODO fine-grained locking would let requests on disjoint subtrees
    /// run their placeholder walks concurrently.
    recv_parent_creation_mtx: Mutex<()>,
}

impl Receiver {
    /// A receiver materialising all client filesystems below
    /// `root_dataset`, bounded by the process-wide receive gate.
    ///
    /// # Panics
    ///
    /// Panics if `root_dataset` is the zero-length path.
    pub fn new(
        zfs: Arc<dyn VolumeManager>,
        root_dataset: DatasetPath,
        append_client_identity: bool,
    ) -> Self {
        Self::with_gate(zfs, root_dataset, append_client_identity, recv_gate().clone())
    }

    /// Like [`Receiver::new`] but with an explicit gate instead of the
    /// process-wide one.
    pub fn with_gate(
        zfs: Arc<dyn VolumeManager>,
        root_dataset: DatasetPath,
        append_client_identity: bool,
        recv_gate: Gate,
    ) -> Self {
        assert!(
            !root_dataset.is_empty(),
            "root dataset must not be an empty path"
        );
        Self {
            zfs,
            root_without_client_component: root_dataset,
            append_client_identity,
            recv_gate,
            recv_parent_creation_mtx: Mutex::new(()),
        }
    }

    fn client_root_from_ctx(&self, ctx: &RequestContext) -> Result<DatasetPath, EndpointError> {
        if !self.append_client_identity {
            return Ok(self.root_without_client_component.clone());
        }
        let identity = ctx.client_identity.as_deref().ok_or_else(|| {
            EndpointError::Validation(
                "client identity must be set by the transport for this receiver".to_string(),
            )
        })?;
        client_root(&self.root_without_client_component, identity)
    }

    /// Materialise missing ancestors of `target` as placeholders, top-down.
    ///
    /// Caller must hold the hierarchy-mutation lock. A missing ancestor at
    /// or above the configured root is never created: that is an
    /// environment problem, not something to paper over.
    async fn walk_and_create_placeholders(
        &self,
        target: &DatasetPath,
    ) -> Result<(), EndpointError> {
        let mut forest = DatasetPathForest::new();
        forest.add(target);
        let mut ancestors = Vec::with_capacity(target.length().saturating_sub(1));
        forest.walk_top_down(|path| {
            if path != target {
                ancestors.push(path.clone());
            }
            true
        });

        tracing::debug!(target = %target, "begin tree-walk");
        for path in &ancestors {
            let ph = self.zfs.placeholder_state(path).await?;
            tracing::debug!(fs = %path, ?ph, "placeholder state for filesystem");
            if ph.fs_exists {
                continue;
            }
            if self.root_without_client_component.has_prefix(path) {
                let err = if path.length() == 1 {
                    EndpointError::PoolNotImported {
                        pool: path.to_string(),
                    }
                } else {
                    EndpointError::RootFsDoesNotExist {
                        root_fs: self.root_without_client_component.to_string(),
                    }
                };
                tracing::error!(error = %err, "placeholders are only created automatically below the root");
                return Err(err);
            }
            tracing::debug!(placeholder_fs = %path, "create placeholder filesystem");
            self.zfs.create_placeholder(path).await.map_err(|e| {
                tracing::error!(fs = %path, error = %e, "cannot create placeholder filesystem");
                e
            })?;
        }
        Ok(())
    }

    async fn receive_inner(
        &self,
        ctx: &RequestContext,
        req: &pdu::ReceiveRequest,
        stream: &mut dyn StreamCopier,
    ) -> Result<(), EndpointError> {
        let root = self.client_root_from_ctx(ctx)?;
        let local_path = SubRoot { local_root: root }.map_to_local(&req.filesystem)?;

        // create placeholder parent filesystems as appropriate; hierarchy
        // mutation happens exclusively, and the lock is dropped before the
        // data-streaming phase
        {
            tracing::debug!("begin acquire hierarchy mutation lock");
            let _guard = tokio::select! {
                guard = self.recv_parent_creation_mtx.lock() => guard,
                _ = ctx.cancel.cancelled() => return Err(EndpointError::Cancelled),
            };
            tracing::debug!("acquired hierarchy mutation lock");
            let res = self.walk_and_create_placeholders(&local_path).await;
            tracing::debug!(ok = res.is_ok(), "complete tree-walk");
            res?;
        }

        // a target that is itself a placeholder gets overwritten: force
        // the receive and stop advertising it as a placeholder
        let ph = self.zfs.placeholder_state(&local_path).await?;
        let mut recv_opts = RecvOptions::default();
        if ph.fs_exists && ph.is_placeholder {
            recv_opts.rollback_and_force = true;
            self.zfs
                .set_placeholder(&local_path, false)
                .await
                .map_err(|e| {
                    tracing::error!(fs = %local_path, error = %e,
                        "cannot clear placeholder property for forced receive");
                    e
                })?;
        }

        if req.clear_resume_token && ph.fs_exists {
            self.zfs.recv_clear_resume_token(&local_path).await?;
        }

        recv_opts.save_partial_recv_state = self.zfs.resume_recv_supported(&local_path).await?;

        tracing::debug!("acquire concurrent recv semaphore");
        let _permit = self.recv_gate.acquire(&ctx.cancel).await?;

        tracing::debug!(fs = %local_path, ?recv_opts, "start receive");
        self.zfs
            .recv(&local_path, stream, recv_opts, &ctx.cancel)
            .await
            .map_err(|e| {
                tracing::error!(fs = %local_path, error = %e, ?recv_opts, "receive failed");
                EndpointError::Zfs(e)
            })
    }
}

#[async_trait]
impl ReplicationEndpoint for Receiver {
    async fn list_filesystems(
        &self,
        ctx: &RequestContext,
    ) -> Result<Vec<pdu::Filesystem>, EndpointError> {
        let root = self.client_root_from_ctx(ctx)?;
        let filter = SubRoot {
            local_root: root.clone(),
        };
        let paths = self.zfs.list_filesystems(&filter).await?;

        let mut filesystems = Vec::with_capacity(paths.len());
        for mut path in paths {
            let ph = self.zfs.placeholder_state(&path).await.map_err(|e| {
                tracing::error!(fs = %path, error = %e, "error getting placeholder state");
                e
            })?;
            tracing::debug!(fs = %path, ?ph, "placeholder state");
            if !ph.fs_exists {
                tracing::error!(fs = %path, "inconsistent placeholder state: filesystem must exist");
                return Err(EndpointError::PlaceholderInconsistency(format!(
                    "filesystem {path} was listed but does not exist"
                )));
            }
            let resume_token = self.zfs.recv_resume_token(&path).await.map_err(|e| {
                tracing::error!(fs = %path, error = %e, "cannot get receive resume token");
                e
            })?;
            tracing::debug!(fs = %path, ?resume_token, "receive resume token");

            // present the filesystem without the root prefix
            path.trim_prefix(&root);
            filesystems.push(pdu::Filesystem {
                path: path.to_string(),
                is_placeholder: ph.is_placeholder,
                resume_token,
            });
        }
        if filesystems.is_empty() {
            tracing::debug!("no filesystems found");
        }
        Ok(filesystems)
    }

    async fn list_filesystem_versions(
        &self,
        ctx: &RequestContext,
        filesystem: &str,
    ) -> Result<Vec<FilesystemVersion>, EndpointError> {
        let root = self.client_root_from_ctx(ctx)?;
        let local_path = SubRoot { local_root: root }.map_to_local(filesystem)?;
        Ok(self.zfs.list_filesystem_versions(&local_path).await?)
    }

    async fn send(
        &self,
        _ctx: &RequestContext,
        _req: pdu::SendRequest,
    ) -> Result<(pdu::SendResponse, Option<Box<dyn StreamCopier>>), EndpointError> {
        Err(EndpointError::NotSupported("Send"))
    }

    async fn receive(
        &self,
        ctx: &RequestContext,
        req: pdu::ReceiveRequest,
        mut stream: Box<dyn StreamCopier>,
    ) -> Result<(), EndpointError> {
        tracing::debug!(fs = %req.filesystem, "incoming receive");
        let res = self.receive_inner(ctx, &req, stream.as_mut()).await;
        if let Err(e) = stream.close().await {
            tracing::debug!(error = %format!("{e:#}"), "error closing receive stream");
        }
        res
    }

    async fn destroy_snapshots(
        &self,
        ctx: &RequestContext,
        req: pdu::DestroySnapshotsRequest,
    ) -> Result<Vec<pdu::DestroySnapshotResult>, EndpointError> {
        let root = self.client_root_from_ctx(ctx)?;
        let local_path = SubRoot { local_root: root }.map_to_local(&req.filesystem)?;
        do_destroy_snapshots(self.zfs.as_ref(), &local_path, req.snapshots).await
    }

    async fn replication_cursor(
        &self,
        _ctx: &RequestContext,
        _req: pdu::ReplicationCursorRequest,
    ) -> Result<pdu::ReplicationCursorResult, EndpointError> {
        Err(EndpointError::NotSupported("ReplicationCursor"))
    }

    async fn ping(&self, _ctx: &RequestContext, message: &str) -> Result<String, EndpointError> {
        Ok(message.to_string())
    }

    async fn ping_dataconn(
        &self,
        ctx: &RequestContext,
        message: &str,
    ) -> Result<String, EndpointError> {
        self.ping(ctx, message).await
    }

    async fn wait_for_connectivity(&self, _ctx: &RequestContext) -> Result<(), EndpointError> {
        Ok(())
    }
}
