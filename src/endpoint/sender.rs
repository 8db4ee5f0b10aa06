//! Sending-side endpoint.

use std::sync::Arc;

use async_trait::async_trait;

use crate::endpoint::error::EndpointError;
use crate::endpoint::gate::{send_gate, Gate, GatedStreamCopier};
use crate::endpoint::{do_destroy_snapshots, pdu, ReplicationEndpoint, RequestContext};
use crate::zfs::cursor::{get_replication_cursor, set_replication_cursor};
use crate::zfs::path::DatasetPath;
use crate::zfs::resume_token::ResumeTokenError;
use crate::zfs::send::{SendArgVersion, SendArgs};
use crate::zfs::version::{validate_rel_name, FilesystemVersion};
use crate::zfs::{DatasetFilter, StreamCopier, VolumeManager};

/// Replication endpoint for the sending side.
pub struct Sender {
    zfs: Arc<dyn VolumeManager>,
    fs_filter: Arc<dyn DatasetFilter>,
    send_gate: Gate,
}

impl Sender {
    /// A sender exporting the filesystems passing `fs_filter`, bounded by
    /// the process-wide send gate.
    pub fn new(zfs: Arc<dyn VolumeManager>, fs_filter: Arc<dyn DatasetFilter>) -> Self {
        Self::with_gate(zfs, fs_filter, send_gate().clone())
    }

    /// Like [`Sender::new`] but with an explicit gate instead of the
    /// process-wide one.
    pub fn with_gate(
        zfs: Arc<dyn VolumeManager>,
        fs_filter: Arc<dyn DatasetFilter>,
        send_gate: Gate,
    ) -> Self {
        Self {
            zfs,
            fs_filter,
            send_gate,
        }
    }

    fn filter_check_fs(&self, fs: &str) -> Result<DatasetPath, EndpointError> {
        let dp = DatasetPath::parse(fs)?;
        if dp.is_empty() {
            return Err(EndpointError::Validation(
                "empty filesystem not allowed".to_string(),
            ));
        }
        let pass = self.fs_filter.filter(&dp).map_err(EndpointError::Filter)?;
        if !pass {
            return Err(EndpointError::AccessDenied { fs: fs.to_string() });
        }
        Ok(dp)
    }

    /// Decide whether the request's resume token is used, discarded, or
    /// grounds for refusal. Returns whether to send with the token.
    ///
    /// `expected_from_guid` / `expected_to_guid` are the GUIDs resolved
    /// from the *request's* `from`/`to` against local datasets; the token
    /// must describe exactly that operation.
    async fn validate_resume_token(
        &self,
        req: &pdu::SendRequest,
        expected_from_guid: Option<u64>,
        expected_to_guid: u64,
    ) -> Result<bool, EndpointError> {
        let Some(token) = req.resume_token.as_deref().filter(|t| !t.is_empty()) else {
            return Ok(false);
        };

        if !self.zfs.resume_send_supported().await? {
            tracing::info!(
                "resume requested but not supported sender side, \
                 requesting discard and sending stream from beginning"
            );
            return Ok(false);
        }

        let parsed = match self.zfs.parse_resume_token(token).await {
            Ok(parsed) => parsed,
            Err(e @ (ResumeTokenError::DecodingNotSupported | ResumeTokenError::Parsing(_))) => {
                // might be a shortcoming on our side, be conservative and
                // treat the token as unsupported rather than hostile
                tracing::info!(error = %e, "cannot decode resume token, sending stream from beginning");
                return Ok(false);
            }
            Err(e @ ResumeTokenError::Corrupt(_)) => {
                return Err(EndpointError::ResumeToken(e));
            }
            Err(e) => {
                tracing::error!(error = %e, "resume token validation could not be completed");
                return Err(EndpointError::ResumeToken(e));
            }
        };
        tracing::debug!(token = ?parsed, "decoded resume token");

        if let Err(mismatch) = parsed.validate_corresponds_to_send(
            &req.filesystem,
            expected_from_guid,
            expected_to_guid,
            req.encrypted,
        ) {
            tracing::error!(
                error = %mismatch,
                filesystem = %req.filesystem,
                "resume token does not correspond to requested send, possible attack by peer"
            );
            return Err(EndpointError::Validation(format!(
                "resume token does not correspond to requested send: {mismatch}"
            )));
        }
        Ok(true)
    }
}

#[async_trait]
impl ReplicationEndpoint for Sender {
    async fn list_filesystems(
        &self,
        _ctx: &RequestContext,
    ) -> Result<Vec<pdu::Filesystem>, EndpointError> {
        let paths = self.zfs.list_filesystems(self.fs_filter.as_ref()).await?;
        Ok(paths
            .into_iter()
            .map(|p| pdu::Filesystem {
                path: p.to_string(),
                // sender filesystems are never placeholders, and resume
                // state is a receiver-side concept
                is_placeholder: false,
                resume_token: None,
            })
            .collect())
    }

    async fn list_filesystem_versions(
        &self,
        _ctx: &RequestContext,
        filesystem: &str,
    ) -> Result<Vec<FilesystemVersion>, EndpointError> {
        let dp = self.filter_check_fs(filesystem)?;
        Ok(self.zfs.list_filesystem_versions(&dp).await?)
    }

    async fn send(
        &self,
        ctx: &RequestContext,
        req: pdu::SendRequest,
    ) -> Result<(pdu::SendResponse, Option<Box<dyn StreamCopier>>), EndpointError> {
        if req.filesystem.is_empty() {
            return Err(EndpointError::Validation(
                "`filesystem` field in send request must not be empty".to_string(),
            ));
        }
        validate_rel_name(&req.to)
            .map_err(|e| EndpointError::Validation(format!("`to` invalid: {e}")))?;
        if let Some(from) = &req.from {
            validate_rel_name(from)
                .map_err(|e| EndpointError::Validation(format!("`from` invalid: {e}")))?;
        }
        self.filter_check_fs(&req.filesystem)?;

        // resolve the request's versions against local datasets; these
        // GUIDs anchor the resume-token cross-check
        let to_guid = self.zfs.get_guid(&req.filesystem, &req.to).await?;
        let from_guid = match &req.from {
            Some(from) => Some(self.zfs.get_guid(&req.filesystem, from).await?),
            None => None,
        };

        if req.encrypted && !self.zfs.encryption_enabled(&req.filesystem).await? {
            return Err(EndpointError::Validation(format!(
                "encrypted send requested, but filesystem {:?} is not encrypted",
                req.filesystem
            )));
        }

        let use_resume_token = self
            .validate_resume_token(&req, from_guid, to_guid)
            .await?;

        let args = SendArgs {
            fs: req.filesystem.clone(),
            from: req.from.clone().zip(from_guid).map(|(rel_name, guid)| {
                SendArgVersion { rel_name, guid }
            }),
            to: SendArgVersion {
                rel_name: req.to.clone(),
                guid: to_guid,
            },
            encrypted: req.encrypted,
            resume_token: use_resume_token
                .then(|| req.resume_token.clone())
                .flatten(),
        };

        // the tool reports -1 when it cannot estimate; the wire encodes
        // "unknown" as 0
        let expected_size = |estimate: i64| estimate.max(0) as u64;

        if req.dry_run {
            let info = self.zfs.send_dry(&args).await?;
            return Ok((
                pdu::SendResponse {
                    expected_size: expected_size(info.size_estimate),
                    used_resume_token: use_resume_token,
                },
                None,
            ));
        }

        tracing::debug!("acquire concurrent send semaphore");
        let permit = self.send_gate.acquire(&ctx.cancel).await?;

        let info = self.zfs.send_dry(&args).await?;
        let stream = self.zfs.send(&args, &ctx.cancel).await?;
        let res = pdu::SendResponse {
            expected_size: expected_size(info.size_estimate),
            used_resume_token: use_resume_token,
        };
        // the stream keeps its gate slot until the RPC layer closes it
        let gated: Box<dyn StreamCopier> = Box::new(GatedStreamCopier::new(stream, permit));
        Ok((res, Some(gated)))
    }

    async fn receive(
        &self,
        _ctx: &RequestContext,
        _req: pdu::ReceiveRequest,
        mut stream: Box<dyn StreamCopier>,
    ) -> Result<(), EndpointError> {
        if let Err(e) = stream.close().await {
            tracing::debug!(error = %format!("{e:#}"), "closing stream of refused receive");
        }
        Err(EndpointError::NotSupported("Receive"))
    }

    async fn destroy_snapshots(
        &self,
        _ctx: &RequestContext,
        req: pdu::DestroySnapshotsRequest,
    ) -> Result<Vec<pdu::DestroySnapshotResult>, EndpointError> {
        let dp = self.filter_check_fs(&req.filesystem)?;
        do_destroy_snapshots(self.zfs.as_ref(), &dp, req.snapshots).await
    }

    async fn replication_cursor(
        &self,
        _ctx: &RequestContext,
        req: pdu::ReplicationCursorRequest,
    ) -> Result<pdu::ReplicationCursorResult, EndpointError> {
        let dp = self.filter_check_fs(&req.filesystem)?;
        match req.op {
            pdu::ReplicationCursorOp::Get => {
                match get_replication_cursor(self.zfs.as_ref(), &dp).await? {
                    Some(cursor) => Ok(pdu::ReplicationCursorResult::Guid(cursor.guid)),
                    None => Ok(pdu::ReplicationCursorResult::NotExist),
                }
            }
            pdu::ReplicationCursorOp::Set {
                snapshot,
                expected_guid,
            } => {
                let snapname = snapshot.strip_prefix('@').unwrap_or(&snapshot);
                if snapname.contains(['@', '#']) {
                    return Err(EndpointError::Validation(format!(
                        "cursor target {snapshot:?} is not a snapshot name"
                    )));
                }
                let guid =
                    set_replication_cursor(self.zfs.as_ref(), &dp, snapname, expected_guid)
                        .await?;
                Ok(pdu::ReplicationCursorResult::Guid(guid))
            }
        }
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
