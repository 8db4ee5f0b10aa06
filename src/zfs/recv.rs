//! Receive plumbing: drain a stream copier into a filesystem.

use std::process::Stdio;

use anyhow::anyhow;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use crate::zfs::cli::{try_set_pipe_capacity, ZfsCli, RECV_PIPE_CAPACITY_HINT};
use crate::zfs::copier::{CopierError, StreamCopier};
use crate::zfs::error::ZfsError;
use crate::zfs::path::DatasetPath;
use crate::zfs::version::VersionType;
use crate::zfs::{RecvOptions, VolumeManager};

/// Drain `stream` into `fs` with the given options.
///
/// The copier and the child process run concurrently; their failures are
/// reconciled so the caller gets the earlier, more informative one: a
/// failed child beats a write-side copier error (the write error is just
/// the broken pipe that follows), while a read-side copier error is always
/// the root cause.
pub(crate) async fn zfs_recv(
    cli: &ZfsCli,
    fs: &DatasetPath,
    stream: &mut dyn StreamCopier,
    opts: RecvOptions,
    cancel: &CancellationToken,
) -> Result<(), ZfsError> {
    let fs_str = fs.to_string();
    if fs_str.is_empty() {
        return Err(ZfsError::InvalidArgument(
            "receive filesystem must not be empty".to_string(),
        ));
    }

    if opts.rollback_and_force {
        rollback_for_forced_recv(cli, fs).await?;
    }

    let mut args = vec!["recv"];
    if opts.rollback_and_force {
        args.push("-F");
    }
    if opts.save_partial_recv_state {
        args.push("-s");
    }
    args.push(&fs_str);

    let mut command = cli.command();
    command
        .args(&args)
        .stdin(Stdio::piped())
        // stdout must be consumed: some versions of the tool abort the
        // receive with "invalid backup stream" when stdout is closed
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    tracing::debug!(fs = %fs_str, ?opts, "start receive command");
    let mut child = command.spawn()?;

    let mut stdin = child.stdin.take().ok_or_else(|| ZfsError::OperationFailed {
        context: format!("recv {fs_str}"),
        status: "spawn".to_string(),
        stderr: "child stdin not piped".to_string(),
    })?;
    try_set_pipe_capacity(&stdin, *RECV_PIPE_CAPACITY_HINT);

    let mut child_stdout = child.stdout.take();
    let mut child_stderr = child.stderr.take();
    let drain_task = tokio::spawn(async move {
        if let Some(stdout) = child_stdout.as_mut() {
            let mut sink = Vec::new();
            let _ = stdout.read_to_end(&mut sink).await;
        }
        let mut stderr_buf = Vec::new();
        if let Some(stderr) = child_stderr.as_mut() {
            let _ = stderr.read_to_end(&mut stderr_buf).await;
        }
        String::from_utf8_lossy(&stderr_buf).into_owned()
    });

    let copy_res = tokio::select! {
        res = stream.write_stream_to(&mut stdin) => res,
        _ = cancel.cancelled() => {
            tracing::debug!(fs = %fs_str, "receive cancelled");
            let _ = child.start_kill();
            Err(CopierError::Write(anyhow!("receive cancelled")))
        }
    };
    // close stdin so the child sees end-of-stream
    drop(stdin);
    if copy_res.is_err() {
        let _ = child.start_kill();
    }

    let status = child.wait().await?;
    let stderr_text = drain_task.await.unwrap_or_default();

    let wait_err = if status.success() {
        None
    } else {
        Some(classify_recv_failure(&fs_str, status.to_string(), stderr_text))
    };

    match (copy_res, wait_err) {
        (Ok(()), None) => Ok(()),
        // the child's error text explains why the pipe broke
        (Ok(()), Some(wait_err)) => Err(wait_err),
        (Err(copy_err), Some(wait_err)) if copy_err.is_write_error() => Err(wait_err),
        (Err(copy_err), _) => Err(ZfsError::Stream(copy_err)),
    }
}

fn classify_recv_failure(fs: &str, status: String, stderr: String) -> ZfsError {
    ZfsError::OperationFailed {
        context: format!("recv {fs}"),
        status,
        stderr,
    }
}

/// Prepare a filesystem for `recv -F`.
///
/// `recv -F` only rolls back to the most recent snapshot, so all existing
/// snapshots are removed first: roll back recursively to the earliest one
/// (bookmarks roll back automatically), then destroy it.
async fn rollback_for_forced_recv(cli: &ZfsCli, fs: &DatasetPath) -> Result<(), ZfsError> {
    let mut snaps: Vec<_> = cli
        .list_filesystem_versions(fs)
        .await?
        .into_iter()
        .filter(|v| v.kind == VersionType::Snapshot)
        .collect();
    snaps.sort_by_key(|v| v.createtxg);

    let Some(earliest) = snaps.first() else {
        return Ok(());
    };
    let earliest_abs = earliest.to_abs_path(fs);
    tracing::debug!(rollback_target = %earliest_abs, "roll back for forced receive");
    cli.rollback(fs, earliest, true).await?;
    tracing::debug!(destroy = %earliest_abs, "destroy rollback target for forced receive");
    cli.destroy(&earliest_abs).await?;
    Ok(())
}

/// Abort partial receive state. The absence of resumable state is not an
/// error.
pub(crate) async fn zfs_recv_clear_resume_token(
    cli: &ZfsCli,
    fs: &DatasetPath,
) -> Result<(), ZfsError> {
    let fs_str = fs.to_string();
    if fs_str.is_empty() {
        return Err(ZfsError::InvalidArgument(
            "filesystem must not be empty".to_string(),
        ));
    }
    match cli.run("recv abort", &["recv", "-A", &fs_str]).await {
        Ok(_) => Ok(()),
        Err(ZfsError::OperationFailed { stderr, .. })
            if stderr.contains("does not have any resumable receive state to abort") =>
        {
            Ok(())
        }
        Err(e) => Err(e),
    }
}
