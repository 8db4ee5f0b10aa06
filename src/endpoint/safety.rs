//! Replication-step safety primitives.
//!
//! A client performing a replication step needs operations it can repeat
//! after any interruption: hold and release that tolerate already-held /
//! already-released state, bookmark and destroy that check the target's
//! GUID so concurrent external pruning cannot make them act on the wrong
//! snapshot, and the monotone replication-cursor motion in
//! [`crate::zfs::cursor`].

use crate::endpoint::error::EndpointError;
use crate::zfs::path::DatasetPath;
use crate::zfs::version::VersionType;
use crate::zfs::{VolumeManager, ZfsError};

/// Prefix of all hold tags created by replication jobs.
pub const HOLD_TAG_PREFIX: &str = "zrepl_";

/// The hold tag a replication job uses on snapshots participating in a
/// step.
pub fn step_hold_tag(job_id: &str) -> Result<String, EndpointError> {
    validate_job_id(job_id)?;
    Ok(format!("{HOLD_TAG_PREFIX}{job_id}"))
}

fn validate_job_id(job_id: &str) -> Result<(), EndpointError> {
    if job_id.is_empty() {
        return Err(EndpointError::Validation(
            "job id must not be empty".to_string(),
        ));
    }
    if job_id
        .chars()
        .any(|c| c == '/' || c.is_whitespace() || crate::zfs::path::FORBIDDEN_CHARACTERS.contains(c))
    {
        return Err(EndpointError::Validation(format!(
            "job id {job_id:?} contains invalid characters"
        )));
    }
    Ok(())
}

/// Hold `fs@snap` with `tag`. Holding an already-held snapshot is a no-op;
/// holding a nonexistent snapshot is an error.
pub async fn idempotent_hold(
    zfs: &dyn VolumeManager,
    fs: &DatasetPath,
    snap: &str,
    tag: &str,
) -> Result<(), ZfsError> {
    match zfs.hold(fs, snap, tag).await {
        Ok(()) => Ok(()),
        Err(ZfsError::OperationFailed { ref stderr, .. })
            if stderr.contains("tag already exists") =>
        {
            tracing::debug!(fs = %fs, snap, tag, "hold already exists");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Release `tag` from `fs@snap`. Releasing an absent tag, or a tag on a
/// snapshot that no longer exists, is a no-op.
pub async fn idempotent_release(
    zfs: &dyn VolumeManager,
    fs: &DatasetPath,
    snap: &str,
    tag: &str,
) -> Result<(), ZfsError> {
    match zfs.release(fs, snap, tag).await {
        Ok(()) => Ok(()),
        Err(ZfsError::OperationFailed { ref stderr, .. }) if stderr.contains("no such tag") => {
            tracing::debug!(fs = %fs, snap, tag, "hold tag already released");
            Ok(())
        }
        Err(ZfsError::DatasetDoesNotExist { .. }) => {
            tracing::debug!(fs = %fs, snap, tag, "snapshot of released hold is gone");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Create bookmark `fs#bookmark` of `fs@snap`, expecting the snapshot to
/// carry `expected_guid`.
///
/// Applied twice this is a no-op: an existing bookmark with the expected
/// GUID counts as success. An existing bookmark with a *different* GUID is
/// a hard error, as is a snapshot whose GUID no longer matches — in both
/// cases the version the caller meant to pin is gone.
pub async fn idempotent_bookmark(
    zfs: &dyn VolumeManager,
    fs: &DatasetPath,
    snap: &str,
    expected_guid: u64,
    bookmark: &str,
) -> Result<(), ZfsError> {
    let bookmark_path = format!("{fs}#{bookmark}");
    match zfs.get_createtxg_and_guid(&bookmark_path).await {
        Ok(props) if props.guid == expected_guid => return Ok(()),
        Ok(props) => {
            return Err(ZfsError::GuidMismatch {
                path: bookmark_path,
                expected: expected_guid,
                actual: props.guid,
            })
        }
        Err(ZfsError::DatasetDoesNotExist { .. }) => {}
        Err(e) => return Err(e),
    }

    let snap_path = format!("{fs}@{snap}");
    let snap_props = zfs.get_createtxg_and_guid(&snap_path).await?;
    if snap_props.guid != expected_guid {
        return Err(ZfsError::GuidMismatch {
            path: snap_path,
            expected: expected_guid,
            actual: snap_props.guid,
        });
    }
    // the bookmark captures the snapshot's GUID atomically at creation, so
    // a snapshot swapped in between the check and this call yields a
    // bookmark whose GUID exposes the race on the next cross-check
    zfs.bookmark(fs, snap, bookmark).await
}

/// Destroy `fs@snap` only if it still carries `guid`. A snapshot that is
/// already gone, or whose name now refers to a different snapshot, counts
/// as success — the version the caller wanted gone is gone.
pub async fn idempotent_destroy_snapshot_by_guid(
    zfs: &dyn VolumeManager,
    fs: &DatasetPath,
    snap: &str,
    guid: u64,
) -> Result<(), ZfsError> {
    let versions = zfs.list_filesystem_versions(fs).await?;
    let Some(current) = versions
        .iter()
        .find(|v| v.kind == VersionType::Snapshot && v.name == snap)
    else {
        return Ok(());
    };
    if current.guid != guid {
        tracing::debug!(fs = %fs, snap, expected = guid, actual = current.guid,
            "snapshot name now refers to a different snapshot, not destroying");
        return Ok(());
    }
    zfs.destroy(&current.to_abs_path(fs)).await
}
