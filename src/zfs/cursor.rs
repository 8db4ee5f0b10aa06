//! Replication cursor: a bookmark tracking the last successfully
//! replicated snapshot of a sending filesystem.
//!
//! The cursor pins the incremental-send base so external pruning cannot
//! delete the last common version between sender and receiver. Moving the
//! cursor is monotone in `createtxg`; attempted backward moves fail
//! without mutating anything.

use crate::zfs::error::ZfsError;
use crate::zfs::path::DatasetPath;
use crate::zfs::version::{FilesystemVersion, VersionType};
use crate::zfs::VolumeManager;

/// Bookmark name of the per-filesystem replication cursor.
pub const REPLICATION_CURSOR_BOOKMARK_NAME: &str = "zrepl_replication_cursor";

/// Look up the replication cursor of `fs`. `None` means no cursor exists.
pub async fn get_replication_cursor(
    zfs: &dyn VolumeManager,
    fs: &DatasetPath,
) -> Result<Option<FilesystemVersion>, ZfsError> {
    let versions = zfs.list_filesystem_versions(fs).await?;
    Ok(versions
        .into_iter()
        .find(|v| v.kind == VersionType::Bookmark && v.name == REPLICATION_CURSOR_BOOKMARK_NAME))
}

/// Move the replication cursor of `fs` to `fs@snapname`.
///
/// `expected_guid` is the GUID the caller believes the snapshot has; a
/// mismatch fails without effect. A cursor already pointing at that GUID
/// is a no-op. Returns the snapshot's GUID.
pub async fn set_replication_cursor(
    zfs: &dyn VolumeManager,
    fs: &DatasetPath,
    snapname: &str,
    expected_guid: u64,
) -> Result<u64, ZfsError> {
    if fs.is_empty() {
        return Err(ZfsError::InvalidArgument(
            "filesystem must not be empty".to_string(),
        ));
    }
    if snapname.is_empty() {
        return Err(ZfsError::InvalidArgument(
            "snapshot name must not be empty".to_string(),
        ));
    }
    // must not special-case expected_guid == 0, that can be legitimate

    let snap_path = format!("{fs}@{snapname}");
    let snap_props = zfs.get_createtxg_and_guid(&snap_path).await?;
    if snap_props.guid != expected_guid {
        return Err(ZfsError::GuidMismatch {
            path: snap_path,
            expected: expected_guid,
            actual: snap_props.guid,
        });
    }

    let bookmark_path = format!("{fs}#{REPLICATION_CURSOR_BOOKMARK_NAME}");
    match zfs.get_createtxg_and_guid(&bookmark_path).await {
        Ok(bookmark_props) => {
            if snap_props.createtxg < bookmark_props.createtxg {
                return Err(ZfsError::CursorRegression { fs: fs.to_string() });
            }
            if bookmark_props.guid == snap_props.guid {
                return Ok(snap_props.guid);
            }
            // TODO a rename via channel programs would make the
            // destroy-then-recreate window go away
            zfs.destroy(&bookmark_path).await?;
        }
        Err(ZfsError::DatasetDoesNotExist { .. }) => {}
        Err(e) => return Err(e),
    }

    zfs.bookmark(fs, snapname, REPLICATION_CURSOR_BOOKMARK_NAME)
        .await?;
    Ok(snap_props.guid)
}
