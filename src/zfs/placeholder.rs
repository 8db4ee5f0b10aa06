//! Placeholder filesystems.
//!
//! A placeholder is a receiver-created filesystem that only exists to
//! complete the dataset hierarchy below the replication root. It is marked
//! with a reserved user property so that listing can distinguish it from a
//! genuine replica, and so the first real receive into it knows it may
//! roll back and overwrite.

use crate::zfs::cli::{PropertySource, ZfsCli};
use crate::zfs::error::ZfsError;
use crate::zfs::path::DatasetPath;

/// Reserved user property marking placeholder filesystems.
pub const PLACEHOLDER_PROPERTY_NAME: &str = "zrepl:placeholder";

/// Existence and placeholder marking of one filesystem.
///
/// A filesystem that does not exist is never a placeholder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaceholderState {
    pub fs_exists: bool,
    pub is_placeholder: bool,
}

pub(crate) async fn placeholder_state(
    cli: &ZfsCli,
    path: &DatasetPath,
) -> Result<PlaceholderState, ZfsError> {
    let path_str = path.to_string();
    // only a locally-set property counts: an inherited value would make
    // every child of a placeholder look like one
    let props = match cli
        .get_props(&path_str, &[PLACEHOLDER_PROPERTY_NAME], PropertySource::LOCAL)
        .await
    {
        Ok(props) => props,
        Err(ZfsError::DatasetDoesNotExist { .. }) => return Ok(PlaceholderState::default()),
        Err(e) => return Err(e),
    };
    let is_placeholder = props
        .get(PLACEHOLDER_PROPERTY_NAME)
        .map(|v| v == "on")
        .unwrap_or(false);
    Ok(PlaceholderState {
        fs_exists: true,
        is_placeholder,
    })
}

pub(crate) async fn create_placeholder(cli: &ZfsCli, path: &DatasetPath) -> Result<(), ZfsError> {
    let path_str = path.to_string();
    if path_str.is_empty() {
        return Err(ZfsError::InvalidArgument(
            "placeholder path must not be empty".to_string(),
        ));
    }
    let prop = format!("{PLACEHOLDER_PROPERTY_NAME}=on");
    // -p is not used: missing ancestors are created one level at a time by
    // the hierarchy walk so each gets its own marker
    cli.run("create placeholder", &["create", "-o", &prop, &path_str])
        .await?;
    Ok(())
}

pub(crate) async fn set_placeholder(
    cli: &ZfsCli,
    path: &DatasetPath,
    is_placeholder: bool,
) -> Result<(), ZfsError> {
    let value = if is_placeholder { "on" } else { "off" };
    cli.set_props(&path.to_string(), &[(PLACEHOLDER_PROPERTY_NAME, value)])
        .await
}
