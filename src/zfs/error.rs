//! Failure taxonomy for volume-manager operations.
//!
//! Failure kinds are distinguished by variant, not by downcasting: callers
//! match on [`ZfsError`] to tell a missing dataset from a failed tool
//! invocation from an unsupported feature.

use std::fmt;

use thiserror::Error;

use crate::zfs::copier::CopierError;
use crate::zfs::path::DatasetPathError;

#[derive(Debug, Error)]
pub enum ZfsError {
    /// The addressed dataset (filesystem, snapshot, or bookmark) does not
    /// exist. Carries the offending path.
    #[error("dataset {path:?} does not exist")]
    DatasetDoesNotExist { path: String },

    /// The tool ran and failed; carries the captured error text.
    #[error("zfs {context}: exited with {status}, stderr:\n{stderr}")]
    OperationFailed {
        context: String,
        status: String,
        stderr: String,
    },

    /// An optional capability (resume send, native encryption) is not
    /// available on this installation.
    #[error("{feature} not supported by this zfs installation")]
    FeatureUnsupported { feature: &'static str },

    /// Batch snapshot destroy with per-snapshot failure details.
    #[error(transparent)]
    DestroySnapshots(#[from] DestroySnapshotsError),

    /// Stream transfer failed; preserves the read/write-side distinction.
    #[error(transparent)]
    Stream(#[from] CopierError),

    /// Tool output did not have the expected shape.
    #[error("malformed zfs output: {0}")]
    MalformedOutput(String),

    /// Caller-supplied argument failed a shape check.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A version's GUID did not match the caller's expectation.
    #[error("expected guid {expected} != actual guid {actual} for {path:?}")]
    GuidMismatch {
        path: String,
        expected: u64,
        actual: u64,
    },

    /// The replication cursor can only be advanced, never moved back.
    #[error("replication cursor of {fs:?} can only be advanced, not set back")]
    CursorRegression { fs: String },

    #[error(transparent)]
    Path(#[from] DatasetPathError),

    /// Spawning or waiting for the tool itself failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

// =============================================================================
// Batch destroy error parsing
// =============================================================================

/// Structured result of a failed batch snapshot destroy: one entry per
/// snapshot the tool refused to destroy.
#[derive(Debug, Error)]
pub struct DestroySnapshotsError {
    pub filesystem: String,
    /// Short snapshot names (filesystem@ stripped), parallel to `reasons`.
    pub undestroyable: Vec<String>,
    pub reasons: Vec<String>,
    pub raw_lines: Vec<String>,
}

impl fmt::Display for DestroySnapshotsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.undestroyable.len() == 1 {
            write!(
                f,
                "zfs destroy failed: {}@{}: {}",
                self.filesystem, self.undestroyable[0], self.reasons[0]
            )
        } else {
            write!(f, "{}", self.raw_lines.join("\n"))
        }
    }
}

/// Parse the stderr of a batch snapshot destroy (`zfs destroy fs@a,b,...`)
/// into per-snapshot failures.
///
/// Lines look like `cannot destroy snapshot fs@name: reason`. Returns `None`
/// unless *every* line matches for the filesystem of `arg`; mixed or
/// unexpected output is left to the caller as an opaque failure.
pub(crate) fn try_parse_destroy_snapshots_error(
    arg: &str,
    stderr: &str,
) -> Option<DestroySnapshotsError> {
    let (filesystem, _names) = arg.split_once('@')?;

    let mut undestroyable = Vec::new();
    let mut reasons = Vec::new();
    let mut raw_lines = Vec::new();
    for line in stderr.lines().filter(|l| !l.is_empty()) {
        raw_lines.push(line.to_string());
        let rest = line.strip_prefix("cannot destroy snapshot ")?;
        // dataset names can contain ':', split on the delimiter after the
        // snapshot name instead of the first ':'
        let at = rest.find('@')?;
        let (fs, snap_and_reason) = rest.split_at(at);
        if fs != filesystem {
            return None;
        }
        let (snap, reason) = snap_and_reason[1..].split_once(": ")?;
        undestroyable.push(snap.to_string());
        reasons.push(reason.to_string());
    }
    if undestroyable.is_empty() {
        return None;
    }
    Some(DestroySnapshotsError {
        filesystem: filesystem.to_string(),
        undestroyable,
        reasons,
        raw_lines,
    })
}
