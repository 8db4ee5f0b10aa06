//! Endpoint-level failure taxonomy.

use thiserror::Error;

use crate::zfs::path::DatasetPathError;
use crate::zfs::resume_token::ResumeTokenError;
use crate::zfs::ZfsError;

#[derive(Debug, Error)]
pub enum EndpointError {
    /// Request is malformed, an identifier fails its shape check, or a
    /// resume token contradicts the request it came with.
    #[error("validation: {0}")]
    Validation(String),

    /// The dataset filter denies access, regardless of whether the
    /// filesystem exists.
    #[error("endpoint does not allow access to filesystem {fs:?}")]
    AccessDenied { fs: String },

    /// A caller-supplied filter failed to evaluate.
    #[error("dataset filter failed: {0:#}")]
    Filter(anyhow::Error),

    /// A filesystem the volume manager just listed failed its placeholder
    /// probe; fatal for the request.
    #[error("inconsistent placeholder state: {0}")]
    PlaceholderInconsistency(String),

    /// A missing ancestor turned out to be a pool root.
    #[error("pool {pool:?} not imported")]
    PoolNotImported { pool: String },

    /// A missing ancestor turned out to be the configured root itself.
    #[error("root_fs {root_fs:?} does not exist")]
    RootFsDoesNotExist { root_fs: String },

    #[error("operation cancelled")]
    Cancelled,

    /// The operation is not applicable on this endpoint side.
    #[error("{0} not implemented by this endpoint")]
    NotSupported(&'static str),

    /// Resume token decoding failed in a way that must not be recovered
    /// from locally.
    #[error(transparent)]
    ResumeToken(ResumeTokenError),

    #[error(transparent)]
    Zfs(#[from] ZfsError),
}

impl From<DatasetPathError> for EndpointError {
    fn from(e: DatasetPathError) -> Self {
        EndpointError::Validation(e.to_string())
    }
}
