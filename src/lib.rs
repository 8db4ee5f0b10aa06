//! Replication endpoints for copy-on-write filesystem snapshot streams.
//!
//! A [`Sender`](endpoint::Sender) exports snapshots of local filesystems as
//! opaque byte streams; a [`Receiver`](endpoint::Receiver) materialises such
//! streams into a sub-hierarchy of its own dataset tree, creating marked
//! placeholder filesystems for missing intermediate datasets. Both sides are
//! driven by an RPC layer that is not part of this crate: it hands request
//! values to [`endpoint::ReplicationEndpoint`] and shuttles the resulting
//! [`zfs::StreamCopier`] bytes over whatever wire it likes.
//!
//! The [`zfs`] module wraps the volume-manager CLI behind the
//! [`zfs::VolumeManager`] trait so the endpoints (and their tests) never
//! spawn processes directly.

pub mod endpoint;
pub mod envconst;
pub mod zfs;
