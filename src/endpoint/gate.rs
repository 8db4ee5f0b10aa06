//! Concurrency gates bounding in-flight send and receive operations.
//!
//! Two process-wide counted semaphores, sized from the environment at
//! first use. Acquisition is plain (not try-) and cancellable; the permit
//! is released on every exit path by RAII.

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use tokio::io::AsyncWrite;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::endpoint::error::EndpointError;
use crate::envconst;
use crate::zfs::copier::{CopierError, StreamCopier};

static SEND_GATE: Lazy<Gate> =
    Lazy::new(|| Gate::new(envconst::usize_var("ZREPL_ENDPOINT_MAX_CONCURRENT_SEND", 10)));
static RECV_GATE: Lazy<Gate> =
    Lazy::new(|| Gate::new(envconst::usize_var("ZREPL_ENDPOINT_MAX_CONCURRENT_RECV", 10)));

/// The process-wide gate for concurrent sends.
pub fn send_gate() -> &'static Gate {
    &SEND_GATE
}

/// The process-wide gate for concurrent receives.
pub fn recv_gate() -> &'static Gate {
    &RECV_GATE
}

/// Counted semaphore with cancellable acquisition.
#[derive(Debug, Clone)]
pub struct Gate {
    sem: Arc<Semaphore>,
}

/// Held gate slot; released on drop.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl Gate {
    pub fn new(limit: usize) -> Self {
        Self {
            sem: Arc::new(Semaphore::new(limit.max(1))),
        }
    }

    /// Wait for a slot, or fail immediately when `cancel` fires.
    ///
    /// TODO try-acquire with a resource-exhaustion status would let the
    /// peer back off instead of queueing, but needs a protocol extension
    /// and client-side handling.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<GatePermit, EndpointError> {
        tokio::select! {
            permit = self.sem.clone().acquire_owned() => {
                // the gate semaphore is never closed
                let permit = permit.map_err(|_| EndpointError::Cancelled)?;
                Ok(GatePermit { _permit: permit })
            }
            _ = cancel.cancelled() => Err(EndpointError::Cancelled),
        }
    }

    #[cfg(test)]
    fn available(&self) -> usize {
        self.sem.available_permits()
    }
}

/// Stream copier that holds a gate slot until it is closed (or dropped).
#[derive(Debug)]
pub(crate) struct GatedStreamCopier {
    inner: Box<dyn StreamCopier>,
    permit: Option<GatePermit>,
}

impl GatedStreamCopier {
    pub(crate) fn new(inner: Box<dyn StreamCopier>, permit: GatePermit) -> Self {
        Self {
            inner,
            permit: Some(permit),
        }
    }
}

#[async_trait]
impl StreamCopier for GatedStreamCopier {
    async fn write_stream_to(
        &mut self,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<(), CopierError> {
        self.inner.write_stream_to(sink).await
    }

    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf).await
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        let res = self.inner.close().await;
        self.permit = None;
        res
    }
}
