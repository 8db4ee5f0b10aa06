//! Stream copiers: handles for in-flight replication byte streams.
//!
//! A [`StreamCopier`] moves the bytes of one send stream from a producer to
//! a sink. Failures keep their origin: a [`CopierError::Read`] means the
//! producing side broke, a [`CopierError::Write`] means the sink did. The
//! distinction survives all the way to the RPC layer so callers can tell
//! which end of an interrupted transfer to blame.

use std::io;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::{Buf, Bytes};
use once_cell::sync::Lazy;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::envconst;
use crate::zfs::error::ZfsError;

use thiserror::Error;

/// Copy chunk size for stream-to-sink transfers.
const COPY_BUFFER_SIZE: usize = 256 * 1024;

/// Grace period granted to a producer that already delivered end-of-stream
/// before it is killed.
const EOF_GRACE_PERIOD: Duration = Duration::from_millis(200);

static STDERR_MAX_CAPTURE_SIZE: Lazy<usize> =
    Lazy::new(|| envconst::usize_var("ZREPL_ZFS_SEND_STDERR_MAX_CAPTURE_SIZE", 1 << 15));

#[derive(Debug, Error)]
pub enum CopierError {
    /// The producing side of the stream failed.
    #[error("stream: read error: {0:#}")]
    Read(anyhow::Error),
    /// The consuming side of the stream failed.
    #[error("stream: write error: {0:#}")]
    Write(anyhow::Error),
}

impl CopierError {
    pub fn is_read_error(&self) -> bool {
        matches!(self, CopierError::Read(_))
    }

    pub fn is_write_error(&self) -> bool {
        matches!(self, CopierError::Write(_))
    }
}

/// Handle for an in-flight byte stream from a producer to a sink.
#[async_trait]
pub trait StreamCopier: Send + std::fmt::Debug {
    /// Write the entire stream to `sink`.
    async fn write_stream_to(
        &mut self,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<(), CopierError>;

    /// Read the next chunk of the stream. `Ok(0)` is end-of-stream.
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Release the producer. Must be called as soon as it is clear that no
    /// more data will be read.
    async fn close(&mut self) -> anyhow::Result<()>;
}

// =============================================================================
// In-memory copier
// =============================================================================

/// A [`StreamCopier`] over an in-memory byte buffer. Used by RPC layers that
/// already hold the whole stream, and by tests.
#[derive(Debug, Clone)]
pub struct BytesStreamCopier {
    data: Bytes,
}

impl BytesStreamCopier {
    pub fn new(data: Bytes) -> Self {
        Self { data }
    }
}

#[async_trait]
impl StreamCopier for BytesStreamCopier {
    async fn write_stream_to(
        &mut self,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<(), CopierError> {
        while self.data.has_remaining() {
            let chunk_len = self.data.remaining().min(COPY_BUFFER_SIZE);
            let chunk = self.data.split_to(chunk_len);
            sink.write_all(&chunk)
                .await
                .map_err(|e| CopierError::Write(e.into()))?;
        }
        sink.flush().await.map_err(|e| CopierError::Write(e.into()))
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.data.remaining().min(buf.len());
        self.data.copy_to_slice(&mut buf[..n]);
        Ok(n)
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

// =============================================================================
// Send stream (producer child process)
// =============================================================================

/// Bounded stderr capture: keeps the most recent bytes up to the configured
/// cap.
#[derive(Debug, Default)]
struct StderrCapture {
    buf: Vec<u8>,
    cap: usize,
}

impl StderrCapture {
    fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
        if self.buf.len() > self.cap {
            let excess = self.buf.len() - self.cap;
            self.buf.drain(..excess);
        }
    }

    fn text(&self) -> String {
        String::from_utf8_lossy(&self.buf).into_owned()
    }
}

/// Terminal state of a send stream's producer.
#[derive(Debug, Clone)]
enum StreamOutcome {
    /// Clean end-of-stream and zero exit.
    Success,
    Failed { message: String },
}

/// Stream copier backed by a producer child process (`zfs send`).
///
/// Reads pull from the child's stdout. Closing signals the child to
/// terminate: after a clean end-of-stream the child gets a short grace
/// period to exit on its own, otherwise it is killed immediately. The
/// child's exit status and captured stderr become the terminal error seen
/// by all later operations on the handle.
#[derive(Debug)]
pub struct SendStream {
    child: Option<Child>,
    stdout: Option<tokio::process::ChildStdout>,
    stderr: Arc<Mutex<StderrCapture>>,
    stderr_task: Option<tokio::task::JoinHandle<()>>,
    context: String,
    cancel: CancellationToken,
    saw_eof: bool,
    outcome: Option<StreamOutcome>,
}

impl SendStream {
    /// Spawn `command` with piped stdout/stderr and wrap it. `context`
    /// names the operation for error messages.
    pub(crate) fn spawn(
        mut command: Command,
        context: String,
        cancel: CancellationToken,
    ) -> Result<Self, ZfsError> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = command.spawn()?;

        let stdout = child.stdout.take().ok_or_else(|| {
            ZfsError::OperationFailed {
                context: context.clone(),
                status: "spawn".to_string(),
                stderr: "child stdout not piped".to_string(),
            }
        })?;
        let mut child_stderr = child.stderr.take().ok_or_else(|| {
            ZfsError::OperationFailed {
                context: context.clone(),
                status: "spawn".to_string(),
                stderr: "child stderr not piped".to_string(),
            }
        })?;

        let stderr = Arc::new(Mutex::new(StderrCapture {
            buf: Vec::new(),
            cap: *STDERR_MAX_CAPTURE_SIZE,
        }));
        let stderr_task = {
            let stderr = Arc::clone(&stderr);
            tokio::spawn(async move {
                let mut chunk = [0u8; 4096];
                loop {
                    match child_stderr.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if let Ok(mut capture) = stderr.lock() {
                                capture.push(&chunk[..n]);
                            }
                        }
                    }
                }
            })
        };

        Ok(Self {
            child: Some(child),
            stdout: Some(stdout),
            stderr,
            stderr_task: Some(stderr_task),
            context,
            cancel,
            saw_eof: false,
            outcome: None,
        })
    }

    /// Best-effort pipe capacity hint on the producer's stdout pipe.
    pub(crate) fn set_pipe_capacity_hint(&self, capacity: usize) {
        if let Some(stdout) = &self.stdout {
            crate::zfs::cli::try_set_pipe_capacity(stdout, capacity);
        }
    }

    fn outcome_to_read_result(outcome: &StreamOutcome) -> io::Result<usize> {
        match outcome {
            StreamOutcome::Success => Ok(0),
            StreamOutcome::Failed { message } => Err(io::Error::other(message.clone())),
        }
    }

    /// Terminate the producer and record its exit as the terminal outcome.
    ///
    /// After a clean end-of-stream the child may finish on its own within
    /// the grace period; in every other case it is killed right away.
    async fn kill_and_wait(&mut self) {
        if self.outcome.is_some() {
            return;
        }
        let Some(mut child) = self.child.take() else {
            return;
        };

        let status = if self.saw_eof {
            match tokio::time::timeout(EOF_GRACE_PERIOD, child.wait()).await {
                Ok(res) => res,
                Err(_elapsed) => {
                    let _ = child.start_kill();
                    child.wait().await
                }
            }
        } else {
            let _ = child.start_kill();
            child.wait().await
        };

        if let Some(task) = self.stderr_task.take() {
            let _ = task.await;
        }
        // drop the pipe only after the child is gone
        self.stdout = None;

        let stderr_text = self
            .stderr
            .lock()
            .map(|c| c.text())
            .unwrap_or_default();

        let outcome = match status {
            Ok(status) if status.success() && self.saw_eof => StreamOutcome::Success,
            Ok(status) if status.success() => StreamOutcome::Failed {
                // exit 0 without end-of-stream means the stream was
                // abandoned mid-transfer
                message: format!("{} exited with status 0 before end of stream", self.context),
            },
            Ok(status) => StreamOutcome::Failed {
                message: format!(
                    "{} exited with {}, stderr:\n{}",
                    self.context, status, stderr_text
                ),
            },
            Err(e) => StreamOutcome::Failed {
                message: format!("{}: wait failed: {}", self.context, e),
            },
        };
        tracing::debug!(context = %self.context, outcome = ?outcome, "send stream terminated");
        self.outcome = Some(outcome);
    }
}

#[async_trait]
impl StreamCopier for SendStream {
    async fn write_stream_to(
        &mut self,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<(), CopierError> {
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        loop {
            let n = match self.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => return Err(CopierError::Read(e.into())),
            };
            sink.write_all(&buf[..n])
                .await
                .map_err(|e| CopierError::Write(e.into()))?;
        }
        sink.flush().await.map_err(|e| CopierError::Write(e.into()))
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(outcome) = &self.outcome {
            return Self::outcome_to_read_result(outcome);
        }

        let cancel = self.cancel.clone();
        let read = {
            let Some(stdout) = self.stdout.as_mut() else {
                return Err(io::Error::other("send stream already closed"));
            };
            tokio::select! {
                res = stdout.read(buf) => Some(res),
                _ = cancel.cancelled() => None,
            }
        };

        let Some(read) = read else {
            tracing::debug!(context = %self.context, "send stream cancelled");
            self.kill_and_wait().await;
            return match &self.outcome {
                Some(outcome) => Self::outcome_to_read_result(outcome),
                None => Err(io::Error::other("send stream cancelled")),
            };
        };

        match read {
            Ok(0) => {
                self.saw_eof = true;
                self.kill_and_wait().await;
                match &self.outcome {
                    Some(outcome) => Self::outcome_to_read_result(outcome),
                    None => Ok(0),
                }
            }
            Ok(n) => Ok(n),
            Err(e) => {
                // a read error from the pipe is permanent for a local send
                self.kill_and_wait().await;
                match &self.outcome {
                    Some(StreamOutcome::Failed { message }) => {
                        Err(io::Error::other(format!("{e}; {message}")))
                    }
                    _ => Err(e),
                }
            }
        }
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        self.kill_and_wait().await;
        match &self.outcome {
            Some(StreamOutcome::Success) => Ok(()),
            Some(StreamOutcome::Failed { message }) => Err(anyhow!("{message}")),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bytes_copier_write_stream_to() {
        let mut copier = BytesStreamCopier::new(Bytes::from_static(b"hello stream"));
        let mut sink = Vec::new();
        copier.write_stream_to(&mut sink).await.unwrap();
        assert_eq!(sink, b"hello stream");
    }

    #[tokio::test]
    async fn test_bytes_copier_read_then_eof() {
        let mut copier = BytesStreamCopier::new(Bytes::from_static(b"abcdef"));
        let mut buf = [0u8; 4];
        assert_eq!(copier.read(&mut buf).await.unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(copier.read(&mut buf).await.unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
        assert_eq!(copier.read(&mut buf).await.unwrap(), 0);
        copier.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_write_error_is_tagged_as_write() {
        struct FailingSink;
        impl AsyncWrite for FailingSink {
            fn poll_write(
                self: std::pin::Pin<&mut Self>,
                _cx: &mut std::task::Context<'_>,
                _buf: &[u8],
            ) -> std::task::Poll<io::Result<usize>> {
                std::task::Poll::Ready(Err(io::Error::other("sink broke")))
            }
            fn poll_flush(
                self: std::pin::Pin<&mut Self>,
                _cx: &mut std::task::Context<'_>,
            ) -> std::task::Poll<io::Result<()>> {
                std::task::Poll::Ready(Ok(()))
            }
            fn poll_shutdown(
                self: std::pin::Pin<&mut Self>,
                _cx: &mut std::task::Context<'_>,
            ) -> std::task::Poll<io::Result<()>> {
                std::task::Poll::Ready(Ok(()))
            }
        }

        let mut copier = BytesStreamCopier::new(Bytes::from_static(b"payload"));
        let mut sink = FailingSink;
        let err = copier.write_stream_to(&mut sink).await.unwrap_err();
        assert!(err.is_write_error());
        assert!(!err.is_read_error());
    }

    #[test]
    fn test_stderr_capture_keeps_tail() {
        let mut c = StderrCapture { buf: Vec::new(), cap: 8 };
        c.push(b"0123456789");
        assert_eq!(c.text(), "23456789");
        c.push(b"ab");
        assert_eq!(c.text(), "456789ab");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_send_stream_reads_child_output() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("printf 'stream bytes'");
        let mut stream =
            SendStream::spawn(cmd, "test send".to_string(), CancellationToken::new()).unwrap();

        let mut sink = Vec::new();
        stream.write_stream_to(&mut sink).await.unwrap();
        assert_eq!(sink, b"stream bytes");
        stream.close().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_send_stream_nonzero_exit_is_read_error() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo oops >&2; exit 3");
        let mut stream =
            SendStream::spawn(cmd, "test send".to_string(), CancellationToken::new()).unwrap();

        let mut sink = Vec::new();
        let err = stream.write_stream_to(&mut sink).await.unwrap_err();
        assert!(err.is_read_error());
        assert!(err.to_string().contains("oops"), "{err}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_send_stream_cancellation_surfaces_as_read_error() {
        let cancel = CancellationToken::new();
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("sleep 30");
        let mut stream =
            SendStream::spawn(cmd, "test send".to_string(), cancel.clone()).unwrap();

        cancel.cancel();
        let mut sink = Vec::new();
        let err = stream.write_stream_to(&mut sink).await.unwrap_err();
        assert!(err.is_read_error());
    }
}
