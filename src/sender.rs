//! Dedicated writer task for response bodies.
//!
//! Every exchange gets one writer task that owns the transport's body sink.
//! Handlers talk to it through a cloneable [`Sender`] handle over an mpsc
//! channel, so nothing ever locks the sink.
//!
//! # Architecture
//!
//! ```text
//! adapter ─► Sender::write(bytes) ─► mpsc ─► writer task ─► AsyncWrite
//!    ▲                                            │
//!    └────────────── oneshot ack (flushed) ◄──────┘
//! ```
//!
//! # Guarantees
//!
//! - **One write in flight**: a second concurrent `write` fails with
//!   [`PipelineError::WriteInProgress`] instead of interleaving bytes.
//! - **Completion means flushed**: `write` resolves only after the bytes
//!   were written and flushed, which is the signal the chunked subscriber
//!   waits for before requesting the next item.
//! - **Nothing after close**: once `close` was called, every write fails
//!   with [`PipelineError::ResponseClosed`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::backpressure::WriteGate;
use crate::config::DEFAULT_CHANNEL_CAPACITY;
use crate::error::{PipelineError, Result};

/// Boxed transport body sink.
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Command sent to the writer task.
#[derive(Debug)]
enum Outbound {
    /// Write and flush a chunk, then acknowledge.
    Chunk {
        data: Bytes,
        done: oneshot::Sender<Result<()>>,
    },
    /// Shut the sink down, then acknowledge.
    Close { done: oneshot::Sender<Result<()>> },
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Channel capacity for the command queue.
    pub channel_capacity: usize,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Handle for writing to one response body.
///
/// Cheap to clone; all clones share the same in-flight gate and closed flag.
#[derive(Clone)]
pub struct Sender {
    tx: mpsc::Sender<Outbound>,
    gate: WriteGate,
    closed: Arc<AtomicBool>,
}

impl Sender {
    fn new(tx: mpsc::Sender<Outbound>) -> Self {
        Self {
            tx,
            gate: WriteGate::default(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Write a chunk and wait until it has been flushed.
    pub async fn write(&self, data: Bytes) -> Result<()> {
        if self.is_closed() {
            return Err(PipelineError::ResponseClosed);
        }

        // Held until the ack arrives (or this future is dropped).
        let _permit = self.gate.try_acquire()?;

        let (done, ack) = oneshot::channel();
        self.tx
            .send(Outbound::Chunk { data, done })
            .await
            .map_err(|_| PipelineError::ConnectionClosed)?;

        ack.await.map_err(|_| PipelineError::ConnectionClosed)?
    }

    /// Close the body. Idempotent: only the first call reaches the sink.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let (done, ack) = oneshot::channel();
        if self.tx.send(Outbound::Close { done }).await.is_err() {
            // Writer task already gone (earlier I/O failure).
            return Ok(());
        }
        ack.await.unwrap_or(Ok(()))
    }

    /// True once `close` was called.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// True while a write is waiting for its completion.
    #[inline]
    pub fn is_writing(&self) -> bool {
        self.gate.is_saturated()
    }
}

/// Spawn the writer task and return a handle for writing to `writer`.
///
/// The `JoinHandle` resolves when the sink was closed, the last handle was
/// dropped, or a write failed.
pub fn spawn_sender<W>(writer: W, config: SenderConfig) -> (Sender, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let task = tokio::spawn(writer_loop(rx, writer));
    (Sender::new(tx), task)
}

/// Main writer loop: one command at a time, in arrival order.
async fn writer_loop<W>(mut rx: mpsc::Receiver<Outbound>, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(command) = rx.recv().await {
        match command {
            Outbound::Chunk { data, done } => {
                match write_chunk(&mut writer, &data).await {
                    Ok(()) => {
                        let _ = done.send(Ok(()));
                    }
                    Err(e) => {
                        let kind = e.kind();
                        let _ = done.send(Err(PipelineError::Io(e)));
                        // The sink is unusable after a failed write.
                        return Err(PipelineError::Io(kind.into()));
                    }
                }
            }
            Outbound::Close { done } => {
                let result = writer.shutdown().await.map_err(PipelineError::from);
                let _ = done.send(result);
                return Ok(());
            }
        }
    }

    // Every handle dropped without an explicit close.
    Ok(())
}

async fn write_chunk<W>(writer: &mut W, data: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if data.is_empty() {
        return Ok(());
    }
    writer.write_all(data).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{duplex, AsyncReadExt};

    fn spawn<W>(writer: W) -> (Sender, JoinHandle<Result<()>>)
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        spawn_sender(writer, SenderConfig::default())
    }

    #[test]
    fn test_sender_config_default() {
        let config = SenderConfig::default();
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
    }

    #[tokio::test]
    async fn test_write_then_close() {
        let (client, mut server) = duplex(4096);
        let (sender, task) = spawn(client);

        sender.write(Bytes::from_static(b"hello ")).await.unwrap();
        sender.write(Bytes::from_static(b"world")).await.unwrap();
        sender.close().await.unwrap();

        let mut body = Vec::new();
        server.read_to_end(&mut body).await.unwrap();
        assert_eq!(body, b"hello world");
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_write_after_close_fails() {
        let (client, _server) = duplex(64);
        let (sender, _task) = spawn(client);

        sender.close().await.unwrap();
        assert!(sender.is_closed());
        assert!(matches!(
            sender.write(Bytes::from_static(b"late")).await,
            Err(PipelineError::ResponseClosed)
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (client, _server) = duplex(64);
        let (sender, _task) = spawn(client);

        sender.close().await.unwrap();
        sender.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_write_rejected() {
        // Tiny buffer and nobody reading: the first write cannot complete.
        let (client, mut server) = duplex(4);
        let (sender, _task) = spawn(client);

        let first = {
            let sender = sender.clone();
            tokio::spawn(async move { sender.write(Bytes::from_static(b"0123456789")).await })
        };

        while !sender.is_writing() {
            tokio::task::yield_now().await;
        }
        assert!(matches!(
            sender.write(Bytes::from_static(b"x")).await,
            Err(PipelineError::WriteInProgress)
        ));

        let mut buf = [0u8; 10];
        server.read_exact(&mut buf).await.unwrap();
        first.await.unwrap().unwrap();
        assert_eq!(&buf, b"0123456789");
    }

    struct BrokenPipe;

    impl AsyncWrite for BrokenPipe {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Err(std::io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_failed_write_reports_io_error() {
        let (sender, task) = spawn(BrokenPipe);

        let err = sender.write(Bytes::from_static(b"x")).await.unwrap_err();
        assert!(matches!(err, PipelineError::Io(ref e) if e.kind() == std::io::ErrorKind::BrokenPipe));
        assert!(task.await.unwrap().is_err());

        // Writer task is gone; later writes see a closed connection.
        assert!(matches!(
            sender.write(Bytes::from_static(b"y")).await,
            Err(PipelineError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_task_ends_when_handles_dropped() {
        let (client, _server) = duplex(64);
        let (sender, task) = spawn(client);
        drop(sender);
        assert!(task.await.unwrap().is_ok());
    }
}
