//! Per-connection outbound queue
//!
//! Writes toward a peer go through a bounded queue drained by a task of their
//! own, so the event loop never waits on a socket. A peer that stops reading
//! fills its queue and is then dropped by the owner.

use bytes::Bytes;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

/// Default number of pending writes per connection
pub const DEFAULT_OUTBOUND_QUEUE: usize = 64;

/// Outbound queue errors
#[derive(Error, Debug)]
pub enum OutboxError {
    /// The peer is not draining its writes
    #[error("Outbound queue full ({0} writes pending)")]
    Full(usize),

    /// The writer gave up on the connection
    #[error("Connection writer stopped")]
    Closed,

    /// Data could not be encoded
    #[error("Encoding error: {0}")]
    Encode(#[from] std::io::Error),
}

/// Sending side of a connection writer
#[derive(Debug)]
pub struct Outbox {
    tx: mpsc::Sender<Bytes>,
    capacity: usize,
    task: JoinHandle<()>,
}

impl Outbox {
    /// Spawn a writer draining up to `capacity` queued chunks into `writer`
    pub fn spawn<W>(writer: W, capacity: usize) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let task = tokio::spawn(drain(writer, rx));

        Self { tx, capacity, task }
    }

    /// Queue a chunk without waiting
    pub fn push(&self, data: Bytes) -> Result<(), OutboxError> {
        self.tx.try_send(data).map_err(|e| match e {
            TrySendError::Full(_) => OutboxError::Full(self.capacity),
            TrySendError::Closed(_) => OutboxError::Closed,
        })
    }

    /// Writes waiting in the queue
    pub fn pending(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    /// Drop queued data and release the write half
    pub fn close(self) {
        self.task.abort();
    }
}

async fn drain<W>(mut writer: W, mut rx: mpsc::Receiver<Bytes>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(chunk) = rx.recv().await {
        let written = match writer.write_all(&chunk).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            tracing::debug!(error = %e, "Outbound write failed");
            return;
        }
    }

    let _ = writer.shutdown().await;
}
