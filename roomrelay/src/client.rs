use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// A joined connection.
///
/// All outbound traffic goes through [`Client::send`], which queues the frame
/// for the client's single writer task, so concurrent fan-outs never
/// interleave partial lines on the socket. The queue is bounded; a client
/// that stops reading loses frames instead of growing it.
#[derive(Debug)]
pub struct Client {
    peer: SocketAddr,
    /// Pseudonymous id, the membership key within the room
    id: String,
    /// Recovered plaintext name, for logs only
    display_name: String,
    room_id: String,
    joined_at: Instant,
    /// Millis since `joined_at` of the last line received
    last_active: AtomicU64,
    active: AtomicBool,
    outbox: mpsc::Sender<Bytes>,
    shutdown: watch::Sender<bool>,
}

/// Receiving side of a client's outbound queue, consumed by its writer task
#[derive(Debug)]
pub struct Outbox {
    pub frames: mpsc::Receiver<Bytes>,
    shutdown: watch::Receiver<bool>,
}

impl Client {
    pub fn new(
        peer: SocketAddr,
        id: String,
        room_id: String,
        display_name: String,
        capacity: usize,
    ) -> (Arc<Self>, Outbox) {
        let (tx, rx) = mpsc::channel(capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let client = Arc::new(Self {
            peer,
            id,
            display_name,
            room_id,
            joined_at: Instant::now(),
            last_active: AtomicU64::new(0),
            active: AtomicBool::new(true),
            outbox: tx,
            shutdown: shutdown_tx,
        });
        let outbox = Outbox {
            frames: rx,
            shutdown: shutdown_rx,
        };

        (client, outbox)
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Queue a frame for delivery without waiting for room in the queue
    pub fn send(&self, frame: Bytes) -> Result<(), mpsc::error::TrySendError<Bytes>> {
        self.outbox.try_send(frame)
    }

    /// Record inbound activity
    pub fn touch(&self) {
        let millis = self.joined_at.elapsed().as_millis() as u64;
        self.last_active.store(millis, Ordering::Release);
    }

    /// Time since the last line was received (or since join)
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_active.load(Ordering::Acquire));
        self.joined_at.elapsed().saturating_sub(last)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Move to the terminal state and close the connection.
    ///
    /// Returns `true` only for the first caller; that caller owns the leave
    /// sequence.
    pub fn disconnect(&self) -> bool {
        let first = self.active.swap(false, Ordering::AcqRel);
        self.shutdown.send_replace(true);
        first
    }

    /// Resolves once the client has been disconnected
    pub async fn closed(&self) {
        let mut shutdown = self.shutdown.subscribe();
        // The sender lives as long as `self`, so this cannot fail
        let _ = shutdown.wait_for(|closed| *closed).await;
    }
}

/// Spawn the task that owns the write half of a client's connection.
///
/// Frames are written and flushed one at a time in queue order. The task ends,
/// shutting the write half down, when the client disconnects or a write fails.
pub fn spawn_writer<W>(writer: W, mut outbox: Outbox, peer: SocketAddr) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut writer = BufWriter::new(writer);

        loop {
            tokio::select! {
                frame = outbox.frames.recv() => {
                    let Some(frame) = frame else { break };
                    if let Err(e) = write_frame(&mut writer, &frame).await {
                        warn!(%peer, "failed to write to client: {}", e);
                        break;
                    }
                }
                _ = shutdown_requested(&mut outbox.shutdown) => break,
            }
        }

        if let Err(e) = writer.shutdown().await {
            debug!(%peer, "failed to shut down connection: {}", e);
        }
    })
}

// Resolves to `()` so no watch guard is held across the writer's awaits.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|closed| *closed).await;
}

async fn write_frame<W>(writer: &mut BufWriter<W>, frame: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await
}

#[cfg(test)]
pub(crate) fn test_client(id: &str, room_id: &str) -> (Arc<Client>, Outbox) {
    test_client_with_capacity(id, room_id, crate::config::OUTBOX_CAPACITY)
}

#[cfg(test)]
pub(crate) fn test_client_with_capacity(
    id: &str,
    room_id: &str,
    capacity: usize,
) -> (Arc<Client>, Outbox) {
    Client::new(
        "127.0.0.1:4000".parse().expect("valid socket address"),
        id.to_owned(),
        room_id.to_owned(),
        String::new(),
        capacity,
    )
}
