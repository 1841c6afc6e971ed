use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncBufRead;
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::presence;
use crate::protocol::{is_heartbeat, packet_header, parse_packet, read_frame, HEADER_BROADCAST};
use crate::room::Room;

/// Read and dispatch lines from an active client until its connection fails.
///
/// Every read is bounded by `read_timeout`, and a line longer than
/// `max_line` bytes fails the read; either counts as a disconnect.
/// Returns early, without running the leave sequence, if the client was
/// disconnected elsewhere.
pub async fn run<R>(
    mut reader: R,
    client: &Client,
    room: &Room,
    read_timeout: Duration,
    max_line: usize,
) where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();

    loop {
        let read = tokio::select! {
            read = tokio::time::timeout(read_timeout, read_frame(&mut reader, &mut line, max_line)) => read,
            _ = client.closed() => {
                debug!(peer = %client.peer(), player = client.id(), "session closed by server");
                return;
            }
        };

        match read {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                info!(player = client.id(), name = client.display_name(), "client disconnected: {}", e);
                break;
            }
            Err(_) => {
                info!(
                    player = client.id(),
                    name = client.display_name(),
                    "client disconnected: no data for {:?}",
                    read_timeout
                );
                break;
            }
        }

        client.touch();

        if is_heartbeat(&line) {
            continue;
        }

        let packet = match parse_packet(&line) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(player = client.id(), "failed to parse client packet: {}", e);
                continue;
            }
        };

        match packet_header(&packet) {
            Some(HEADER_BROADCAST) => room.broadcast(Bytes::copy_from_slice(&line)).await,
            Some(header) => info!(player = client.id(), header, "unknown packet header"),
            None => warn!(player = client.id(), "missing packet header"),
        }
    }

    leave(room, client).await;
}

/// The leave sequence shared by every disconnect path.
///
/// Only the first call for a client announces the departure; the connection
/// is closed either way.
pub async fn leave(room: &Room, client: &Client) {
    if !client.disconnect() {
        return;
    }
    presence::announce_leave(room, client).await;
}
