//! JOIN/LEAVE membership announcements.

use std::sync::Arc;

use tracing::{error, info};

use crate::client::Client;
use crate::protocol::ServerMessage;
use crate::room::{fan_out, Room};

/// Announce `client` to the room, the joiner included.
///
/// The client must already have been added so it appears in `party`.
pub async fn announce_join(room: &Room, client: &Client) {
    let members = room.snapshot().await;
    let message = ServerMessage::Join {
        player: client.id().to_owned(),
        party: party(&members),
    };

    info!(room = room.id(), player = client.id(), "notifying client join to all parties");
    send(&members, &message);
}

/// Remove `client` from the room and announce its departure to the members left.
///
/// Returns `false` without announcing anything when the client no longer
/// holds its slot, e.g. after being displaced by a newer session with the
/// same id.
pub async fn announce_leave(room: &Room, client: &Client) -> bool {
    if !room.remove(client).await {
        return false;
    }

    let members = room.snapshot().await;
    let message = ServerMessage::Leave {
        player: client.id().to_owned(),
        party: party(&members),
    };

    info!(
        room = room.id(),
        player = client.id(),
        name = client.display_name(),
        remaining = members.len(),
        "player left room"
    );
    send(&members, &message);
    true
}

fn party(members: &[Arc<Client>]) -> Vec<String> {
    members.iter().map(|m| m.id().to_owned()).collect()
}

fn send(members: &[Arc<Client>], message: &ServerMessage) {
    match message.to_frame() {
        Ok(frame) => fan_out(members, &frame),
        Err(e) => error!("failed to serialize presence packet: {}", e),
    }
}
