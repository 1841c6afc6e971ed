use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::RwLock;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::client::Client;

/// A named set of clients sharing broadcast scope, keyed by pseudonymous id
#[derive(Debug)]
pub struct Room {
    id: String,
    members: RwLock<HashMap<String, Arc<Client>>>,
}

impl Room {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            members: RwLock::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Insert `client` under its pseudonymous id.
    ///
    /// The last add wins: a different client already holding the id is
    /// displaced and returned.
    pub async fn add(&self, client: Arc<Client>) -> Option<Arc<Client>> {
        let mut members = self.members.write().await;
        members
            .insert(client.id().to_owned(), client.clone())
            .filter(|previous| !Arc::ptr_eq(previous, &client))
    }

    /// Remove `client` if it still holds its id in this room.
    ///
    /// Returns `false` when the id is absent or now belongs to a session that
    /// displaced this one.
    pub async fn remove(&self, client: &Client) -> bool {
        let mut members = self.members.write().await;
        let owned = members
            .get(client.id())
            .is_some_and(|member| std::ptr::eq(member.as_ref(), client));
        if owned {
            members.remove(client.id());
        }
        owned
    }

    /// Point-in-time copy of the current members
    pub async fn snapshot(&self) -> Vec<Arc<Client>> {
        self.members.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.members.read().await.len()
    }

    /// Deliver `frame` to every current member
    pub async fn broadcast(&self, frame: Bytes) {
        fan_out(&self.snapshot().await, &frame);
    }
}

/// Queue `frame` for each of `members`; a failed delivery never stops the rest
pub fn fan_out(members: &[Arc<Client>], frame: &Bytes) {
    for member in members {
        match member.send(frame.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!(
                peer = %member.peer(),
                player = member.id(),
                name = member.display_name(),
                "outbox full, dropping frame"
            ),
            Err(TrySendError::Closed(_)) => debug!(
                peer = %member.peer(),
                player = member.id(),
                name = member.display_name(),
                "dropping frame for closed client"
            ),
        }
    }
}

/// Registry of rooms by id.
///
/// Rooms are created on first reference and kept for the life of the process.
#[derive(Debug, Default, Clone)]
pub struct RoomManager {
    rooms: Arc<RwLock<HashMap<String, Arc<Room>>>>,
}

impl RoomManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the room for `id`, creating it if this is the first reference
    pub async fn get_or_create(&self, id: &str) -> Arc<Room> {
        if let Some(room) = self.rooms.read().await.get(id) {
            return room.clone();
        }

        let mut rooms = self.rooms.write().await;
        rooms
            .entry(id.to_owned())
            .or_insert_with(|| {
                debug!(room = id, "creating room");
                Arc::new(Room::new(id))
            })
            .clone()
    }

    /// (rooms, members across all rooms)
    pub async fn stats(&self) -> (usize, usize) {
        let rooms: Vec<Arc<Room>> = self.rooms.read().await.values().cloned().collect();
        let mut members = 0;
        for room in &rooms {
            members += room.len().await;
        }
        (rooms.len(), members)
    }
}
