use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::info;

use crate::client::Client;
use crate::room::Room;
use crate::session;

/// Periodically check `client` for inactivity and force it out once it has
/// been idle for longer than `stale_after`.
///
/// Ends on the first stale check, or as soon as the client is disconnected
/// by any other path.
pub async fn monitor(client: Arc<Client>, room: Arc<Room>, every: Duration, stale_after: Duration) {
    let mut ticker = interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = client.closed() => return,
        }
        if !client.is_active() {
            return;
        }

        let idle = client.idle_for();
        if idle > stale_after {
            info!(
                peer = %client.peer(),
                player = client.id(),
                name = client.display_name(),
                "socket client timed out after {:?}",
                idle
            );
            session::leave(&room, &client).await;
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_client;
    use crate::protocol::ServerMessage;

    const EVERY: Duration = Duration::from_secs(10);
    const STALE_AFTER: Duration = Duration::from_secs(45);

    #[tokio::test(start_paused = true)]
    async fn stale_client_is_removed_and_closed_once() {
        let room = Arc::new(Room::new("r1"));
        let (a, _a_out) = test_client("Na", "r1");
        let (b, mut b_out) = test_client("Nb", "r1");
        room.add(a.clone()).await;
        room.add(b.clone()).await;

        let started = Instant::now();
        monitor(a.clone(), room.clone(), EVERY, STALE_AFTER).await;

        // First tick past the threshold
        assert_eq!(started.elapsed(), Duration::from_secs(50));
        assert!(!a.is_active());
        assert!(!a.disconnect());

        let leave: ServerMessage =
            serde_json::from_slice(&b_out.frames.try_recv().unwrap()).unwrap();
        assert_eq!(
            leave,
            ServerMessage::Leave {
                player: "Na".into(),
                party: vec!["Nb".into()],
            }
        );
        assert!(b_out.frames.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn active_client_is_left_alone() {
        let room = Arc::new(Room::new("r1"));
        let (a, _a_out) = test_client("Na", "r1");
        room.add(a.clone()).await;

        let task = tokio::spawn(monitor(a.clone(), room.clone(), EVERY, STALE_AFTER));
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_secs(20)).await;
            a.touch();
        }

        assert!(a.is_active());
        assert!(!task.is_finished());
        assert_eq!(room.len().await, 1);
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn exits_when_client_disconnects_elsewhere() {
        let room = Arc::new(Room::new("r1"));
        let (a, _a_out) = test_client("Na", "r1");
        room.add(a.clone()).await;

        let task = tokio::spawn(monitor(a.clone(), room.clone(), EVERY, STALE_AFTER));
        session::leave(&room, &a).await;

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
