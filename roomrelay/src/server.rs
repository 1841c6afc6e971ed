use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::cipher::Cipher;
use crate::client::{spawn_writer, Client};
use crate::config::RelayConfig;
use crate::connection_limiter::ConnectionLimiter;
use crate::liveness;
use crate::presence;
use crate::protocol::{read_frame, HandshakeError, JoinRequest};
use crate::room::RoomManager;
use crate::session;

/// Accepts connections and drives each one through join, session and leave
#[derive(Clone)]
pub struct RelayServer {
    rooms: RoomManager,
    limiter: ConnectionLimiter,
    cipher: Arc<dyn Cipher>,
    config: Arc<RelayConfig>,
}

impl RelayServer {
    pub fn new(config: RelayConfig, cipher: Arc<dyn Cipher>) -> Self {
        Self {
            rooms: RoomManager::new(),
            limiter: ConnectionLimiter::new(config.max_connections, config.max_per_ip),
            cipher,
            config: Arc::new(config),
        }
    }

    #[cfg(test)]
    pub fn rooms(&self) -> &RoomManager {
        &self.rooms
    }

    /// Serve connections from `listener` forever
    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        loop {
            let (stream, addr) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!("failed to accept connection: {}", e);
                    continue;
                }
            };

            if let Err(e) = self.limiter.try_connect(addr.ip()).await {
                warn!(peer = %addr, "connection rejected: {}", e);
                drop(stream);
                continue;
            }

            let server = self.clone();
            tokio::spawn(async move {
                server.handle_connection(stream, addr).await;
                server.limiter.disconnect(addr.ip()).await;

                let (rooms, members) = server.rooms.stats().await;
                let (connections, addresses) = server.limiter.stats().await;
                debug!(peer = %addr, rooms, members, connections, addresses, "connection closed");
            });
        }
    }

    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let (read_half, write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let join = match self.handshake(&mut reader).await {
            Ok(join) => join,
            Err(e) => {
                error!(peer = %addr, "{}", e);
                return;
            }
        };
        info!(peer = %addr, room = %join.room, player = %join.name, "JOIN packet received");

        let room = self.rooms.get_or_create(&join.room).await;
        let display_name = self.recover_name(&join);
        let (client, outbox) = Client::new(
            addr,
            join.name,
            join.room,
            display_name,
            self.config.outbox_capacity,
        );
        let writer = spawn_writer(write_half, outbox, addr);

        info!(
            peer = %addr,
            room = client.room_id(),
            player = client.id(),
            name = client.display_name(),
            "player joined room"
        );
        if let Some(displaced) = room.add(client.clone()).await {
            warn!(
                room = room.id(),
                player = client.id(),
                displaced_peer = %displaced.peer(),
                "player id already in room, replacing previous session"
            );
        }
        presence::announce_join(&room, &client).await;

        let monitor = tokio::spawn(liveness::monitor(
            client.clone(),
            room.clone(),
            self.config.liveness_interval,
            self.config.stale_after,
        ));
        session::run(
            reader,
            &client,
            &room,
            self.config.read_timeout,
            self.config.max_line_bytes,
        )
        .await;

        // The session only returns once the client is disconnected, which
        // ends both the monitor and the writer.
        let _ = monitor.await;
        let _ = writer.await;
    }

    async fn handshake<R>(&self, reader: &mut R) -> Result<JoinRequest, HandshakeError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut line = Vec::new();
        let read = read_frame(reader, &mut line, self.config.max_line_bytes);
        tokio::time::timeout(self.config.read_timeout, read)
            .await
            .map_err(|_| HandshakeError::TimedOut)??;
        JoinRequest::parse(&line)
    }

    fn recover_name(&self, join: &JoinRequest) -> String {
        self.cipher
            .decrypt(&join.room, &join.name)
            .unwrap_or_else(|e| {
                warn!(room = %join.room, player = %join.name, "failed to decrypt player name: {}", e);
                String::new()
            })
    }
}
