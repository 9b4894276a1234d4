//! Server network layer: owns the UDP socket and drives [`GameServer`].

use crate::config::ServerConfig;
use crate::game::GameServer;
use log::{debug, error, info, warn};
use shared::enums::DisconnectReason;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{interval, Instant, MissedTickBehavior};

/// Largest datagram read from the socket
const RECV_BUFFER: usize = 65_535;
/// Tick used for transport timers when rooms don't tick
const IDLE_TICK: Duration = Duration::from_millis(50);

/// Messages sent from network tasks to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    DatagramReceived { bytes: Vec<u8>, addr: SocketAddr },
    Shutdown,
}

/// Main server coordinating the socket and the lobby state
pub struct Server {
    socket: Arc<UdpSocket>,
    game: GameServer,
    tick_duration: Duration,

    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Server {
    pub async fn new(config: ServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let addr = config.bind_addr();
        let socket = Arc::new(UdpSocket::bind(&addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let tick_duration = config.room.tick_interval().unwrap_or(IDLE_TICK);
        let (server_tx, server_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            game: GameServer::new(config),
            tick_duration,
            server_tx,
            server_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Sender that can stop [`run`](Self::run) from another task
    pub fn handle(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    pub fn game(&self) -> &GameServer {
        &self.game
    }

    /// Spawns task that continuously listens for incoming datagrams
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = vec![0u8; RECV_BUFFER];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        let bytes = buffer[..len].to_vec();
                        if server_tx
                            .send(ServerMessage::DatagramReceived { bytes, addr })
                            .is_err()
                        {
                            debug!("server loop gone, receiver stopping");
                            break;
                        }
                    }
                    Err(e) => {
                        // Windows reports ICMP port-unreachable as a recv error
                        warn!("Error receiving datagram: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    async fn flush(&mut self) {
        for (addr, bytes) in self.game.drain_outgoing() {
            if let Err(e) = self.socket.send_to(&bytes, addr).await {
                error!("Failed to send datagram to {}: {}", addr, e);
            }
        }
    }

    /// Main server loop: datagrams as they arrive, room updates every tick
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_network_receiver();

        let mut tick_interval = interval(self.tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_tick = Instant::now();
        let mut ticks: u64 = 0;

        info!("Server started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::DatagramReceived { bytes, addr }) => {
                            self.game.handle_datagram(addr, &bytes, Instant::now().into_std());
                        }
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            self.game.shutdown(DisconnectReason::ServerRequest);
                            self.flush().await;
                            break;
                        }
                    }
                },

                _ = tick_interval.tick() => {
                    let now = Instant::now();
                    let dt = now.duration_since(last_tick).as_secs_f32();
                    last_tick = now;
                    self.game.tick(dt, now.into_std());

                    ticks += 1;
                    if ticks % 600 == 0 {
                        debug!(
                            "Tick {}: {} clients, {} rooms",
                            ticks,
                            self.game.clients().len(),
                            self.game.lobby_count()
                        );
                    }
                },
            }
            self.flush().await;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::packet::{Direction, HelloBody, Packet};
    use shared::transport::{Connection, ConnectionState, TransportConfig};

    fn test_config() -> ServerConfig {
        ServerConfig {
            port: 0,
            ..ServerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_server_binds_ephemeral_port() {
        let server = Server::new(test_config()).await.unwrap();
        let addr = tokio_test::assert_ok!(server.local_addr());
        assert_ne!(addr.port(), 0);
        assert_eq!(server.game().lobby_count(), 0);
    }

    #[tokio::test]
    async fn test_hello_over_udp_and_shutdown() {
        let mut server = Server::new(test_config()).await.unwrap();
        let addr = server.local_addr().unwrap();
        let handle = server.handle();
        let task = tokio::spawn(async move { server.run().await.map_err(|e| e.to_string()) });

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let now = std::time::Instant::now();
        let mut conn = Connection::new(Direction::Clientbound, TransportConfig::default(), now);
        conn.send_hello(HelloBody::new("udp"), now).unwrap();
        for bytes in conn.drain_outgoing() {
            socket.send_to(&bytes, addr).await.unwrap();
        }

        let mut buffer = [0u8; 2048];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buffer))
            .await
            .unwrap()
            .unwrap();
        let packet = Packet::parse(&buffer[..len], Direction::Clientbound, &Default::default()).unwrap();
        assert!(matches!(packet, Packet::Acknowledge { nonce: 1, .. }));
        conn.receive(&buffer[..len], std::time::Instant::now()).unwrap();
        assert_eq!(conn.state(), ConnectionState::Connected);

        handle.send(ServerMessage::Shutdown).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
