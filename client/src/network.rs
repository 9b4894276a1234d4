//! Client network layer: owns the UDP socket and drives a [`ClientSession`]
//! as a headless bot.

use crate::capture::CaptureWriter;
use crate::game::{ClientSession, SessionEvent};
use crate::matchmaker::Matchmaker;
use log::{debug, error, info, warn};
use shared::code::display_code;
use shared::enums::SpawnType;
use shared::packet::Direction;
use shared::room::{Intent, RoomConfig, RoomEvent};
use shared::settings::GameSettings;
use shared::transport::TransportConfig;
use std::fs::File;
use std::io::BufWriter;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{interval, Instant, MissedTickBehavior};

const RECV_BUFFER: usize = 65_535;
const IDLE_TICK: Duration = Duration::from_millis(50);
/// Ping interval while connected
pub const KEEPALIVE_MS: u64 = 1500;

/// What the bot sets out to do once connected
#[derive(Debug, Clone, PartialEq)]
pub enum Goal {
    /// Host a room and join it
    Host(GameSettings),
    Join(i32),
    /// Print the public game list and leave
    List,
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub name: String,
    pub goal: Goal,
    /// As host, start the round once this many players are in the room
    pub start_at: Option<usize>,
    pub capture: Option<PathBuf>,
    pub transport: TransportConfig,
    pub room: RoomConfig,
}

impl ClientOptions {
    pub fn new(name: impl Into<String>, goal: Goal) -> Self {
        Self {
            name: name.into(),
            goal,
            start_at: None,
            capture: None,
            transport: TransportConfig {
                keepalive_ms: Some(KEEPALIVE_MS),
                ..TransportConfig::default()
            },
            room: RoomConfig::default(),
        }
    }
}

enum Flow {
    Continue,
    Stop,
}

pub struct Client {
    socket: UdpSocket,
    server_addr: SocketAddr,
    session: ClientSession,
    options: ClientOptions,
    capture: Option<CaptureWriter<BufWriter<File>>>,
}

impl Client {
    pub async fn new(
        matchmaker: &dyn Matchmaker,
        options: ClientOptions,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let server_addr = matchmaker.find_server()?;
        let bind = if server_addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind).await?;
        let capture = match &options.capture {
            Some(path) => Some(CaptureWriter::create(path)?),
            None => None,
        };
        let session = Self::new_session(&options);

        Ok(Client {
            socket,
            server_addr,
            session,
            options,
            capture,
        })
    }

    fn new_session(options: &ClientOptions) -> ClientSession {
        ClientSession::new(
            options.name.clone(),
            options.transport.clone(),
            options.room.clone(),
            Instant::now().into_std(),
        )
    }

    pub fn session(&self) -> &ClientSession {
        &self.session
    }

    async fn flush(&mut self) {
        for bytes in self.session.drain_outgoing() {
            self.record(Direction::Serverbound, &bytes);
            if let Err(e) = self.socket.send_to(&bytes, self.server_addr).await {
                error!("Failed to send datagram: {}", e);
            }
        }
    }

    fn record(&mut self, direction: Direction, bytes: &[u8]) {
        let Some(capture) = self.capture.as_mut() else {
            return;
        };
        if let Err(e) = capture.record(direction, bytes, Instant::now().into_std()) {
            warn!("Capture stopped: {}", e);
            self.capture = None;
        }
    }

    fn handle_event(&mut self, event: SessionEvent) -> Flow {
        let now = Instant::now().into_std();
        let result = match event {
            SessionEvent::Connected => match self.options.goal.clone() {
                Goal::Host(settings) => self.session.host_game(settings, now),
                Goal::Join(code) => self.session.join_game(code, now),
                Goal::List => self.session.list_games(
                    GameSettings {
                        impostors: 0,
                        ..GameSettings::default()
                    },
                    now,
                ),
            },
            SessionEvent::Hosted { code } => {
                info!("Room code: {}", display_code(code));
                self.session.join_game(code, now)
            }
            SessionEvent::GameList(games) => {
                info!("{} public games", games.len());
                for game in games {
                    info!(
                        "  {} hosted by {:?}: {}/{} players, {:?}",
                        display_code(game.code),
                        game.host_name,
                        game.player_count,
                        game.max_players,
                        game.map
                    );
                }
                return Flow::Stop;
            }
            SessionEvent::JoinFailed(reason) => {
                error!("Could not join: {}", reason);
                return Flow::Stop;
            }
            SessionEvent::Kicked { .. } | SessionEvent::Disconnected(_) => return Flow::Stop,
            SessionEvent::Redirected(target) => {
                info!("Reconnecting to {}", target);
                self.server_addr = SocketAddr::V4(target);
                self.session = Self::new_session(&self.options);
                self.session.connect(now)
            }
            SessionEvent::GameEnded(_) => match self.session.room().map(|r| r.code()) {
                Some(code) => self.session.join_game(code, now),
                None => Ok(()),
            },
            SessionEvent::Room(event) => {
                self.handle_room_event(event);
                Ok(())
            }
            other => {
                debug!("{:?}", other);
                Ok(())
            }
        };
        if let Err(e) = result {
            error!("Send failed: {}", e);
            return Flow::Stop;
        }
        Flow::Continue
    }

    fn handle_room_event(&mut self, event: RoomEvent) {
        let local = self.session.client_id();
        let outcome = match &event {
            RoomEvent::Spawned {
                spawn_type: SpawnType::Player,
                owner_id,
                ..
            } if Some(*owner_id) == local => {
                info!("Character spawned, picking name and color");
                self.session
                    .request(Intent::SetName(self.options.name.clone()))
                    .and_then(|_| self.session.request(Intent::SetColor(0)))
            }
            RoomEvent::PlayerJoined { .. } => {
                let start = match (self.options.start_at, self.session.room()) {
                    (Some(wanted), Some(room)) => room.is_host() && room.players().count() >= wanted,
                    _ => false,
                };
                if start {
                    info!("Starting the round");
                    self.session.request(Intent::StartGame)
                } else {
                    Ok(())
                }
            }
            RoomEvent::GameEnded(reason) => {
                info!("Round over: {:?}", reason);
                Ok(())
            }
            other => {
                debug!("{:?}", other);
                Ok(())
            }
        };
        if let Err(e) = outcome {
            warn!("Room rejected request: {}", e);
        }
    }

    /// Runs until the session ends or Ctrl+C
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        info!("Connecting to {}", self.server_addr);
        self.session.connect(Instant::now().into_std())?;
        self.flush().await;

        let tick_duration = self.options.room.tick_interval().unwrap_or(IDLE_TICK);
        let mut tick_interval = interval(tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_tick = Instant::now();
        let mut buffer = vec![0u8; RECV_BUFFER];

        'outer: loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, addr)) if addr == self.server_addr => {
                            let bytes = buffer[..len].to_vec();
                            self.record(Direction::Clientbound, &bytes);
                            if let Err(e) = self.session.receive(&bytes, Instant::now().into_std()) {
                                warn!("Dropped datagram: {}", e);
                            }
                        }
                        Ok((_, addr)) => debug!("Ignoring datagram from {}", addr),
                        Err(e) => error!("Error receiving datagram: {}", e),
                    }
                },

                _ = tick_interval.tick() => {
                    let now = Instant::now();
                    let dt = now.duration_since(last_tick).as_secs_f32();
                    last_tick = now;
                    if let Err(e) = self.session.tick(dt, now.into_std()) {
                        error!("Connection lost: {}", e);
                    }
                },

                _ = tokio::signal::ctrl_c() => {
                    info!("Received Ctrl+C, leaving...");
                    self.session.disconnect()?;
                    self.flush().await;
                    break 'outer;
                },
            }

            while let Some(event) = self.session.poll_event() {
                if let Flow::Stop = self.handle_event(event) {
                    self.flush().await;
                    break 'outer;
                }
            }
            self.flush().await;
        }

        if let Some(capture) = self.capture.as_mut() {
            capture.flush()?;
            info!("Captured {} datagrams", capture.records());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matchmaker::StaticMatchmaker;
    use shared::enums::DisconnectReason;
    use shared::packet::{DisconnectBody, Packet};

    #[tokio::test]
    async fn test_bot_stops_when_refused() {
        let fake_server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = fake_server.local_addr().unwrap();
        let matchmaker = StaticMatchmaker::new(addr.to_string());
        let mut client = Client::new(&matchmaker, ClientOptions::new("bot", Goal::List))
            .await
            .unwrap();
        let task = tokio::spawn(async move {
            let result = client.run().await.map_err(|e| e.to_string());
            (result, client.session().state())
        });

        let mut buffer = [0u8; 2048];
        let (len, from) = fake_server.recv_from(&mut buffer).await.unwrap();
        let hello = Packet::parse(&buffer[..len], Direction::Serverbound, &Default::default()).unwrap();
        assert!(matches!(hello, Packet::Hello { nonce: 1, .. }));

        let refusal = Packet::Disconnect(Some(DisconnectBody::with_reason(DisconnectReason::ServerFull)))
            .compose()
            .unwrap();
        fake_server.send_to(&refusal, from).await.unwrap();

        let (result, state) = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(state, shared::transport::ConnectionState::Disconnected);
    }
}
