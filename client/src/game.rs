//! Client-side session state.
//!
//! [`ClientSession`] ties one [`Connection`] to the [`Room`] the client is
//! in. Like the server's lobby core it never touches a socket: the network
//! layer feeds it datagrams and drains what it wants sent, and the replay
//! tool feeds it captured datagrams with no socket at all.

use std::collections::VecDeque;
use std::net::SocketAddrV4;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};
use shared::code::display_code;
use shared::data::{BuiltinData, MapData};
use shared::enums::{DisconnectReason, GameOverReason};
use shared::packet::{Direction, HelloBody};
use shared::payload::{GameListing, RootMessage};
use shared::room::{Intent, Room, RoomConfig, RoomEvent, ONLINE_SCENE};
use shared::settings::GameSettings;
use shared::transport::{Connection, ConnectionState, Inbound, TransportConfig, TransportError};
use tokio::sync::oneshot;

/// How a [`PayloadWaiter`] finished.
#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome {
    Matched(RootMessage),
    /// The connection closed first.
    Aborted,
}

/// Resolves with the first inbound payload matching a predicate.
#[derive(Debug)]
pub struct PayloadWaiter {
    rx: oneshot::Receiver<WaitOutcome>,
}

impl PayloadWaiter {
    pub async fn wait(self) -> WaitOutcome {
        self.rx.await.unwrap_or(WaitOutcome::Aborted)
    }

    /// Non-blocking check; `None` while still pending.
    pub fn try_outcome(&mut self) -> Option<WaitOutcome> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(WaitOutcome::Aborted),
        }
    }
}

type Predicate = Box<dyn Fn(&RootMessage) -> bool + Send>;

struct PendingWait {
    predicate: Predicate,
    tx: oneshot::Sender<WaitOutcome>,
}

/// Things the session reports to whoever drives it.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected,
    Hosted { code: i32 },
    Joined { code: i32, client_id: i32, host_id: i32 },
    JoinFailed(DisconnectReason),
    WaitingForHost { code: i32 },
    Kicked { banned: bool },
    PrivacyChanged { public: bool },
    GameList(Vec<GameListing>),
    GameEnded(GameOverReason),
    Redirected(SocketAddrV4),
    Disconnected(Option<DisconnectReason>),
    Room(RoomEvent),
}

pub struct ClientSession {
    name: String,
    conn: Connection,
    room_config: RoomConfig,
    data: Arc<dyn MapData>,
    client_id: Option<i32>,
    room: Option<Room>,
    /// Settings sent with HostGame, applied once the hosted room is joined.
    hosted_settings: Option<GameSettings>,
    /// `false` when replaying a capture: nothing is ever sent.
    live: bool,
    waiters: Vec<PendingWait>,
    events: VecDeque<SessionEvent>,
}

impl ClientSession {
    pub fn new(
        name: impl Into<String>,
        transport: TransportConfig,
        room_config: RoomConfig,
        now: Instant,
    ) -> Self {
        Self {
            name: name.into(),
            conn: Connection::new(Direction::Clientbound, transport, now),
            room_config,
            data: Arc::new(BuiltinData),
            client_id: None,
            room: None,
            hosted_settings: None,
            live: true,
            waiters: Vec::new(),
            events: VecDeque::new(),
        }
    }

    /// A session that only consumes captured traffic. The room never ticks.
    pub fn offline(name: impl Into<String>, now: Instant) -> Self {
        let room_config = RoomConfig {
            tick_rate: None,
            ..RoomConfig::default()
        };
        let mut session = Self::new(name, TransportConfig::default(), room_config, now);
        session.live = false;
        // Puts the connection past the handshake so captured payloads are accepted
        if let Err(e) = session.conn.send_hello(HelloBody::new(session.name.clone()), now) {
            warn!("offline session could not start: {}", e);
        }
        session.conn.drain_outgoing();
        session
    }

    pub fn with_data(mut self, data: Arc<dyn MapData>) -> Self {
        self.data = data;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ConnectionState {
        self.conn.state()
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn client_id(&self) -> Option<i32> {
        self.client_id
    }

    pub fn room(&self) -> Option<&Room> {
        self.room.as_ref()
    }

    pub fn room_mut(&mut self) -> Option<&mut Room> {
        self.room.as_mut()
    }

    pub fn connect(&mut self, now: Instant) -> Result<(), TransportError> {
        info!("connecting as {:?}", self.name);
        self.conn.send_hello(HelloBody::new(self.name.clone()), now)?;
        Ok(())
    }

    pub fn host_game(&mut self, settings: GameSettings, now: Instant) -> Result<(), TransportError> {
        self.hosted_settings = Some(settings.clone());
        self.send(RootMessage::HostGameRequest { settings }, now)
    }

    pub fn join_game(&mut self, code: i32, now: Instant) -> Result<(), TransportError> {
        info!("joining {}", display_code(code));
        self.send(
            RootMessage::JoinGameRequest {
                code,
                map_ownership: None,
            },
            now,
        )
    }

    pub fn list_games(&mut self, filter: GameSettings, now: Instant) -> Result<(), TransportError> {
        self.send(
            RootMessage::GetGameListRequest {
                reserved: 0,
                settings: filter,
                chat_mode: None,
            },
            now,
        )
    }

    /// Forwards an intent to the room; errors when not in one.
    pub fn request(&mut self, intent: Intent) -> Result<(), shared::room::RoomError> {
        match self.room.as_mut() {
            Some(room) => room.request(intent),
            None => Err(shared::room::RoomError::MissingObject("room")),
        }
    }

    pub fn disconnect(&mut self) -> Result<(), TransportError> {
        self.conn.disconnect(DisconnectReason::ExitGame)?;
        self.abort_waiters();
        Ok(())
    }

    /// Registers a one-shot wait for the next payload `predicate` accepts.
    pub fn wait_for<F>(&mut self, predicate: F) -> PayloadWaiter
    where
        F: Fn(&RootMessage) -> bool + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        if self.conn.is_open() {
            self.waiters.push(PendingWait {
                predicate: Box::new(predicate),
                tx,
            });
        } else {
            let _ = tx.send(WaitOutcome::Aborted);
        }
        PayloadWaiter { rx }
    }

    fn send(&mut self, payload: RootMessage, now: Instant) -> Result<(), TransportError> {
        if !self.live {
            return Ok(());
        }
        self.conn.send_reliable(vec![payload], now)?;
        Ok(())
    }

    /// Handles one datagram from the server.
    pub fn receive(&mut self, bytes: &[u8], now: Instant) -> Result<(), TransportError> {
        let was_connected = self.conn.state() == ConnectionState::Connected;
        let inbound = self.conn.receive(bytes, now)?;
        if !was_connected && self.conn.state() == ConnectionState::Connected {
            info!("connected");
            self.events.push_back(SessionEvent::Connected);
        }
        match inbound {
            Some(Inbound::Payloads(payloads)) => self.apply_payloads(&payloads),
            Some(Inbound::Disconnected(reason)) => {
                warn!(
                    "server closed the connection: {}",
                    reason.map_or_else(|| "no reason".to_string(), |r| r.to_string())
                );
                self.abort_waiters();
                self.events.push_back(SessionEvent::Disconnected(reason));
            }
            Some(Inbound::Hello(_)) => debug!("ignoring hello from server"),
            None => {}
        }
        Ok(())
    }

    /// Applies root payloads in order, as if they had just arrived.
    pub fn apply_payloads(&mut self, payloads: &[RootMessage]) {
        for payload in payloads {
            self.resolve_waiters(payload);
            self.apply_payload(payload);
        }
        self.collect_room_events();
    }

    fn resolve_waiters(&mut self, payload: &RootMessage) {
        let mut kept = Vec::with_capacity(self.waiters.len());
        let mut matched = false;
        for wait in self.waiters.drain(..) {
            if !matched && (wait.predicate)(payload) {
                matched = true;
                let _ = wait.tx.send(WaitOutcome::Matched(payload.clone()));
            } else {
                kept.push(wait);
            }
        }
        self.waiters = kept;
    }

    fn abort_waiters(&mut self) {
        for wait in self.waiters.drain(..) {
            let _ = wait.tx.send(WaitOutcome::Aborted);
        }
    }

    fn apply_payload(&mut self, payload: &RootMessage) {
        match payload {
            RootMessage::HostGameResponse { code } => {
                info!("hosting {}", display_code(*code));
                self.events.push_back(SessionEvent::Hosted { code: *code });
            }
            RootMessage::JoinedGame {
                code,
                client_id,
                host_id,
                others,
            } => self.joined(*code, *client_id, *host_id, others),
            RootMessage::JoinGameError { reason, message } => {
                warn!(
                    "join refused: {}{}",
                    reason,
                    message.as_deref().map(|m| format!(" ({})", m)).unwrap_or_default()
                );
                self.events.push_back(SessionEvent::JoinFailed(*reason));
            }
            RootMessage::WaitForHost { code, client_id } if Some(*client_id) == self.client_id => {
                info!("waiting for the host of {}", display_code(*code));
                self.events.push_back(SessionEvent::WaitingForHost { code: *code });
            }
            RootMessage::KickPlayer {
                client_id, banned, ..
            } if Some(*client_id) == self.client_id => {
                warn!("{} from the room", if *banned { "banned" } else { "kicked" });
                self.room = None;
                self.events.push_back(SessionEvent::Kicked { banned: *banned });
            }
            RootMessage::AlterGame { value, .. } => {
                self.events.push_back(SessionEvent::PrivacyChanged { public: *value });
            }
            RootMessage::GetGameListResponse { games, .. } => {
                self.events.push_back(SessionEvent::GameList(games.clone()));
            }
            RootMessage::Redirect { ip, port } => {
                let target = SocketAddrV4::new(*ip, *port);
                info!("redirected to {}", target);
                self.events.push_back(SessionEvent::Redirected(target));
            }
            RootMessage::EndGame { reason, .. } => {
                if let Some(room) = self.room.as_mut() {
                    if let Err(e) = room.handle_payload(payload) {
                        warn!("{}", e);
                    }
                }
                info!("round over: {:?}", reason);
                self.events.push_back(SessionEvent::GameEnded(*reason));
            }
            RootMessage::RemovePlayer { client_id, .. } if Some(*client_id) == self.client_id => {
                self.room = None;
            }
            other => {
                if let Some(room) = self.room.as_mut() {
                    if let Err(e) = room.handle_payload(other) {
                        warn!("room rejected payload: {}", e);
                    }
                } else {
                    debug!("no room for payload tag {}", other.tag());
                }
            }
        }
    }

    fn joined(&mut self, code: i32, client_id: i32, host_id: i32, others: &[i32]) {
        info!(
            "joined {} as client {} (host {})",
            display_code(code),
            client_id,
            host_id
        );
        self.client_id = Some(client_id);
        let settings = match (&self.hosted_settings, host_id == client_id) {
            (Some(settings), true) => settings.clone(),
            _ => GameSettings::default(),
        };
        let mut room = Room::new(
            code,
            host_id,
            Some(client_id),
            settings,
            self.room_config.clone(),
            Arc::clone(&self.data),
        );
        for other in others {
            room.handle_join(*other);
        }
        room.handle_join(client_id);
        if self.live {
            if let Err(e) = room.enter_scene(ONLINE_SCENE) {
                warn!("could not enter the lobby scene: {}", e);
            }
        }
        self.room = Some(room);
        self.events.push_back(SessionEvent::Joined {
            code,
            client_id,
            host_id,
        });
    }

    fn collect_room_events(&mut self) {
        if let Some(room) = self.room.as_mut() {
            self.events
                .extend(room.drain_events().into_iter().map(SessionEvent::Room));
        }
    }

    /// Runs transport timers and advances the room by `dt` seconds.
    pub fn tick(&mut self, dt: f32, now: Instant) -> Result<(), TransportError> {
        if let Err(e) = self.conn.poll(now) {
            self.abort_waiters();
            self.events.push_back(SessionEvent::Disconnected(None));
            return Err(e);
        }
        if let Some(room) = self.room.as_mut() {
            if room.config().tick_rate.is_some() {
                room.fixed_update(dt);
            }
        }
        self.flush_room(now)?;
        self.collect_room_events();
        Ok(())
    }

    /// Sends whatever the room queued, all in one reliable packet.
    pub fn flush_room(&mut self, now: Instant) -> Result<(), TransportError> {
        let Some(room) = self.room.as_mut() else {
            return Ok(());
        };
        let outbound = room.take_outbound();
        if outbound.is_empty() || !self.live || !self.conn.is_open() {
            return Ok(());
        }
        self.conn.send_reliable(outbound, now)?;
        Ok(())
    }

    pub fn drain_outgoing(&mut self) -> Vec<Vec<u8>> {
        self.conn.drain_outgoing()
    }

    pub fn poll_event(&mut self) -> Option<SessionEvent> {
        self.events.pop_front()
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        self.events.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::packet::Packet;
    use shared::room::Authority;

    const CODE: i32 = 0x4142_4344;

    fn session(now: Instant) -> ClientSession {
        let mut session = ClientSession::new(
            "bot",
            TransportConfig::default(),
            RoomConfig {
                seed: Some(3),
                ..RoomConfig::default()
            },
            now,
        );
        session.connect(now).unwrap();
        session.drain_outgoing();
        session
    }

    fn server_packet(nonce: u16, payloads: Vec<RootMessage>) -> Vec<u8> {
        Packet::Reliable { nonce, payloads }.compose().unwrap()
    }

    fn ack(nonce: u16) -> Vec<u8> {
        Packet::Acknowledge {
            nonce,
            bitfield: 0xff,
        }
        .compose()
        .unwrap()
    }

    #[test]
    fn test_connects_on_hello_ack() {
        let now = Instant::now();
        let mut session = session(now);
        assert_eq!(session.state(), ConnectionState::Identified);
        session.receive(&ack(1), now).unwrap();
        assert_eq!(session.state(), ConnectionState::Connected);
        assert_eq!(session.poll_event(), Some(SessionEvent::Connected));
    }

    #[test]
    fn test_joined_builds_room_and_spawns_host() {
        let now = Instant::now();
        let mut session = session(now);
        session.receive(&ack(1), now).unwrap();
        session.host_game(GameSettings::default(), now).unwrap();
        session.drain_outgoing();

        let joined = RootMessage::JoinedGame {
            code: CODE,
            client_id: 7,
            host_id: 7,
            others: vec![],
        };
        session.receive(&server_packet(1, vec![joined]), now).unwrap();
        let room = session.room().unwrap();
        assert!(room.is_host());
        assert_eq!(session.client_id(), Some(7));
        // The host spawned its own character on entering the scene
        assert!(room.player(7).unwrap().control_net_id.is_some());

        let events = session.drain_events();
        assert!(events.contains(&SessionEvent::Joined {
            code: CODE,
            client_id: 7,
            host_id: 7
        }));

        // Scene change and spawns go out on the next flush
        session.drain_outgoing();
        session.flush_room(now).unwrap();
        let out = session.drain_outgoing();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0][0], shared::packet::opcode::RELIABLE);
    }

    #[test]
    fn test_payload_waiter_matches_once() {
        let now = Instant::now();
        let mut session = session(now);
        session.receive(&ack(1), now).unwrap();
        let mut hosted = session.wait_for(|p| matches!(p, RootMessage::HostGameResponse { .. }));
        let mut listed = session.wait_for(|p| matches!(p, RootMessage::GetGameListResponse { .. }));

        session
            .receive(&server_packet(1, vec![RootMessage::HostGameResponse { code: CODE }]), now)
            .unwrap();
        assert_eq!(
            hosted.try_outcome(),
            Some(WaitOutcome::Matched(RootMessage::HostGameResponse { code: CODE }))
        );
        assert_eq!(listed.try_outcome(), None);

        // Disconnect aborts whatever is still waiting
        session.disconnect().unwrap();
        assert_eq!(tokio_test::block_on(listed.wait()), WaitOutcome::Aborted);
    }

    #[tokio::test]
    async fn test_payload_waiter_async() {
        let now = Instant::now();
        let mut session = session(now);
        session.receive(&ack(1), now).unwrap();
        let waiter = session.wait_for(|p| matches!(p, RootMessage::JoinGameError { .. }));
        let error = RootMessage::JoinGameError {
            reason: DisconnectReason::GameFull,
            message: None,
        };
        session.receive(&server_packet(1, vec![error.clone()]), now).unwrap();
        assert_eq!(waiter.wait().await, WaitOutcome::Matched(error));
        assert!(session
            .drain_events()
            .contains(&SessionEvent::JoinFailed(DisconnectReason::GameFull)));
    }

    #[test]
    fn test_server_disconnect_reports_reason() {
        let now = Instant::now();
        let mut session = session(now);
        let mut waiter = session.wait_for(|_| true);
        let bytes = Packet::Disconnect(Some(shared::packet::DisconnectBody::with_reason(
            DisconnectReason::IncorrectVersion,
        )))
        .compose()
        .unwrap();
        session.receive(&bytes, now).unwrap();
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(waiter.try_outcome(), Some(WaitOutcome::Aborted));
        assert_eq!(
            session.drain_events(),
            vec![SessionEvent::Disconnected(Some(DisconnectReason::IncorrectVersion))]
        );
    }

    #[test]
    fn test_kick_drops_room() {
        let now = Instant::now();
        let mut session = session(now);
        session.receive(&ack(1), now).unwrap();
        let joined = RootMessage::JoinedGame {
            code: CODE,
            client_id: 2,
            host_id: 1,
            others: vec![1],
        };
        session.receive(&server_packet(1, vec![joined]), now).unwrap();
        assert!(!session.room().unwrap().is_host());

        let kick = RootMessage::KickPlayer {
            code: CODE,
            client_id: 2,
            banned: false,
        };
        session.receive(&server_packet(2, vec![kick]), now).unwrap();
        assert!(session.room().is_none());
        assert!(session
            .drain_events()
            .contains(&SessionEvent::Kicked { banned: false }));
    }

    #[test]
    fn test_offline_session_never_sends() {
        let now = Instant::now();
        let mut session = ClientSession::offline("replay", now);
        assert_eq!(session.room_config.authority, Authority::Host);
        let joined = RootMessage::JoinedGame {
            code: CODE,
            client_id: 2,
            host_id: 1,
            others: vec![1],
        };
        session.receive(&server_packet(1, vec![joined]), now).unwrap();
        assert!(session.room().is_some());
        session.tick(0.02, now).unwrap();
        // Acks are produced by the transport but the room stays silent
        assert!(session
            .drain_outgoing()
            .iter()
            .all(|bytes| bytes[0] == shared::packet::opcode::ACKNOWLEDGE));
    }
}
