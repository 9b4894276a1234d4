//! Lobby bookkeeping for the matchmaking server.
//!
//! [`GameServer`] is a socket-free state machine: the network layer feeds it
//! datagrams and a clock, then drains the datagrams it wants sent. Every room
//! the server hosts keeps a [`Room`] mirror so it can answer listing queries,
//! validate host-only operations and, in server-authority mode, run the
//! round itself.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::code::{display_code, generate_code};
use shared::data::{BuiltinData, MapData};
use shared::enums::{AlterGameTag, DisconnectReason, GameMap, GameOverReason};
use shared::packet::opcode;
use shared::payload::{GameListing, RootMessage};
use shared::room::{Authority, Room, RoomState};
use shared::settings::GameSettings;
use shared::transport::{ConnectionState, Inbound};
use shared::version::VersionInfo;

use crate::client_manager::ClientManager;
use crate::config::ServerConfig;

/// Maps counted in the GetGameList response.
const LISTED_MAPS: u8 = 5;

/// One hosted game and the server-side view of who is in it.
struct Lobby {
    room: Room,
    /// Clients currently in the room.
    members: BTreeSet<i32>,
    /// Clients from the last round that have not rejoined yet.
    limbo: BTreeSet<i32>,
    /// Clients that rejoined before the host did.
    waiting: BTreeSet<i32>,
    public: bool,
    bans: HashSet<IpAddr>,
    created: Instant,
}

impl Lobby {
    fn is_empty(&self) -> bool {
        self.members.is_empty() && self.limbo.is_empty() && self.waiting.is_empty()
    }

    fn occupancy(&self) -> usize {
        self.members.len() + self.waiting.len()
    }

    fn host_in_limbo(&self) -> bool {
        self.limbo.contains(&self.room.host_id())
    }
}

pub struct GameServer {
    config: ServerConfig,
    clients: ClientManager,
    lobbies: BTreeMap<i32, Lobby>,
    rng: StdRng,
    data: Arc<dyn MapData>,
    /// Datagrams owed to clients that were already removed.
    parting: Vec<(SocketAddr, Vec<u8>)>,
}

impl GameServer {
    pub fn new(config: ServerConfig) -> Self {
        Self::with_data(config, Arc::new(BuiltinData))
    }

    pub fn with_data(config: ServerConfig, data: Arc<dyn MapData>) -> Self {
        let rng = match config.room.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            clients: ClientManager::new(config.transport.clone()),
            config,
            lobbies: BTreeMap::new(),
            rng,
            data,
            parting: Vec::new(),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn clients(&self) -> &ClientManager {
        &self.clients
    }

    pub fn lobby_count(&self) -> usize {
        self.lobbies.len()
    }

    pub fn room(&self, code: i32) -> Option<&Room> {
        self.lobbies.get(&code).map(|l| &l.room)
    }

    /// Clients currently in the room with `code`, in id order.
    pub fn members(&self, code: i32) -> Vec<i32> {
        self.lobbies
            .get(&code)
            .map(|l| l.members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_public(&self, code: i32) -> Option<bool> {
        self.lobbies.get(&code).map(|l| l.public)
    }

    /// Processes one datagram from `addr`.
    pub fn handle_datagram(&mut self, addr: SocketAddr, bytes: &[u8], now: Instant) {
        let reliable = bytes.first() != Some(&opcode::UNRELIABLE);
        let client = self.clients.get_or_insert(addr, now);
        let client_id = client.id;
        let inbound = match client.connection.receive(bytes, now) {
            Ok(inbound) => inbound,
            Err(e) => {
                debug!("dropping datagram from {}: {}", addr, e);
                if client.connection.hello().is_none() {
                    self.clients.remove_client(client_id);
                }
                return;
            }
        };

        match inbound {
            Some(Inbound::Hello(hello)) => self.handle_hello(client_id, hello.client_version, now),
            Some(Inbound::Payloads(payloads)) => {
                let connected = self
                    .clients
                    .get(client_id)
                    .map_or(false, |c| c.connection.state() == ConnectionState::Connected);
                if !connected {
                    debug!("client {} sent payloads before being accepted", client_id);
                    return;
                }
                for payload in payloads {
                    self.handle_payload(client_id, payload, reliable, now);
                }
            }
            Some(Inbound::Disconnected(reason)) => {
                info!("client {} disconnected ({:?})", client_id, reason);
                self.drop_client(client_id, DisconnectReason::ExitGame, now);
            }
            None => {}
        }
    }

    fn handle_hello(&mut self, client_id: i32, version: VersionInfo, now: Instant) {
        let connected = self.clients.len().saturating_sub(1);
        let min_version = self.config.min_client_version;
        let redirect = self.config.redirect;
        let over_capacity = connected >= self.config.max_clients;
        let Some(client) = self.clients.get_mut(client_id) else {
            return;
        };
        info!("client {} identified as {:?} ({})", client_id, client.name(), version);

        let refusal = if version < min_version {
            Some(DisconnectReason::IncorrectVersion)
        } else if over_capacity && redirect.is_none() {
            Some(DisconnectReason::ServerFull)
        } else {
            None
        };
        if let Some(reason) = refusal {
            warn!("refusing client {}: {}", client_id, reason);
            if let Err(e) = client.connection.disconnect(reason) {
                warn!("failed to disconnect client {}: {}", client_id, e);
            }
            self.drop_client(client_id, reason, now);
            return;
        }

        match redirect.filter(|_| over_capacity) {
            // Left unaccepted, so a redirected client can't use this node
            Some(target) => {
                info!("redirecting client {} to {}", client_id, target);
                let message = RootMessage::Redirect {
                    ip: *target.ip(),
                    port: target.port(),
                };
                if let Err(e) = client.connection.send_reliable(vec![message], now) {
                    warn!("failed to redirect client {}: {}", client_id, e);
                }
            }
            None => client.connection.accept(),
        }
    }

    fn handle_payload(&mut self, client_id: i32, payload: RootMessage, reliable: bool, now: Instant) {
        match payload {
            RootMessage::HostGameRequest { settings } => self.host_game(client_id, settings, now),
            RootMessage::JoinGameRequest { code, .. } => self.join_game(client_id, code, now),
            RootMessage::GetGameListRequest { settings, .. } => {
                self.list_games(client_id, &settings, now)
            }
            RootMessage::GameData { code, messages } => {
                if !self.in_room(client_id, code) {
                    return;
                }
                let Some(lobby) = self.lobbies.get_mut(&code) else {
                    return;
                };
                // Only what the mirror accepted goes out, so it never drifts
                // from the clients
                let accepted = lobby.room.apply_game_data(Some(client_id), &messages);
                if accepted.len() < messages.len() {
                    warn!(
                        "room {}: dropped {} message(s) from client {}",
                        display_code(code),
                        messages.len() - accepted.len(),
                        client_id
                    );
                }
                if accepted.is_empty() {
                    return;
                }
                let members = self.others(code, client_id);
                let relay = RootMessage::GameData {
                    code,
                    messages: accepted,
                };
                self.send_many(&members, relay, reliable, now);
            }
            RootMessage::GameDataTo {
                code,
                target,
                messages,
            } => {
                if !self.in_room(client_id, code) {
                    return;
                }
                let Some(lobby) = self.lobbies.get_mut(&code) else {
                    return;
                };
                let to_host = target == lobby.room.host_id();
                let consumed = lobby.room.config().authority == Authority::Server && to_host;
                let target_present = lobby.members.contains(&target);
                // Anything else is host-to-client state the mirror already holds
                let messages = if to_host {
                    lobby.room.apply_game_data(Some(client_id), &messages)
                } else {
                    messages
                };
                if !consumed && target_present && !messages.is_empty() {
                    let relay = RootMessage::GameDataTo {
                        code,
                        target,
                        messages,
                    };
                    self.send(target, vec![relay], reliable, now);
                }
            }
            RootMessage::StartGame { code } => {
                if !self.is_host_of(client_id, code) {
                    return;
                }
                let members = self.members(code);
                if let Some(lobby) = self.lobbies.get_mut(&code) {
                    if let Err(e) = lobby.room.handle_payload(&RootMessage::StartGame { code }) {
                        warn!("room {}: start failed: {}", display_code(code), e);
                        return;
                    }
                }
                info!("room {} starting", display_code(code));
                self.send_many(&members, RootMessage::StartGame { code }, true, now);
            }
            RootMessage::EndGame { code, reason, .. } => {
                if self.is_host_of(client_id, code) {
                    self.end_round(code, reason, now);
                }
            }
            RootMessage::AlterGame { code, tag, value } => {
                if !self.is_host_of(client_id, code) {
                    return;
                }
                if tag == AlterGameTag::ChangePrivacy {
                    if let Some(lobby) = self.lobbies.get_mut(&code) {
                        lobby.public = value;
                    }
                }
                let members = self.members(code);
                self.send_many(&members, RootMessage::AlterGame { code, tag, value }, true, now);
            }
            RootMessage::KickPlayer {
                code,
                client_id: target,
                banned,
            } => self.kick(client_id, code, target, banned, now),
            RootMessage::RemovePlayer {
                code,
                client_id: target,
                reason,
                ..
            } => {
                // Hosts may remove players directly, the same as a kick
                if target != client_id && self.is_host_of(client_id, code) {
                    self.leave_lobby(target, reason, now);
                }
            }
            other => debug!("client {} sent unexpected payload tag {}", client_id, other.tag()),
        }
    }

    fn host_game(&mut self, client_id: i32, settings: GameSettings, now: Instant) {
        let refusal = if let Err(e) = settings.validate() {
            warn!("client {} sent invalid settings: {}", client_id, e);
            Some(DisconnectReason::InvalidGameOptions)
        } else if self.lobbies.len() >= self.config.max_rooms {
            Some(DisconnectReason::TooManyGames)
        } else {
            None
        };
        if let Some(reason) = refusal {
            self.join_error(client_id, reason, now);
            return;
        }

        let code = loop {
            let code = generate_code(&mut self.rng);
            if !self.lobbies.contains_key(&code) {
                break code;
            }
        };
        let mut room_config = self.config.room.clone();
        if room_config.seed.is_some() {
            room_config.seed = Some(rand::Rng::gen(&mut self.rng));
        }
        let map = settings.map;
        let room = Room::new(code, 0, None, settings, room_config, Arc::clone(&self.data));
        self.lobbies.insert(
            code,
            Lobby {
                room,
                members: BTreeSet::new(),
                limbo: BTreeSet::new(),
                waiting: BTreeSet::new(),
                public: false,
                bans: HashSet::new(),
                created: now,
            },
        );
        info!(
            "client {} created room {} on {}",
            client_id,
            display_code(code),
            map_name(map)
        );
        self.send(client_id, vec![RootMessage::HostGameResponse { code }], true, now);
    }

    fn join_game(&mut self, client_id: i32, code: i32, now: Instant) {
        let Some(addr) = self.clients.get(client_id).map(|c| c.addr) else {
            return;
        };
        let current = self.clients.get(client_id).and_then(|c| c.room);
        if let Some(current) = current.filter(|c| *c != code) {
            self.leave_lobby(client_id, DisconnectReason::ExitGame, now);
            debug!("client {} left {} to join another room", client_id, current);
        }

        let Some(lobby) = self.lobbies.get_mut(&code) else {
            self.join_error(client_id, DisconnectReason::GameNotFound, now);
            return;
        };
        let returning = lobby.limbo.contains(&client_id);
        let refusal = if lobby.bans.contains(&addr.ip()) {
            Some(DisconnectReason::Banned)
        } else if lobby.members.contains(&client_id) || lobby.waiting.contains(&client_id) {
            debug!("client {} is already in room {}", client_id, code);
            return;
        } else if !returning && lobby.room.state() != RoomState::Lobby {
            Some(DisconnectReason::GameStarted)
        } else if !returning && lobby.occupancy() >= usize::from(lobby.room.settings().max_players) {
            Some(DisconnectReason::GameFull)
        } else {
            None
        };
        if let Some(reason) = refusal {
            self.join_error(client_id, reason, now);
            return;
        }

        if let Some(client) = self.clients.get_mut(client_id) {
            client.room = Some(code);
        }
        lobby.limbo.remove(&client_id);
        let is_host = client_id == lobby.room.host_id();
        if lobby.host_in_limbo() && !is_host {
            lobby.waiting.insert(client_id);
            info!("client {} waiting for the host of {}", client_id, display_code(code));
            self.send(client_id, vec![RootMessage::WaitForHost { code, client_id }], true, now);
            return;
        }

        self.complete_join(code, client_id, now);
        let waiting: Vec<i32> = self
            .lobbies
            .get_mut(&code)
            .filter(|_| is_host)
            .map(|l| std::mem::take(&mut l.waiting).into_iter().collect())
            .unwrap_or_default();
        for id in waiting {
            self.complete_join(code, id, now);
        }
    }

    /// Adds `client_id` to the room and tells everyone about it.
    fn complete_join(&mut self, code: i32, client_id: i32, now: Instant) {
        let Some(lobby) = self.lobbies.get_mut(&code) else {
            return;
        };
        // The first client in an unhosted room takes it over
        if !lobby.members.contains(&lobby.room.host_id()) && !lobby.host_in_limbo() {
            lobby.room.set_host(client_id);
        }
        let host_id = lobby.room.host_id();
        let others: Vec<i32> = lobby.members.iter().copied().collect();
        lobby.members.insert(client_id);
        lobby.room.handle_join(client_id);
        info!("client {} joined {}", client_id, display_code(code));

        let joined = RootMessage::JoinedGame {
            code,
            client_id,
            host_id,
            others: others.clone(),
        };
        self.send(client_id, vec![joined], true, now);
        let announce = RootMessage::JoinGameResponse {
            code,
            client_id,
            host_id,
        };
        self.send_many(&others, announce, true, now);
    }

    fn kick(&mut self, sender: i32, code: i32, target: i32, banned: bool, now: Instant) {
        if !self.is_host_of(sender, code) || target == sender {
            return;
        }
        let Some(target_addr) = self.clients.get(target).map(|c| c.addr) else {
            return;
        };
        let Some(lobby) = self.lobbies.get_mut(&code) else {
            return;
        };
        if !lobby.members.contains(&target) {
            return;
        }
        if banned {
            lobby.bans.insert(target_addr.ip());
        }
        info!(
            "client {} {} from {}",
            target,
            if banned { "banned" } else { "kicked" },
            display_code(code)
        );
        let members = self.members(code);
        let message = RootMessage::KickPlayer {
            code,
            client_id: target,
            banned,
        };
        self.send_many(&members, message, true, now);
        let reason = if banned {
            DisconnectReason::Banned
        } else {
            DisconnectReason::Kicked
        };
        self.leave_lobby(target, reason, now);
    }

    fn list_games(&mut self, client_id: i32, filter: &GameSettings, now: Instant) {
        let mut map_counts = vec![0u32; usize::from(LISTED_MAPS)];
        let mut games = Vec::new();
        for (code, lobby) in &self.lobbies {
            if !lobby.public || lobby.room.state() != RoomState::Lobby {
                continue;
            }
            let settings = lobby.room.settings();
            let map_index = usize::from(u8::from(settings.map));
            if let Some(count) = map_counts.get_mut(map_index) {
                *count += 1;
            }
            let full = lobby.occupancy() >= usize::from(settings.max_players);
            // The request's map field is a bitmask of wanted maps
            let mask = u8::from(filter.map);
            let wanted = (filter.impostors == 0 || filter.impostors == settings.impostors)
                && (mask == 0 || mask & (1 << map_index) != 0);
            if full || !wanted || games.len() >= self.config.max_listings {
                continue;
            }
            let host_name = self
                .clients
                .get(lobby.room.host_id())
                .map(|c| c.name().to_string())
                .unwrap_or_default();
            games.push(GameListing {
                ip: self.config.public_ip,
                port: self.config.port,
                code: *code,
                host_name,
                player_count: u8::try_from(lobby.members.len()).unwrap_or(u8::MAX),
                age: u32::try_from(now.saturating_duration_since(lobby.created).as_secs())
                    .unwrap_or(u32::MAX),
                map: settings.map,
                impostors: settings.impostors,
                max_players: settings.max_players,
            });
        }
        debug!("client {} listed {} games", client_id, games.len());
        let response = RootMessage::GetGameListResponse {
            map_counts: Some(map_counts),
            games,
        };
        self.send(client_id, vec![response], true, now);
    }

    /// Ends the current round: everyone drops back to the lobby screen and has
    /// to rejoin, host first.
    fn end_round(&mut self, code: i32, reason: GameOverReason, now: Instant) {
        let members = self.members(code);
        self.send_many(
            &members,
            RootMessage::EndGame {
                code,
                reason,
                show_ad: false,
            },
            true,
            now,
        );
        let Some(lobby) = self.lobbies.get_mut(&code) else {
            return;
        };
        info!("room {} ended: {:?}", display_code(code), reason);
        lobby.room.reset();
        for id in std::mem::take(&mut lobby.members) {
            if let Err(e) = lobby.room.handle_leave(id) {
                debug!("room {}: {}", code, e);
            }
            lobby.limbo.insert(id);
        }
        lobby.room.drain_events();
        lobby.room.take_outbound();
    }

    /// Removes `client_id` from whatever room it is in.
    fn leave_lobby(&mut self, client_id: i32, reason: DisconnectReason, now: Instant) {
        let Some(code) = self.clients.get_mut(client_id).and_then(|c| c.room.take()) else {
            return;
        };
        let Some(lobby) = self.lobbies.get_mut(&code) else {
            return;
        };
        lobby.waiting.remove(&client_id);
        let was_limbo = lobby.limbo.remove(&client_id);
        let was_member = lobby.members.remove(&client_id);
        let host_left = client_id == lobby.room.host_id();

        if was_member {
            if let Err(e) = lobby.room.handle_leave(client_id) {
                debug!("room {}: {}", code, e);
            }
            if host_left {
                if let Some(next) = lobby.members.iter().next().copied() {
                    lobby.room.set_host(next);
                }
            }
            let host_id = lobby.room.host_id();
            let remaining: Vec<i32> = lobby.members.iter().copied().collect();
            info!("client {} left {} ({:?})", client_id, display_code(code), reason);
            self.send_many(
                &remaining,
                RootMessage::RemovePlayer {
                    code,
                    client_id,
                    host_id,
                    reason,
                },
                true,
                now,
            );
        } else if was_limbo && host_left {
            // The host never came back; hand the room to whoever is waiting
            let next = lobby
                .waiting
                .iter()
                .next()
                .or_else(|| lobby.limbo.iter().next())
                .copied();
            if let Some(next) = next {
                lobby.room.set_host(next);
                let waiting: Vec<i32> = std::mem::take(&mut lobby.waiting).into_iter().collect();
                for id in waiting {
                    self.complete_join(code, id, now);
                }
            }
        }

        if self.lobbies.get(&code).map_or(false, Lobby::is_empty) {
            info!("room {} closed", display_code(code));
            self.lobbies.remove(&code);
        }
    }

    /// Cleans up after a client whose connection is gone.
    fn drop_client(&mut self, client_id: i32, reason: DisconnectReason, now: Instant) {
        self.leave_lobby(client_id, reason, now);
        if let Some(mut client) = self.clients.remove_client(client_id) {
            let addr = client.addr;
            self.parting.extend(
                client
                    .connection
                    .drain_outgoing()
                    .into_iter()
                    .map(|bytes| (addr, bytes)),
            );
        }
    }

    /// Runs transport timers and advances every room by `dt` seconds.
    pub fn tick(&mut self, dt: f32, now: Instant) {
        for (client_id, e) in self.clients.poll(now) {
            warn!("client {} lost: {}", client_id, e);
            self.drop_client(client_id, DisconnectReason::Error, now);
        }
        for client_id in self.clients.closed() {
            self.drop_client(client_id, DisconnectReason::ExitGame, now);
        }

        let codes: Vec<i32> = self.lobbies.keys().copied().collect();
        for code in codes {
            let Some(lobby) = self.lobbies.get_mut(&code) else {
                continue;
            };
            lobby.room.fixed_update(dt);
            for event in lobby.room.drain_events() {
                debug!("room {}: {:?}", display_code(code), event);
            }
            let members: Vec<i32> = lobby.members.iter().copied().collect();
            for message in lobby.room.take_outbound() {
                match message {
                    RootMessage::GameDataTo { target, .. } => {
                        self.send(target, vec![message], true, now)
                    }
                    RootMessage::EndGame { reason, .. } => self.end_round(code, reason, now),
                    other => self.send_many(&members, other, true, now),
                }
            }
        }
    }

    /// Disconnects everyone, e.g. on shutdown.
    pub fn shutdown(&mut self, reason: DisconnectReason) {
        for id in self.clients.ids() {
            if let Some(client) = self.clients.get_mut(id) {
                if let Err(e) = client.connection.disconnect(reason) {
                    warn!("failed to disconnect client {}: {}", id, e);
                }
            }
        }
        self.lobbies.clear();
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.clients.next_deadline()
    }

    /// Everything the socket should send, in queue order.
    pub fn drain_outgoing(&mut self) -> Vec<(SocketAddr, Vec<u8>)> {
        let mut out = std::mem::take(&mut self.parting);
        out.extend(self.clients.drain_outgoing());
        out
    }

    fn in_room(&self, client_id: i32, code: i32) -> bool {
        let ok = self
            .lobbies
            .get(&code)
            .map_or(false, |l| l.members.contains(&client_id));
        if !ok {
            debug!("client {} is not in room {}", client_id, code);
        }
        ok
    }

    fn is_host_of(&self, client_id: i32, code: i32) -> bool {
        let ok = self.in_room(client_id, code)
            && self
                .lobbies
                .get(&code)
                .map_or(false, |l| l.room.host_id() == client_id);
        if !ok {
            warn!("client {} tried a host-only operation in {}", client_id, code);
        }
        ok
    }

    fn others(&self, code: i32, client_id: i32) -> Vec<i32> {
        self.members(code)
            .into_iter()
            .filter(|id| *id != client_id)
            .collect()
    }

    fn join_error(&mut self, client_id: i32, reason: DisconnectReason, now: Instant) {
        info!("client {} refused: {}", client_id, reason);
        let message = RootMessage::JoinGameError {
            reason,
            message: None,
        };
        self.send(client_id, vec![message], true, now);
    }

    fn send_many(&mut self, targets: &[i32], message: RootMessage, reliable: bool, now: Instant) {
        for target in targets {
            self.send(*target, vec![message.clone()], reliable, now);
        }
    }

    fn send(&mut self, client_id: i32, payloads: Vec<RootMessage>, reliable: bool, now: Instant) {
        let Some(client) = self.clients.get_mut(client_id) else {
            return;
        };
        let result = if reliable {
            client.connection.send_reliable(payloads, now).map(|_| ())
        } else {
            client.connection.send_unreliable(payloads)
        };
        if let Err(e) = result {
            debug!("failed to send to client {}: {}", client_id, e);
        }
    }
}

/// Human-readable name for a map, used in listings and logs.
pub fn map_name(map: GameMap) -> &'static str {
    match map {
        GameMap::TheSkeld => "The Skeld",
        GameMap::MiraHq => "MIRA HQ",
        GameMap::Polus => "Polus",
        GameMap::AprilSkeld => "dlekS ehT",
        GameMap::Airship => "The Airship",
        GameMap::Unknown(_) => "Unknown",
    }
}
