//! The room engine: one replicated lobby or round.
//!
//! A [`Room`] mirrors every networked object in a game and applies the
//! GameData messages that keep peers in step. Exactly one peer is the
//! authority. Under [`Authority::Host`] that is whichever client is host;
//! under [`Authority::Server`] it is the server's own mirror, and clients
//! (the host included) only request. The authority
//! spawns objects, assigns roles and tasks, and serializes object state.
//! Everyone else applies what it is sent and routes their own intents to
//! the host.
//!
//! The engine does no I/O. Outgoing traffic collects in per-room streams
//! that [`Room::take_outbound`] turns into root payloads, and noteworthy
//! changes are queued as [`RoomEvent`]s.

mod gamedata;
mod meeting;
mod object;
mod player;
mod rpc;
mod ship;
pub mod tasks;

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::mem;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec::{HazelReader, Vector2};
use crate::data::MapData;
use crate::enums::{GameOverReason, SpawnType, SystemType};
use crate::error::CodecError;
use crate::gamedata::{ComponentData, GameDataMessage, SpawnMessage, GLOBAL_OWNER, SPAWN_FLAG_CLIENT_CHARACTER};
use crate::payload::RootMessage;
use crate::rpc::{RpcMessage, EMERGENCY_BUTTON};
use crate::settings::{max_impostors, GameSettings};
use crate::systems::{SystemContext, SystemEvent};

pub use gamedata::{PlayerInfo, PlayerRegistry, TaskState};
pub use meeting::{MeetingHud, Tally, VoteState, NO_EXILE, SKIPPED_VOTE};
pub use object::{Component, NetObject, NetTransform, PlayerControl};
pub use player::Player;
pub use ship::{map_for_prefab, ShipStatus};
pub use tasks::{assign_tasks, TaskCounts};

/// Scene a client reports once it has loaded into the lobby.
pub const ONLINE_SCENE: &str = "OnlineGame";

/// Number of player colours.
pub const COLOR_COUNT: u8 = 12;

/// Which peer decides outcomes for the room.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Authority {
    #[default]
    Host,
    Server,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    /// Fixed updates per second. `None` disables ticking.
    pub tick_rate: Option<u32>,
    /// Retry budget for a single task draw.
    pub task_sanity_cap: usize,
    pub authority: Authority,
    /// Seeds the room's RNG for reproducible rounds.
    pub seed: Option<u64>,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            tick_rate: Some(50),
            task_sanity_cap: 1000,
            authority: Authority::Host,
            seed: None,
        }
    }
}

impl RoomConfig {
    pub fn tick_interval(&self) -> Option<Duration> {
        self.tick_rate
            .filter(|rate| *rate > 0)
            .map(|rate| Duration::from_secs_f64(1.0 / f64::from(rate)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomState {
    Lobby,
    /// StartGame seen; waiting for every client to report Ready.
    Starting,
    Started,
    Ended,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RoomError {
    #[error("net id {0} is already spawned")]
    DuplicateNetId(u32),

    #[error("no object with net id {0}")]
    UnknownNetId(u32),

    #[error("no player with client id {0}")]
    UnknownPlayer(i32),

    #[error("client {0} may not write that object")]
    NotHost(i32),

    #[error("client {0} sent a message only the host originates")]
    HostOnly(i32),

    #[error("payload for room {got}, this is room {expected}")]
    WrongRoom { expected: i32, got: i32 },

    #[error("no {0} in the room")]
    MissingObject(&'static str),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    PlayerJoined { client_id: i32 },
    PlayerLeft { client_id: i32 },
    HostChanged { client_id: i32 },
    Spawned { net_id: u32, spawn_type: SpawnType, owner_id: i32 },
    Despawned { net_id: u32 },
    SettingsChanged,
    Chat { player_id: u8, message: String },
    Sabotaged(SystemType),
    SystemExpired(SystemType),
    DoorsClosed(SystemType),
    PlayerMurdered { victim: u8 },
    MeetingStarted { reporter: u8 },
    VotingComplete { exiled: Option<u8>, tie: bool },
    PlayerExiled { player_id: u8 },
    TasksAssigned { player_id: u8, tasks: Vec<u8> },
    TaskCompleted { player_id: u8, index: u32 },
    GameStarting,
    GameStarted,
    GameEnded(GameOverReason),
}

/// Something the local player wants to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    SetName(String),
    SetColor(u8),
    Chat(String),
    Move { position: Vector2, velocity: Vector2 },
    CompleteTask(u32),
    Repair { system: SystemType, amount: u8 },
    Sabotage(SystemType),
    CloseDoors(SystemType),
    Murder { victim: u8 },
    StartGame,
    /// Report `body`, or press the emergency button when `None`.
    CallMeeting { body: Option<u8> },
    /// Vote for a player, or skip.
    Vote(Option<u8>),
}

impl Intent {
    /// Intents only the host may issue. Others buffer them until promoted,
    /// or until the room starts without them.
    pub fn host_only(&self) -> bool {
        matches!(self, Self::StartGame)
    }
}

/// What tipped a round-end check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndTrigger {
    Kill,
    Vote,
    Disconnect,
    Task,
}

pub struct Room {
    code: i32,
    host_id: i32,
    local_id: Option<i32>,
    config: RoomConfig,
    state: RoomState,
    settings: GameSettings,
    players: BTreeMap<i32, Player>,
    objects: BTreeMap<u32, NetObject>,
    data: Arc<dyn MapData>,
    rng: StdRng,
    next_net_id: u32,
    stream: Vec<GameDataMessage>,
    targeted: BTreeMap<i32, Vec<GameDataMessage>>,
    control: Vec<RootMessage>,
    buffered: Vec<Intent>,
    events: VecDeque<RoomEvent>,
}

impl Room {
    /// `local_id` is this peer's client id, or `None` on the server.
    pub fn new(
        code: i32,
        host_id: i32,
        local_id: Option<i32>,
        settings: GameSettings,
        config: RoomConfig,
        data: Arc<dyn MapData>,
    ) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            code,
            host_id,
            local_id,
            config,
            state: RoomState::Lobby,
            settings,
            players: BTreeMap::new(),
            objects: BTreeMap::new(),
            data,
            rng,
            next_net_id: 1,
            stream: Vec::new(),
            targeted: BTreeMap::new(),
            control: Vec::new(),
            buffered: Vec::new(),
            events: VecDeque::new(),
        }
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn host_id(&self) -> i32 {
        self.host_id
    }

    pub fn local_id(&self) -> Option<i32> {
        self.local_id
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    pub fn state(&self) -> RoomState {
        self.state
    }

    pub fn settings(&self) -> &GameSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: GameSettings) {
        self.settings = settings;
    }

    pub fn is_host(&self) -> bool {
        self.local_id.is_some() && self.local_id == Some(self.host_id)
    }

    pub fn is_authority(&self) -> bool {
        match self.config.authority {
            Authority::Server => self.local_id.is_none(),
            Authority::Host => self.is_host(),
        }
    }

    pub fn player(&self, client_id: i32) -> Option<&Player> {
        self.players.get(&client_id)
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn object(&self, net_id: u32) -> Option<&NetObject> {
        self.objects.get(&net_id)
    }

    pub fn objects(&self) -> impl Iterator<Item = &NetObject> {
        self.objects.values()
    }

    pub fn registry(&self) -> Option<&PlayerRegistry> {
        self.objects.values().find_map(|o| match &o.component {
            Component::Registry(registry) => Some(registry),
            _ => None,
        })
    }

    fn registry_mut(&mut self) -> Option<&mut PlayerRegistry> {
        self.objects.values_mut().find_map(|o| match &mut o.component {
            Component::Registry(registry) => Some(registry),
            _ => None,
        })
    }

    pub fn ship(&self) -> Option<&ShipStatus> {
        self.objects.values().find_map(|o| match &o.component {
            Component::Ship(ship) => Some(ship),
            _ => None,
        })
    }

    pub fn meeting(&self) -> Option<&MeetingHud> {
        self.objects.values().find_map(|o| match &o.component {
            Component::Meeting(meeting) => Some(meeting),
            _ => None,
        })
    }

    fn find_net_id(&self, matches: fn(&Component) -> bool) -> Option<u32> {
        self.objects
            .values()
            .find(|o| matches(&o.component))
            .map(|o| o.net_id)
    }

    fn registry_net_id(&self) -> Option<u32> {
        self.find_net_id(|c| matches!(c, Component::Registry(_)))
    }

    fn ship_net_id(&self) -> Option<u32> {
        self.find_net_id(|c| matches!(c, Component::Ship(_)))
    }

    fn meeting_net_id(&self) -> Option<u32> {
        self.find_net_id(|c| matches!(c, Component::Meeting(_)))
    }

    fn player_by_id(&self, player_id: u8) -> Option<&Player> {
        self.players
            .values()
            .find(|p| p.player_id == Some(player_id))
    }

    fn control_of(&self, player_id: u8) -> Option<u32> {
        self.player_by_id(player_id).and_then(|p| p.control_net_id)
    }

    /// Player id behind a PlayerControl net id.
    fn player_id_of(&self, net_id: u32) -> Option<u8> {
        match self.objects.get(&net_id).map(|o| &o.component) {
            Some(Component::PlayerControl(control)) => Some(control.player_id),
            _ => None,
        }
    }

    /// Player ids of everyone with a character, ascending.
    fn sorted_player_ids(&self) -> Vec<u8> {
        let mut ids: Vec<u8> = self.players.values().filter_map(|p| p.player_id).collect();
        ids.sort_unstable();
        ids
    }

    fn local_player(&self) -> Result<&Player, RoomError> {
        let local = self.local_id.unwrap_or(GLOBAL_OWNER);
        self.players
            .get(&local)
            .ok_or(RoomError::UnknownPlayer(local))
    }

    fn local_control(&self) -> Result<(u32, u8), RoomError> {
        let player = self.local_player()?;
        match (player.control_net_id, player.player_id) {
            (Some(net_id), Some(player_id)) => Ok((net_id, player_id)),
            _ => Err(RoomError::MissingObject("local character")),
        }
    }

    /// Control object RPCs that speak for the room are sent on.
    fn authority_control(&self) -> Option<u32> {
        let preferred = self.local_id.unwrap_or(self.host_id);
        self.players
            .get(&preferred)
            .or_else(|| self.players.get(&self.host_id))
            .and_then(|p| p.control_net_id)
            .or_else(|| self.players.values().find_map(|p| p.control_net_id))
    }

    fn check_code(&self, code: i32) -> Result<(), RoomError> {
        if code == self.code {
            Ok(())
        } else {
            Err(RoomError::WrongRoom {
                expected: self.code,
                got: code,
            })
        }
    }

    fn broadcast_rpc(&mut self, net_id: u32, rpc: RpcMessage) {
        self.stream.push(GameDataMessage::Rpc { net_id, rpc });
    }

    fn request_rpc(&mut self, net_id: u32, rpc: RpcMessage) {
        self.targeted
            .entry(self.host_id)
            .or_default()
            .push(GameDataMessage::Rpc { net_id, rpc });
    }

    pub fn poll_event(&mut self) -> Option<RoomEvent> {
        self.events.pop_front()
    }

    pub fn drain_events(&mut self) -> Vec<RoomEvent> {
        self.events.drain(..).collect()
    }

    /// Everything queued since the last call, as root payloads: per-target
    /// streams first, then the shared stream, then control payloads.
    ///
    /// A late loader's snapshot must land before any shared Data that
    /// refers to the objects it spawns.
    pub fn take_outbound(&mut self) -> Vec<RootMessage> {
        let mut out = Vec::new();
        for (target, messages) in mem::take(&mut self.targeted) {
            out.push(RootMessage::GameDataTo {
                code: self.code,
                target,
                messages,
            });
        }
        if !self.stream.is_empty() {
            out.push(RootMessage::GameData {
                code: self.code,
                messages: mem::take(&mut self.stream),
            });
        }
        out.append(&mut self.control);
        out
    }

    pub fn handle_join(&mut self, client_id: i32) {
        if self.players.contains_key(&client_id) {
            return;
        }
        self.players.insert(client_id, Player::new(client_id));
        self.events.push_back(RoomEvent::PlayerJoined { client_id });
    }

    pub fn set_host(&mut self, client_id: i32) {
        if self.host_id == client_id {
            return;
        }
        let was_host = self.is_host();
        self.host_id = client_id;
        info!("room {} host is now {}", self.code, client_id);
        self.events.push_back(RoomEvent::HostChanged { client_id });
        if !was_host && self.is_host() {
            for intent in mem::take(&mut self.buffered) {
                if let Err(e) = self.request(intent) {
                    warn!("buffered intent failed: {}", e);
                }
            }
        }
    }

    /// Drops a client and everything it owns.
    pub fn handle_leave(&mut self, client_id: i32) -> Result<(), RoomError> {
        let player = self
            .players
            .remove(&client_id)
            .ok_or(RoomError::UnknownPlayer(client_id))?;
        let authority = self.is_authority();
        let owned: Vec<u32> = self
            .objects
            .values()
            .filter(|o| o.owner_id == client_id)
            .map(|o| o.net_id)
            .collect();
        for net_id in owned {
            self.objects.remove(&net_id);
            if authority {
                self.stream.push(GameDataMessage::Despawn { net_id });
            }
            self.events.push_back(RoomEvent::Despawned { net_id });
        }
        if let Some(player_id) = player.player_id {
            let in_lobby = self.state == RoomState::Lobby;
            if let Some(registry) = self.registry_mut() {
                if in_lobby {
                    registry.remove(player_id);
                } else {
                    registry.update(player_id, |p| p.disconnected = true);
                }
            }
        }
        self.events.push_back(RoomEvent::PlayerLeft { client_id });
        self.check_for_end(EndTrigger::Disconnect);
        Ok(())
    }

    /// Applies a root payload addressed to this room.
    pub fn handle_payload(&mut self, payload: &RootMessage) -> Result<(), RoomError> {
        match payload {
            RootMessage::GameData { code, messages }
            | RootMessage::GameDataTo { code, messages, .. } => {
                self.check_code(*code)?;
                self.apply_game_data(None, messages);
            }
            RootMessage::JoinGameResponse {
                code,
                client_id,
                host_id,
            } => {
                self.check_code(*code)?;
                self.handle_join(*client_id);
                self.set_host(*host_id);
            }
            RootMessage::RemovePlayer {
                code,
                client_id,
                host_id,
                ..
            } => {
                self.check_code(*code)?;
                self.set_host(*host_id);
                self.handle_leave(*client_id)?;
            }
            RootMessage::StartGame { code } => {
                self.check_code(*code)?;
                self.begin_starting()?;
            }
            RootMessage::EndGame { code, reason, .. } => {
                self.check_code(*code)?;
                self.state = RoomState::Ended;
                self.events.push_back(RoomEvent::GameEnded(*reason));
            }
            other => debug!("room ignores payload tag {}", other.tag()),
        }
        Ok(())
    }

    /// Applies a batch, logging and skipping messages that fail.
    /// Applies each message in turn and returns the ones that were accepted,
    /// which are the only ones fit to relay.
    pub fn apply_game_data(
        &mut self,
        sender: Option<i32>,
        messages: &[GameDataMessage],
    ) -> Vec<GameDataMessage> {
        let mut accepted = Vec::with_capacity(messages.len());
        for message in messages {
            match self.handle_game_data(sender, message) {
                Ok(()) => accepted.push(message.clone()),
                Err(e) => warn!("room {}: dropped game data: {}", self.code, e),
            }
        }
        accepted
    }

    /// `sender` is known on the server and `None` on clients, which only
    /// hear relayed traffic.
    pub fn handle_game_data(
        &mut self,
        sender: Option<i32>,
        message: &GameDataMessage,
    ) -> Result<(), RoomError> {
        match message {
            GameDataMessage::Data { net_id, data } => self.handle_data(sender, *net_id, data),
            GameDataMessage::Rpc { net_id, rpc } => {
                if rpc.host_only() {
                    self.check_originator(sender)?;
                }
                self.handle_rpc(*net_id, rpc)
            }
            GameDataMessage::Spawn(spawn) => {
                self.check_originator(sender)?;
                self.handle_spawn(spawn)
            }
            GameDataMessage::Despawn { net_id } => {
                self.check_originator(sender)?;
                self.handle_despawn(*net_id)
            }
            GameDataMessage::SceneChange { client_id, scene } => {
                self.check_self(sender, *client_id)?;
                self.handle_scene_change(*client_id, scene)
            }
            GameDataMessage::Ready { client_id } => {
                self.check_self(sender, *client_id)?;
                self.handle_ready(*client_id)
            }
            GameDataMessage::ClientInfo { .. } | GameDataMessage::Unknown { .. } => Ok(()),
        }
    }

    /// Only a remote host may spawn, despawn or decide, and only while
    /// this room isn't the authority itself.
    fn check_originator(&self, sender: Option<i32>) -> Result<(), RoomError> {
        match sender {
            Some(sender) if sender != self.host_id || self.is_authority() => {
                Err(RoomError::HostOnly(sender))
            }
            _ => Ok(()),
        }
    }

    fn check_self(&self, sender: Option<i32>, client_id: i32) -> Result<(), RoomError> {
        match sender {
            Some(sender) if sender != client_id => Err(RoomError::NotHost(sender)),
            _ => Ok(()),
        }
    }

    fn handle_data(&mut self, sender: Option<i32>, net_id: u32, data: &[u8]) -> Result<(), RoomError> {
        let host_id = self.host_id;
        let object = self
            .objects
            .get_mut(&net_id)
            .ok_or(RoomError::UnknownNetId(net_id))?;
        if let Some(sender) = sender {
            if sender != object.owner_id && sender != host_id {
                return Err(RoomError::NotHost(sender));
            }
        }
        object
            .component
            .deserialize(&mut HazelReader::new(data), false)?;
        Ok(())
    }

    fn handle_spawn(&mut self, spawn: &SpawnMessage) -> Result<(), RoomError> {
        let mut seen = HashSet::new();
        for component in &spawn.components {
            if self.objects.contains_key(&component.net_id) || !seen.insert(component.net_id) {
                return Err(RoomError::DuplicateNetId(component.net_id));
            }
        }
        let mut defaults =
            Component::defaults_for(spawn.spawn_type, self.data.as_ref()).into_iter();
        let mut objects = Vec::with_capacity(spawn.components.len());
        for ComponentData { net_id, data } in &spawn.components {
            let mut component = defaults.next().unwrap_or(Component::Opaque(Vec::new()));
            component.deserialize(&mut HazelReader::new(data), true)?;
            objects.push(NetObject {
                net_id: *net_id,
                owner_id: spawn.owner_id,
                spawn_type: spawn.spawn_type,
                component,
            });
        }
        self.register(spawn.spawn_type, spawn.owner_id, objects);
        Ok(())
    }

    /// Inserts freshly spawned objects and links them to their player.
    fn register(&mut self, spawn_type: SpawnType, owner_id: i32, mut objects: Vec<NetObject>) {
        for object in &objects {
            if object.net_id >= self.next_net_id {
                self.next_net_id = object.net_id.wrapping_add(1);
            }
        }
        if spawn_type == SpawnType::Player {
            if let Some(player) = self.players.get_mut(&owner_id) {
                for object in &objects {
                    match &object.component {
                        Component::PlayerControl(control) => {
                            player.player_id = Some(control.player_id);
                            player.control_net_id = Some(object.net_id);
                        }
                        Component::PlayerPhysics => player.physics_net_id = Some(object.net_id),
                        Component::Transform(_) => player.transform_net_id = Some(object.net_id),
                        _ => {}
                    }
                }
            }
        }
        let player_ids = self.sorted_player_ids();
        for object in &mut objects {
            if let Component::Meeting(meeting) = &mut object.component {
                meeting.bind_players(&player_ids);
            }
        }
        for object in objects {
            debug!(
                "room {}: spawned {:?} as net id {}",
                self.code, spawn_type, object.net_id
            );
            self.events.push_back(RoomEvent::Spawned {
                net_id: object.net_id,
                spawn_type,
                owner_id,
            });
            self.objects.insert(object.net_id, object);
        }
    }

    /// Spawns a prefab from this peer, allocating net ids.
    fn spawn_prefab(
        &mut self,
        spawn_type: SpawnType,
        owner_id: i32,
        flags: u8,
        components: Vec<Component>,
    ) -> Result<Vec<u32>, RoomError> {
        let mut objects = Vec::with_capacity(components.len());
        let mut data = Vec::with_capacity(components.len());
        for component in components {
            while self.objects.contains_key(&self.next_net_id) {
                self.next_net_id = self.next_net_id.wrapping_add(1);
            }
            let object = NetObject {
                net_id: self.next_net_id,
                owner_id,
                spawn_type,
                component,
            };
            self.next_net_id = self.next_net_id.wrapping_add(1);
            data.push(ComponentData {
                net_id: object.net_id,
                data: object.spawn_bytes()?,
            });
            objects.push(object);
        }
        let net_ids = objects.iter().map(|o| o.net_id).collect();
        self.stream.push(GameDataMessage::Spawn(SpawnMessage {
            spawn_type,
            owner_id,
            flags,
            components: data,
        }));
        self.register(spawn_type, owner_id, objects);
        Ok(net_ids)
    }

    fn handle_despawn(&mut self, net_id: u32) -> Result<(), RoomError> {
        self.objects
            .remove(&net_id)
            .ok_or(RoomError::UnknownNetId(net_id))?;
        for player in self.players.values_mut() {
            if player.control_net_id == Some(net_id) {
                player.clear_character();
            }
        }
        self.events.push_back(RoomEvent::Despawned { net_id });
        Ok(())
    }

    fn despawn_object(&mut self, net_id: u32) -> Result<(), RoomError> {
        self.handle_despawn(net_id)?;
        self.stream.push(GameDataMessage::Despawn { net_id });
        Ok(())
    }

    /// Reports the local client's scene and applies it.
    pub fn enter_scene(&mut self, scene: &str) -> Result<(), RoomError> {
        let client_id = self.local_player()?.client_id;
        self.stream.push(GameDataMessage::SceneChange {
            client_id,
            scene: scene.to_string(),
        });
        self.handle_scene_change(client_id, scene)
    }

    fn handle_scene_change(&mut self, client_id: i32, scene: &str) -> Result<(), RoomError> {
        let authority = self.is_authority();
        let player = self
            .players
            .get_mut(&client_id)
            .ok_or(RoomError::UnknownPlayer(client_id))?;
        player.scene = Some(scene.to_string());
        if !authority || scene != ONLINE_SCENE || player.has_character() {
            return Ok(());
        }
        if self.state != RoomState::Lobby {
            debug!("client {} loaded after the round started", client_id);
            return Ok(());
        }
        if Some(client_id) != self.local_id {
            self.send_snapshot(client_id)?;
        }
        self.ensure_lobby_objects()?;
        let taken: HashSet<u8> = self.players.values().filter_map(|p| p.player_id).collect();
        let Some(player_id) = (0..=u8::MAX).find(|id| !taken.contains(id)) else {
            warn!("room {} ran out of player ids", self.code);
            return Ok(());
        };
        self.spawn_prefab(
            SpawnType::Player,
            client_id,
            SPAWN_FLAG_CLIENT_CHARACTER,
            vec![
                Component::PlayerControl(PlayerControl::new(player_id, true)),
                Component::PlayerPhysics,
                Component::Transform(NetTransform::default()),
            ],
        )?;
        if let Some(registry) = self.registry_mut() {
            registry.add(player_id);
        }
        if let Some(control) = self.authority_control() {
            self.broadcast_rpc(control, RpcMessage::SyncSettings(self.settings.clone()));
        }
        Ok(())
    }

    /// Spawns every live object on a client that just loaded in. Objects
    /// whose Spawn is still queued on the shared stream reach it that way.
    fn send_snapshot(&mut self, client_id: i32) -> Result<(), RoomError> {
        let queued: HashSet<u32> = self
            .stream
            .iter()
            .filter_map(|m| match m {
                GameDataMessage::Spawn(spawn) => Some(spawn.components.iter().map(|c| c.net_id)),
                _ => None,
            })
            .flatten()
            .collect();
        let mut spawns: Vec<SpawnMessage> = Vec::new();
        for object in self.objects.values().filter(|o| !queued.contains(&o.net_id)) {
            let data = ComponentData {
                net_id: object.net_id,
                data: object.spawn_bytes()?,
            };
            match spawns.last_mut() {
                Some(last)
                    if last.spawn_type == object.spawn_type
                        && last.owner_id == object.owner_id
                        && last.components.last().map(|c| c.net_id.wrapping_add(1))
                            == Some(object.net_id) =>
                {
                    last.components.push(data)
                }
                _ => spawns.push(SpawnMessage {
                    spawn_type: object.spawn_type,
                    owner_id: object.owner_id,
                    flags: 0,
                    components: vec![data],
                }),
            }
        }
        let messages: Vec<GameDataMessage> =
            spawns.into_iter().map(GameDataMessage::Spawn).collect();
        if !messages.is_empty() {
            self.targeted.entry(client_id).or_default().extend(messages);
        }
        Ok(())
    }

    fn ensure_lobby_objects(&mut self) -> Result<(), RoomError> {
        let has = |room: &Self, spawn_type: SpawnType| room.objects.values().any(|o| o.spawn_type == spawn_type);
        for spawn_type in [SpawnType::LobbyBehaviour, SpawnType::GameData] {
            if !has(self, spawn_type) {
                let components = Component::defaults_for(spawn_type, self.data.as_ref());
                self.spawn_prefab(spawn_type, GLOBAL_OWNER, 0, components)?;
            }
        }
        Ok(())
    }

    fn handle_ready(&mut self, client_id: i32) -> Result<(), RoomError> {
        self.players
            .get_mut(&client_id)
            .ok_or(RoomError::UnknownPlayer(client_id))?
            .ready = true;
        self.maybe_begin_round()
    }

    fn begin_starting(&mut self) -> Result<(), RoomError> {
        if self.state != RoomState::Lobby {
            debug!("room {} is already {:?}", self.code, self.state);
            return Ok(());
        }
        self.state = RoomState::Starting;
        self.events.push_back(RoomEvent::GameStarting);
        // Someone else already started the round
        self.buffered.retain(|intent| !matches!(intent, Intent::StartGame));
        if let Some(local) = self.local_id {
            if let Some(player) = self.players.get_mut(&local) {
                player.ready = true;
                self.stream.push(GameDataMessage::Ready { client_id: local });
            }
        }
        self.maybe_begin_round()
    }

    fn maybe_begin_round(&mut self) -> Result<(), RoomError> {
        if self.is_authority()
            && self.state == RoomState::Starting
            && self.players.values().all(|p| p.ready)
        {
            self.begin_round()?;
        }
        Ok(())
    }

    /// Swaps the lobby for the ship, picks impostors and hands out tasks.
    fn begin_round(&mut self) -> Result<(), RoomError> {
        info!("room {} starting round", self.code);
        self.state = RoomState::Started;
        let lobbies: Vec<u32> = self
            .objects
            .values()
            .filter(|o| o.spawn_type == SpawnType::LobbyBehaviour)
            .map(|o| o.net_id)
            .collect();
        for net_id in lobbies {
            self.despawn_object(net_id)?;
        }

        let map = self.settings.map;
        let ship_type = map.ship_spawn_type();
        let ship = Component::defaults_for(ship_type, self.data.as_ref());
        self.spawn_prefab(ship_type, GLOBAL_OWNER, 0, ship)?;

        let player_ids = self.sorted_player_ids();
        let impostor_count = usize::from(self.settings.impostors)
            .min(usize::from(max_impostors(self.settings.max_players)))
            .min(player_ids.len().saturating_sub(1));
        let mut shuffled = player_ids.clone();
        shuffled.shuffle(&mut self.rng);
        let mut impostors = shuffled[..impostor_count].to_vec();
        impostors.sort_unstable();
        if let Some(registry) = self.registry_mut() {
            for player_id in &impostors {
                if let Some(info) = registry.get_mut(*player_id) {
                    info.impostor = true;
                }
            }
        }
        if let Some(control) = self.authority_control() {
            self.broadcast_rpc(control, RpcMessage::SetInfected { impostors });
        }

        let counts = TaskCounts {
            common: usize::from(self.settings.common_tasks),
            long: usize::from(self.settings.long_tasks),
            short: usize::from(self.settings.short_tasks),
        };
        let data = Arc::clone(&self.data);
        let assigned = assign_tasks(
            &mut self.rng,
            data.tasks(map),
            counts,
            &player_ids,
            self.config.task_sanity_cap,
        );
        let registry_net_id = self.registry_net_id();
        for (player_id, tasks) in assigned {
            if let Some(registry) = self.registry_mut() {
                registry.set_tasks(player_id, &tasks);
            }
            if let Some(net_id) = registry_net_id {
                self.broadcast_rpc(
                    net_id,
                    RpcMessage::SetTasks {
                        player_id,
                        tasks: tasks.clone(),
                    },
                );
            }
            self.events
                .push_back(RoomEvent::TasksAssigned { player_id, tasks });
        }
        self.events.push_back(RoomEvent::GameStarted);
        Ok(())
    }

    /// Runs `f` against the ship with a system context, if a ship exists.
    fn with_ship<R>(&mut self, f: impl FnOnce(&mut ShipStatus, &mut SystemContext<'_>) -> R) -> Option<R> {
        let authority = self.is_authority();
        let ship = self.objects.values_mut().find_map(|o| match &mut o.component {
            Component::Ship(ship) => Some(ship),
            _ => None,
        })?;
        let mut ctx = SystemContext {
            rng: &mut self.rng,
            authority,
        };
        Some(f(ship, &mut ctx))
    }

    fn apply_repair(&mut self, player_id: u8, system: SystemType, amount: u8) {
        let events = self
            .with_ship(|ship, ctx| ship.systems_mut().repair(ctx, system, player_id, amount))
            .unwrap_or_default();
        self.handle_system_events(events);
    }

    fn close_doors(&mut self, room: SystemType) {
        if self.with_ship(|ship, _| ship.systems_mut().close_doors(room)) == Some(true) {
            self.events.push_back(RoomEvent::DoorsClosed(room));
        }
    }

    fn handle_system_events(&mut self, events: Vec<SystemEvent>) {
        for event in events {
            match event {
                SystemEvent::Sabotage(system) => {
                    info!("room {}: {:?} sabotaged", self.code, system);
                    self.events.push_back(RoomEvent::Sabotaged(system));
                }
                SystemEvent::Expired(system) => {
                    self.events.push_back(RoomEvent::SystemExpired(system));
                    if self.is_authority() && self.state == RoomState::Started {
                        self.end_game(GameOverReason::ImpostorBySabotage);
                    }
                }
            }
        }
    }

    fn start_meeting(&mut self, reporter: u8, body: Option<u8>) -> Result<(), RoomError> {
        if !self.is_authority() || self.state != RoomState::Started || self.meeting_net_id().is_some() {
            return Ok(());
        }
        let registry = self.registry().ok_or(RoomError::MissingObject("player registry"))?;
        if !registry.get(reporter).map_or(false, PlayerInfo::is_alive) {
            debug!("player {} can't call a meeting", reporter);
            return Ok(());
        }
        let entries: Vec<(u8, bool)> = registry
            .players()
            .map(|p| (p.player_id, !p.is_alive()))
            .collect();
        if let Some(control) = self.control_of(reporter) {
            self.broadcast_rpc(
                control,
                RpcMessage::StartMeeting {
                    player_id: body.unwrap_or(EMERGENCY_BUTTON),
                },
            );
        }
        let duration = (self.settings.discussion_time.max(0) + self.settings.voting_time.max(0)) as f32;
        let meeting = MeetingHud::new(&entries, reporter, duration);
        self.spawn_prefab(SpawnType::MeetingHud, self.host_id, 0, vec![Component::Meeting(meeting)])?;
        self.events.push_back(RoomEvent::MeetingStarted { reporter });
        Ok(())
    }

    fn apply_vote(&mut self, voter: u8, suspect: u8) -> Result<(), RoomError> {
        let all_voted = {
            let meeting = self
                .objects
                .values_mut()
                .find_map(|o| match &mut o.component {
                    Component::Meeting(meeting) => Some(meeting),
                    _ => None,
                })
                .ok_or(RoomError::MissingObject("meeting"))?;
            if !meeting.cast_vote(voter, suspect) {
                debug!("vote from {} rejected", voter);
                return Ok(());
            }
            meeting.all_voted()
        };
        if all_voted && self.is_authority() {
            self.complete_voting()?;
        }
        Ok(())
    }

    fn complete_voting(&mut self) -> Result<(), RoomError> {
        let net_id = self.meeting_net_id().ok_or(RoomError::MissingObject("meeting"))?;
        let (tally, states) = match self.meeting() {
            Some(meeting) => (meeting.tally(), meeting.state_bytes()),
            None => return Err(RoomError::MissingObject("meeting")),
        };
        self.broadcast_rpc(
            net_id,
            RpcMessage::VotingComplete {
                states,
                exiled: tally.exiled.unwrap_or(NO_EXILE),
                tie: tally.tie,
            },
        );
        self.events.push_back(RoomEvent::VotingComplete {
            exiled: tally.exiled,
            tie: tally.tie,
        });
        if let Some(exiled) = tally.exiled {
            if let Some(control) = self.control_of(exiled) {
                self.broadcast_rpc(control, RpcMessage::Exiled);
            }
            self.exile(exiled);
        }
        self.broadcast_rpc(net_id, RpcMessage::Close);
        self.despawn_object(net_id)?;
        self.check_for_end(EndTrigger::Vote);
        Ok(())
    }

    fn exile(&mut self, player_id: u8) {
        if let Some(info) = self.registry_mut().and_then(|r| r.get_mut(player_id)) {
            info.dead = true;
        }
        self.events.push_back(RoomEvent::PlayerExiled { player_id });
    }

    fn murder(&mut self, murderer: u8, victim: u8) {
        if self.is_authority() {
            let valid = self.registry().map_or(false, |registry| {
                let killer = registry.get(murderer);
                let target = registry.get(victim);
                matches!((killer, target), (Some(k), Some(t))
                    if k.impostor && k.is_alive() && !t.impostor && t.is_alive())
            });
            if !valid {
                warn!("room {}: rejected kill {} -> {}", self.code, murderer, victim);
                return;
            }
        }
        if let Some(info) = self.registry_mut().and_then(|r| r.get_mut(victim)) {
            info.dead = true;
        }
        self.events.push_back(RoomEvent::PlayerMurdered { victim });
        self.check_for_end(EndTrigger::Kill);
    }

    fn task_completed(&mut self, player_id: u8, index: u32) {
        if let Some(registry) = self.registry_mut() {
            registry.complete_task(player_id, index);
        }
        self.events
            .push_back(RoomEvent::TaskCompleted { player_id, index });
        self.check_for_end(EndTrigger::Task);
    }

    fn check_for_end(&mut self, trigger: EndTrigger) {
        if !self.is_authority() || self.state != RoomState::Started {
            return;
        }
        let Some(registry) = self.registry() else {
            return;
        };
        if registry.all_crew_tasks_done() {
            self.end_game(GameOverReason::HumansByTask);
            return;
        }
        let players: Vec<&PlayerInfo> = registry.players().collect();
        if !players.iter().any(|p| p.impostor) {
            return;
        }
        let impostors = players.iter().filter(|p| p.impostor && p.is_alive()).count();
        let crew = players.iter().filter(|p| !p.impostor && p.is_alive()).count();
        let reason = if impostors == 0 {
            match trigger {
                EndTrigger::Disconnect => GameOverReason::ImpostorDisconnect,
                _ => GameOverReason::HumansByVote,
            }
        } else if impostors >= crew {
            match trigger {
                EndTrigger::Vote => GameOverReason::ImpostorByVote,
                EndTrigger::Disconnect => GameOverReason::HumansDisconnect,
                EndTrigger::Kill | EndTrigger::Task => GameOverReason::ImpostorByKill,
            }
        } else {
            return;
        };
        self.end_game(reason);
    }

    fn end_game(&mut self, reason: GameOverReason) {
        info!("room {} over: {:?}", self.code, reason);
        self.state = RoomState::Ended;
        self.control.push(RootMessage::EndGame {
            code: self.code,
            reason,
            show_ad: false,
        });
        self.events.push_back(RoomEvent::GameEnded(reason));
    }

    /// Back to the lobby after a round, keeping players and settings.
    pub fn reset(&mut self) {
        self.state = RoomState::Lobby;
        self.objects.clear();
        for player in self.players.values_mut() {
            player.clear_character();
            player.ready = false;
            player.scene = None;
        }
        self.stream.clear();
        self.targeted.clear();
    }

    /// Advances timers and queues Data for whatever changed.
    pub fn fixed_update(&mut self, dt: f32) {
        let events = self
            .with_ship(|ship, ctx| ship.systems_mut().fixed_update(ctx, dt))
            .unwrap_or_default();
        self.handle_system_events(events);

        let authority = self.is_authority();
        let meeting_expired = self.objects.values_mut().any(|o| match &mut o.component {
            Component::Meeting(meeting) => meeting.fixed_update(dt),
            _ => false,
        });
        if meeting_expired && authority {
            if let Err(e) = self.complete_voting() {
                warn!("room {}: closing meeting failed: {}", self.code, e);
            }
        }

        let local = self.local_id;
        for object in self.objects.values_mut() {
            if !object.component.is_dirty() {
                continue;
            }
            if authority || Some(object.owner_id) == local {
                match object.data_bytes() {
                    Ok(data) => self.stream.push(GameDataMessage::Data {
                        net_id: object.net_id,
                        data,
                    }),
                    Err(e) => warn!("net id {} failed to serialize: {}", object.net_id, e),
                }
            }
            object.component.clear_dirty();
        }
    }

    /// Performs a local intent: directly when this peer is the authority,
    /// otherwise as a request to the host.
    pub fn request(&mut self, intent: Intent) -> Result<(), RoomError> {
        let authority = self.is_authority();
        if intent.host_only() && !self.is_host() {
            debug!("holding {:?} until this client hosts", intent);
            self.buffered.push(intent);
            return Ok(());
        }
        match intent {
            Intent::SetName(name) => {
                let (control, player_id) = self.local_control()?;
                if authority {
                    self.assign_name(player_id, control, &name);
                } else {
                    self.request_rpc(control, RpcMessage::CheckName { name });
                }
            }
            Intent::SetColor(color) => {
                let (control, player_id) = self.local_control()?;
                if authority {
                    self.assign_color(player_id, control, color);
                } else {
                    self.request_rpc(control, RpcMessage::CheckColor { color });
                }
            }
            Intent::Chat(message) => {
                let (control, player_id) = self.local_control()?;
                self.broadcast_rpc(
                    control,
                    RpcMessage::SendChat {
                        message: message.clone(),
                    },
                );
                self.events.push_back(RoomEvent::Chat { player_id, message });
            }
            Intent::Move { position, velocity } => {
                let net_id = self
                    .local_player()?
                    .transform_net_id
                    .ok_or(RoomError::MissingObject("local character"))?;
                if let Some(Component::Transform(transform)) =
                    self.objects.get_mut(&net_id).map(|o| &mut o.component)
                {
                    transform.move_to(position, velocity);
                }
            }
            Intent::CompleteTask(index) => {
                let (control, player_id) = self.local_control()?;
                self.broadcast_rpc(control, RpcMessage::CompleteTask { task_index: index });
                self.task_completed(player_id, index);
            }
            Intent::Repair { system, amount } => self.request_repair(system, amount)?,
            Intent::Sabotage(target) => self.request_repair(SystemType::Sabotage, u8::from(target))?,
            Intent::CloseDoors(room) => {
                let ship = self.ship_net_id().ok_or(RoomError::MissingObject("ship"))?;
                if authority {
                    self.close_doors(room);
                } else {
                    self.request_rpc(ship, RpcMessage::CloseDoorsOfType { system: room });
                }
            }
            Intent::Murder { victim } => {
                let (control, player_id) = self.local_control()?;
                let victim_net_id = self
                    .control_of(victim)
                    .ok_or(RoomError::MissingObject("victim"))?;
                self.broadcast_rpc(control, RpcMessage::MurderPlayer { victim_net_id });
                self.murder(player_id, victim);
            }
            Intent::StartGame => {
                if self.state == RoomState::Lobby {
                    self.control.push(RootMessage::StartGame { code: self.code });
                }
            }
            Intent::CallMeeting { body } => {
                let (control, player_id) = self.local_control()?;
                if authority {
                    self.start_meeting(player_id, body)?;
                } else {
                    self.request_rpc(
                        control,
                        RpcMessage::ReportDeadBody {
                            player_id: body.unwrap_or(EMERGENCY_BUTTON),
                        },
                    );
                }
            }
            Intent::Vote(target) => {
                let (_, voter) = self.local_control()?;
                let meeting = self.meeting_net_id().ok_or(RoomError::MissingObject("meeting"))?;
                let suspect = target.unwrap_or(SKIPPED_VOTE);
                if authority {
                    self.apply_vote(voter, suspect)?;
                } else {
                    self.request_rpc(meeting, RpcMessage::CastVote { voter, suspect });
                }
            }
        }
        Ok(())
    }

    fn request_repair(&mut self, system: SystemType, amount: u8) -> Result<(), RoomError> {
        let ship = self.ship_net_id().ok_or(RoomError::MissingObject("ship"))?;
        let (control, player_id) = self.local_control()?;
        if self.is_authority() {
            self.apply_repair(player_id, system, amount);
        } else {
            self.request_rpc(
                ship,
                RpcMessage::RepairSystem {
                    system,
                    player_net_id: control,
                    amount,
                },
            );
        }
        Ok(())
    }

    /// Picks a free spelling of `requested` and announces it.
    fn assign_name(&mut self, player_id: u8, control: u32, requested: &str) {
        let taken: HashSet<String> = self
            .registry()
            .map(|r| {
                r.players()
                    .filter(|p| p.player_id != player_id)
                    .map(|p| p.name.clone())
                    .collect()
            })
            .unwrap_or_default();
        let base = match requested.trim() {
            "" => "Player",
            trimmed => trimmed,
        };
        let mut name = base.to_string();
        let mut suffix = 1;
        while taken.contains(&name) {
            name = format!("{} {}", base, suffix);
            suffix += 1;
        }
        if let Some(info) = self.registry_mut().and_then(|r| r.get_mut(player_id)) {
            info.name = name.clone();
        }
        self.broadcast_rpc(control, RpcMessage::SetName { name });
    }

    /// Gives the player `requested`, or the next colour nobody wears.
    fn assign_color(&mut self, player_id: u8, control: u32, requested: u8) {
        let taken: HashSet<u32> = self
            .registry()
            .map(|r| {
                r.players()
                    .filter(|p| p.player_id != player_id)
                    .map(|p| p.color)
                    .collect()
            })
            .unwrap_or_default();
        let start = requested % COLOR_COUNT;
        let color = (0..COLOR_COUNT)
            .map(|offset| (start + offset) % COLOR_COUNT)
            .find(|c| !taken.contains(&u32::from(*c)))
            .unwrap_or(start);
        if let Some(info) = self.registry_mut().and_then(|r| r.get_mut(player_id)) {
            info.color = u32::from(color);
        }
        self.broadcast_rpc(control, RpcMessage::SetColor { color });
    }
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room")
            .field("code", &self.code)
            .field("host_id", &self.host_id)
            .field("state", &self.state)
            .field("players", &self.players.len())
            .field("objects", &self.objects.len())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::data::BuiltinData;
    use crate::systems::{ReactorSystem, SecurityCameraSystem};

    pub const CODE: i32 = 0x4142_4344;

    pub fn config() -> RoomConfig {
        RoomConfig {
            seed: Some(7),
            ..RoomConfig::default()
        }
    }

    /// A host-side room (client 1 hosting) with `clients` characters spawned.
    pub fn host_room(clients: i32) -> Room {
        let mut room = Room::new(CODE, 1, Some(1), GameSettings::default(), config(), Arc::new(BuiltinData));
        room.handle_join(1);
        room.enter_scene(ONLINE_SCENE).unwrap();
        for client in 2..=clients {
            room.handle_join(client);
            room.handle_game_data(
                Some(client),
                &GameDataMessage::SceneChange {
                    client_id: client,
                    scene: ONLINE_SCENE.into(),
                },
            )
            .unwrap();
        }
        room
    }

    pub fn start(room: &mut Room, clients: i32) {
        room.handle_payload(&RootMessage::StartGame { code: CODE }).unwrap();
        for client in 2..=clients {
            room.handle_game_data(Some(client), &GameDataMessage::Ready { client_id: client })
                .unwrap();
        }
    }

    /// A mirror for client `local` fed everything the host has sent.
    fn mirror_of(host: &mut Room, local: i32, clients: i32) -> Room {
        let mut mirror = Room::new(CODE, 1, Some(local), GameSettings::default(), config(), Arc::new(BuiltinData));
        for client in 1..=clients {
            mirror.handle_join(client);
        }
        host.fixed_update(0.0);
        for payload in host.take_outbound() {
            mirror.handle_payload(&payload).unwrap();
        }
        mirror
    }

    fn game_data(outbound: &[RootMessage]) -> Vec<GameDataMessage> {
        outbound
            .iter()
            .filter_map(|p| match p {
                RootMessage::GameData { messages, .. } => Some(messages.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Joins `client` to a room whose earlier traffic is already sent.
    fn late_load(room: &mut Room, client: i32) -> Vec<RootMessage> {
        room.take_outbound();
        room.handle_join(client);
        room.handle_game_data(
            Some(client),
            &GameDataMessage::SceneChange {
                client_id: client,
                scene: ONLINE_SCENE.into(),
            },
        )
        .unwrap();
        room.fixed_update(0.0);
        room.take_outbound()
    }

    #[test]
    fn test_late_loader_gets_existing_objects() {
        let mut room = host_room(2);
        let outbound = late_load(&mut room, 3);
        let snapshot: Vec<(SpawnType, i32, usize)> = outbound
            .iter()
            .filter_map(|p| match p {
                RootMessage::GameDataTo { target: 3, messages, .. } => Some(messages.clone()),
                _ => None,
            })
            .flatten()
            .filter_map(|m| match m {
                GameDataMessage::Spawn(s) => Some((s.spawn_type, s.owner_id, s.components.len())),
                _ => None,
            })
            .collect();
        assert_eq!(
            snapshot,
            vec![
                (SpawnType::LobbyBehaviour, GLOBAL_OWNER, 1),
                (SpawnType::GameData, GLOBAL_OWNER, 2),
                (SpawnType::Player, 1, 3),
                (SpawnType::Player, 2, 3),
            ]
        );
        assert!(matches!(outbound.first(), Some(RootMessage::GameDataTo { target: 3, .. })));
    }

    #[test]
    fn test_late_joiner_registry_matches_host() {
        let mut host = host_room(1);
        let outbound = late_load(&mut host, 2);

        let mut joiner = Room::new(CODE, 1, Some(2), GameSettings::default(), config(), Arc::new(BuiltinData));
        joiner.handle_join(1);
        joiner.handle_join(2);
        for payload in outbound {
            match &payload {
                RootMessage::GameData { .. } | RootMessage::GameDataTo { target: 2, .. } => {
                    joiner.handle_payload(&payload).unwrap()
                }
                _ => {}
            }
        }

        let ids = |room: &Room| -> Vec<u8> {
            let mut ids: Vec<u8> = room.registry().unwrap().players().map(|p| p.player_id).collect();
            ids.sort_unstable();
            ids
        };
        assert_eq!(ids(&host), vec![0, 1]);
        assert_eq!(ids(&joiner), ids(&host));
        assert!(joiner.player(1).unwrap().has_character());
        assert!(joiner.player(2).unwrap().has_character());
        assert_eq!(joiner.objects().count(), host.objects().count());
    }

    #[test]
    fn test_scene_change_spawns_lobby_and_character() {
        let mut room = host_room(1);
        let player = room.player(1).unwrap();
        assert_eq!(player.player_id, Some(0));
        assert!(player.has_character());

        let messages = game_data(&room.take_outbound());
        let spawns: Vec<SpawnType> = messages
            .iter()
            .filter_map(|m| match m {
                GameDataMessage::Spawn(s) => Some(s.spawn_type),
                _ => None,
            })
            .collect();
        assert_eq!(
            spawns,
            vec![SpawnType::LobbyBehaviour, SpawnType::GameData, SpawnType::Player]
        );
        assert!(matches!(messages[0], GameDataMessage::SceneChange { client_id: 1, .. }));
        assert!(messages
            .iter()
            .any(|m| matches!(m, GameDataMessage::Rpc { rpc: RpcMessage::SyncSettings(_), .. })));
        assert_eq!(room.registry().unwrap().len(), 1);
    }

    #[test]
    fn test_second_player_gets_next_id() {
        let room = host_room(3);
        assert_eq!(room.player(3).unwrap().player_id, Some(2));
        assert_eq!(room.registry().unwrap().len(), 3);
    }

    #[test]
    fn test_mirror_links_spawned_character() {
        let mut host = host_room(2);
        let mirror = mirror_of(&mut host, 2, 2);
        let player = mirror.player(2).unwrap();
        assert_eq!(player.player_id, Some(1));
        let control = player.control_net_id.unwrap();
        assert_eq!(mirror.object(control).unwrap().owner_id, 2);
        assert_eq!(mirror.registry().unwrap().len(), 2);
    }

    #[test]
    fn test_duplicate_and_unknown_net_ids() {
        let mut room = host_room(1);
        let net_id = room.player(1).unwrap().control_net_id.unwrap();
        let spawn = GameDataMessage::Spawn(SpawnMessage {
            spawn_type: SpawnType::Player,
            owner_id: 1,
            flags: 0,
            components: vec![ComponentData { net_id, data: vec![0, 0] }],
        });
        assert_eq!(
            room.handle_game_data(None, &spawn),
            Err(RoomError::DuplicateNetId(net_id))
        );
        assert_eq!(
            room.handle_game_data(None, &GameDataMessage::Despawn { net_id: 999 }),
            Err(RoomError::UnknownNetId(999))
        );
    }

    #[test]
    fn test_data_from_non_owner_rejected() {
        let mut room = host_room(3);
        let transform = room.player(2).unwrap().transform_net_id.unwrap();
        let data = vec![1, 0, 0, 0x80, 0, 0x80, 0, 0x80, 0, 0x80];
        assert_eq!(
            room.handle_game_data(Some(3), &GameDataMessage::Data { net_id: transform, data: data.clone() }),
            Err(RoomError::NotHost(3))
        );
        assert!(room
            .handle_game_data(Some(2), &GameDataMessage::Data { net_id: transform, data })
            .is_ok());
    }

    #[test]
    fn test_non_host_intent_goes_to_host() {
        let mut host = host_room(2);
        let mut mirror = mirror_of(&mut host, 2, 2);
        mirror.take_outbound();
        mirror.request(Intent::SetName("blue".into())).unwrap();
        let outbound = mirror.take_outbound();
        match outbound.as_slice() {
            [RootMessage::GameDataTo { target: 1, messages, .. }] => assert!(matches!(
                messages[0],
                GameDataMessage::Rpc { rpc: RpcMessage::CheckName { .. }, .. }
            )),
            other => panic!("unexpected outbound {:?}", other),
        }
    }

    #[test]
    fn test_host_only_intent_waits_for_promotion() {
        let mut host = host_room(2);
        let mut mirror = mirror_of(&mut host, 2, 2);
        mirror.take_outbound();
        mirror.request(Intent::StartGame).unwrap();
        assert!(mirror.take_outbound().is_empty());

        mirror.set_host(2);
        assert_eq!(
            mirror.take_outbound(),
            vec![RootMessage::StartGame { code: CODE }]
        );
    }

    #[test]
    fn test_buffered_start_dropped_once_started() {
        let mut host = host_room(2);
        let mut mirror = mirror_of(&mut host, 2, 2);
        mirror.request(Intent::StartGame).unwrap();
        mirror.handle_payload(&RootMessage::StartGame { code: CODE }).unwrap();
        mirror.take_outbound();

        mirror.set_host(2);
        assert!(!mirror
            .take_outbound()
            .iter()
            .any(|p| matches!(p, RootMessage::StartGame { .. })));
    }

    #[test]
    fn test_demoted_host_asks_new_host() {
        let mut room = host_room(2);
        room.take_outbound();
        room.set_host(2);
        assert!(!room.is_authority());

        room.request(Intent::SetName("red".into())).unwrap();
        match room.take_outbound().as_slice() {
            [RootMessage::GameDataTo { target: 2, messages, .. }] => assert!(matches!(
                messages[0],
                GameDataMessage::Rpc { rpc: RpcMessage::CheckName { .. }, .. }
            )),
            other => panic!("unexpected outbound {:?}", other),
        }
    }

    #[test]
    fn test_check_name_and_color_deduplicate() {
        let mut room = host_room(2);
        room.request(Intent::SetName("red".into())).unwrap();
        room.request(Intent::SetColor(3)).unwrap();
        let control = room.player(2).unwrap().control_net_id.unwrap();
        room.handle_game_data(
            Some(2),
            &GameDataMessage::Rpc {
                net_id: control,
                rpc: RpcMessage::CheckName { name: "red".into() },
            },
        )
        .unwrap();
        room.handle_game_data(
            Some(2),
            &GameDataMessage::Rpc {
                net_id: control,
                rpc: RpcMessage::CheckColor { color: 3 },
            },
        )
        .unwrap();
        let registry = room.registry().unwrap();
        assert_eq!(registry.get(1).unwrap().name, "red 1");
        assert_eq!(registry.get(1).unwrap().color, 4);
        assert_eq!(registry.get(0).unwrap().color, 3);
    }

    #[test]
    fn test_leave_despawns_only_on_authority() {
        let mut host = host_room(3);
        let mut mirror = mirror_of(&mut host, 3, 3);
        mirror.take_outbound();

        host.handle_leave(2).unwrap();
        let despawns = game_data(&host.take_outbound())
            .iter()
            .filter(|m| matches!(m, GameDataMessage::Despawn { .. }))
            .count();
        assert_eq!(despawns, 3);
        assert!(host.registry().unwrap().get(1).is_none());

        mirror.handle_leave(2).unwrap();
        assert!(game_data(&mirror.take_outbound()).is_empty());
        assert!(mirror.player(2).is_none());
    }

    #[test]
    fn test_round_assigns_roles_and_tasks() {
        let mut room = host_room(4);
        start(&mut room, 4);
        assert_eq!(room.state(), RoomState::Started);
        assert!(room.ship().is_some());
        assert!(!room
            .objects()
            .any(|o| o.spawn_type == SpawnType::LobbyBehaviour));

        let registry = room.registry().unwrap();
        let total = GameSettings::default().common_tasks as usize
            + GameSettings::default().long_tasks as usize
            + GameSettings::default().short_tasks as usize;
        for player in registry.players() {
            assert_eq!(player.tasks.len(), total);
        }
        assert_eq!(registry.players().filter(|p| p.impostor).count(), 1);
        let events = room.drain_events();
        assert!(events.contains(&RoomEvent::GameStarted));
    }

    #[test]
    fn test_round_waits_for_ready() {
        let mut room = host_room(2);
        room.handle_payload(&RootMessage::StartGame { code: CODE }).unwrap();
        assert_eq!(room.state(), RoomState::Starting);
        room.handle_game_data(Some(2), &GameDataMessage::Ready { client_id: 2 })
            .unwrap();
        assert_eq!(room.state(), RoomState::Started);
    }

    #[test]
    fn test_mirror_applies_repair_without_rebroadcast() {
        let mut host = host_room(2);
        start(&mut host, 2);
        let mut mirror = Room::new(CODE, 1, Some(2), GameSettings::default(), config(), Arc::new(BuiltinData));
        mirror.handle_join(1);
        mirror.handle_join(2);
        for payload in host.take_outbound() {
            if matches!(payload, RootMessage::GameData { .. }) {
                mirror.handle_payload(&payload).unwrap();
            }
        }
        let ship = mirror.ship_net_id().unwrap();
        let control = mirror.player(1).unwrap().control_net_id.unwrap();
        mirror
            .handle_game_data(
                None,
                &GameDataMessage::Rpc {
                    net_id: ship,
                    rpc: RpcMessage::RepairSystem {
                        system: SystemType::Security,
                        player_net_id: control,
                        amount: 1,
                    },
                },
            )
            .unwrap();
        let echoed = |outbound: &[RootMessage]| {
            outbound
                .iter()
                .filter_map(|p| match p {
                    RootMessage::GameData { messages, .. } | RootMessage::GameDataTo { messages, .. } => {
                        Some(messages.clone())
                    }
                    _ => None,
                })
                .flatten()
                .any(|m| match m {
                    GameDataMessage::Rpc {
                        rpc: RpcMessage::RepairSystem { .. },
                        ..
                    } => true,
                    GameDataMessage::Data { net_id, .. } => net_id == ship,
                    _ => false,
                })
        };
        assert!(!echoed(&mirror.take_outbound()));
        mirror.fixed_update(0.02);

        let cameras = mirror
            .ship()
            .unwrap()
            .systems()
            .downcast::<SecurityCameraSystem>(SystemType::Security)
            .unwrap();
        assert!(cameras.in_use());
        assert!(!echoed(&mirror.take_outbound()));
    }

    #[test]
    fn test_host_repair_syncs_ship() {
        let mut room = host_room(2);
        start(&mut room, 2);
        room.take_outbound();
        room.request(Intent::Repair {
            system: SystemType::Security,
            amount: 1,
        })
        .unwrap();
        room.fixed_update(0.02);
        let ship = room.ship_net_id().unwrap();
        assert!(game_data(&room.take_outbound())
            .iter()
            .any(|m| matches!(m, GameDataMessage::Data { net_id, .. } if *net_id == ship)));
    }

    #[test]
    fn test_sabotage_expiry_ends_round() {
        let mut room = host_room(3);
        start(&mut room, 3);
        room.drain_events();
        room.request(Intent::Sabotage(SystemType::Reactor)).unwrap();
        let reactor = room
            .ship()
            .unwrap()
            .systems()
            .downcast::<ReactorSystem>(SystemType::Reactor)
            .unwrap();
        assert!(reactor.countdown().is_active());

        room.fixed_update(31.0);
        assert_eq!(room.state(), RoomState::Ended);
        let events = room.drain_events();
        assert!(events.contains(&RoomEvent::Sabotaged(SystemType::Reactor)));
        assert!(events.contains(&RoomEvent::GameEnded(GameOverReason::ImpostorBySabotage)));
        assert!(room.take_outbound().contains(&RootMessage::EndGame {
            code: CODE,
            reason: GameOverReason::ImpostorBySabotage,
            show_ad: false,
        }));
    }

    #[test]
    fn test_vote_out_last_impostor() {
        let mut room = host_room(3);
        start(&mut room, 3);
        let impostor = room
            .registry()
            .unwrap()
            .players()
            .find(|p| p.impostor)
            .unwrap()
            .player_id;
        room.request(Intent::CallMeeting { body: None }).unwrap();
        let meeting = room.meeting_net_id().unwrap();
        assert_eq!(room.meeting().unwrap().states().len(), 3);

        room.request(Intent::Vote(Some(impostor))).unwrap();
        for (client, voter) in [(2, 1), (3, 2)] {
            room.handle_game_data(
                Some(client),
                &GameDataMessage::Rpc {
                    net_id: meeting,
                    rpc: RpcMessage::CastVote {
                        voter,
                        suspect: impostor,
                    },
                },
            )
            .unwrap();
        }
        assert!(room.meeting().is_none());
        assert!(room.registry().unwrap().get(impostor).unwrap().dead);
        assert_eq!(room.state(), RoomState::Ended);
        let events = room.drain_events();
        assert!(events.contains(&RoomEvent::VotingComplete {
            exiled: Some(impostor),
            tie: false
        }));
        assert!(events.contains(&RoomEvent::GameEnded(GameOverReason::HumansByVote)));
    }

    #[test]
    fn test_meeting_timer_closes_vote() {
        let mut room = host_room(3);
        start(&mut room, 3);
        room.request(Intent::CallMeeting { body: None }).unwrap();
        room.fixed_update(200.0);
        assert!(room.meeting().is_none());
        assert!(room.drain_events().contains(&RoomEvent::VotingComplete {
            exiled: None,
            tie: false
        }));
    }

    #[test]
    fn test_server_authority_mirror_decides() {
        let server_config = RoomConfig {
            authority: Authority::Server,
            ..config()
        };
        let mut server = Room::new(CODE, 1, None, GameSettings::default(), server_config.clone(), Arc::new(BuiltinData));
        server.handle_join(1);
        server
            .handle_game_data(
                Some(1),
                &GameDataMessage::SceneChange {
                    client_id: 1,
                    scene: ONLINE_SCENE.into(),
                },
            )
            .unwrap();
        assert!(server.is_authority());
        assert!(server.player(1).unwrap().has_character());

        let mut host = Room::new(CODE, 1, Some(1), GameSettings::default(), server_config, Arc::new(BuiltinData));
        host.handle_join(1);
        host.enter_scene(ONLINE_SCENE).unwrap();
        assert!(host.is_host());
        assert!(!host.is_authority());
        assert!(!host.player(1).unwrap().has_character());
    }

    #[test]
    fn test_wrong_room_payload() {
        let mut room = host_room(1);
        assert_eq!(
            room.handle_payload(&RootMessage::StartGame { code: 5 }),
            Err(RoomError::WrongRoom {
                expected: CODE,
                got: 5
            })
        );
    }

    #[test]
    fn test_tick_interval() {
        assert_eq!(
            RoomConfig::default().tick_interval(),
            Some(Duration::from_millis(20))
        );
        let off = RoomConfig {
            tick_rate: None,
            ..RoomConfig::default()
        };
        assert_eq!(off.tick_interval(), None);
    }
}
