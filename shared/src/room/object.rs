//! Networked objects and the components they carry.

use crate::codec::{HazelReader, HazelWriter, Vector2};
use crate::data::MapData;
use crate::enums::SpawnType;
use crate::error::CodecResult;
use crate::transport::sequence_greater;

use super::gamedata::PlayerRegistry;
use super::meeting::MeetingHud;
use super::ship::{map_for_prefab, ShipStatus};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlayerControl {
    pub is_new: bool,
    pub player_id: u8,
}

impl PlayerControl {
    pub fn new(player_id: u8, is_new: bool) -> Self {
        Self { is_new, player_id }
    }
}

/// Position sync for a player. Updates carry a sequence number and stale
/// ones are ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NetTransform {
    pub seq: u16,
    pub position: Vector2,
    pub velocity: Vector2,
    dirty: bool,
}

impl NetTransform {
    /// Local movement; sent on the next tick.
    pub fn move_to(&mut self, position: Vector2, velocity: Vector2) {
        self.seq = self.seq.wrapping_add(1);
        self.position = position;
        self.velocity = velocity;
        self.dirty = true;
    }

    /// Applies a snap if `seq` is newer than what we have.
    pub fn snap_to(&mut self, position: Vector2, seq: u16) -> bool {
        if !sequence_greater(seq, self.seq) {
            return false;
        }
        self.seq = seq;
        self.position = position;
        self.velocity = Vector2::ZERO;
        true
    }
}

#[derive(Debug)]
pub enum Component {
    PlayerControl(PlayerControl),
    PlayerPhysics,
    Transform(NetTransform),
    Ship(ShipStatus),
    Meeting(MeetingHud),
    Lobby,
    Registry(PlayerRegistry),
    /// A component this build has no model for; its bytes are kept verbatim.
    Opaque(Vec<u8>),
}

impl Component {
    /// Fresh components for a prefab, in spawn order.
    pub fn defaults_for(spawn_type: SpawnType, data: &dyn MapData) -> Vec<Component> {
        if let Some(map) = map_for_prefab(spawn_type) {
            return vec![Component::Ship(ShipStatus::new(map, data))];
        }
        match spawn_type {
            SpawnType::MeetingHud => vec![Component::Meeting(MeetingHud::default())],
            SpawnType::LobbyBehaviour => vec![Component::Lobby],
            SpawnType::GameData => vec![
                Component::Registry(PlayerRegistry::default()),
                Component::Opaque(vec![0]),
            ],
            SpawnType::Player => vec![
                Component::PlayerControl(PlayerControl::default()),
                Component::PlayerPhysics,
                Component::Transform(NetTransform::default()),
            ],
            _ => Vec::new(),
        }
    }

    pub fn deserialize(&mut self, r: &mut HazelReader<'_>, spawn: bool) -> CodecResult<()> {
        match self {
            Self::PlayerControl(control) => {
                if spawn {
                    control.is_new = r.bool()?;
                }
                control.player_id = r.u8()?;
            }
            Self::Transform(transform) => {
                if spawn {
                    transform.position = r.vector2()?;
                    transform.velocity = r.vector2()?;
                } else {
                    let seq = r.u16()?;
                    let position = r.vector2()?;
                    let velocity = r.vector2()?;
                    if sequence_greater(seq, transform.seq) {
                        transform.seq = seq;
                        transform.position = position;
                        transform.velocity = velocity;
                    }
                }
            }
            Self::Ship(ship) => ship.deserialize(r, spawn)?,
            Self::Meeting(meeting) => meeting.deserialize(r, spawn)?,
            Self::Registry(registry) => registry.deserialize(r, spawn)?,
            Self::Opaque(data) => *data = r.rest().to_vec(),
            Self::PlayerPhysics | Self::Lobby => {}
        }
        Ok(())
    }

    pub fn serialize(&self, w: &mut HazelWriter, spawn: bool) -> CodecResult<()> {
        match self {
            Self::PlayerControl(control) => {
                if spawn {
                    w.bool(control.is_new);
                }
                w.u8(control.player_id);
            }
            Self::Transform(transform) => {
                if !spawn {
                    w.u16(transform.seq);
                }
                w.vector2(transform.position);
                w.vector2(transform.velocity);
            }
            Self::Ship(ship) => ship.serialize(w, spawn)?,
            Self::Meeting(meeting) => meeting.serialize(w, spawn),
            Self::Registry(registry) => registry.serialize(w, spawn)?,
            Self::Opaque(data) => w.bytes(data),
            Self::PlayerPhysics | Self::Lobby => {}
        }
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        match self {
            Self::Transform(transform) => transform.dirty,
            Self::Ship(ship) => ship.is_dirty(),
            Self::Meeting(meeting) => meeting.is_dirty(),
            Self::Registry(registry) => registry.is_dirty(),
            Self::PlayerControl(_) | Self::Opaque(_) | Self::PlayerPhysics | Self::Lobby => false,
        }
    }

    pub fn clear_dirty(&mut self) {
        match self {
            Self::Transform(transform) => transform.dirty = false,
            Self::Ship(ship) => ship.clear_dirty(),
            Self::Meeting(meeting) => meeting.clear_dirty(),
            Self::Registry(registry) => registry.clear_dirty(),
            Self::PlayerControl(_) | Self::Opaque(_) | Self::PlayerPhysics | Self::Lobby => {}
        }
    }
}

/// One component of a spawned prefab, addressed by its own net id.
#[derive(Debug)]
pub struct NetObject {
    pub net_id: u32,
    /// Client id of the owner, or [`GLOBAL_OWNER`](crate::gamedata::GLOBAL_OWNER).
    pub owner_id: i32,
    pub spawn_type: SpawnType,
    pub component: Component,
}

impl NetObject {
    pub fn spawn_bytes(&self) -> CodecResult<Vec<u8>> {
        let mut w = HazelWriter::new();
        self.component.serialize(&mut w, true)?;
        w.finish()
    }

    pub fn data_bytes(&self) -> CodecResult<Vec<u8>> {
        let mut w = HazelWriter::new();
        self.component.serialize(&mut w, false)?;
        w.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::BuiltinData;

    #[test]
    fn test_player_prefab_components() {
        let components = Component::defaults_for(SpawnType::Player, &BuiltinData);
        assert!(matches!(components[0], Component::PlayerControl(_)));
        assert!(matches!(components[2], Component::Transform(_)));
        assert!(Component::defaults_for(SpawnType::Unknown(40), &BuiltinData).is_empty());
        assert!(matches!(
            Component::defaults_for(SpawnType::Airship, &BuiltinData)[0],
            Component::Ship(_)
        ));
    }

    #[test]
    fn test_transform_rejects_stale_updates() {
        let mut component = Component::Transform(NetTransform::default());
        let newer = [5, 0, 0xFF, 0xFF, 0xFF, 0xFF, 0, 0x80, 0, 0x80];
        component
            .deserialize(&mut HazelReader::new(&newer), false)
            .unwrap();
        let stale = [4, 0, 0, 0, 0, 0, 0, 0x80, 0, 0x80];
        component
            .deserialize(&mut HazelReader::new(&stale), false)
            .unwrap();
        match component {
            Component::Transform(t) => {
                assert_eq!(t.seq, 5);
                assert_eq!(t.position, Vector2::new(50.0, 50.0));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_transform_seq_wraps() {
        let mut transform = NetTransform {
            seq: u16::MAX,
            ..NetTransform::default()
        };
        assert!(transform.snap_to(Vector2::new(1.0, 1.0), 0));
        assert!(!transform.snap_to(Vector2::new(2.0, 2.0), u16::MAX));
    }

    #[test]
    fn test_control_spawn_and_data() {
        let mut component = Component::PlayerControl(PlayerControl::new(3, true));
        let mut w = HazelWriter::new();
        component.serialize(&mut w, true).unwrap();
        assert_eq!(w.finish().unwrap(), vec![1, 3]);

        component
            .deserialize(&mut HazelReader::new(&[7]), false)
            .unwrap();
        match component {
            Component::PlayerControl(c) => assert_eq!((c.player_id, c.is_new), (7, true)),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_opaque_passthrough() {
        let mut component = Component::Opaque(Vec::new());
        component
            .deserialize(&mut HazelReader::new(&[1, 2, 3]), true)
            .unwrap();
        let mut w = HazelWriter::new();
        component.serialize(&mut w, false).unwrap();
        assert_eq!(w.finish().unwrap(), vec![1, 2, 3]);
    }
}
