//! Messages nested inside GameData and GameDataTo payloads.

use serde::{Deserialize, Serialize};

use crate::codec::{HazelReader, HazelWriter};
use crate::enums::{GameDataTag, SpawnType};
use crate::error::CodecResult;
use crate::packet::DecodeOptions;
use crate::rpc::RpcMessage;

/// Owner id of objects that belong to the room rather than a client.
pub const GLOBAL_OWNER: i32 = -2;

/// Spawn flag marking the prefab as a client's own character.
pub const SPAWN_FLAG_CLIENT_CHARACTER: u8 = 1;

/// Tag of the message wrapping each component's spawn data.
const COMPONENT_DATA_TAG: u8 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentData {
    pub net_id: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnMessage {
    pub spawn_type: SpawnType,
    pub owner_id: i32,
    pub flags: u8,
    pub components: Vec<ComponentData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GameDataMessage {
    Data { net_id: u32, data: Vec<u8> },
    Rpc { net_id: u32, rpc: RpcMessage },
    Spawn(SpawnMessage),
    Despawn { net_id: u32 },
    SceneChange { client_id: i32, scene: String },
    Ready { client_id: i32 },
    ClientInfo { client_id: i32, platform: u32 },
    Unknown { tag: u8, data: Vec<u8> },
}

impl GameDataMessage {
    pub fn tag(&self) -> u8 {
        let tag = match self {
            Self::Data { .. } => GameDataTag::Data,
            Self::Rpc { .. } => GameDataTag::Rpc,
            Self::Spawn(_) => GameDataTag::Spawn,
            Self::Despawn { .. } => GameDataTag::Despawn,
            Self::SceneChange { .. } => GameDataTag::SceneChange,
            Self::Ready { .. } => GameDataTag::Ready,
            Self::ClientInfo { .. } => GameDataTag::ClientInfo,
            Self::Unknown { tag, .. } => return *tag,
        };
        tag.into()
    }

    /// Net id this message targets, if any.
    pub fn net_id(&self) -> Option<u32> {
        match self {
            Self::Data { net_id, .. } | Self::Rpc { net_id, .. } | Self::Despawn { net_id } => {
                Some(*net_id)
            }
            _ => None,
        }
    }

    /// Parses one framed game-data message. Returns `None` for unknown tags
    /// and RPC ids when `options` drops unknowns.
    pub fn decode(
        tag: u8,
        r: &mut HazelReader<'_>,
        options: &DecodeOptions,
    ) -> CodecResult<Option<Self>> {
        let message = match GameDataTag::from(tag) {
            GameDataTag::Data => Self::Data {
                net_id: r.upacked()?,
                data: r.rest().to_vec(),
            },
            GameDataTag::Rpc => {
                let net_id = r.upacked()?;
                let call_id = r.u8()?;
                let rpc = RpcMessage::decode(call_id, r)?;
                if matches!(rpc, RpcMessage::Unknown { .. }) && !options.retain_unknown {
                    return Ok(None);
                }
                Self::Rpc { net_id, rpc }
            }
            GameDataTag::Spawn => {
                let spawn_type = SpawnType::from(r.upacked()?);
                let owner_id = r.packed()?;
                let flags = r.u8()?;
                let count = r.upacked()? as usize;
                let mut components = Vec::with_capacity(count.min(16));
                for _ in 0..count {
                    let net_id = r.upacked()?;
                    let (_, mut body) = r.message()?;
                    components.push(ComponentData {
                        net_id,
                        data: body.rest().to_vec(),
                    });
                }
                Self::Spawn(SpawnMessage {
                    spawn_type,
                    owner_id,
                    flags,
                    components,
                })
            }
            GameDataTag::Despawn => Self::Despawn {
                net_id: r.upacked()?,
            },
            GameDataTag::SceneChange => Self::SceneChange {
                client_id: r.packed()?,
                scene: r.string()?,
            },
            GameDataTag::Ready => Self::Ready {
                client_id: r.packed()?,
            },
            GameDataTag::ClientInfo => Self::ClientInfo {
                client_id: r.packed()?,
                platform: r.upacked()?,
            },
            GameDataTag::Unknown(tag) => {
                if !options.retain_unknown {
                    return Ok(None);
                }
                Self::Unknown {
                    tag,
                    data: r.rest().to_vec(),
                }
            }
        };
        Ok(Some(message))
    }

    /// Writes the message including its own frame.
    pub fn encode(&self, w: &mut HazelWriter) -> CodecResult<()> {
        w.message(self.tag(), |w| {
            match self {
                Self::Data { net_id, data } => {
                    w.upacked(*net_id);
                    w.bytes(data);
                }
                Self::Rpc { net_id, rpc } => {
                    w.upacked(*net_id);
                    w.u8(rpc.call_id());
                    rpc.encode(w);
                }
                Self::Spawn(spawn) => {
                    w.upacked(spawn.spawn_type.into());
                    w.packed(spawn.owner_id);
                    w.u8(spawn.flags);
                    w.upacked(spawn.components.len() as u32);
                    for component in &spawn.components {
                        w.upacked(component.net_id);
                        w.message(COMPONENT_DATA_TAG, |w| {
                            w.bytes(&component.data);
                            Ok(())
                        })?;
                    }
                }
                Self::Despawn { net_id } => w.upacked(*net_id),
                Self::SceneChange { client_id, scene } => {
                    w.packed(*client_id);
                    w.string(scene);
                }
                Self::Ready { client_id } => w.packed(*client_id),
                Self::ClientInfo {
                    client_id,
                    platform,
                } => {
                    w.packed(*client_id);
                    w.upacked(*platform);
                }
                Self::Unknown { data, .. } => w.bytes(data),
            }
            Ok(())
        })
    }
}

/// Reads every nested message left in `r`, in order.
pub fn decode_all(
    r: &mut HazelReader<'_>,
    options: &DecodeOptions,
) -> CodecResult<Vec<GameDataMessage>> {
    let mut out = Vec::new();
    for item in r.messages() {
        let (tag, mut body) = item?;
        if let Some(message) = GameDataMessage::decode(tag, &mut body, options)? {
            out.push(message);
        }
    }
    Ok(out)
}

pub fn encode_all(w: &mut HazelWriter, messages: &[GameDataMessage]) -> CodecResult<()> {
    messages.iter().try_for_each(|m| m.encode(w))
}
