//! RPC bodies, one variant per call id.

use serde::{Deserialize, Serialize};

use crate::codec::{HazelReader, HazelWriter, Vector2};
use crate::enums::{RpcTag, SystemType};
use crate::error::CodecResult;
use crate::settings::GameSettings;

/// Player id sent with ReportDeadBody when the emergency button was pressed.
pub const EMERGENCY_BUTTON: u8 = 255;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RpcMessage {
    PlayAnimation { task_type: u8 },
    CompleteTask { task_index: u32 },
    SyncSettings(GameSettings),
    SetInfected { impostors: Vec<u8> },
    Exiled,
    CheckName { name: String },
    SetName { name: String },
    CheckColor { color: u8 },
    SetColor { color: u8 },
    SetHat { hat: u32 },
    SetSkin { skin: u32 },
    ReportDeadBody { player_id: u8 },
    MurderPlayer { victim_net_id: u32 },
    SendChat { message: String },
    StartMeeting { player_id: u8 },
    SetScanner { scanning: bool, seq: u8 },
    SendChatNote { player_id: u8, note: u8 },
    SetPet { pet: u32 },
    SetStartCounter { seq: u32, seconds: i8 },
    EnterVent { vent_id: u32 },
    ExitVent { vent_id: u32 },
    SnapTo { position: Vector2, seq: u16 },
    Close,
    VotingComplete { states: Vec<u8>, exiled: u8, tie: bool },
    CastVote { voter: u8, suspect: u8 },
    ClearVote,
    AddVote { voter: i32, target: i32 },
    CloseDoorsOfType { system: SystemType },
    RepairSystem { system: SystemType, player_net_id: u32, amount: u8 },
    SetTasks { player_id: u8, tasks: Vec<u8> },
    ClimbLadder { ladder_id: u8, seq: u8 },
    UsePlatform,
    /// Call id this build doesn't know; body kept verbatim.
    Unknown { call_id: u8, data: Vec<u8> },
}

fn byte_list(r: &mut HazelReader<'_>) -> CodecResult<Vec<u8>> {
    let count = r.upacked()? as usize;
    (0..count).map(|_| r.u8()).collect()
}

fn write_byte_list(w: &mut HazelWriter, list: &[u8]) {
    w.upacked(list.len() as u32);
    w.bytes(list);
}

impl RpcMessage {
    pub fn call_id(&self) -> u8 {
        let tag = match self {
            Self::PlayAnimation { .. } => RpcTag::PlayAnimation,
            Self::CompleteTask { .. } => RpcTag::CompleteTask,
            Self::SyncSettings(_) => RpcTag::SyncSettings,
            Self::SetInfected { .. } => RpcTag::SetInfected,
            Self::Exiled => RpcTag::Exiled,
            Self::CheckName { .. } => RpcTag::CheckName,
            Self::SetName { .. } => RpcTag::SetName,
            Self::CheckColor { .. } => RpcTag::CheckColor,
            Self::SetColor { .. } => RpcTag::SetColor,
            Self::SetHat { .. } => RpcTag::SetHat,
            Self::SetSkin { .. } => RpcTag::SetSkin,
            Self::ReportDeadBody { .. } => RpcTag::ReportDeadBody,
            Self::MurderPlayer { .. } => RpcTag::MurderPlayer,
            Self::SendChat { .. } => RpcTag::SendChat,
            Self::StartMeeting { .. } => RpcTag::StartMeeting,
            Self::SetScanner { .. } => RpcTag::SetScanner,
            Self::SendChatNote { .. } => RpcTag::SendChatNote,
            Self::SetPet { .. } => RpcTag::SetPet,
            Self::SetStartCounter { .. } => RpcTag::SetStartCounter,
            Self::EnterVent { .. } => RpcTag::EnterVent,
            Self::ExitVent { .. } => RpcTag::ExitVent,
            Self::SnapTo { .. } => RpcTag::SnapTo,
            Self::Close => RpcTag::Close,
            Self::VotingComplete { .. } => RpcTag::VotingComplete,
            Self::CastVote { .. } => RpcTag::CastVote,
            Self::ClearVote => RpcTag::ClearVote,
            Self::AddVote { .. } => RpcTag::AddVote,
            Self::CloseDoorsOfType { .. } => RpcTag::CloseDoorsOfType,
            Self::RepairSystem { .. } => RpcTag::RepairSystem,
            Self::SetTasks { .. } => RpcTag::SetTasks,
            Self::ClimbLadder { .. } => RpcTag::ClimbLadder,
            Self::UsePlatform => RpcTag::UsePlatform,
            Self::Unknown { call_id, .. } => return *call_id,
        };
        tag.into()
    }

    /// Calls only the host may broadcast; everyone else asks for them.
    pub fn host_only(&self) -> bool {
        matches!(
            self,
            Self::SyncSettings(_)
                | Self::SetInfected { .. }
                | Self::Exiled
                | Self::SetName { .. }
                | Self::SetColor { .. }
                | Self::StartMeeting { .. }
                | Self::Close
                | Self::VotingComplete { .. }
                | Self::SetTasks { .. }
        )
    }

    /// Parses the body of an RPC whose call id has already been read.
    pub fn decode(call_id: u8, r: &mut HazelReader<'_>) -> CodecResult<Self> {
        Ok(match RpcTag::from(call_id) {
            RpcTag::PlayAnimation => Self::PlayAnimation { task_type: r.u8()? },
            RpcTag::CompleteTask => Self::CompleteTask {
                task_index: r.upacked()?,
            },
            RpcTag::SyncSettings => Self::SyncSettings(GameSettings::decode(r)?),
            RpcTag::SetInfected => Self::SetInfected {
                impostors: byte_list(r)?,
            },
            RpcTag::Exiled => Self::Exiled,
            RpcTag::CheckName => Self::CheckName { name: r.string()? },
            RpcTag::SetName => Self::SetName { name: r.string()? },
            RpcTag::CheckColor => Self::CheckColor { color: r.u8()? },
            RpcTag::SetColor => Self::SetColor { color: r.u8()? },
            RpcTag::SetHat => Self::SetHat { hat: r.upacked()? },
            RpcTag::SetSkin => Self::SetSkin { skin: r.upacked()? },
            RpcTag::ReportDeadBody => Self::ReportDeadBody { player_id: r.u8()? },
            RpcTag::MurderPlayer => Self::MurderPlayer {
                victim_net_id: r.upacked()?,
            },
            RpcTag::SendChat => Self::SendChat { message: r.string()? },
            RpcTag::StartMeeting => Self::StartMeeting { player_id: r.u8()? },
            RpcTag::SetScanner => Self::SetScanner {
                scanning: r.bool()?,
                seq: r.u8()?,
            },
            RpcTag::SendChatNote => Self::SendChatNote {
                player_id: r.u8()?,
                note: r.u8()?,
            },
            RpcTag::SetPet => Self::SetPet { pet: r.upacked()? },
            RpcTag::SetStartCounter => Self::SetStartCounter {
                seq: r.upacked()?,
                seconds: r.i8()?,
            },
            RpcTag::EnterVent => Self::EnterVent { vent_id: r.upacked()? },
            RpcTag::ExitVent => Self::ExitVent { vent_id: r.upacked()? },
            RpcTag::SnapTo => Self::SnapTo {
                position: r.vector2()?,
                seq: r.u16()?,
            },
            RpcTag::Close => Self::Close,
            RpcTag::VotingComplete => Self::VotingComplete {
                states: byte_list(r)?,
                exiled: r.u8()?,
                tie: r.bool()?,
            },
            RpcTag::CastVote => Self::CastVote {
                voter: r.u8()?,
                suspect: r.u8()?,
            },
            RpcTag::ClearVote => Self::ClearVote,
            RpcTag::AddVote => Self::AddVote {
                voter: r.i32()?,
                target: r.i32()?,
            },
            RpcTag::CloseDoorsOfType => Self::CloseDoorsOfType {
                system: r.u8()?.into(),
            },
            RpcTag::RepairSystem => Self::RepairSystem {
                system: r.u8()?.into(),
                player_net_id: r.upacked()?,
                amount: r.u8()?,
            },
            RpcTag::SetTasks => Self::SetTasks {
                player_id: r.u8()?,
                tasks: byte_list(r)?,
            },
            RpcTag::ClimbLadder => Self::ClimbLadder {
                ladder_id: r.u8()?,
                seq: r.u8()?,
            },
            RpcTag::UsePlatform => Self::UsePlatform,
            RpcTag::Unknown(call_id) => Self::Unknown {
                call_id,
                data: r.rest().to_vec(),
            },
        })
    }

    /// Writes the body only; the caller frames it with net id and call id.
    pub fn encode(&self, w: &mut HazelWriter) {
        match self {
            Self::PlayAnimation { task_type } => w.u8(*task_type),
            Self::CompleteTask { task_index } => w.upacked(*task_index),
            Self::SyncSettings(settings) => settings.encode(w),
            Self::SetInfected { impostors } => write_byte_list(w, impostors),
            Self::Exiled | Self::Close | Self::ClearVote | Self::UsePlatform => {}
            Self::CheckName { name } | Self::SetName { name } => w.string(name),
            Self::CheckColor { color } | Self::SetColor { color } => w.u8(*color),
            Self::SetHat { hat } => w.upacked(*hat),
            Self::SetSkin { skin } => w.upacked(*skin),
            Self::ReportDeadBody { player_id } | Self::StartMeeting { player_id } => {
                w.u8(*player_id)
            }
            Self::MurderPlayer { victim_net_id } => w.upacked(*victim_net_id),
            Self::SendChat { message } => w.string(message),
            Self::SetScanner { scanning, seq } => {
                w.bool(*scanning);
                w.u8(*seq);
            }
            Self::SendChatNote { player_id, note } => {
                w.u8(*player_id);
                w.u8(*note);
            }
            Self::SetPet { pet } => w.upacked(*pet),
            Self::SetStartCounter { seq, seconds } => {
                w.upacked(*seq);
                w.i8(*seconds);
            }
            Self::EnterVent { vent_id } | Self::ExitVent { vent_id } => w.upacked(*vent_id),
            Self::SnapTo { position, seq } => {
                w.vector2(*position);
                w.u16(*seq);
            }
            Self::VotingComplete {
                states,
                exiled,
                tie,
            } => {
                write_byte_list(w, states);
                w.u8(*exiled);
                w.bool(*tie);
            }
            Self::CastVote { voter, suspect } => {
                w.u8(*voter);
                w.u8(*suspect);
            }
            Self::AddVote { voter, target } => {
                w.i32(*voter);
                w.i32(*target);
            }
            Self::CloseDoorsOfType { system } => w.u8((*system).into()),
            Self::RepairSystem {
                system,
                player_net_id,
                amount,
            } => {
                w.u8((*system).into());
                w.upacked(*player_net_id);
                w.u8(*amount);
            }
            Self::SetTasks { player_id, tasks } => {
                w.u8(*player_id);
                write_byte_list(w, tasks);
            }
            Self::ClimbLadder { ladder_id, seq } => {
                w.u8(*ladder_id);
                w.u8(*seq);
            }
            Self::Unknown { data, .. } => w.bytes(data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(rpc: &RpcMessage) -> Vec<u8> {
        let mut w = HazelWriter::new();
        rpc.encode(&mut w);
        w.finish().unwrap()
    }

    #[test]
    fn test_repair_system_bytes() {
        let rpc = RpcMessage::RepairSystem {
            system: SystemType::Reactor,
            player_net_id: 300,
            amount: 0x80,
        };
        assert_eq!(rpc.call_id(), 28);
        assert_eq!(body(&rpc), vec![3, 0xAC, 0x02, 0x80]);
    }

    #[test]
    fn test_set_tasks_bytes() {
        let rpc = RpcMessage::SetTasks {
            player_id: 2,
            tasks: vec![0, 5, 9],
        };
        let bytes = body(&rpc);
        assert_eq!(bytes, vec![2, 3, 0, 5, 9]);
        let back = RpcMessage::decode(29, &mut HazelReader::new(&bytes)).unwrap();
        assert_eq!(back, rpc);
    }

    #[test]
    fn test_voting_complete_golden() {
        let bytes = [2, 0x41, 0x80, 0, 0];
        let rpc = RpcMessage::decode(23, &mut HazelReader::new(&bytes)).unwrap();
        assert_eq!(
            rpc,
            RpcMessage::VotingComplete {
                states: vec![0x41, 0x80],
                exiled: 0,
                tie: false
            }
        );
        assert_eq!(body(&rpc), bytes);
    }

    #[test]
    fn test_snap_to_keeps_quantized_position() {
        let bytes = [0x10, 0x27, 0xFF, 0x7F, 7, 0];
        let rpc = RpcMessage::decode(21, &mut HazelReader::new(&bytes)).unwrap();
        assert_eq!(body(&rpc), bytes);
    }

    #[test]
    fn test_unknown_call_is_opaque() {
        let bytes = [9, 8, 7];
        let rpc = RpcMessage::decode(120, &mut HazelReader::new(&bytes)).unwrap();
        assert_eq!(
            rpc,
            RpcMessage::Unknown {
                call_id: 120,
                data: vec![9, 8, 7]
            }
        );
        assert_eq!(rpc.call_id(), 120);
        assert_eq!(body(&rpc), bytes);
    }

    #[test]
    fn test_truncated_body() {
        assert!(RpcMessage::decode(26, &mut HazelReader::new(&[1, 0, 0])).is_err());
    }
}
