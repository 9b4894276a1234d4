//! Top-level payloads carried by Reliable and Unreliable packets.
//!
//! Several payloads share a tag but differ in shape depending on who sends
//! them, so decoding needs the [`Direction`] of travel.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::codec::{HazelReader, HazelWriter};
use crate::enums::{AlterGameTag, DisconnectReason, GameMap, GameOverReason, RootMessageTag};
use crate::error::CodecResult;
use crate::gamedata::{self, GameDataMessage};
use crate::packet::{DecodeOptions, Direction};
use crate::settings::GameSettings;

const LISTING_TAG: u8 = 0;
const LISTINGS_TAG: u8 = 0;
const COUNTS_TAG: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameListing {
    pub ip: Ipv4Addr,
    pub port: u16,
    pub code: i32,
    pub host_name: String,
    pub player_count: u8,
    pub age: u32,
    pub map: GameMap,
    pub impostors: u8,
    pub max_players: u8,
}

impl GameListing {
    fn decode(r: &mut HazelReader<'_>) -> CodecResult<Self> {
        let ip = r.bytes(4)?;
        Ok(Self {
            ip: Ipv4Addr::new(ip[0], ip[1], ip[2], ip[3]),
            port: r.u16()?,
            code: r.i32()?,
            host_name: r.string()?,
            player_count: r.u8()?,
            age: r.upacked()?,
            map: r.u8()?.into(),
            impostors: r.u8()?,
            max_players: r.u8()?,
        })
    }

    fn encode(&self, w: &mut HazelWriter) {
        w.bytes(&self.ip.octets());
        w.u16(self.port);
        w.i32(self.code);
        w.string(&self.host_name);
        w.u8(self.player_count);
        w.upacked(self.age);
        w.u8(self.map.into());
        w.u8(self.impostors);
        w.u8(self.max_players);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RootMessage {
    HostGameRequest {
        settings: GameSettings,
    },
    HostGameResponse {
        code: i32,
    },
    JoinGameRequest {
        code: i32,
        map_ownership: Option<u8>,
    },
    /// Tells room members that `client_id` joined.
    JoinGameResponse {
        code: i32,
        client_id: i32,
        host_id: i32,
    },
    JoinGameError {
        reason: DisconnectReason,
        message: Option<String>,
    },
    StartGame {
        code: i32,
    },
    RemoveGame {
        reason: DisconnectReason,
    },
    RemovePlayer {
        code: i32,
        client_id: i32,
        host_id: i32,
        reason: DisconnectReason,
    },
    GameData {
        code: i32,
        messages: Vec<GameDataMessage>,
    },
    GameDataTo {
        code: i32,
        target: i32,
        messages: Vec<GameDataMessage>,
    },
    JoinedGame {
        code: i32,
        client_id: i32,
        host_id: i32,
        others: Vec<i32>,
    },
    EndGame {
        code: i32,
        reason: GameOverReason,
        show_ad: bool,
    },
    AlterGame {
        code: i32,
        tag: AlterGameTag,
        value: bool,
    },
    KickPlayer {
        code: i32,
        client_id: i32,
        banned: bool,
    },
    WaitForHost {
        code: i32,
        client_id: i32,
    },
    Redirect {
        ip: Ipv4Addr,
        port: u16,
    },
    GetGameListRequest {
        reserved: i32,
        settings: GameSettings,
        chat_mode: Option<u8>,
    },
    GetGameListResponse {
        map_counts: Option<Vec<u32>>,
        games: Vec<GameListing>,
    },
    Unknown {
        tag: u8,
        data: Vec<u8>,
    },
}

impl RootMessage {
    pub fn tag(&self) -> u8 {
        let tag = match self {
            Self::HostGameRequest { .. } | Self::HostGameResponse { .. } => RootMessageTag::HostGame,
            Self::JoinGameRequest { .. }
            | Self::JoinGameResponse { .. }
            | Self::JoinGameError { .. } => RootMessageTag::JoinGame,
            Self::StartGame { .. } => RootMessageTag::StartGame,
            Self::RemoveGame { .. } => RootMessageTag::RemoveGame,
            Self::RemovePlayer { .. } => RootMessageTag::RemovePlayer,
            Self::GameData { .. } => RootMessageTag::GameData,
            Self::GameDataTo { .. } => RootMessageTag::GameDataTo,
            Self::JoinedGame { .. } => RootMessageTag::JoinedGame,
            Self::EndGame { .. } => RootMessageTag::EndGame,
            Self::AlterGame { .. } => RootMessageTag::AlterGame,
            Self::KickPlayer { .. } => RootMessageTag::KickPlayer,
            Self::WaitForHost { .. } => RootMessageTag::WaitForHost,
            Self::Redirect { .. } => RootMessageTag::Redirect,
            Self::GetGameListRequest { .. } | Self::GetGameListResponse { .. } => {
                RootMessageTag::GetGameList
            }
            Self::Unknown { tag, .. } => return *tag,
        };
        tag.into()
    }

    /// Room code the payload refers to, if it carries one.
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::HostGameResponse { code }
            | Self::JoinGameRequest { code, .. }
            | Self::JoinGameResponse { code, .. }
            | Self::StartGame { code }
            | Self::RemovePlayer { code, .. }
            | Self::GameData { code, .. }
            | Self::GameDataTo { code, .. }
            | Self::JoinedGame { code, .. }
            | Self::EndGame { code, .. }
            | Self::AlterGame { code, .. }
            | Self::KickPlayer { code, .. }
            | Self::WaitForHost { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn decode(
        tag: u8,
        r: &mut HazelReader<'_>,
        direction: Direction,
        options: &DecodeOptions,
    ) -> CodecResult<Option<Self>> {
        let serverbound = direction == Direction::Serverbound;
        let message = match RootMessageTag::from(tag) {
            RootMessageTag::HostGame if serverbound => Self::HostGameRequest {
                settings: GameSettings::decode(r)?,
            },
            RootMessageTag::HostGame => Self::HostGameResponse { code: r.i32()? },
            RootMessageTag::JoinGame if serverbound => Self::JoinGameRequest {
                code: r.i32()?,
                map_ownership: if r.is_empty() { None } else { Some(r.u8()?) },
            },
            RootMessageTag::JoinGame => {
                let first = r.i32()?;
                // Room codes are never in the reason byte range.
                if (0..=255).contains(&first) {
                    let reason = DisconnectReason::from(first as u8);
                    let message = if reason == DisconnectReason::Custom && !r.is_empty() {
                        Some(r.string()?)
                    } else {
                        None
                    };
                    Self::JoinGameError { reason, message }
                } else {
                    Self::JoinGameResponse {
                        code: first,
                        client_id: r.i32()?,
                        host_id: r.i32()?,
                    }
                }
            }
            RootMessageTag::StartGame => Self::StartGame { code: r.i32()? },
            RootMessageTag::RemoveGame => Self::RemoveGame {
                reason: r.u8()?.into(),
            },
            RootMessageTag::RemovePlayer => Self::RemovePlayer {
                code: r.i32()?,
                client_id: r.packed()?,
                host_id: r.packed()?,
                reason: r.u8()?.into(),
            },
            RootMessageTag::GameData => Self::GameData {
                code: r.i32()?,
                messages: gamedata::decode_all(r, options)?,
            },
            RootMessageTag::GameDataTo => Self::GameDataTo {
                code: r.i32()?,
                target: r.packed()?,
                messages: gamedata::decode_all(r, options)?,
            },
            RootMessageTag::JoinedGame => {
                let code = r.i32()?;
                let client_id = r.i32()?;
                let host_id = r.i32()?;
                let count = r.upacked()? as usize;
                let others = (0..count)
                    .map(|_| r.packed())
                    .collect::<CodecResult<Vec<_>>>()?;
                Self::JoinedGame {
                    code,
                    client_id,
                    host_id,
                    others,
                }
            }
            RootMessageTag::EndGame => Self::EndGame {
                code: r.i32()?,
                reason: r.u8()?.into(),
                show_ad: r.bool()?,
            },
            RootMessageTag::AlterGame => Self::AlterGame {
                code: r.i32()?,
                tag: r.u8()?.into(),
                value: r.bool()?,
            },
            RootMessageTag::KickPlayer => Self::KickPlayer {
                code: r.i32()?,
                client_id: r.packed()?,
                banned: r.bool()?,
            },
            RootMessageTag::WaitForHost => Self::WaitForHost {
                code: r.i32()?,
                client_id: r.i32()?,
            },
            RootMessageTag::Redirect => {
                let ip = r.bytes(4)?;
                Self::Redirect {
                    ip: Ipv4Addr::new(ip[0], ip[1], ip[2], ip[3]),
                    port: r.u16()?,
                }
            }
            RootMessageTag::GetGameList if serverbound => Self::GetGameListRequest {
                reserved: r.packed()?,
                settings: GameSettings::decode(r)?,
                chat_mode: if r.is_empty() { None } else { Some(r.u8()?) },
            },
            RootMessageTag::GetGameList => {
                let mut map_counts = None;
                let mut games = Vec::new();
                for item in r.messages() {
                    let (tag, mut body) = item?;
                    match tag {
                        COUNTS_TAG => {
                            let mut counts = Vec::new();
                            while !body.is_empty() {
                                counts.push(body.u32()?);
                            }
                            map_counts = Some(counts);
                        }
                        LISTINGS_TAG => {
                            for listing in body.messages() {
                                let (_, mut listing) = listing?;
                                games.push(GameListing::decode(&mut listing)?);
                            }
                        }
                        other => log::debug!("skipping game list section {}", other),
                    }
                }
                Self::GetGameListResponse { map_counts, games }
            }
            RootMessageTag::ReselectServer | RootMessageTag::Unknown(_) => {
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

    /// Writes the payload including its frame.
    pub fn encode(&self, w: &mut HazelWriter) -> CodecResult<()> {
        w.message(self.tag(), |w| self.encode_body(w))
    }

    fn encode_body(&self, w: &mut HazelWriter) -> CodecResult<()> {
        match self {
            Self::HostGameRequest { settings } => settings.encode(w),
            Self::HostGameResponse { code } | Self::StartGame { code } => w.i32(*code),
            Self::JoinGameRequest {
                code,
                map_ownership,
            } => {
                w.i32(*code);
                if let Some(flags) = map_ownership {
                    w.u8(*flags);
                }
            }
            Self::JoinGameResponse {
                code,
                client_id,
                host_id,
            } => {
                w.i32(*code);
                w.i32(*client_id);
                w.i32(*host_id);
            }
            Self::JoinGameError { reason, message } => {
                w.i32(i32::from(u8::from(*reason)));
                if let Some(message) = message {
                    w.string(message);
                }
            }
            Self::RemoveGame { reason } => w.u8((*reason).into()),
            Self::RemovePlayer {
                code,
                client_id,
                host_id,
                reason,
            } => {
                w.i32(*code);
                w.packed(*client_id);
                w.packed(*host_id);
                w.u8((*reason).into());
            }
            Self::GameData { code, messages } => {
                w.i32(*code);
                gamedata::encode_all(w, messages)?;
            }
            Self::GameDataTo {
                code,
                target,
                messages,
            } => {
                w.i32(*code);
                w.packed(*target);
                gamedata::encode_all(w, messages)?;
            }
            Self::JoinedGame {
                code,
                client_id,
                host_id,
                others,
            } => {
                w.i32(*code);
                w.i32(*client_id);
                w.i32(*host_id);
                w.upacked(others.len() as u32);
                for id in others {
                    w.packed(*id);
                }
            }
            Self::EndGame {
                code,
                reason,
                show_ad,
            } => {
                w.i32(*code);
                w.u8((*reason).into());
                w.bool(*show_ad);
            }
            Self::AlterGame { code, tag, value } => {
                w.i32(*code);
                w.u8((*tag).into());
                w.bool(*value);
            }
            Self::KickPlayer {
                code,
                client_id,
                banned,
            } => {
                w.i32(*code);
                w.packed(*client_id);
                w.bool(*banned);
            }
            Self::WaitForHost { code, client_id } => {
                w.i32(*code);
                w.i32(*client_id);
            }
            Self::Redirect { ip, port } => {
                w.bytes(&ip.octets());
                w.u16(*port);
            }
            Self::GetGameListRequest {
                reserved,
                settings,
                chat_mode,
            } => {
                w.packed(*reserved);
                settings.encode(w);
                if let Some(mode) = chat_mode {
                    w.u8(*mode);
                }
            }
            Self::GetGameListResponse { map_counts, games } => {
                if let Some(counts) = map_counts {
                    w.message(COUNTS_TAG, |w| {
                        counts.iter().for_each(|c| w.u32(*c));
                        Ok(())
                    })?;
                }
                w.message(LISTINGS_TAG, |w| {
                    for game in games {
                        w.message(LISTING_TAG, |w| {
                            game.encode(w);
                            Ok(())
                        })?;
                    }
                    Ok(())
                })?;
            }
            Self::Unknown { data, .. } => w.bytes(data),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_one(bytes: &[u8], direction: Direction) -> RootMessage {
        let mut r = HazelReader::new(bytes);
        let (tag, mut body) = r.message().unwrap();
        RootMessage::decode(tag, &mut body, direction, &DecodeOptions::default())
            .unwrap()
            .unwrap()
    }

    fn encode_one(message: &RootMessage) -> Vec<u8> {
        let mut w = HazelWriter::new();
        message.encode(&mut w).unwrap();
        w.finish().unwrap()
    }

    fn golden(bytes: &[u8], direction: Direction) -> RootMessage {
        let message = decode_one(bytes, direction);
        assert_eq!(encode_one(&message), bytes, "{:?}", message);
        message
    }

    #[test]
    fn test_host_game_depends_on_direction() {
        let response = golden(&[4, 0, 0, 0x48, 0x4F, 0x4C, 0x41], Direction::Clientbound);
        assert_eq!(response, RootMessage::HostGameResponse { code: 1095520072 });

        let mut w = HazelWriter::new();
        RootMessage::HostGameRequest {
            settings: GameSettings::default(),
        }
        .encode(&mut w)
        .unwrap();
        let bytes = w.finish().unwrap();
        assert!(matches!(
            golden(&bytes, Direction::Serverbound),
            RootMessage::HostGameRequest { .. }
        ));
    }

    #[test]
    fn test_join_game_shapes() {
        let request = golden(&[5, 0, 1, 0x48, 0x4F, 0x4C, 0x41, 7], Direction::Serverbound);
        assert_eq!(
            request,
            RootMessage::JoinGameRequest {
                code: 1095520072,
                map_ownership: Some(7)
            }
        );

        let joined = golden(
            &[12, 0, 1, 0x48, 0x4F, 0x4C, 0x41, 2, 0, 0, 0, 1, 0, 0, 0],
            Direction::Clientbound,
        );
        assert_eq!(
            joined,
            RootMessage::JoinGameResponse {
                code: 1095520072,
                client_id: 2,
                host_id: 1
            }
        );

        let error = golden(&[4, 0, 1, 3, 0, 0, 0], Direction::Clientbound);
        assert_eq!(
            error,
            RootMessage::JoinGameError {
                reason: DisconnectReason::GameNotFound,
                message: None
            }
        );

        let custom = golden(&[7, 0, 1, 8, 0, 0, 0, 2, b'n', b'o'], Direction::Clientbound);
        assert_eq!(
            custom,
            RootMessage::JoinGameError {
                reason: DisconnectReason::Custom,
                message: Some("no".into())
            }
        );
    }

    #[test]
    fn test_joined_game_golden() {
        let bytes = [
            15, 0, 7, 0x48, 0x4F, 0x4C, 0x41, 3, 0, 0, 0, 1, 0, 0, 0, 2, 1, 2,
        ];
        let message = golden(&bytes, Direction::Clientbound);
        assert_eq!(
            message,
            RootMessage::JoinedGame {
                code: 1095520072,
                client_id: 3,
                host_id: 1,
                others: vec![1, 2]
            }
        );
    }

    #[test]
    fn test_remove_player_and_end_game() {
        let remove = golden(&[7, 0, 4, 1, 0, 0, 0, 2, 3, 0], Direction::Clientbound);
        assert_eq!(
            remove,
            RootMessage::RemovePlayer {
                code: 1,
                client_id: 2,
                host_id: 3,
                reason: DisconnectReason::ExitGame
            }
        );
        let end = golden(&[6, 0, 8, 1, 0, 0, 0, 4, 0], Direction::Clientbound);
        assert_eq!(
            end,
            RootMessage::EndGame {
                code: 1,
                reason: GameOverReason::ImpostorBySabotage,
                show_ad: false
            }
        );
    }

    #[test]
    fn test_game_data_to_with_nested_messages() {
        let bytes = [9, 0, 6, 1, 0, 0, 0, 4, 1, 0, 7, 4];
        let message = golden(&bytes, Direction::Serverbound);
        assert_eq!(
            message,
            RootMessage::GameDataTo {
                code: 1,
                target: 4,
                messages: vec![GameDataMessage::Ready { client_id: 4 }]
            }
        );
        assert_eq!(message.code(), Some(1));
    }

    #[test]
    fn test_small_payloads() {
        golden(&[6, 0, 10, 1, 0, 0, 0, 1, 1], Direction::Clientbound);
        golden(&[6, 0, 11, 1, 0, 0, 0, 5, 1], Direction::Clientbound);
        golden(&[8, 0, 12, 1, 0, 0, 0, 5, 0, 0, 0], Direction::Clientbound);
        golden(&[1, 0, 3, 16], Direction::Clientbound);
        let redirect = golden(&[6, 0, 13, 127, 0, 0, 1, 0x07, 0x56], Direction::Clientbound);
        assert_eq!(
            redirect,
            RootMessage::Redirect {
                ip: Ipv4Addr::LOCALHOST,
                port: 22023
            }
        );
    }

    #[test]
    fn test_game_list_response() {
        let response = RootMessage::GetGameListResponse {
            map_counts: Some(vec![3, 1, 0]),
            games: vec![GameListing {
                ip: Ipv4Addr::new(10, 0, 0, 2),
                port: 22023,
                code: -2050590356,
                host_name: "red".into(),
                player_count: 4,
                age: 300,
                map: GameMap::Polus,
                impostors: 2,
                max_players: 10,
            }],
        };
        let bytes = encode_one(&response);
        assert_eq!(golden(&bytes, Direction::Clientbound), response);
    }

    #[test]
    fn test_unknown_payload_retained_or_dropped() {
        let bytes = [2, 0, 99, 1, 2];
        assert_eq!(
            golden(&bytes, Direction::Clientbound),
            RootMessage::Unknown {
                tag: 99,
                data: vec![1, 2]
            }
        );

        let mut r = HazelReader::new(&bytes);
        let (tag, mut body) = r.message().unwrap();
        let options = DecodeOptions {
            retain_unknown: false,
        };
        assert_eq!(
            RootMessage::decode(tag, &mut body, Direction::Clientbound, &options).unwrap(),
            None
        );
    }
}
