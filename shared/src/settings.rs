//! Versioned lobby settings.
//!
//! Versions 1 through 4 only ever append fields. Parsing reads exactly the
//! fields the declared version carries; range checks live in
//! [`GameSettings::validate`], never in the parser.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec::{HazelReader, HazelWriter};
use crate::enums::GameMap;
use crate::error::{CodecError, CodecResult};

pub const LATEST_SETTINGS_VERSION: u8 = 4;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SettingsError {
    #[error("{field} = {value} is outside {min}..={max}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{impostors} impostors is too many for {max_players} players")]
    TooManyImpostors { impostors: u8, max_players: u8 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameSettings {
    pub version: u8,
    pub max_players: u8,
    pub keywords: u32,
    pub map: GameMap,
    pub player_speed: f32,
    pub crewmate_vision: f32,
    pub impostor_vision: f32,
    pub kill_cooldown: f32,
    pub common_tasks: u8,
    pub long_tasks: u8,
    pub short_tasks: u8,
    pub emergency_meetings: i32,
    pub impostors: u8,
    pub kill_distance: u8,
    pub discussion_time: i32,
    pub voting_time: i32,
    pub is_defaults: bool,
    // v2
    pub emergency_cooldown: u8,
    // v3
    pub confirm_ejects: bool,
    pub visual_tasks: bool,
    // v4
    pub anonymous_votes: bool,
    pub taskbar_updates: u8,
    /// Bytes after the v4 fields, sent by newer clients.
    #[serde(skip)]
    pub trailing: Vec<u8>,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            version: LATEST_SETTINGS_VERSION,
            max_players: 10,
            keywords: 256,
            map: GameMap::TheSkeld,
            player_speed: 1.0,
            crewmate_vision: 1.0,
            impostor_vision: 1.5,
            kill_cooldown: 15.0,
            common_tasks: 1,
            long_tasks: 1,
            short_tasks: 2,
            emergency_meetings: 1,
            impostors: 1,
            kill_distance: 1,
            discussion_time: 15,
            voting_time: 120,
            is_defaults: true,
            emergency_cooldown: 15,
            confirm_ejects: true,
            visual_tasks: true,
            anonymous_votes: false,
            taskbar_updates: 0,
            trailing: Vec::new(),
        }
    }
}

/// Highest impostor count the lobby allows for a player cap.
pub fn max_impostors(max_players: u8) -> u8 {
    match max_players {
        0..=6 => 1,
        7..=8 => 2,
        _ => 3,
    }
}

fn check(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), SettingsError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(SettingsError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}

impl GameSettings {
    pub fn total_tasks(&self) -> usize {
        usize::from(self.common_tasks) + usize::from(self.long_tasks) + usize::from(self.short_tasks)
    }

    /// Rejects values the official server would refuse.
    pub fn validate(&self) -> Result<(), SettingsError> {
        check("max_players", self.max_players.into(), 4.0, 15.0)?;
        check("impostors", self.impostors.into(), 1.0, 3.0)?;
        if self.impostors > max_impostors(self.max_players) {
            return Err(SettingsError::TooManyImpostors {
                impostors: self.impostors,
                max_players: self.max_players,
            });
        }
        check("player_speed", self.player_speed.into(), 0.5, 3.0)?;
        check("crewmate_vision", self.crewmate_vision.into(), 0.25, 5.0)?;
        check("impostor_vision", self.impostor_vision.into(), 0.25, 5.0)?;
        check("kill_cooldown", self.kill_cooldown.into(), 10.0, 60.0)?;
        check("common_tasks", self.common_tasks.into(), 0.0, 2.0)?;
        check("long_tasks", self.long_tasks.into(), 0.0, 3.0)?;
        check("short_tasks", self.short_tasks.into(), 0.0, 5.0)?;
        check("emergency_meetings", self.emergency_meetings.into(), 0.0, 9.0)?;
        check("kill_distance", self.kill_distance.into(), 0.0, 2.0)?;
        check("discussion_time", self.discussion_time.into(), 0.0, 120.0)?;
        check("voting_time", self.voting_time.into(), 0.0, 300.0)?;
        check("emergency_cooldown", self.emergency_cooldown.into(), 0.0, 60.0)?;
        check("taskbar_updates", self.taskbar_updates.into(), 0.0, 2.0)?;
        Ok(())
    }

    /// Reads the length-prefixed settings blob.
    pub fn decode(reader: &mut HazelReader<'_>) -> CodecResult<Self> {
        let len = reader.upacked()? as usize;
        let mut r = HazelReader::new(reader.bytes(len)?);

        let version = r.u8()?;
        if version == 0 {
            return Err(CodecError::UnsupportedSettingsVersion(version));
        }

        let mut settings = GameSettings {
            version,
            max_players: r.u8()?,
            keywords: r.u32()?,
            map: r.u8()?.into(),
            player_speed: r.f32()?,
            crewmate_vision: r.f32()?,
            impostor_vision: r.f32()?,
            kill_cooldown: r.f32()?,
            common_tasks: r.u8()?,
            long_tasks: r.u8()?,
            short_tasks: r.u8()?,
            emergency_meetings: r.i32()?,
            impostors: r.u8()?,
            kill_distance: r.u8()?,
            discussion_time: r.i32()?,
            voting_time: r.i32()?,
            is_defaults: r.bool()?,
            emergency_cooldown: 15,
            confirm_ejects: true,
            visual_tasks: true,
            anonymous_votes: false,
            taskbar_updates: 0,
            trailing: Vec::new(),
        };
        if version >= 2 {
            settings.emergency_cooldown = r.u8()?;
        }
        if version >= 3 {
            settings.confirm_ejects = r.bool()?;
            settings.visual_tasks = r.bool()?;
        }
        if version >= 4 {
            settings.anonymous_votes = r.bool()?;
            settings.taskbar_updates = r.u8()?;
        }
        settings.trailing = r.rest().to_vec();
        Ok(settings)
    }

    pub fn encode(&self, writer: &mut HazelWriter) {
        let mut w = HazelWriter::new();
        w.u8(self.version);
        w.u8(self.max_players);
        w.u32(self.keywords);
        w.u8(self.map.into());
        w.f32(self.player_speed);
        w.f32(self.crewmate_vision);
        w.f32(self.impostor_vision);
        w.f32(self.kill_cooldown);
        w.u8(self.common_tasks);
        w.u8(self.long_tasks);
        w.u8(self.short_tasks);
        w.i32(self.emergency_meetings);
        w.u8(self.impostors);
        w.u8(self.kill_distance);
        w.i32(self.discussion_time);
        w.i32(self.voting_time);
        w.bool(self.is_defaults);
        if self.version >= 2 {
            w.u8(self.emergency_cooldown);
        }
        if self.version >= 3 {
            w.bool(self.confirm_ejects);
            w.bool(self.visual_tasks);
        }
        if self.version >= 4 {
            w.bool(self.anonymous_votes);
            w.u8(self.taskbar_updates);
        }
        w.bytes(&self.trailing);

        let body = w.as_bytes();
        writer.upacked(body.len() as u32);
        writer.bytes(body);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(settings: &GameSettings) -> Vec<u8> {
        let mut writer = HazelWriter::new();
        settings.encode(&mut writer);
        writer.finish().unwrap()
    }

    #[test]
    fn test_v4_length() {
        // 46 bytes of v1 fields, +1 for v2, +2 for v3, +2 for v4
        let bytes = encoded(&GameSettings::default());
        assert_eq!(bytes[0], 46);
        assert_eq!(bytes.len(), 47);
    }

    #[test]
    fn test_v1_reads_only_v1_fields() {
        let settings = GameSettings {
            version: 1,
            emergency_cooldown: 40,
            ..GameSettings::default()
        };
        let bytes = encoded(&settings);
        assert_eq!(bytes[0], 41);

        let decoded = GameSettings::decode(&mut HazelReader::new(&bytes)).unwrap();
        assert_eq!(decoded.version, 1);
        // Not on the wire for v1, so the default comes back.
        assert_eq!(decoded.emergency_cooldown, 15);
    }

    #[test]
    fn test_newer_version_keeps_trailing_bytes() {
        let mut settings = GameSettings {
            version: 5,
            ..GameSettings::default()
        };
        settings.trailing = vec![1, 2, 3];
        let bytes = encoded(&settings);
        let decoded = GameSettings::decode(&mut HazelReader::new(&bytes)).unwrap();
        assert_eq!(decoded.trailing, vec![1, 2, 3]);
        assert_eq!(encoded(&decoded), bytes);
    }

    #[test]
    fn test_version_zero_rejected() {
        let bytes = [1, 0];
        assert_eq!(
            GameSettings::decode(&mut HazelReader::new(&bytes)),
            Err(CodecError::UnsupportedSettingsVersion(0))
        );
    }

    #[test]
    fn test_truncated_blob() {
        let bytes = encoded(&GameSettings::default());
        let cut = &bytes[..20];
        assert!(matches!(
            GameSettings::decode(&mut HazelReader::new(cut)),
            Err(CodecError::BufferUnderrun { .. })
        ));
    }

    #[test]
    fn test_parser_accepts_out_of_range_but_validator_rejects() {
        let settings = GameSettings {
            max_players: 200,
            ..GameSettings::default()
        };
        let bytes = encoded(&settings);
        let decoded = GameSettings::decode(&mut HazelReader::new(&bytes)).unwrap();
        assert_eq!(decoded.max_players, 200);
        assert!(matches!(
            decoded.validate(),
            Err(SettingsError::OutOfRange { field: "max_players", .. })
        ));
    }

    #[test]
    fn test_validate_defaults_and_impostor_cap() {
        assert!(GameSettings::default().validate().is_ok());

        let settings = GameSettings {
            max_players: 6,
            impostors: 2,
            ..GameSettings::default()
        };
        assert_eq!(
            settings.validate(),
            Err(SettingsError::TooManyImpostors {
                impostors: 2,
                max_players: 6
            })
        );
    }

    #[test]
    fn test_vision_bounds() {
        let settings = GameSettings {
            crewmate_vision: 0.1,
            ..GameSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_total_tasks() {
        assert_eq!(GameSettings::default().total_tasks(), 4);
    }
}
