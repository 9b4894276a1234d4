use std::collections::BTreeSet;

use super::{read_pairs, write_pairs, SystemContext, SystemEvent, SystemStatus};
use crate::codec::{HazelReader, HazelWriter};
use crate::enums::SystemType;
use crate::error::CodecResult;

/// Comms on the Skeld and Polus: a single sabotaged flag.
#[derive(Debug, Default)]
pub struct HudOverrideSystem {
    active: bool,
    dirty: bool,
}

impl SystemStatus for HudOverrideSystem {
    fn system_type(&self) -> SystemType {
        SystemType::Comms
    }

    fn deserialize(&mut self, reader: &mut HazelReader<'_>, _spawn: bool) -> CodecResult<()> {
        self.active = reader.bool()?;
        Ok(())
    }

    fn serialize(&self, writer: &mut HazelWriter, _spawn: bool) {
        writer.bool(self.active);
    }

    fn repair(&mut self, _ctx: &mut SystemContext<'_>, _player_id: u8, amount: u8) -> Option<SystemEvent> {
        self.active = amount & super::SABOTAGE != 0;
        self.dirty = true;
        None
    }

    fn is_sabotaged(&self) -> bool {
        self.active
    }

    dirty_flag!();
}

const CLEAR_COMPLETED: u8 = 0x80;
const ADD_ACTIVE: u8 = 0x40;
const REMOVE_ACTIVE: u8 = 0x20;
const COMPLETE: u8 = 0x10;
const CONSOLE_MASK: u8 = 0x0F;

/// Comms on Mira HQ: two keypads that each need a code entered.
#[derive(Debug)]
pub struct HqHudSystem {
    /// (player id, console id) pairs using a keypad right now.
    active: BTreeSet<(u8, u8)>,
    completed: BTreeSet<u8>,
    dirty: bool,
}

impl Default for HqHudSystem {
    fn default() -> Self {
        Self {
            active: BTreeSet::new(),
            completed: [0, 1].into_iter().collect(),
            dirty: false,
        }
    }
}

impl HqHudSystem {
    pub fn completed_consoles(&self) -> impl Iterator<Item = &u8> {
        self.completed.iter()
    }

    pub fn active_consoles(&self) -> impl Iterator<Item = &(u8, u8)> {
        self.active.iter()
    }
}

impl SystemStatus for HqHudSystem {
    fn system_type(&self) -> SystemType {
        SystemType::Comms
    }

    fn deserialize(&mut self, reader: &mut HazelReader<'_>, _spawn: bool) -> CodecResult<()> {
        self.active = read_pairs(reader)?.into_iter().collect();
        let count = reader.upacked()?;
        self.completed = (0..count).map(|_| reader.u8()).collect::<CodecResult<_>>()?;
        Ok(())
    }

    fn serialize(&self, writer: &mut HazelWriter, _spawn: bool) {
        write_pairs(writer, self.active.iter());
        writer.upacked(self.completed.len() as u32);
        for console in &self.completed {
            writer.u8(*console);
        }
    }

    fn repair(&mut self, _ctx: &mut SystemContext<'_>, player_id: u8, amount: u8) -> Option<SystemEvent> {
        let console = amount & CONSOLE_MASK;
        if amount & CLEAR_COMPLETED != 0 {
            self.completed.clear();
        } else if amount & ADD_ACTIVE != 0 {
            self.active.insert((player_id, console));
        } else if amount & REMOVE_ACTIVE != 0 {
            self.active.remove(&(player_id, console));
        } else if amount & COMPLETE != 0 {
            self.completed.insert(console);
            if self.completed.len() >= 2 {
                self.active.clear();
            }
        } else {
            return None;
        }
        self.dirty = true;
        None
    }

    fn is_sabotaged(&self) -> bool {
        self.completed.len() < 2
    }

    dirty_flag!();
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[test]
    fn test_hud_override() {
        let mut rng = rng();
        let mut ctx = SystemContext {
            rng: &mut rng,
            authority: true,
        };
        let mut comms = HudOverrideSystem::default();
        comms.repair(&mut ctx, 0, 0x80);
        assert!(comms.is_sabotaged());
        assert_eq!(bytes(&comms, false), vec![1]);
        comms.repair(&mut ctx, 0, 0);
        assert!(!comms.is_sabotaged());
    }

    #[test]
    fn test_hq_keypads() {
        let mut rng = rng();
        let mut ctx = SystemContext {
            rng: &mut rng,
            authority: true,
        };
        let mut comms = HqHudSystem::default();
        assert!(!comms.is_sabotaged());

        comms.repair(&mut ctx, 0, 0x80);
        assert!(comms.is_sabotaged());

        comms.repair(&mut ctx, 2, 0x40);
        comms.repair(&mut ctx, 3, 0x41);
        assert_eq!(bytes(&comms, false), vec![2, 2, 0, 3, 1, 0]);

        comms.repair(&mut ctx, 2, 0x10);
        assert!(comms.is_sabotaged());
        comms.repair(&mut ctx, 3, 0x11);
        assert!(!comms.is_sabotaged());
        assert_eq!(comms.active_consoles().count(), 0);

        let mut mirror = HqHudSystem::default();
        mirror
            .deserialize(&mut HazelReader::new(&bytes(&comms, true)), true)
            .unwrap();
        assert_eq!(mirror.completed_consoles().count(), 2);
    }
}
