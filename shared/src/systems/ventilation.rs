use std::collections::BTreeMap;

use super::{SystemContext, SystemEvent, SystemStatus};
use crate::codec::{HazelReader, HazelWriter};
use crate::enums::SystemType;
use crate::error::CodecResult;

/// Who is hiding in which vent, on maps that sync it.
#[derive(Debug, Default)]
pub struct VentilationSystem {
    occupants: BTreeMap<u8, u8>,
    dirty: bool,
}

impl VentilationSystem {
    pub fn enter(&mut self, player_id: u8, vent_id: u8) {
        if self.occupants.insert(player_id, vent_id) != Some(vent_id) {
            self.dirty = true;
        }
    }

    pub fn exit(&mut self, player_id: u8) {
        if self.occupants.remove(&player_id).is_some() {
            self.dirty = true;
        }
    }

    pub fn vent_of(&self, player_id: u8) -> Option<u8> {
        self.occupants.get(&player_id).copied()
    }
}

impl SystemStatus for VentilationSystem {
    fn system_type(&self) -> SystemType {
        SystemType::Ventilation
    }

    fn deserialize(&mut self, reader: &mut HazelReader<'_>, _spawn: bool) -> CodecResult<()> {
        let count = reader.upacked()?;
        self.occupants = (0..count)
            .map(|_| Ok((reader.u8()?, reader.u8()?)))
            .collect::<CodecResult<_>>()?;
        Ok(())
    }

    fn serialize(&self, writer: &mut HazelWriter, _spawn: bool) {
        writer.upacked(self.occupants.len() as u32);
        for (player, vent) in &self.occupants {
            writer.u8(*player);
            writer.u8(*vent);
        }
    }

    fn repair(&mut self, _ctx: &mut SystemContext<'_>, _player_id: u8, _amount: u8) -> Option<SystemEvent> {
        None
    }

    dirty_flag!();
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[test]
    fn test_enter_and_exit() {
        let mut vents = VentilationSystem::default();
        vents.enter(2, 5);
        vents.enter(1, 3);
        assert_eq!(bytes(&vents, false), vec![2, 1, 3, 2, 5]);
        vents.clear_dirty();

        vents.enter(2, 5);
        assert!(!vents.is_dirty());
        vents.exit(2);
        assert_eq!(vents.vent_of(2), None);
        assert!(vents.is_dirty());
    }
}
