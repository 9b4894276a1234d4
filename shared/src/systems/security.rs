use std::collections::BTreeSet;

use super::{SystemContext, SystemEvent, SystemStatus};
use crate::codec::{HazelReader, HazelWriter};
use crate::enums::SystemType;
use crate::error::CodecResult;

/// Players currently watching the cameras.
#[derive(Debug, Default)]
pub struct SecurityCameraSystem {
    watchers: BTreeSet<u8>,
    dirty: bool,
}

impl SecurityCameraSystem {
    pub fn watchers(&self) -> impl Iterator<Item = &u8> {
        self.watchers.iter()
    }

    pub fn in_use(&self) -> bool {
        !self.watchers.is_empty()
    }
}

impl SystemStatus for SecurityCameraSystem {
    fn system_type(&self) -> SystemType {
        SystemType::Security
    }

    fn deserialize(&mut self, reader: &mut HazelReader<'_>, _spawn: bool) -> CodecResult<()> {
        let count = reader.upacked()?;
        self.watchers = (0..count).map(|_| reader.u8()).collect::<CodecResult<_>>()?;
        Ok(())
    }

    fn serialize(&self, writer: &mut HazelWriter, _spawn: bool) {
        writer.upacked(self.watchers.len() as u32);
        for player in &self.watchers {
            writer.u8(*player);
        }
    }

    fn repair(&mut self, _ctx: &mut SystemContext<'_>, player_id: u8, amount: u8) -> Option<SystemEvent> {
        let changed = if amount == 1 {
            self.watchers.insert(player_id)
        } else {
            self.watchers.remove(&player_id)
        };
        self.dirty |= changed;
        None
    }

    dirty_flag!();
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[test]
    fn test_watchers() {
        let mut rng = rng();
        let mut ctx = SystemContext {
            rng: &mut rng,
            authority: false,
        };
        let mut cams = SecurityCameraSystem::default();
        cams.repair(&mut ctx, 4, 1);
        cams.repair(&mut ctx, 2, 1);
        assert!(cams.in_use());
        assert_eq!(bytes(&cams, false), vec![2, 2, 4]);

        cams.clear_dirty();
        cams.repair(&mut ctx, 9, 0);
        assert!(!cams.is_dirty());
        cams.repair(&mut ctx, 4, 0);
        assert_eq!(cams.watchers().collect::<Vec<_>>(), vec![&2]);
    }
}
