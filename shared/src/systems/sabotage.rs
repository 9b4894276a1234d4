use log::debug;

use super::{SystemContext, SystemEvent, SystemStatus};
use crate::codec::{HazelReader, HazelWriter};
use crate::enums::SystemType;
use crate::error::CodecResult;

pub const SABOTAGE_COOLDOWN: f32 = 30.0;

/// The impostors' sabotage map. A repair amount names the system to break;
/// [`ShipSystems`](super::ShipSystems) forwards it.
#[derive(Debug, Default)]
pub struct SabotageSystem {
    cooldown: f32,
    dirty: bool,
}

impl SabotageSystem {
    pub fn cooldown(&self) -> f32 {
        self.cooldown
    }
}

impl SystemStatus for SabotageSystem {
    fn system_type(&self) -> SystemType {
        SystemType::Sabotage
    }

    fn deserialize(&mut self, reader: &mut HazelReader<'_>, _spawn: bool) -> CodecResult<()> {
        self.cooldown = reader.f32()?;
        Ok(())
    }

    fn serialize(&self, writer: &mut HazelWriter, _spawn: bool) {
        writer.f32(self.cooldown);
    }

    fn repair(&mut self, _ctx: &mut SystemContext<'_>, _player_id: u8, amount: u8) -> Option<SystemEvent> {
        if self.cooldown > 0.0 {
            debug!("sabotage on cooldown for {:.1}s", self.cooldown);
            return None;
        }
        self.cooldown = SABOTAGE_COOLDOWN;
        self.dirty = true;
        Some(SystemEvent::Sabotage(SystemType::from(amount)))
    }

    fn fixed_update(&mut self, _ctx: &mut SystemContext<'_>, dt: f32) -> Option<SystemEvent> {
        if self.cooldown > 0.0 {
            self.cooldown = (self.cooldown - dt).max(0.0);
            if self.cooldown == 0.0 {
                self.dirty = true;
            }
        }
        None
    }

    dirty_flag!();
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[test]
    fn test_cooldown_blocks_repeat() {
        let mut rng = rng();
        let mut ctx = SystemContext {
            rng: &mut rng,
            authority: true,
        };
        let mut sabotage = SabotageSystem::default();
        assert_eq!(
            sabotage.repair(&mut ctx, 0, 8),
            Some(SystemEvent::Sabotage(SystemType::LifeSupp))
        );
        assert_eq!(sabotage.repair(&mut ctx, 0, 8), None);

        sabotage.fixed_update(&mut ctx, 30.0);
        assert_eq!(sabotage.cooldown(), 0.0);
        assert!(sabotage.repair(&mut ctx, 0, 7).is_some());
        assert_eq!(bytes(&sabotage, false), SABOTAGE_COOLDOWN.to_le_bytes().to_vec());
    }
}
