use rand::Rng;

use super::{SystemContext, SystemEvent, SystemStatus};
use crate::codec::{HazelReader, HazelWriter};
use crate::enums::SystemType;
use crate::error::CodecResult;

const SWITCH_COUNT: u8 = 5;
const FADE_STEP: u8 = 3;
const FADE_INTERVAL: f32 = 0.03;

/// Electrical: five breaker switches plus the light level they drive.
#[derive(Debug)]
pub struct SwitchSystem {
    expected: u8,
    actual: u8,
    /// Light level, 255 is fully lit.
    value: u8,
    timer: f32,
    dirty: bool,
}

impl Default for SwitchSystem {
    fn default() -> Self {
        Self {
            expected: 0,
            actual: 0,
            value: u8::MAX,
            timer: 0.0,
            dirty: false,
        }
    }
}

impl SwitchSystem {
    pub fn expected(&self) -> u8 {
        self.expected
    }

    pub fn actual(&self) -> u8 {
        self.actual
    }

    pub fn value(&self) -> u8 {
        self.value
    }
}

impl SystemStatus for SwitchSystem {
    fn system_type(&self) -> SystemType {
        SystemType::Electrical
    }

    fn deserialize(&mut self, reader: &mut HazelReader<'_>, _spawn: bool) -> CodecResult<()> {
        self.expected = reader.u8()?;
        self.actual = reader.u8()?;
        self.value = reader.u8()?;
        Ok(())
    }

    fn serialize(&self, writer: &mut HazelWriter, _spawn: bool) {
        writer.u8(self.expected);
        writer.u8(self.actual);
        writer.u8(self.value);
    }

    fn repair(&mut self, ctx: &mut SystemContext<'_>, _player_id: u8, amount: u8) -> Option<SystemEvent> {
        if amount & super::SABOTAGE != 0 {
            let flipped: u8 = ctx.rng.gen_range(1..(1 << SWITCH_COUNT));
            self.actual = self.expected ^ flipped;
        } else if amount < SWITCH_COUNT {
            self.actual ^= 1 << amount;
        } else {
            return None;
        }
        self.dirty = true;
        None
    }

    fn fixed_update(&mut self, ctx: &mut SystemContext<'_>, dt: f32) -> Option<SystemEvent> {
        if !ctx.authority {
            return None;
        }
        self.timer += dt;
        if self.timer < FADE_INTERVAL {
            return None;
        }
        self.timer = 0.0;
        let next = if self.is_sabotaged() {
            self.value.saturating_sub(FADE_STEP)
        } else {
            self.value.saturating_add(FADE_STEP)
        };
        if next != self.value {
            self.value = next;
            self.dirty = true;
        }
        None
    }

    fn is_sabotaged(&self) -> bool {
        self.expected != self.actual
    }

    dirty_flag!();
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[test]
    fn test_sabotage_flips_switches() {
        let mut rng = rng();
        let mut ctx = SystemContext {
            rng: &mut rng,
            authority: true,
        };
        let mut lights = SwitchSystem::default();
        lights.repair(&mut ctx, 0, 0x80);
        assert!(lights.is_sabotaged());
        let flipped = lights.expected() ^ lights.actual();
        assert!(flipped > 0 && flipped < 32);

        for bit in 0..5 {
            if flipped & (1 << bit) != 0 {
                lights.repair(&mut ctx, 0, bit);
            }
        }
        assert!(!lights.is_sabotaged());
    }

    #[test]
    fn test_light_fades_only_on_authority() {
        let mut rng = rng();
        let mut lights = SwitchSystem::default();
        let mut ctx = SystemContext {
            rng: &mut rng,
            authority: false,
        };
        lights.repair(&mut ctx, 0, 1);
        lights.clear_dirty();
        lights.fixed_update(&mut ctx, 0.05);
        assert_eq!(lights.value(), 255);
        assert!(!lights.is_dirty());

        ctx.authority = true;
        lights.fixed_update(&mut ctx, 0.05);
        assert_eq!(lights.value(), 252);
        assert!(lights.is_dirty());
        assert_eq!(bytes(&lights, false), vec![0, 2, 252]);
    }
}
