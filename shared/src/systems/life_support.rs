use std::collections::BTreeSet;

use log::info;

use super::{Countdown, SystemContext, SystemEvent, SystemStatus, Tick};
use crate::codec::{HazelReader, HazelWriter};
use crate::enums::SystemType;
use crate::error::CodecResult;

const COMPLETE_CONSOLE: u8 = 0x40;
const REPAIR: u8 = 0x10;
const CONSOLE_MASK: u8 = 0x03;

/// Oxygen depletion. Entering the code at both consoles, in any order and by
/// any players, restores it.
#[derive(Debug)]
pub struct LifeSuppSystem {
    duration: f32,
    countdown: Countdown,
    completed: BTreeSet<u32>,
    dirty: bool,
}

impl LifeSuppSystem {
    pub fn new(duration: f32) -> Self {
        Self {
            duration,
            countdown: Countdown::Idle,
            completed: BTreeSet::new(),
            dirty: false,
        }
    }

    pub fn countdown(&self) -> Countdown {
        self.countdown
    }

    pub fn completed_consoles(&self) -> impl Iterator<Item = &u32> {
        self.completed.iter()
    }

    fn resolve(&mut self) {
        info!("oxygen restored");
        self.countdown = Countdown::Idle;
        self.completed.clear();
    }
}

impl Default for LifeSuppSystem {
    fn default() -> Self {
        Self::new(30.0)
    }
}

impl SystemStatus for LifeSuppSystem {
    fn system_type(&self) -> SystemType {
        SystemType::LifeSupp
    }

    fn deserialize(&mut self, reader: &mut HazelReader<'_>, _spawn: bool) -> CodecResult<()> {
        self.countdown = Countdown::from_wire(reader.f32()?);
        let count = reader.upacked()?;
        self.completed = (0..count)
            .map(|_| reader.upacked())
            .collect::<CodecResult<_>>()?;
        Ok(())
    }

    fn serialize(&self, writer: &mut HazelWriter, _spawn: bool) {
        writer.f32(self.countdown.to_wire());
        writer.upacked(self.completed.len() as u32);
        for console in &self.completed {
            writer.upacked(*console);
        }
    }

    fn repair(&mut self, _ctx: &mut SystemContext<'_>, _player_id: u8, amount: u8) -> Option<SystemEvent> {
        if amount & super::SABOTAGE != 0 {
            if self.countdown.is_active() {
                return None;
            }
            self.countdown = Countdown::Running(self.duration);
            self.completed.clear();
        } else if amount & COMPLETE_CONSOLE != 0 {
            self.completed.insert(u32::from(amount & CONSOLE_MASK));
            if self.completed.len() >= 2 {
                self.resolve();
            }
        } else if amount & REPAIR != 0 {
            self.resolve();
        } else {
            return None;
        }
        self.dirty = true;
        None
    }

    fn fixed_update(&mut self, _ctx: &mut SystemContext<'_>, dt: f32) -> Option<SystemEvent> {
        match self.countdown.tick(dt) {
            Tick::Quiet => None,
            Tick::Second => {
                self.dirty = true;
                None
            }
            Tick::Expired => {
                self.dirty = true;
                Some(SystemEvent::Expired(SystemType::LifeSupp))
            }
        }
    }

    fn is_sabotaged(&self) -> bool {
        self.countdown.is_active()
    }

    dirty_flag!();
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[test]
    fn test_both_consoles_restore() {
        let mut rng = rng();
        let mut ctx = SystemContext {
            rng: &mut rng,
            authority: true,
        };
        let mut o2 = LifeSuppSystem::default();
        o2.repair(&mut ctx, 0, 0x80);
        o2.repair(&mut ctx, 3, 0x40);
        o2.repair(&mut ctx, 3, 0x40);
        assert!(o2.is_sabotaged());
        assert_eq!(o2.completed_consoles().count(), 1);

        o2.repair(&mut ctx, 5, 0x41);
        assert!(!o2.is_sabotaged());
    }

    #[test]
    fn test_round_trip_state() {
        let mut rng = rng();
        let mut ctx = SystemContext {
            rng: &mut rng,
            authority: true,
        };
        let mut o2 = LifeSuppSystem::default();
        o2.repair(&mut ctx, 0, 0x80);
        o2.repair(&mut ctx, 0, 0x41);
        o2.fixed_update(&mut ctx, 2.0);

        let data = bytes(&o2, false);
        assert_eq!(&data[4..], &[1, 1]);
        let mut mirror = LifeSuppSystem::default();
        mirror.deserialize(&mut HazelReader::new(&data), false).unwrap();
        assert_eq!(mirror.countdown(), Countdown::Running(28.0));
        assert!(mirror.is_sabotaged());
    }
}
