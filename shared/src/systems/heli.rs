use std::collections::BTreeSet;

use log::info;

use super::{read_pairs, write_pairs, Countdown, SystemContext, SystemEvent, SystemStatus, Tick};
use crate::codec::{HazelReader, HazelWriter};
use crate::enums::SystemType;
use crate::error::CodecResult;

const CRASH_TIME: f32 = 90.0;
/// How long one stabilised console stays done without the other.
const RESET_TIME: f32 = 10.0;

const ADD_ACTIVE: u8 = 0x40;
const REMOVE_ACTIVE: u8 = 0x20;
const COMPLETE: u8 = 0x10;
const CONSOLE_MASK: u8 = 0x0F;

/// Airship crash course. Both consoles must be finished within the reset
/// window of each other.
#[derive(Debug)]
pub struct HeliSabotageSystem {
    countdown: Countdown,
    reset_timer: f32,
    active: BTreeSet<(u8, u8)>,
    completed: BTreeSet<u8>,
    dirty: bool,
}

impl Default for HeliSabotageSystem {
    fn default() -> Self {
        Self {
            countdown: Countdown::Idle,
            reset_timer: 0.0,
            active: BTreeSet::new(),
            completed: BTreeSet::new(),
            dirty: false,
        }
    }
}

impl HeliSabotageSystem {
    pub fn countdown(&self) -> Countdown {
        self.countdown
    }

    pub fn completed_consoles(&self) -> impl Iterator<Item = &u8> {
        self.completed.iter()
    }

    fn resolve(&mut self) {
        info!("crash course averted");
        self.countdown = Countdown::Idle;
        self.reset_timer = 0.0;
        self.active.clear();
        self.completed.clear();
    }
}

impl SystemStatus for HeliSabotageSystem {
    fn system_type(&self) -> SystemType {
        SystemType::Reactor
    }

    fn deserialize(&mut self, reader: &mut HazelReader<'_>, _spawn: bool) -> CodecResult<()> {
        self.countdown = Countdown::from_wire(reader.f32()?);
        self.reset_timer = reader.f32()?;
        self.active = read_pairs(reader)?.into_iter().collect();
        let count = reader.upacked()?;
        self.completed = (0..count).map(|_| reader.u8()).collect::<CodecResult<_>>()?;
        Ok(())
    }

    fn serialize(&self, writer: &mut HazelWriter, _spawn: bool) {
        writer.f32(self.countdown.to_wire());
        writer.f32(self.reset_timer);
        write_pairs(writer, self.active.iter());
        writer.upacked(self.completed.len() as u32);
        for console in &self.completed {
            writer.u8(*console);
        }
    }

    fn repair(&mut self, _ctx: &mut SystemContext<'_>, player_id: u8, amount: u8) -> Option<SystemEvent> {
        let console = amount & CONSOLE_MASK;
        if amount & super::SABOTAGE != 0 {
            if self.countdown.is_active() {
                return None;
            }
            self.countdown = Countdown::Running(CRASH_TIME);
            self.reset_timer = 0.0;
            self.active.clear();
            self.completed.clear();
        } else if amount & ADD_ACTIVE != 0 {
            self.active.insert((player_id, console));
        } else if amount & REMOVE_ACTIVE != 0 {
            self.active.remove(&(player_id, console));
        } else if amount & COMPLETE != 0 {
            self.completed.insert(console);
            if self.completed.len() >= 2 {
                self.resolve();
            } else {
                self.reset_timer = RESET_TIME;
            }
        } else {
            return None;
        }
        self.dirty = true;
        None
    }

    fn fixed_update(&mut self, _ctx: &mut SystemContext<'_>, dt: f32) -> Option<SystemEvent> {
        if !self.countdown.is_active() {
            return None;
        }
        if self.reset_timer > 0.0 {
            self.reset_timer -= dt;
            if self.reset_timer <= 0.0 {
                self.reset_timer = 0.0;
                self.completed.clear();
                self.dirty = true;
            }
        }
        match self.countdown.tick(dt) {
            Tick::Quiet => None,
            Tick::Second => {
                self.dirty = true;
                None
            }
            Tick::Expired => {
                self.dirty = true;
                Some(SystemEvent::Expired(SystemType::Reactor))
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
    fn test_lone_console_resets() {
        let mut rng = rng();
        let mut ctx = SystemContext {
            rng: &mut rng,
            authority: true,
        };
        let mut heli = HeliSabotageSystem::default();
        heli.repair(&mut ctx, 0, 0x80);
        heli.repair(&mut ctx, 1, 0x10);
        assert_eq!(heli.completed_consoles().count(), 1);

        heli.fixed_update(&mut ctx, 10.5);
        assert_eq!(heli.completed_consoles().count(), 0);
        assert!(heli.is_sabotaged());

        heli.repair(&mut ctx, 1, 0x10);
        heli.repair(&mut ctx, 2, 0x11);
        assert!(!heli.is_sabotaged());
    }

    #[test]
    fn test_crash_expires() {
        let mut rng = rng();
        let mut ctx = SystemContext {
            rng: &mut rng,
            authority: true,
        };
        let mut heli = HeliSabotageSystem::default();
        heli.repair(&mut ctx, 0, 0x80);
        assert_eq!(
            heli.fixed_update(&mut ctx, 91.0),
            Some(SystemEvent::Expired(SystemType::Reactor))
        );
    }

    #[test]
    fn test_wire_round_trip() {
        let mut rng = rng();
        let mut ctx = SystemContext {
            rng: &mut rng,
            authority: true,
        };
        let mut heli = HeliSabotageSystem::default();
        heli.repair(&mut ctx, 0, 0x80);
        heli.repair(&mut ctx, 3, 0x41);
        heli.repair(&mut ctx, 3, 0x11);

        let data = bytes(&heli, false);
        assert_eq!(&data[8..], &[1, 3, 1, 1, 1]);
        let mut mirror = HeliSabotageSystem::default();
        mirror.deserialize(&mut HazelReader::new(&data), false).unwrap();
        assert_eq!(mirror.countdown(), Countdown::Running(CRASH_TIME));
        assert_eq!(mirror.completed_consoles().collect::<Vec<_>>(), vec![&1]);
    }
}
