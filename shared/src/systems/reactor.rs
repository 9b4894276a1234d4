use std::collections::BTreeSet;

use log::info;

use super::{read_pairs, write_pairs, Countdown, SystemContext, SystemEvent, SystemStatus, Tick};
use crate::codec::{HazelReader, HazelWriter};
use crate::enums::SystemType;
use crate::error::CodecResult;

const ADD_CONSOLE: u8 = 0x40;
const REMOVE_CONSOLE: u8 = 0x20;
const REPAIR: u8 = 0x10;
const CONSOLE_MASK: u8 = 0x03;

/// Two-handed meltdown sabotage: two players must hold different consoles at
/// the same time. Used for the Reactor and for Polus' Laboratory seismic
/// stabilisers.
#[derive(Debug)]
pub struct ReactorSystem {
    system: SystemType,
    duration: f32,
    countdown: Countdown,
    /// (player id, console id) pairs currently held.
    consoles: BTreeSet<(u8, u8)>,
    dirty: bool,
}

impl ReactorSystem {
    pub fn new(system: SystemType, duration: f32) -> Self {
        Self {
            system,
            duration,
            countdown: Countdown::Idle,
            consoles: BTreeSet::new(),
            dirty: false,
        }
    }

    pub fn countdown(&self) -> Countdown {
        self.countdown
    }

    pub fn held_consoles(&self) -> impl Iterator<Item = &(u8, u8)> {
        self.consoles.iter()
    }

    fn resolve(&mut self) {
        info!("{:?} stabilised", self.system);
        self.countdown = Countdown::Idle;
        self.consoles.clear();
    }
}

impl SystemStatus for ReactorSystem {
    fn system_type(&self) -> SystemType {
        self.system
    }

    fn deserialize(&mut self, reader: &mut HazelReader<'_>, _spawn: bool) -> CodecResult<()> {
        self.countdown = Countdown::from_wire(reader.f32()?);
        self.consoles = read_pairs(reader)?.into_iter().collect();
        Ok(())
    }

    fn serialize(&self, writer: &mut HazelWriter, _spawn: bool) {
        writer.f32(self.countdown.to_wire());
        write_pairs(writer, self.consoles.iter());
    }

    fn repair(&mut self, _ctx: &mut SystemContext<'_>, player_id: u8, amount: u8) -> Option<SystemEvent> {
        if amount & super::SABOTAGE != 0 {
            if self.countdown.is_active() {
                return None;
            }
            self.countdown = Countdown::Running(self.duration);
            self.consoles.clear();
        } else if amount & ADD_CONSOLE != 0 {
            self.consoles.insert((player_id, amount & CONSOLE_MASK));
            let distinct: BTreeSet<u8> = self.consoles.iter().map(|(_, c)| *c).collect();
            if distinct.len() >= 2 {
                self.resolve();
            }
        } else if amount & REMOVE_CONSOLE != 0 {
            self.consoles.remove(&(player_id, amount & CONSOLE_MASK));
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
                Some(SystemEvent::Expired(self.system))
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
    fn test_two_consoles_resolve() {
        let mut rng = rng();
        let mut ctx = SystemContext {
            rng: &mut rng,
            authority: true,
        };
        let mut reactor = ReactorSystem::new(SystemType::Reactor, 30.0);
        reactor.repair(&mut ctx, 0, 0x80);
        assert!(reactor.is_sabotaged());

        reactor.repair(&mut ctx, 1, 0x40);
        reactor.repair(&mut ctx, 2, 0x40);
        // same console twice doesn't count
        assert!(reactor.is_sabotaged());

        reactor.repair(&mut ctx, 2, 0x20);
        reactor.repair(&mut ctx, 2, 0x41);
        assert!(!reactor.is_sabotaged());
        assert_eq!(reactor.held_consoles().count(), 0);
    }

    #[test]
    fn test_meltdown_expires() {
        let mut rng = rng();
        let mut ctx = SystemContext {
            rng: &mut rng,
            authority: true,
        };
        let mut reactor = ReactorSystem::new(SystemType::Laboratory, 60.0);
        reactor.repair(&mut ctx, 0, 0x80);
        assert_eq!(reactor.fixed_update(&mut ctx, 59.0), None);
        assert_eq!(
            reactor.fixed_update(&mut ctx, 1.5),
            Some(SystemEvent::Expired(SystemType::Laboratory))
        );
    }

    #[test]
    fn test_wire_format() {
        let mut rng = rng();
        let mut ctx = SystemContext {
            rng: &mut rng,
            authority: true,
        };
        let mut reactor = ReactorSystem::new(SystemType::Reactor, 30.0);
        assert_eq!(bytes(&reactor, true), vec![0x00, 0x40, 0x1C, 0x46, 0]);

        reactor.repair(&mut ctx, 0, 0x80);
        reactor.repair(&mut ctx, 4, 0x41);
        let data = bytes(&reactor, false);
        assert_eq!(&data[4..], &[1, 4, 1]);

        let mut mirror = ReactorSystem::new(SystemType::Reactor, 30.0);
        mirror.deserialize(&mut HazelReader::new(&data), false).unwrap();
        assert_eq!(mirror.countdown(), Countdown::Running(30.0));
        assert_eq!(mirror.held_consoles().collect::<Vec<_>>(), vec![&(4, 1)]);
    }
}
