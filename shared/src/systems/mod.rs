//! Ship subsystems.
//!
//! Every sabotageable or interactive part of a ship is a [`SystemStatus`]
//! held by the ship object, keyed by [`SystemType`]. Systems mutate in three
//! ways:
//!
//! - `repair` applies a RepairSystem amount. Only the authority originates
//!   these; mirrors apply the ones they receive without echoing them.
//! - `fixed_update` advances timers once per tick.
//! - `deserialize` overwrites state from the authority's snapshot.
//!
//! Any mutation marks the system dirty. The ship writes dirty systems into
//! its next Data message, each framed under its system type.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt::Debug;

use log::{debug, warn};
use rand::rngs::StdRng;

use crate::codec::{HazelReader, HazelWriter};
use crate::enums::SystemType;
use crate::error::CodecResult;

/// Adds the bookkeeping methods shared by systems whose only dirty state is
/// a `dirty: bool` field.
macro_rules! dirty_flag {
    () => {
        fn is_dirty(&self) -> bool {
            self.dirty
        }

        fn clear_dirty(&mut self) {
            self.dirty = false;
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
    };
}

mod decon;
mod doors;
mod heli;
mod hud;
mod life_support;
mod medscan;
mod platform;
mod reactor;
mod sabotage;
mod security;
mod switch;
mod ventilation;

pub use decon::{DeconState, DeconSystem};
pub use doors::{AutoDoorsSystem, DoorsSystem};
pub use heli::HeliSabotageSystem;
pub use hud::{HqHudSystem, HudOverrideSystem};
pub use life_support::LifeSuppSystem;
pub use medscan::MedScanSystem;
pub use platform::MovingPlatformSystem;
pub use reactor::ReactorSystem;
pub use sabotage::SabotageSystem;
pub use security::SecurityCameraSystem;
pub use switch::SwitchSystem;
pub use ventilation::VentilationSystem;

/// RepairSystem amount that starts a sabotage.
pub const SABOTAGE: u8 = 0x80;

/// Wire value of a countdown that isn't running.
pub const IDLE_COUNTDOWN: f32 = 10000.0;

/// Per-call state a system may need beyond its own fields.
pub struct SystemContext<'a> {
    pub rng: &'a mut StdRng,
    /// True when this peer decides outcomes for the room.
    pub authority: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEvent {
    /// A sabotage countdown reached zero.
    Expired(SystemType),
    /// The sabotage console fired at another system.
    Sabotage(SystemType),
}

pub trait SystemStatus: Send + Debug {
    fn system_type(&self) -> SystemType;

    fn deserialize(&mut self, reader: &mut HazelReader<'_>, spawn: bool) -> CodecResult<()>;

    fn serialize(&self, writer: &mut HazelWriter, spawn: bool);

    fn repair(&mut self, ctx: &mut SystemContext<'_>, player_id: u8, amount: u8)
        -> Option<SystemEvent>;

    fn fixed_update(&mut self, _ctx: &mut SystemContext<'_>, _dt: f32) -> Option<SystemEvent> {
        None
    }

    /// Closes every door of `room`. Returns false for systems without doors.
    fn close_doors(&mut self, _room: SystemType) -> bool {
        false
    }

    fn is_sabotaged(&self) -> bool {
        false
    }

    fn is_dirty(&self) -> bool;

    fn clear_dirty(&mut self);

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Result of advancing a [`Countdown`] by one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Quiet,
    /// Crossed a whole second; worth a resync.
    Second,
    Expired,
}

/// Timer shared by the countdown sabotages.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Countdown {
    Idle,
    Running(f32),
    Expired,
}

impl Countdown {
    pub fn from_wire(value: f32) -> Self {
        if value >= IDLE_COUNTDOWN {
            Self::Idle
        } else if value <= 0.0 {
            Self::Expired
        } else {
            Self::Running(value)
        }
    }

    pub fn to_wire(self) -> f32 {
        match self {
            Self::Idle => IDLE_COUNTDOWN,
            Self::Running(remaining) => remaining,
            Self::Expired => 0.0,
        }
    }

    pub fn is_active(self) -> bool {
        self != Self::Idle
    }

    pub fn tick(&mut self, dt: f32) -> Tick {
        let Self::Running(remaining) = *self else {
            return Tick::Quiet;
        };
        let next = remaining - dt;
        if next <= 0.0 {
            *self = Self::Expired;
            Tick::Expired
        } else {
            *self = Self::Running(next);
            if next.ceil() < remaining.ceil() {
                Tick::Second
            } else {
                Tick::Quiet
            }
        }
    }
}

/// Reads an upacked count followed by `(player, console)` byte pairs.
pub(crate) fn read_pairs(reader: &mut HazelReader<'_>) -> CodecResult<Vec<(u8, u8)>> {
    let count = reader.upacked()? as usize;
    (0..count).map(|_| Ok((reader.u8()?, reader.u8()?))).collect()
}

pub(crate) fn write_pairs<'a>(
    writer: &mut HazelWriter,
    pairs: impl ExactSizeIterator<Item = &'a (u8, u8)>,
) {
    writer.upacked(pairs.len() as u32);
    for (player, console) in pairs {
        writer.u8(*player);
        writer.u8(*console);
    }
}

/// The systems of one ship, in system-type order.
#[derive(Debug, Default)]
pub struct ShipSystems {
    systems: BTreeMap<SystemType, Box<dyn SystemStatus>>,
}

impl ShipSystems {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, system: Box<dyn SystemStatus>) {
        self.systems.insert(system.system_type(), system);
    }

    pub fn len(&self) -> usize {
        self.systems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    pub fn types(&self) -> impl Iterator<Item = SystemType> + '_ {
        self.systems.keys().copied()
    }

    pub fn get(&self, system: SystemType) -> Option<&dyn SystemStatus> {
        self.systems.get(&system).map(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, system: SystemType) -> Option<&mut (dyn SystemStatus + 'static)> {
        self.systems.get_mut(&system).map(|s| s.as_mut())
    }

    pub fn downcast<T: SystemStatus + 'static>(&self, system: SystemType) -> Option<&T> {
        self.get(system)?.as_any().downcast_ref()
    }

    pub fn downcast_mut<T: SystemStatus + 'static>(&mut self, system: SystemType) -> Option<&mut T> {
        self.get_mut(system)?.as_any_mut().downcast_mut()
    }

    pub fn any_sabotaged(&self) -> bool {
        self.systems.values().any(|s| s.is_sabotaged())
    }

    /// Applies a repair amount, forwarding sabotage console output to its
    /// target. Returns the events the room should act on.
    pub fn repair(
        &mut self,
        ctx: &mut SystemContext<'_>,
        system: SystemType,
        player_id: u8,
        amount: u8,
    ) -> Vec<SystemEvent> {
        let mut events = Vec::new();
        if system == SystemType::Sabotage && self.any_sabotaged() {
            debug!("sabotage rejected while another is active");
            return events;
        }
        let Some(target) = self.systems.get_mut(&system) else {
            warn!("repair for missing system {:?}", system);
            return events;
        };
        match target.repair(ctx, player_id, amount) {
            Some(SystemEvent::Sabotage(victim)) => {
                let is_door_system = matches!(victim, SystemType::Doors);
                match self.systems.get_mut(&victim) {
                    Some(victim_system) if !is_door_system => {
                        victim_system.repair(ctx, player_id, SABOTAGE);
                        events.push(SystemEvent::Sabotage(victim));
                    }
                    _ => warn!("sabotage aimed at unusable system {:?}", victim),
                }
            }
            Some(event) => events.push(event),
            None => {}
        }
        events
    }

    pub fn close_doors(&mut self, room: SystemType) -> bool {
        self.systems
            .values_mut()
            .fold(false, |closed, system| system.close_doors(room) || closed)
    }

    pub fn fixed_update(&mut self, ctx: &mut SystemContext<'_>, dt: f32) -> Vec<SystemEvent> {
        self.systems
            .values_mut()
            .filter_map(|system| system.fixed_update(ctx, dt))
            .collect()
    }

    pub fn is_dirty(&self) -> bool {
        self.systems.values().any(|s| s.is_dirty())
    }

    pub fn clear_dirty(&mut self) {
        self.systems.values_mut().for_each(|s| s.clear_dirty());
    }

    /// Spawn snapshots carry every system; updates only the dirty ones.
    pub fn serialize(&self, writer: &mut HazelWriter, spawn: bool) -> CodecResult<()> {
        for (system_type, system) in &self.systems {
            if spawn || system.is_dirty() {
                writer.message((*system_type).into(), |w| {
                    system.serialize(w, spawn);
                    Ok(())
                })?;
            }
        }
        Ok(())
    }

    pub fn deserialize(&mut self, reader: &mut HazelReader<'_>, spawn: bool) -> CodecResult<()> {
        for item in reader.messages() {
            let (tag, mut body) = item?;
            match self.systems.get_mut(&SystemType::from(tag)) {
                Some(system) => system.deserialize(&mut body, spawn)?,
                None => debug!("skipping state for absent system {}", tag),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use rand::SeedableRng;

    use super::*;

    pub fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    pub fn bytes(system: &dyn SystemStatus, spawn: bool) -> Vec<u8> {
        let mut w = HazelWriter::new();
        system.serialize(&mut w, spawn);
        w.finish().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    fn ship() -> ShipSystems {
        let mut systems = ShipSystems::new();
        systems.insert(Box::new(ReactorSystem::new(SystemType::Reactor, 30.0)));
        systems.insert(Box::new(SabotageSystem::default()));
        systems.insert(Box::new(SwitchSystem::default()));
        systems
    }

    #[test]
    fn test_countdown_ticks() {
        let mut countdown = Countdown::Running(1.5);
        assert_eq!(countdown.tick(0.25), Tick::Quiet);
        assert_eq!(countdown.tick(0.5), Tick::Second);
        assert_eq!(countdown.tick(1.0), Tick::Expired);
        assert_eq!(countdown, Countdown::Expired);
        assert_eq!(Countdown::Idle.to_wire(), IDLE_COUNTDOWN);
        assert_eq!(Countdown::from_wire(IDLE_COUNTDOWN), Countdown::Idle);
    }

    #[test]
    fn test_sabotage_console_forwards_to_target() {
        let mut rng = rng();
        let mut ctx = SystemContext {
            rng: &mut rng,
            authority: true,
        };
        let mut systems = ship();
        let events = systems.repair(&mut ctx, SystemType::Sabotage, 0, SystemType::Reactor.into());
        assert_eq!(events, vec![SystemEvent::Sabotage(SystemType::Reactor)]);
        assert!(systems.get(SystemType::Reactor).unwrap().is_sabotaged());

        // A second sabotage is refused while the first is active.
        let events = systems.repair(&mut ctx, SystemType::Sabotage, 0, SystemType::Electrical.into());
        assert!(events.is_empty());
        assert!(!systems.get(SystemType::Electrical).unwrap().is_sabotaged());
    }

    #[test]
    fn test_serialize_only_dirty_systems() {
        let mut rng = rng();
        let mut ctx = SystemContext {
            rng: &mut rng,
            authority: true,
        };
        let mut systems = ship();
        systems.clear_dirty();
        systems.repair(&mut ctx, SystemType::Electrical, 0, 2);

        let mut w = HazelWriter::new();
        systems.serialize(&mut w, false).unwrap();
        let bytes = w.finish().unwrap();
        // one frame: len 3, tag Electrical
        assert_eq!(&bytes[..3], &[3, 0, 7]);
        assert_eq!(bytes.len(), 6);

        let mut w = HazelWriter::new();
        systems.serialize(&mut w, true).unwrap();
        let spawn = w.finish().unwrap();

        let mut mirror = ship();
        mirror
            .deserialize(&mut HazelReader::new(&spawn), true)
            .unwrap();
        let switch: &SwitchSystem = mirror.downcast(SystemType::Electrical).unwrap();
        assert!(switch.is_sabotaged());
    }

    #[test]
    fn test_unknown_system_state_skipped() {
        let mut systems = ship();
        let bytes = [1, 0, 99, 0xAB];
        systems
            .deserialize(&mut HazelReader::new(&bytes), false)
            .unwrap();
    }
}
