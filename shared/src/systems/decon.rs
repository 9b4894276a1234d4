use super::{SystemContext, SystemEvent, SystemStatus};
use crate::codec::{HazelReader, HazelWriter};
use crate::enums::SystemType;
use crate::error::CodecResult;

/// Seconds a decontamination door stays open, and the spray lasts.
const STAGE_TIME: f32 = 3.0;

/// Decontamination state flags.
pub struct DeconState;

impl DeconState {
    pub const IDLE: u8 = 0;
    pub const ENTER: u8 = 1;
    pub const CLOSED: u8 = 2;
    pub const EXIT: u8 = 4;
    pub const HEADING_UP: u8 = 8;
}

/// Airlock between two doors. A player entering from either side runs the
/// Enter, Closed, Exit sequence.
#[derive(Debug)]
pub struct DeconSystem {
    system: SystemType,
    timer: f32,
    state: u8,
    dirty: bool,
}

impl DeconSystem {
    pub fn new(system: SystemType) -> Self {
        Self {
            system,
            timer: 0.0,
            state: DeconState::IDLE,
            dirty: false,
        }
    }

    pub fn state(&self) -> u8 {
        self.state
    }
}

impl SystemStatus for DeconSystem {
    fn system_type(&self) -> SystemType {
        self.system
    }

    fn deserialize(&mut self, reader: &mut HazelReader<'_>, _spawn: bool) -> CodecResult<()> {
        self.timer = f32::from(reader.u8()?);
        self.state = reader.u8()?;
        Ok(())
    }

    fn serialize(&self, writer: &mut HazelWriter, _spawn: bool) {
        writer.u8(self.timer.ceil().clamp(0.0, 255.0) as u8);
        writer.u8(self.state);
    }

    fn repair(&mut self, _ctx: &mut SystemContext<'_>, _player_id: u8, amount: u8) -> Option<SystemEvent> {
        if self.state != DeconState::IDLE {
            return None;
        }
        self.state = match amount {
            1 => DeconState::ENTER | DeconState::HEADING_UP,
            2 => DeconState::ENTER,
            3 => DeconState::EXIT | DeconState::HEADING_UP,
            4 => DeconState::EXIT,
            _ => return None,
        };
        self.timer = STAGE_TIME;
        self.dirty = true;
        None
    }

    fn fixed_update(&mut self, _ctx: &mut SystemContext<'_>, dt: f32) -> Option<SystemEvent> {
        if self.state == DeconState::IDLE {
            return None;
        }
        self.timer -= dt;
        if self.timer > 0.0 {
            return None;
        }
        let heading = self.state & DeconState::HEADING_UP;
        if self.state & DeconState::ENTER != 0 {
            self.state = DeconState::CLOSED | heading;
            self.timer = STAGE_TIME;
        } else if self.state & DeconState::CLOSED != 0 {
            self.state = DeconState::EXIT | heading;
            self.timer = STAGE_TIME;
        } else {
            self.state = DeconState::IDLE;
            self.timer = 0.0;
        }
        self.dirty = true;
        None
    }

    dirty_flag!();
}
