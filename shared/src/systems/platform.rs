use super::{SystemContext, SystemEvent, SystemStatus};
use crate::codec::{HazelReader, HazelWriter};
use crate::enums::SystemType;
use crate::error::CodecResult;

/// Target value when nobody is riding.
pub const NO_RIDER: u32 = u32::MAX;

/// The Airship gap-room platform. It isn't repaired; riding it is a
/// UsePlatform RPC which the room forwards to [`MovingPlatformSystem::ride`].
#[derive(Debug)]
pub struct MovingPlatformSystem {
    use_id: u8,
    rider: u32,
    /// False while docked on the left.
    right_side: bool,
    dirty: bool,
}

impl Default for MovingPlatformSystem {
    fn default() -> Self {
        Self {
            use_id: 0,
            rider: NO_RIDER,
            right_side: false,
            dirty: false,
        }
    }
}

impl MovingPlatformSystem {
    pub fn ride(&mut self, player_net_id: u32) {
        self.use_id = self.use_id.wrapping_add(1);
        self.rider = player_net_id;
        self.right_side = !self.right_side;
        self.dirty = true;
    }

    pub fn rider(&self) -> Option<u32> {
        (self.rider != NO_RIDER).then_some(self.rider)
    }

    pub fn is_right_side(&self) -> bool {
        self.right_side
    }
}

impl SystemStatus for MovingPlatformSystem {
    fn system_type(&self) -> SystemType {
        SystemType::GapRoom
    }

    fn deserialize(&mut self, reader: &mut HazelReader<'_>, _spawn: bool) -> CodecResult<()> {
        self.use_id = reader.u8()?;
        self.rider = reader.u32()?;
        self.right_side = reader.bool()?;
        Ok(())
    }

    fn serialize(&self, writer: &mut HazelWriter, _spawn: bool) {
        writer.u8(self.use_id);
        writer.u32(self.rider);
        writer.bool(self.right_side);
    }

    fn repair(&mut self, _ctx: &mut SystemContext<'_>, _player_id: u8, _amount: u8) -> Option<SystemEvent> {
        None
    }

    dirty_flag!();
}
