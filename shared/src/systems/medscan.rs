use super::{SystemContext, SystemEvent, SystemStatus};
use crate::codec::{HazelReader, HazelWriter};
use crate::enums::SystemType;
use crate::error::CodecResult;

const JOIN_QUEUE: u8 = 0x80;
const LEAVE_QUEUE: u8 = 0x40;
const PLAYER_MASK: u8 = 0x1F;

/// The MedBay scanner queue. Only the head of the queue may scan.
#[derive(Debug, Default)]
pub struct MedScanSystem {
    queue: Vec<u8>,
    dirty: bool,
}

impl MedScanSystem {
    pub fn queue(&self) -> &[u8] {
        &self.queue
    }
}

impl SystemStatus for MedScanSystem {
    fn system_type(&self) -> SystemType {
        SystemType::MedBay
    }

    fn deserialize(&mut self, reader: &mut HazelReader<'_>, _spawn: bool) -> CodecResult<()> {
        let count = reader.upacked()?;
        self.queue = (0..count).map(|_| reader.u8()).collect::<CodecResult<_>>()?;
        Ok(())
    }

    fn serialize(&self, writer: &mut HazelWriter, _spawn: bool) {
        writer.upacked(self.queue.len() as u32);
        writer.bytes(&self.queue);
    }

    fn repair(&mut self, _ctx: &mut SystemContext<'_>, _player_id: u8, amount: u8) -> Option<SystemEvent> {
        let player = amount & PLAYER_MASK;
        if amount & JOIN_QUEUE != 0 {
            if !self.queue.contains(&player) {
                self.queue.push(player);
                self.dirty = true;
            }
        } else if amount & LEAVE_QUEUE != 0 {
            let before = self.queue.len();
            self.queue.retain(|p| *p != player);
            self.dirty |= self.queue.len() != before;
        }
        None
    }

    dirty_flag!();
}
