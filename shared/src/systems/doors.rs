use std::collections::BTreeMap;

use log::debug;

use super::{SystemContext, SystemEvent, SystemStatus};
use crate::codec::{HazelReader, HazelWriter};
use crate::data::DoorInfo;
use crate::enums::SystemType;
use crate::error::CodecResult;

/// Seconds before an impostor may close a room's doors again.
pub const DOOR_COOLDOWN: f32 = 30.0;

/// Seconds before a Skeld door opens by itself.
pub const AUTO_OPEN_DELAY: f32 = 10.0;

const OPEN_DOOR: u8 = 0x40;
const DOOR_MASK: u8 = 0x1F;

/// Polus and Airship doors: closed doors stay closed until a player opens
/// them from the door minigame.
#[derive(Debug)]
pub struct DoorsSystem {
    rooms: Vec<SystemType>,
    open: Vec<bool>,
    cooldowns: BTreeMap<SystemType, f32>,
    dirty: bool,
}

impl DoorsSystem {
    pub fn new(doors: &[DoorInfo]) -> Self {
        Self {
            rooms: doors.iter().map(|d| d.room).collect(),
            open: vec![true; doors.len()],
            cooldowns: BTreeMap::new(),
            dirty: false,
        }
    }

    pub fn is_open(&self, door: usize) -> Option<bool> {
        self.open.get(door).copied()
    }

    pub fn cooldown(&self, room: SystemType) -> f32 {
        self.cooldowns.get(&room).copied().unwrap_or(0.0)
    }
}

impl SystemStatus for DoorsSystem {
    fn system_type(&self) -> SystemType {
        SystemType::Doors
    }

    fn deserialize(&mut self, reader: &mut HazelReader<'_>, _spawn: bool) -> CodecResult<()> {
        let count = reader.upacked()?;
        self.cooldowns.clear();
        for _ in 0..count {
            let room = SystemType::from(reader.u8()?);
            let timer = reader.f32()?;
            self.cooldowns.insert(room, timer);
        }
        for door in self.open.iter_mut() {
            *door = reader.bool()?;
        }
        Ok(())
    }

    fn serialize(&self, writer: &mut HazelWriter, _spawn: bool) {
        writer.upacked(self.cooldowns.len() as u32);
        for (room, timer) in &self.cooldowns {
            writer.u8((*room).into());
            writer.f32(*timer);
        }
        for open in &self.open {
            writer.bool(*open);
        }
    }

    fn repair(&mut self, _ctx: &mut SystemContext<'_>, _player_id: u8, amount: u8) -> Option<SystemEvent> {
        if amount & OPEN_DOOR == 0 {
            return None;
        }
        let door = usize::from(amount & DOOR_MASK);
        match self.open.get_mut(door) {
            Some(open) if !*open => {
                *open = true;
                self.dirty = true;
            }
            Some(_) => {}
            None => debug!("no door {}", door),
        }
        None
    }

    fn fixed_update(&mut self, _ctx: &mut SystemContext<'_>, dt: f32) -> Option<SystemEvent> {
        for timer in self.cooldowns.values_mut() {
            if *timer > 0.0 {
                *timer = (*timer - dt).max(0.0);
                if *timer == 0.0 {
                    self.dirty = true;
                }
            }
        }
        None
    }

    fn close_doors(&mut self, room: SystemType) -> bool {
        if self.cooldown(room) > 0.0 {
            debug!("doors of {:?} still on cooldown", room);
            return false;
        }
        let mut closed = false;
        for (door_room, open) in self.rooms.iter().zip(self.open.iter_mut()) {
            if *door_room == room {
                *open = false;
                closed = true;
            }
        }
        if closed {
            self.cooldowns.insert(room, DOOR_COOLDOWN);
            self.dirty = true;
        }
        closed
    }

    dirty_flag!();
}

/// Skeld doors: they reopen on their own and sync with a dirty mask.
#[derive(Debug)]
pub struct AutoDoorsSystem {
    rooms: Vec<SystemType>,
    open: Vec<bool>,
    timers: Vec<f32>,
    dirty_mask: u32,
}

impl AutoDoorsSystem {
    pub fn new(doors: &[DoorInfo]) -> Self {
        Self {
            rooms: doors.iter().map(|d| d.room).collect(),
            open: vec![true; doors.len()],
            timers: vec![0.0; doors.len()],
            dirty_mask: 0,
        }
    }

    pub fn is_open(&self, door: usize) -> Option<bool> {
        self.open.get(door).copied()
    }
}

impl SystemStatus for AutoDoorsSystem {
    fn system_type(&self) -> SystemType {
        SystemType::Doors
    }

    fn deserialize(&mut self, reader: &mut HazelReader<'_>, spawn: bool) -> CodecResult<()> {
        if spawn {
            for door in self.open.iter_mut() {
                *door = reader.bool()?;
            }
            return Ok(());
        }
        let mask = reader.upacked()?;
        for (i, door) in self.open.iter_mut().enumerate() {
            if mask & (1 << i) != 0 {
                *door = reader.bool()?;
            }
        }
        Ok(())
    }

    fn serialize(&self, writer: &mut HazelWriter, spawn: bool) {
        if !spawn {
            writer.upacked(self.dirty_mask);
        }
        for (i, open) in self.open.iter().enumerate() {
            if spawn || self.dirty_mask & (1 << i) != 0 {
                writer.bool(*open);
            }
        }
    }

    fn repair(&mut self, _ctx: &mut SystemContext<'_>, _player_id: u8, _amount: u8) -> Option<SystemEvent> {
        None
    }

    fn fixed_update(&mut self, ctx: &mut SystemContext<'_>, dt: f32) -> Option<SystemEvent> {
        if !ctx.authority {
            return None;
        }
        for (i, (open, timer)) in self.open.iter_mut().zip(self.timers.iter_mut()).enumerate() {
            if *open {
                continue;
            }
            *timer -= dt;
            if *timer <= 0.0 {
                *open = true;
                *timer = 0.0;
                self.dirty_mask |= 1 << i;
            }
        }
        None
    }

    fn close_doors(&mut self, room: SystemType) -> bool {
        let mut closed = false;
        for (i, door_room) in self.rooms.iter().enumerate() {
            if *door_room == room {
                self.open[i] = false;
                self.timers[i] = AUTO_OPEN_DELAY;
                self.dirty_mask |= 1 << i;
                closed = true;
            }
        }
        closed
    }

    fn is_dirty(&self) -> bool {
        self.dirty_mask != 0
    }

    fn clear_dirty(&mut self) {
        self.dirty_mask = 0;
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}
