use std::collections::{BTreeMap, BTreeSet};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::codec::{HazelReader, HazelWriter};
use crate::error::CodecResult;

const FLAG_DISCONNECTED: u8 = 1;
const FLAG_IMPOSTOR: u8 = 2;
const FLAG_DEAD: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskState {
    pub id: u32,
    pub complete: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub player_id: u8,
    pub name: String,
    pub color: u32,
    pub hat: u32,
    pub pet: u32,
    pub skin: u32,
    pub disconnected: bool,
    pub impostor: bool,
    pub dead: bool,
    pub tasks: Vec<TaskState>,
}

impl PlayerInfo {
    pub fn new(player_id: u8) -> Self {
        Self {
            player_id,
            ..Self::default()
        }
    }

    /// Counts toward the crew or impostor head-count.
    pub fn is_alive(&self) -> bool {
        !self.dead && !self.disconnected
    }

    pub fn tasks_done(&self) -> bool {
        self.tasks.iter().all(|t| t.complete)
    }

    fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.disconnected {
            flags |= FLAG_DISCONNECTED;
        }
        if self.impostor {
            flags |= FLAG_IMPOSTOR;
        }
        if self.dead {
            flags |= FLAG_DEAD;
        }
        flags
    }

    fn decode(player_id: u8, r: &mut HazelReader<'_>) -> CodecResult<Self> {
        let name = r.string()?;
        let color = r.upacked()?;
        let hat = r.upacked()?;
        let pet = r.upacked()?;
        let skin = r.upacked()?;
        let flags = r.u8()?;
        let task_count = r.u8()?;
        let tasks = (0..task_count)
            .map(|_| {
                Ok(TaskState {
                    id: r.upacked()?,
                    complete: r.bool()?,
                })
            })
            .collect::<CodecResult<_>>()?;
        Ok(Self {
            player_id,
            name,
            color,
            hat,
            pet,
            skin,
            disconnected: flags & FLAG_DISCONNECTED != 0,
            impostor: flags & FLAG_IMPOSTOR != 0,
            dead: flags & FLAG_DEAD != 0,
            tasks,
        })
    }

    fn encode(&self, w: &mut HazelWriter) -> CodecResult<()> {
        w.message(self.player_id, |w| {
            w.string(&self.name);
            w.upacked(self.color);
            w.upacked(self.hat);
            w.upacked(self.pet);
            w.upacked(self.skin);
            w.u8(self.flags());
            w.u8(self.tasks.len().min(u8::MAX as usize) as u8);
            for task in self.tasks.iter().take(u8::MAX as usize) {
                w.upacked(task.id);
                w.bool(task.complete);
            }
            Ok(())
        })
    }
}

/// The GameData object: everyone's name, cosmetics, role and tasks.
///
/// Mutations through [`PlayerRegistry::update`] mark that player dirty so
/// the authority resyncs just them. RPC-driven changes that every peer
/// applies on its own go through [`PlayerRegistry::get_mut`] instead.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerRegistry {
    players: BTreeMap<u8, PlayerInfo>,
    dirty: BTreeSet<u8>,
}

impl PlayerRegistry {
    pub fn get(&self, player_id: u8) -> Option<&PlayerInfo> {
        self.players.get(&player_id)
    }

    pub fn get_mut(&mut self, player_id: u8) -> Option<&mut PlayerInfo> {
        self.players.get_mut(&player_id)
    }

    pub fn players(&self) -> impl Iterator<Item = &PlayerInfo> {
        self.players.values()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn add(&mut self, player_id: u8) -> &mut PlayerInfo {
        self.dirty.insert(player_id);
        self.players
            .entry(player_id)
            .or_insert_with(|| PlayerInfo::new(player_id))
    }

    pub fn remove(&mut self, player_id: u8) -> Option<PlayerInfo> {
        self.dirty.remove(&player_id);
        self.players.remove(&player_id)
    }

    /// Applies `f` and schedules the player for the next sync.
    pub fn update<F: FnOnce(&mut PlayerInfo)>(&mut self, player_id: u8, f: F) -> bool {
        match self.players.get_mut(&player_id) {
            Some(info) => {
                f(info);
                self.dirty.insert(player_id);
                true
            }
            None => false,
        }
    }

    pub fn set_tasks(&mut self, player_id: u8, task_ids: &[u8]) -> bool {
        match self.players.get_mut(&player_id) {
            Some(info) => {
                info.tasks = task_ids
                    .iter()
                    .map(|id| TaskState {
                        id: u32::from(*id),
                        complete: false,
                    })
                    .collect();
                true
            }
            None => false,
        }
    }

    /// Marks the task at `index` of the player's list complete.
    pub fn complete_task(&mut self, player_id: u8, index: u32) -> bool {
        let task = self
            .players
            .get_mut(&player_id)
            .and_then(|info| info.tasks.get_mut(index as usize));
        match task {
            Some(task) => {
                task.complete = true;
                true
            }
            None => {
                debug!("player {} has no task {}", player_id, index);
                false
            }
        }
    }

    /// True once every living-or-dead crewmate finished every task. Rooms
    /// without any assigned tasks never count as done.
    pub fn all_crew_tasks_done(&self) -> bool {
        let mut crew = self
            .players
            .values()
            .filter(|p| !p.impostor && !p.disconnected)
            .peekable();
        if crew.peek().is_none() {
            return false;
        }
        let mut any_task = false;
        for player in crew {
            any_task |= !player.tasks.is_empty();
            if !player.tasks_done() {
                return false;
            }
        }
        any_task
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn clear_dirty(&mut self) {
        self.dirty.clear();
    }

    pub fn deserialize(&mut self, r: &mut HazelReader<'_>, spawn: bool) -> CodecResult<()> {
        if spawn {
            let count = r.upacked()?;
            self.players.clear();
            for _ in 0..count {
                let (player_id, mut body) = r.message()?;
                self.players
                    .insert(player_id, PlayerInfo::decode(player_id, &mut body)?);
            }
            return Ok(());
        }
        for item in r.messages() {
            let (player_id, mut body) = item?;
            self.players
                .insert(player_id, PlayerInfo::decode(player_id, &mut body)?);
        }
        Ok(())
    }

    pub fn serialize(&self, w: &mut HazelWriter, spawn: bool) -> CodecResult<()> {
        if spawn {
            w.upacked(self.players.len() as u32);
            return self.players.values().try_for_each(|p| p.encode(w));
        }
        self.dirty
            .iter()
            .filter_map(|id| self.players.get(id))
            .try_for_each(|p| p.encode(w))
    }
}
