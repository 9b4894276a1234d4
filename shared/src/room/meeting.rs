use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::codec::{HazelReader, HazelWriter};
use crate::error::CodecResult;

/// `voted_for` value of a skip vote.
pub const SKIPPED_VOTE: u8 = 14;

/// Player id sent in VotingComplete when nobody is exiled.
pub const NO_EXILE: u8 = 0xFF;

const VOTE_MASK: u8 = 0x0F;
const DID_REPORT: u8 = 0x20;
const DID_VOTE: u8 = 0x40;
const IS_DEAD: u8 = 0x80;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteState {
    pub player_id: u8,
    pub voted_for: Option<u8>,
    pub did_report: bool,
    pub did_vote: bool,
    pub dead: bool,
}

impl VoteState {
    pub fn to_byte(&self) -> u8 {
        let mut byte = self.voted_for.map_or(0, |t| t.wrapping_add(1) & VOTE_MASK);
        if self.did_report {
            byte |= DID_REPORT;
        }
        if self.did_vote {
            byte |= DID_VOTE;
        }
        if self.dead {
            byte |= IS_DEAD;
        }
        byte
    }

    pub fn from_byte(player_id: u8, byte: u8) -> Self {
        let vote = byte & VOTE_MASK;
        Self {
            player_id,
            voted_for: (vote != 0).then(|| vote - 1),
            did_report: byte & DID_REPORT != 0,
            did_vote: byte & DID_VOTE != 0,
            dead: byte & IS_DEAD != 0,
        }
    }
}

/// Outcome of a finished vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tally {
    pub exiled: Option<u8>,
    pub tie: bool,
}

/// The meeting object: one vote state per player, in player-id order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeetingHud {
    states: Vec<VoteState>,
    dirty_mask: u32,
    timer: f32,
}

impl MeetingHud {
    /// `players` is `(player id, dead)` for everyone in the room.
    pub fn new(players: &[(u8, bool)], reporter: u8, duration: f32) -> Self {
        let mut states: Vec<VoteState> = players
            .iter()
            .map(|&(player_id, dead)| VoteState {
                player_id,
                did_report: player_id == reporter,
                dead,
                ..VoteState::default()
            })
            .collect();
        states.sort_by_key(|s| s.player_id);
        Self {
            states,
            dirty_mask: 0,
            timer: duration,
        }
    }

    pub fn states(&self) -> &[VoteState] {
        &self.states
    }

    pub fn state_bytes(&self) -> Vec<u8> {
        self.states.iter().map(VoteState::to_byte).collect()
    }

    /// Re-keys states decoded from a spawn to the room's player ids.
    pub fn bind_players(&mut self, player_ids: &[u8]) {
        for (state, player_id) in self.states.iter_mut().zip(player_ids) {
            state.player_id = *player_id;
        }
    }

    /// Records a vote. `suspect` is a player id or [`SKIPPED_VOTE`].
    pub fn cast_vote(&mut self, voter: u8, suspect: u8) -> bool {
        let Some(index) = self.states.iter().position(|s| s.player_id == voter) else {
            return false;
        };
        let state = &mut self.states[index];
        if state.dead || state.did_vote {
            return false;
        }
        state.did_vote = true;
        state.voted_for = Some(suspect);
        self.dirty_mask |= 1 << index;
        true
    }

    pub fn clear_vote(&mut self, voter: u8) {
        if let Some(index) = self.states.iter().position(|s| s.player_id == voter) {
            self.states[index].did_vote = false;
            self.states[index].voted_for = None;
            self.dirty_mask |= 1 << index;
        }
    }

    pub fn all_voted(&self) -> bool {
        self.states.iter().filter(|s| !s.dead).all(|s| s.did_vote)
    }

    pub fn tally(&self) -> Tally {
        let mut counts: BTreeMap<u8, usize> = BTreeMap::new();
        for state in self.states.iter().filter(|s| s.did_vote) {
            if let Some(target) = state.voted_for {
                *counts.entry(target).or_default() += 1;
            }
        }
        let Some(top) = counts.values().copied().max() else {
            return Tally {
                exiled: None,
                tie: false,
            };
        };
        let leaders: Vec<u8> = counts
            .iter()
            .filter(|(_, count)| **count == top)
            .map(|(target, _)| *target)
            .collect();
        match leaders.as_slice() {
            [only] if *only != SKIPPED_VOTE => Tally {
                exiled: Some(*only),
                tie: false,
            },
            [_] => Tally {
                exiled: None,
                tie: false,
            },
            _ => Tally {
                exiled: None,
                tie: true,
            },
        }
    }

    /// Counts the voting clock down. Returns true once it runs out.
    pub fn fixed_update(&mut self, dt: f32) -> bool {
        if self.timer <= 0.0 {
            return false;
        }
        self.timer -= dt;
        self.timer <= 0.0
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty_mask != 0
    }

    pub fn clear_dirty(&mut self) {
        self.dirty_mask = 0;
    }

    pub fn deserialize(&mut self, r: &mut HazelReader<'_>, spawn: bool) -> CodecResult<()> {
        if spawn {
            let mut states = Vec::new();
            while !r.is_empty() {
                let byte = r.u8()?;
                states.push(VoteState::from_byte(states.len() as u8, byte));
            }
            self.states = states;
            return Ok(());
        }
        let mask = r.upacked()?;
        for (i, state) in self.states.iter_mut().enumerate() {
            if mask & (1 << i) != 0 {
                *state = VoteState::from_byte(state.player_id, r.u8()?);
            }
        }
        Ok(())
    }

    pub fn serialize(&self, w: &mut HazelWriter, spawn: bool) {
        if spawn {
            w.bytes(&self.state_bytes());
            return;
        }
        w.upacked(self.dirty_mask);
        for (i, state) in self.states.iter().enumerate() {
            if self.dirty_mask & (1 << i) != 0 {
                w.u8(state.to_byte());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meeting() -> MeetingHud {
        MeetingHud::new(&[(2, false), (0, false), (1, true), (3, false)], 0, 135.0)
    }

    #[test]
    fn test_state_byte() {
        let state = VoteState {
            player_id: 0,
            voted_for: Some(0),
            did_report: false,
            did_vote: true,
            dead: false,
        };
        assert_eq!(state.to_byte(), 0x41);
        assert_eq!(VoteState::from_byte(0, 0x41), state);
        assert_eq!(VoteState::from_byte(1, 0x80).voted_for, None);
    }

    #[test]
    fn test_majority_exiles() {
        let mut hud = meeting();
        assert!(hud.cast_vote(0, 3));
        assert!(!hud.cast_vote(0, 2));
        assert!(!hud.cast_vote(1, 3));
        assert!(!hud.all_voted());
        hud.cast_vote(2, 3);
        hud.cast_vote(3, SKIPPED_VOTE);
        assert!(hud.all_voted());
        assert_eq!(
            hud.tally(),
            Tally {
                exiled: Some(3),
                tie: false
            }
        );
        assert_eq!(hud.state_bytes(), vec![0x64, 0x80, 0x44, 0x4F]);
    }

    #[test]
    fn test_tie_and_skip() {
        let mut hud = meeting();
        hud.cast_vote(0, 2);
        hud.cast_vote(2, 0);
        assert!(hud.tally().tie);

        let mut skipped = meeting();
        skipped.cast_vote(0, SKIPPED_VOTE);
        assert_eq!(skipped.tally().exiled, None);
        assert!(!skipped.tally().tie);
    }

    #[test]
    fn test_dirty_mask_sync() {
        let mut hud = meeting();
        let mut w = HazelWriter::new();
        hud.serialize(&mut w, true);
        let mut mirror = MeetingHud::default();
        mirror
            .deserialize(&mut HazelReader::new(&w.finish().unwrap()), true)
            .unwrap();
        mirror.bind_players(&[0, 1, 2, 3]);

        hud.cast_vote(3, 1);
        let mut w = HazelWriter::new();
        hud.serialize(&mut w, false);
        let data = w.finish().unwrap();
        assert_eq!(data, vec![0b1000, 0x42]);

        mirror.deserialize(&mut HazelReader::new(&data), false).unwrap();
        assert_eq!(mirror.states()[3].voted_for, Some(1));
        assert_eq!(mirror.states()[0].did_report, true);
    }

    #[test]
    fn test_timer() {
        let mut hud = meeting();
        assert!(!hud.fixed_update(100.0));
        assert!(hud.fixed_update(40.0));
        assert!(!hud.fixed_update(1.0));
    }
}
