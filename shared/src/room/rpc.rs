use log::{debug, warn};

use crate::enums::SystemType;
use crate::rpc::{RpcMessage, EMERGENCY_BUTTON};
use crate::systems::{MovingPlatformSystem, VentilationSystem};

use super::{Component, PlayerInfo, Room, RoomError, RoomEvent, RoomState, NO_EXILE};

impl Room {
    /// Applies an RPC sent on `net_id`. The acting player is whoever the
    /// target object belongs to.
    pub(super) fn handle_rpc(&mut self, net_id: u32, rpc: &RpcMessage) -> Result<(), RoomError> {
        let object = self
            .objects
            .get(&net_id)
            .ok_or(RoomError::UnknownNetId(net_id))?;
        let owner_id = object.owner_id;
        let actor = match &object.component {
            Component::PlayerControl(control) => Some(control.player_id),
            _ => self.players.get(&owner_id).and_then(|p| p.player_id),
        };
        let authority = self.is_authority();
        let need_actor = || actor.ok_or(RoomError::UnknownPlayer(owner_id));

        match rpc {
            RpcMessage::SyncSettings(settings) => {
                self.settings = settings.clone();
                self.events.push_back(RoomEvent::SettingsChanged);
            }
            RpcMessage::SetInfected { impostors } => {
                if let Some(registry) = self.registry_mut() {
                    for player_id in impostors {
                        if let Some(info) = registry.get_mut(*player_id) {
                            info.impostor = true;
                        }
                    }
                }
                // Roles are handed out as the round begins
                if !authority && self.state != RoomState::Started {
                    self.state = RoomState::Started;
                    self.events.push_back(RoomEvent::GameStarted);
                }
            }
            RpcMessage::Exiled => {
                let player_id = need_actor()?;
                self.exile(player_id);
            }
            RpcMessage::CheckName { name } => {
                if authority {
                    self.assign_name(need_actor()?, net_id, name);
                }
            }
            RpcMessage::CheckColor { color } => {
                if authority {
                    self.assign_color(need_actor()?, net_id, *color);
                }
            }
            RpcMessage::SetName { name } => {
                let player_id = need_actor()?;
                self.edit_player(player_id, |p| p.name = name.clone());
            }
            RpcMessage::SetColor { color } => {
                let player_id = need_actor()?;
                self.edit_player(player_id, |p| p.color = u32::from(*color));
            }
            RpcMessage::SetHat { hat } => {
                let player_id = need_actor()?;
                self.edit_player(player_id, |p| p.hat = *hat);
            }
            RpcMessage::SetSkin { skin } => {
                let player_id = need_actor()?;
                self.edit_player(player_id, |p| p.skin = *skin);
            }
            RpcMessage::SetPet { pet } => {
                let player_id = need_actor()?;
                self.edit_player(player_id, |p| p.pet = *pet);
            }
            RpcMessage::ReportDeadBody { player_id } => {
                if authority {
                    let body = (*player_id != EMERGENCY_BUTTON).then_some(*player_id);
                    self.start_meeting(need_actor()?, body)?;
                }
            }
            RpcMessage::StartMeeting { .. } => {
                if !authority {
                    let reporter = need_actor()?;
                    self.events.push_back(RoomEvent::MeetingStarted { reporter });
                }
            }
            RpcMessage::MurderPlayer { victim_net_id } => {
                let murderer = need_actor()?;
                let victim = self
                    .player_id_of(*victim_net_id)
                    .ok_or(RoomError::UnknownNetId(*victim_net_id))?;
                self.murder(murderer, victim);
            }
            RpcMessage::SendChat { message } => {
                let player_id = need_actor()?;
                self.events.push_back(RoomEvent::Chat {
                    player_id,
                    message: message.clone(),
                });
            }
            RpcMessage::CompleteTask { task_index } => {
                let player_id = need_actor()?;
                self.task_completed(player_id, *task_index);
            }
            RpcMessage::SetTasks { player_id, tasks } => {
                if let Some(registry) = self.registry_mut() {
                    registry.set_tasks(*player_id, tasks);
                }
                self.events.push_back(RoomEvent::TasksAssigned {
                    player_id: *player_id,
                    tasks: tasks.clone(),
                });
            }
            RpcMessage::CastVote { voter, suspect } => {
                if authority {
                    self.apply_vote(*voter, *suspect)?;
                }
            }
            RpcMessage::VotingComplete { exiled, tie, .. } => {
                if !authority {
                    self.events.push_back(RoomEvent::VotingComplete {
                        exiled: (*exiled != NO_EXILE).then_some(*exiled),
                        tie: *tie,
                    });
                }
            }
            RpcMessage::CloseDoorsOfType { system } => {
                if authority {
                    self.close_doors(*system);
                }
            }
            RpcMessage::RepairSystem {
                system,
                player_net_id,
                amount,
            } => {
                let player_id = self
                    .player_id_of(*player_net_id)
                    .ok_or(RoomError::UnknownNetId(*player_net_id))?;
                self.apply_repair(player_id, *system, *amount);
            }
            RpcMessage::EnterVent { vent_id } => {
                let player_id = need_actor()?;
                let vent = u8::try_from(*vent_id).unwrap_or(u8::MAX);
                self.with_ship(|ship, _| {
                    if let Some(vents) = ship
                        .systems_mut()
                        .downcast_mut::<VentilationSystem>(SystemType::Ventilation)
                    {
                        vents.enter(player_id, vent);
                    }
                });
            }
            RpcMessage::ExitVent { .. } => {
                let player_id = need_actor()?;
                self.with_ship(|ship, _| {
                    if let Some(vents) = ship
                        .systems_mut()
                        .downcast_mut::<VentilationSystem>(SystemType::Ventilation)
                    {
                        vents.exit(player_id);
                    }
                });
            }
            RpcMessage::UsePlatform => {
                let rider = self
                    .players
                    .get(&owner_id)
                    .and_then(|p| p.control_net_id)
                    .unwrap_or(net_id);
                let found = self.with_ship(|ship, _| {
                    ship.systems_mut()
                        .downcast_mut::<MovingPlatformSystem>(SystemType::GapRoom)
                        .map(|platform| platform.ride(rider))
                        .is_some()
                });
                if found != Some(true) {
                    warn!("platform used on a map without one");
                }
            }
            RpcMessage::SnapTo { position, seq } => {
                let transform = self
                    .players
                    .get(&owner_id)
                    .and_then(|p| p.transform_net_id)
                    .unwrap_or(net_id);
                if let Some(Component::Transform(t)) =
                    self.objects.get_mut(&transform).map(|o| &mut o.component)
                {
                    t.snap_to(*position, *seq);
                }
            }
            RpcMessage::Close => debug!("meeting {} closing", net_id),
            RpcMessage::PlayAnimation { .. }
            | RpcMessage::SetScanner { .. }
            | RpcMessage::SendChatNote { .. }
            | RpcMessage::SetStartCounter { .. }
            | RpcMessage::ClearVote
            | RpcMessage::AddVote { .. }
            | RpcMessage::ClimbLadder { .. } => {}
            RpcMessage::Unknown { call_id, .. } => {
                debug!("unhandled rpc {} on net id {}", call_id, net_id);
            }
        }
        Ok(())
    }

    /// Registry edit every peer applies on its own, adding the entry if the
    /// registry hasn't seen the player yet.
    fn edit_player(&mut self, player_id: u8, f: impl FnOnce(&mut PlayerInfo)) {
        let Some(registry) = self.registry_mut() else {
            debug!("no registry for player {}", player_id);
            return;
        };
        if registry.get(player_id).is_none() {
            registry.add(player_id);
        }
        if let Some(info) = registry.get_mut(player_id) {
            f(info);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{host_room, start};
    use super::*;
    use crate::gamedata::GameDataMessage;

    fn rpc(room: &mut Room, sender: i32, net_id: u32, rpc: RpcMessage) -> Result<(), RoomError> {
        room.handle_game_data(Some(sender), &GameDataMessage::Rpc { net_id, rpc })
    }

    #[test]
    fn test_cosmetics_update_registry() {
        let mut room = host_room(2);
        let control = room.player(2).unwrap().control_net_id.unwrap();
        rpc(&mut room, 2, control, RpcMessage::SetHat { hat: 9 }).unwrap();
        rpc(&mut room, 2, control, RpcMessage::SetSkin { skin: 2 }).unwrap();
        rpc(&mut room, 2, control, RpcMessage::SetPet { pet: 4 }).unwrap();
        let info = room.registry().unwrap().get(1).unwrap();
        assert_eq!((info.hat, info.skin, info.pet), (9, 2, 4));
    }

    #[test]
    fn test_murder_needs_impostor() {
        let mut room = host_room(4);
        start(&mut room, 4);
        let registry = room.registry().unwrap();
        let impostor = registry.players().find(|p| p.impostor).unwrap().player_id;
        let crew: Vec<u8> = registry
            .players()
            .filter(|p| !p.impostor)
            .map(|p| p.player_id)
            .collect();
        let impostor_control = room.control_of(impostor).unwrap();
        let crew_control = room.control_of(crew[0]).unwrap();
        let other_crew = room.control_of(crew[1]).unwrap();
        let sender = room.player_by_id(crew[0]).unwrap().client_id;

        rpc(&mut room, sender, crew_control, RpcMessage::MurderPlayer { victim_net_id: other_crew })
            .unwrap();
        assert!(!room.registry().unwrap().get(crew[1]).unwrap().dead);

        let sender = room.player_by_id(impostor).unwrap().client_id;
        rpc(&mut room, sender, impostor_control, RpcMessage::MurderPlayer { victim_net_id: crew_control })
            .unwrap();
        assert!(room.registry().unwrap().get(crew[0]).unwrap().dead);
        assert!(room
            .drain_events()
            .contains(&RoomEvent::PlayerMurdered { victim: crew[0] }));
    }

    #[test]
    fn test_kills_to_parity_end_round() {
        let mut room = host_room(3);
        start(&mut room, 3);
        let registry = room.registry().unwrap();
        let impostor = registry.players().find(|p| p.impostor).unwrap().player_id;
        let victim = registry.players().find(|p| !p.impostor).unwrap().player_id;
        let impostor_control = room.control_of(impostor).unwrap();
        let victim_control = room.control_of(victim).unwrap();
        let sender = room.player_by_id(impostor).unwrap().client_id;
        rpc(&mut room, sender, impostor_control, RpcMessage::MurderPlayer { victim_net_id: victim_control })
            .unwrap();
        assert!(room
            .drain_events()
            .contains(&RoomEvent::GameEnded(crate::enums::GameOverReason::ImpostorByKill)));
    }

    #[test]
    fn test_finished_tasks_end_round() {
        let mut room = host_room(3);
        start(&mut room, 3);
        let crew: Vec<(u8, usize)> = room
            .registry()
            .unwrap()
            .players()
            .filter(|p| !p.impostor)
            .map(|p| (p.player_id, p.tasks.len()))
            .collect();
        for (player_id, count) in crew {
            let control = room.control_of(player_id).unwrap();
            let sender = room.player_by_id(player_id).unwrap().client_id;
            for index in 0..count as u32 {
                rpc(&mut room, sender, control, RpcMessage::CompleteTask { task_index: index }).unwrap();
            }
        }
        assert!(room
            .drain_events()
            .contains(&RoomEvent::GameEnded(crate::enums::GameOverReason::HumansByTask)));
    }

    #[test]
    fn test_report_from_remote_spawns_meeting() {
        let mut room = host_room(3);
        start(&mut room, 3);
        let control = room.player(2).unwrap().control_net_id.unwrap();
        rpc(&mut room, 2, control, RpcMessage::ReportDeadBody { player_id: EMERGENCY_BUTTON }).unwrap();
        assert!(room.meeting().is_some());
        assert!(room
            .drain_events()
            .contains(&RoomEvent::MeetingStarted { reporter: 1 }));
    }

    #[test]
    fn test_snap_to_moves_transform() {
        let mut room = host_room(2);
        let control = room.player(2).unwrap().control_net_id.unwrap();
        let transform = room.player(2).unwrap().transform_net_id.unwrap();
        let position = crate::codec::Vector2::new(10.0, -4.0);
        rpc(&mut room, 2, control, RpcMessage::SnapTo { position, seq: 3 }).unwrap();
        match &room.object(transform).unwrap().component {
            Component::Transform(t) => assert_eq!(t.seq, 3),
            other => panic!("unexpected component {:?}", other),
        }
    }

    #[test]
    fn test_rpc_to_unknown_object() {
        let mut room = host_room(1);
        assert_eq!(
            rpc(&mut room, 1, 77, RpcMessage::SendChat { message: "hi".into() }),
            Err(RoomError::UnknownNetId(77))
        );
    }
}
