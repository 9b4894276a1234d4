use crate::codec::{HazelReader, HazelWriter};
use crate::data::MapData;
use crate::enums::{GameMap, SpawnType, SystemType};
use crate::error::CodecResult;
use crate::systems::*;

/// Map a ship prefab belongs to.
pub fn map_for_prefab(spawn_type: SpawnType) -> Option<GameMap> {
    match spawn_type {
        SpawnType::ShipStatus => Some(GameMap::TheSkeld),
        SpawnType::HeadQuarters => Some(GameMap::MiraHq),
        SpawnType::PlanetMap => Some(GameMap::Polus),
        SpawnType::AprilShipStatus => Some(GameMap::AprilSkeld),
        SpawnType::Airship => Some(GameMap::Airship),
        _ => None,
    }
}

/// The ship object of a running round.
#[derive(Debug)]
pub struct ShipStatus {
    map: GameMap,
    systems: ShipSystems,
}

impl ShipStatus {
    pub fn new(map: GameMap, data: &dyn MapData) -> Self {
        let mut systems = ShipSystems::new();
        let doors = data.doors(map);
        match map {
            GameMap::MiraHq => {
                systems.insert(Box::new(ReactorSystem::new(SystemType::Reactor, 45.0)));
                systems.insert(Box::new(SwitchSystem::default()));
                systems.insert(Box::new(LifeSuppSystem::new(45.0)));
                systems.insert(Box::new(MedScanSystem::default()));
                systems.insert(Box::new(HqHudSystem::default()));
                systems.insert(Box::new(SabotageSystem::default()));
                systems.insert(Box::new(DeconSystem::new(SystemType::Decontamination)));
            }
            GameMap::Polus => {
                systems.insert(Box::new(SwitchSystem::default()));
                systems.insert(Box::new(MedScanSystem::default()));
                systems.insert(Box::new(SecurityCameraSystem::default()));
                systems.insert(Box::new(HudOverrideSystem::default()));
                systems.insert(Box::new(DoorsSystem::new(doors)));
                systems.insert(Box::new(SabotageSystem::default()));
                systems.insert(Box::new(DeconSystem::new(SystemType::Decontamination)));
                systems.insert(Box::new(DeconSystem::new(SystemType::Decontamination2)));
                systems.insert(Box::new(ReactorSystem::new(SystemType::Laboratory, 60.0)));
            }
            GameMap::Airship => {
                systems.insert(Box::new(SwitchSystem::default()));
                systems.insert(Box::new(SecurityCameraSystem::default()));
                systems.insert(Box::new(HudOverrideSystem::default()));
                systems.insert(Box::new(DoorsSystem::new(doors)));
                systems.insert(Box::new(SabotageSystem::default()));
                systems.insert(Box::new(HeliSabotageSystem::default()));
                systems.insert(Box::new(MovingPlatformSystem::default()));
                systems.insert(Box::new(VentilationSystem::default()));
            }
            _ => {
                systems.insert(Box::new(ReactorSystem::new(SystemType::Reactor, 30.0)));
                systems.insert(Box::new(SwitchSystem::default()));
                systems.insert(Box::new(LifeSuppSystem::new(30.0)));
                systems.insert(Box::new(MedScanSystem::default()));
                systems.insert(Box::new(SecurityCameraSystem::default()));
                systems.insert(Box::new(HudOverrideSystem::default()));
                systems.insert(Box::new(AutoDoorsSystem::new(doors)));
                systems.insert(Box::new(SabotageSystem::default()));
            }
        }
        Self { map, systems }
    }

    pub fn map(&self) -> GameMap {
        self.map
    }

    pub fn systems(&self) -> &ShipSystems {
        &self.systems
    }

    pub fn systems_mut(&mut self) -> &mut ShipSystems {
        &mut self.systems
    }

    pub fn is_dirty(&self) -> bool {
        self.systems.is_dirty()
    }

    pub fn clear_dirty(&mut self) {
        self.systems.clear_dirty();
    }

    pub fn serialize(&self, w: &mut HazelWriter, spawn: bool) -> CodecResult<()> {
        self.systems.serialize(w, spawn)
    }

    pub fn deserialize(&mut self, r: &mut HazelReader<'_>, spawn: bool) -> CodecResult<()> {
        self.systems.deserialize(r, spawn)
    }
}
