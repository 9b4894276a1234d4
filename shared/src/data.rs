//! Static per-map tables.
//!
//! The room engine only ever refers to tasks and doors by id; where those ids
//! come from is behind [`MapData`] so a deployment can load full tables from
//! elsewhere. [`BuiltinData`] carries enough of the real maps for the server
//! and bots to run a round.

use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use crate::enums::{GameMap, SystemType, TaskType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskLength {
    Common,
    Long,
    Short,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: u8,
    pub task_type: TaskType,
    pub length: TaskLength,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoorInfo {
    pub id: u8,
    pub room: SystemType,
}

pub trait MapData: Send + Sync + Debug {
    fn tasks(&self, map: GameMap) -> &[TaskInfo];
    fn doors(&self, map: GameMap) -> &[DoorInfo];
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinData;

const fn task(id: u8, task_type: TaskType, length: TaskLength) -> TaskInfo {
    TaskInfo {
        id,
        task_type,
        length,
    }
}

const fn door(id: u8, room: SystemType) -> DoorInfo {
    DoorInfo { id, room }
}

use TaskLength::{Common, Long, Short};

static SKELD_TASKS: [TaskInfo; 24] = [
    task(0, TaskType::AlignEngineOutput, Short),
    task(1, TaskType::AlignEngineOutput, Short),
    task(2, TaskType::CalibrateDistributor, Short),
    task(3, TaskType::ChartCourse, Short),
    task(4, TaskType::CleanO2Filter, Short),
    task(5, TaskType::ClearAsteroids, Long),
    task(6, TaskType::DivertPower, Short),
    task(7, TaskType::DivertPower, Short),
    task(8, TaskType::DivertPower, Short),
    task(9, TaskType::EmptyChute, Short),
    task(10, TaskType::EmptyGarbage, Long),
    task(11, TaskType::FixWiring, Common),
    task(12, TaskType::FuelEngines, Long),
    task(13, TaskType::InspectSample, Long),
    task(14, TaskType::PrimeShields, Short),
    task(15, TaskType::StabilizeSteering, Short),
    task(16, TaskType::StartReactor, Long),
    task(17, TaskType::SubmitScan, Long),
    task(18, TaskType::SwipeCard, Common),
    task(19, TaskType::UnlockManifolds, Short),
    task(20, TaskType::UploadData, Short),
    task(21, TaskType::UploadData, Short),
    task(22, TaskType::UploadData, Short),
    task(23, TaskType::UploadData, Short),
];

static SKELD_DOORS: [DoorInfo; 13] = [
    door(0, SystemType::Cafeteria),
    door(1, SystemType::Cafeteria),
    door(2, SystemType::Cafeteria),
    door(3, SystemType::Storage),
    door(4, SystemType::Storage),
    door(5, SystemType::Storage),
    door(6, SystemType::MedBay),
    door(7, SystemType::Security),
    door(8, SystemType::Electrical),
    door(9, SystemType::UpperEngine),
    door(10, SystemType::UpperEngine),
    door(11, SystemType::LowerEngine),
    door(12, SystemType::LowerEngine),
];

static POLUS_DOORS: [DoorInfo; 12] = [
    door(0, SystemType::Electrical),
    door(1, SystemType::Electrical),
    door(2, SystemType::Electrical),
    door(3, SystemType::LifeSupp),
    door(4, SystemType::LifeSupp),
    door(5, SystemType::Weapons),
    door(6, SystemType::Comms),
    door(7, SystemType::Office),
    door(8, SystemType::Office),
    door(9, SystemType::Laboratory),
    door(10, SystemType::Laboratory),
    door(11, SystemType::Storage),
];

static AIRSHIP_DOORS: [DoorInfo; 21] = [
    door(0, SystemType::Brig),
    door(1, SystemType::Brig),
    door(2, SystemType::Brig),
    door(3, SystemType::Comms),
    door(4, SystemType::Comms),
    door(5, SystemType::Kitchen),
    door(6, SystemType::Kitchen),
    door(7, SystemType::Kitchen),
    door(8, SystemType::MainHall),
    door(9, SystemType::MainHall),
    door(10, SystemType::Records),
    door(11, SystemType::Records),
    door(12, SystemType::Records),
    door(13, SystemType::Lounge),
    door(14, SystemType::Lounge),
    door(15, SystemType::Lounge),
    door(16, SystemType::Lounge),
    door(17, SystemType::Medical),
    door(18, SystemType::Medical),
    door(19, SystemType::Engine),
    door(20, SystemType::Engine),
];

impl MapData for BuiltinData {
    fn tasks(&self, map: GameMap) -> &[TaskInfo] {
        match map {
            GameMap::TheSkeld | GameMap::AprilSkeld => &SKELD_TASKS,
            _ => &[],
        }
    }

    fn doors(&self, map: GameMap) -> &[DoorInfo] {
        match map {
            GameMap::TheSkeld | GameMap::AprilSkeld => &SKELD_DOORS,
            GameMap::Polus => &POLUS_DOORS,
            GameMap::Airship => &AIRSHIP_DOORS,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_match_positions() {
        let data = BuiltinData;
        for map in [GameMap::TheSkeld, GameMap::Polus, GameMap::Airship] {
            for (i, task) in data.tasks(map).iter().enumerate() {
                assert_eq!(task.id as usize, i);
            }
            for (i, door) in data.doors(map).iter().enumerate() {
                assert_eq!(door.id as usize, i);
            }
        }
    }

    #[test]
    fn test_skeld_buckets() {
        let tasks = BuiltinData.tasks(GameMap::TheSkeld);
        let count = |length| tasks.iter().filter(|t| t.length == length).count();
        assert_eq!(count(TaskLength::Common), 2);
        assert_eq!(count(TaskLength::Long), 6);
        assert_eq!(count(TaskLength::Short), 16);
        assert_eq!(BuiltinData.doors(GameMap::TheSkeld).len(), 13);
    }

    #[test]
    fn test_unknown_map_is_empty() {
        assert!(BuiltinData.tasks(GameMap::Unknown(9)).is_empty());
        assert!(BuiltinData.doors(GameMap::MiraHq).is_empty());
    }
}
