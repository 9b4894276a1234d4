//! Per-round task distribution.

use std::collections::{BTreeMap, HashSet};

use log::warn;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::data::{TaskInfo, TaskLength};
use crate::enums::TaskType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskCounts {
    pub common: usize,
    pub long: usize,
    pub short: usize,
}

impl TaskCounts {
    pub fn total(&self) -> usize {
        self.common + self.long + self.short
    }
}

/// A length bucket walked by a cursor that reshuffles on wrap.
struct Bucket<'a> {
    tasks: Vec<&'a TaskInfo>,
    cursor: usize,
}

impl<'a> Bucket<'a> {
    fn new<R: Rng + ?Sized>(rng: &mut R, all: &'a [TaskInfo], length: TaskLength) -> Self {
        let mut tasks: Vec<_> = all.iter().filter(|t| t.length == length).collect();
        tasks.shuffle(rng);
        Self { tasks, cursor: 0 }
    }

    /// Appends `count` ids to `out`, avoiding task types in `used` for up to
    /// `sanity_cap` draws per task.
    fn draw<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        count: usize,
        used: &mut HashSet<TaskType>,
        out: &mut Vec<u8>,
        sanity_cap: usize,
    ) {
        if self.tasks.is_empty() {
            if count > 0 {
                warn!("no tasks to draw {} from", count);
            }
            return;
        }
        for _ in 0..count {
            let mut attempts = 0;
            let task = loop {
                if self.cursor >= self.tasks.len() {
                    self.cursor = 0;
                    self.tasks.shuffle(rng);
                    if self.tasks.iter().all(|t| used.contains(&t.task_type)) {
                        used.clear();
                    }
                }
                let task = self.tasks[self.cursor];
                self.cursor += 1;
                attempts += 1;
                if !used.contains(&task.task_type) || attempts >= sanity_cap {
                    break task;
                }
            };
            used.insert(task.task_type);
            out.push(task.id);
        }
    }
}

/// Picks a task list for every player.
///
/// All players share the same common tasks. Long and short tasks come from
/// cursors that keep running across players, so repeats spread out instead
/// of clustering on one player.
pub fn assign_tasks<R: Rng + ?Sized>(
    rng: &mut R,
    tasks: &[TaskInfo],
    counts: TaskCounts,
    player_ids: &[u8],
    sanity_cap: usize,
) -> BTreeMap<u8, Vec<u8>> {
    let sanity_cap = sanity_cap.max(1);
    let mut used = HashSet::new();

    let mut common = Bucket::new(rng, tasks, TaskLength::Common);
    let mut common_ids = Vec::with_capacity(counts.common);
    common.draw(rng, counts.common, &mut used, &mut common_ids, sanity_cap);

    let mut long = Bucket::new(rng, tasks, TaskLength::Long);
    let mut short = Bucket::new(rng, tasks, TaskLength::Short);

    player_ids
        .iter()
        .map(|&player_id| {
            used.clear();
            let mut list = common_ids.clone();
            long.draw(rng, counts.long, &mut used, &mut list, sanity_cap);
            short.draw(rng, counts.short, &mut used, &mut list, sanity_cap);
            (player_id, list)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::data::{BuiltinData, MapData};
    use crate::enums::GameMap;

    fn skeld() -> &'static [TaskInfo] {
        static DATA: BuiltinData = BuiltinData;
        DATA.tasks(GameMap::TheSkeld)
    }

    #[test]
    fn test_every_player_gets_full_list() {
        let mut rng = StdRng::seed_from_u64(1);
        for players in 1..=10u8 {
            let ids: Vec<u8> = (0..players).collect();
            for counts in [
                TaskCounts { common: 1, long: 1, short: 2 },
                TaskCounts { common: 2, long: 3, short: 5 },
                TaskCounts { common: 0, long: 0, short: 0 },
            ] {
                let assigned = assign_tasks(&mut rng, skeld(), counts, &ids, 1000);
                assert_eq!(assigned.len(), ids.len());
                let first = &assigned[&0][..counts.common];
                for list in assigned.values() {
                    assert_eq!(list.len(), counts.total());
                    assert_eq!(&list[..counts.common], first);
                }
            }
        }
    }

    #[test]
    fn test_types_diverse_when_possible() {
        let mut rng = StdRng::seed_from_u64(9);
        let counts = TaskCounts { common: 0, long: 0, short: 5 };
        let assigned = assign_tasks(&mut rng, skeld(), counts, &[0, 1, 2], 1000);
        let by_id: BTreeMap<u8, TaskType> = skeld().iter().map(|t| (t.id, t.task_type)).collect();
        for list in assigned.values() {
            let types: HashSet<_> = list.iter().map(|id| by_id[id]).collect();
            assert_eq!(types.len(), list.len(), "{:?}", list);
        }
    }

    #[test]
    fn test_more_requested_than_bucket_holds() {
        let mut rng = StdRng::seed_from_u64(3);
        // Only two common tasks exist; the third must repeat one.
        let counts = TaskCounts { common: 3, long: 8, short: 0 };
        let assigned = assign_tasks(&mut rng, skeld(), counts, &[0, 1], 1000);
        assert_eq!(assigned[&1].len(), 11);
    }

    #[test]
    fn test_tiny_sanity_cap_still_terminates() {
        let mut rng = StdRng::seed_from_u64(5);
        let counts = TaskCounts { common: 2, long: 6, short: 16 };
        let assigned = assign_tasks(&mut rng, skeld(), counts, &[0], 0);
        assert_eq!(assigned[&0].len(), 24);
    }

    #[test]
    fn test_empty_table() {
        let mut rng = StdRng::seed_from_u64(5);
        let counts = TaskCounts { common: 1, long: 1, short: 1 };
        let assigned = assign_tasks(&mut rng, &[], counts, &[0, 1], 1000);
        assert!(assigned.values().all(|list| list.is_empty()));
    }
}
