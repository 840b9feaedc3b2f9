//! Task sorting policies.
//!
//! All sorts are stable: equal keys preserve the order the tasks
//! arrived in (submission order for the queue).

use std::collections::BTreeMap;

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::rank::{downward_ranks, upward_ranks};
use super::{PolicyContext, TaskSortPolicy};
use crate::error::PolicyError;
use crate::types::{OwnerId, TaskId};

/// Identity sort: submission order.
pub struct FifoSort;

impl TaskSortPolicy for FifoSort {
    fn name(&self) -> &'static str {
        "FIFO"
    }

    fn sort(&mut self, tasks: Vec<TaskId>, _cx: &PolicyContext) -> Result<Vec<TaskId>, PolicyError> {
        Ok(tasks)
    }
}

/// Shortest remaining time first.
pub struct SrtfSort;

impl TaskSortPolicy for SrtfSort {
    fn name(&self) -> &'static str {
        "SRTF"
    }

    fn sort(
        &mut self,
        mut tasks: Vec<TaskId>,
        cx: &PolicyContext,
    ) -> Result<Vec<TaskId>, PolicyError> {
        tasks.sort_by_key(|t| cx.workload.task(*t).remaining());
        Ok(tasks)
    }
}

/// Seeded random shuffle.
pub struct RandomSort {
    rng: SmallRng,
}

impl RandomSort {
    pub fn new(seed: u64) -> Self {
        RandomSort {
            rng: SmallRng::seed_from_u64(seed),
        }
    }
}

impl TaskSortPolicy for RandomSort {
    fn name(&self) -> &'static str {
        "RANDOM"
    }

    fn sort(
        &mut self,
        mut tasks: Vec<TaskId>,
        _cx: &PolicyContext,
    ) -> Result<Vec<TaskId>, PolicyError> {
        tasks.shuffle(&mut self.rng);
        Ok(tasks)
    }
}

/// Upward rank, descending.
pub struct HeftSort;

impl TaskSortPolicy for HeftSort {
    fn name(&self) -> &'static str {
        "HEFT"
    }

    fn sort(
        &mut self,
        mut tasks: Vec<TaskId>,
        cx: &PolicyContext,
    ) -> Result<Vec<TaskId>, PolicyError> {
        let ranks = upward_ranks(cx.workload, cx.machines);
        tasks.sort_by(|a, b| {
            ranks[b.0]
                .partial_cmp(&ranks[a.0])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(tasks)
    }
}

/// Upward + downward rank, descending.
pub struct CpopSort;

impl TaskSortPolicy for CpopSort {
    fn name(&self) -> &'static str {
        "CPOP"
    }

    fn sort(
        &mut self,
        mut tasks: Vec<TaskId>,
        cx: &PolicyContext,
    ) -> Result<Vec<TaskId>, PolicyError> {
        let up = upward_ranks(cx.workload, cx.machines);
        let down = downward_ranks(cx.workload, cx.machines);
        tasks.sort_by(|a, b| {
            let ka = up[a.0] + down[a.0];
            let kb = up[b.0] + down[b.0];
            kb.partial_cmp(&ka).unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(tasks)
    }
}

/// Priority applied to a starved task's key.
const PISA_PRIORITY_BUMP: i64 = 1000;

/// Default skips before the anti-starvation bump kicks in.
const PISA_DEFAULT_MAX_WAIT: u32 = 100;

/// Priority descending with an anti-starvation bump.
///
/// The wait count of a task grows every sort in which it appears but
/// does not come first; once it reaches `max_wait`, the task's priority
/// is treated as bumped for that sort and the count resets. The wait
/// map is this policy's only cross-tick memo.
pub struct PisaSort {
    max_wait: u32,
    waits: BTreeMap<TaskId, u32>,
}

impl PisaSort {
    pub fn new() -> Self {
        Self::with_max_wait(PISA_DEFAULT_MAX_WAIT)
    }

    pub fn with_max_wait(max_wait: u32) -> Self {
        PisaSort {
            max_wait,
            waits: BTreeMap::new(),
        }
    }
}

impl Default for PisaSort {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskSortPolicy for PisaSort {
    fn name(&self) -> &'static str {
        "PISA"
    }

    fn sort(
        &mut self,
        mut tasks: Vec<TaskId>,
        cx: &PolicyContext,
    ) -> Result<Vec<TaskId>, PolicyError> {
        let mut bumped: Vec<TaskId> = Vec::new();
        let keys: BTreeMap<TaskId, i64> = tasks
            .iter()
            .map(|t| {
                let mut key = cx.workload.task(*t).priority;
                if self.waits.get(t).copied().unwrap_or(0) >= self.max_wait {
                    key += PISA_PRIORITY_BUMP;
                    bumped.push(*t);
                }
                (*t, key)
            })
            .collect();
        tasks.sort_by_key(|t| std::cmp::Reverse(keys[t]));

        for (i, t) in tasks.iter().enumerate() {
            if i == 0 {
                self.waits.insert(*t, 0);
            } else {
                *self.waits.entry(*t).or_insert(0) += 1;
            }
        }
        for t in bumped {
            self.waits.insert(t, 0);
        }
        Ok(tasks)
    }
}

/// Window the partial sort applies to.
const FCP_WINDOW: usize = 500;

/// Priority ascending over the first up-to-500 entries; the remainder
/// is left untouched. (The reference sorted a copy of the sublist and
/// returned the original unsorted list; here the window really is
/// sorted.)
pub struct FcpSort;

impl TaskSortPolicy for FcpSort {
    fn name(&self) -> &'static str {
        "FCP"
    }

    fn sort(
        &mut self,
        mut tasks: Vec<TaskId>,
        cx: &PolicyContext,
    ) -> Result<Vec<TaskId>, PolicyError> {
        let cut = tasks.len().min(FCP_WINDOW);
        tasks[..cut].sort_by_key(|t| cx.workload.task(*t).priority);
        Ok(tasks)
    }
}

/// Key bump applied to the boosted owner's tasks.
const DS_BOOST: i64 = 1000;

/// Consecutive head skips before the boost.
const DS_SKIP_LIMIT: u32 = 10;

/// Delay Scheduling: running-task count per owner, ascending.
///
/// If the same task stays at the head of the output for
/// `DS_SKIP_LIMIT` consecutive sorts (it keeps being offered first but
/// never leaves the queue), the owner's tasks get a one-shot key boost
/// on the following sort and the skip counter resets. Skip state is
/// this policy's only cross-tick memo.
pub struct DsSort {
    skips: u32,
    last_head: Option<TaskId>,
    boosted: Option<OwnerId>,
}

impl DsSort {
    pub fn new() -> Self {
        DsSort {
            skips: 0,
            last_head: None,
            boosted: None,
        }
    }
}

impl Default for DsSort {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskSortPolicy for DsSort {
    fn name(&self) -> &'static str {
        "DS"
    }

    fn sort(
        &mut self,
        mut tasks: Vec<TaskId>,
        cx: &PolicyContext,
    ) -> Result<Vec<TaskId>, PolicyError> {
        let boosted = self.boosted.take();
        tasks.sort_by_key(|t| {
            let owner = cx.workload.task(*t).owner;
            let running = cx.running_by_owner.get(&owner).copied().unwrap_or(0) as i64;
            if Some(owner) == boosted {
                running - DS_BOOST
            } else {
                running
            }
        });

        let head = tasks.first().copied();
        if head.is_some() && head == self.last_head {
            self.skips += 1;
        } else {
            self.skips = 0;
        }
        self.last_head = head;
        if self.skips >= DS_SKIP_LIMIT {
            self.boosted = head.map(|t| cx.workload.task(t).owner);
            self.skips = 0;
        }
        Ok(tasks)
    }
}
