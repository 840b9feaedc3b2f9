//! Pluggable scheduling policies.
//!
//! The pipeline is parameterized by four policy seams: task eligibility
//! filtering, task sorting, machine filtering, and machine selection.
//! Each policy is a (seeded-)pure function over an immutable snapshot of
//! its inputs plus the scheduler state handed in via [`PolicyContext`];
//! the only state retained across ticks is the narrow per-policy memo
//! each variant documents (wait counts, skip state, cursors, tickets).
//!
//! A policy failure is caught at the scheduler's tick boundary; it never
//! unwinds further.

mod filter;
mod rank;
mod select;
mod sort;

pub use filter::{ReadyTasksFilter, SufficientCoresFilter};
pub use rank::{downward_ranks, upward_ranks};
pub use select::{
    BestFit, CpopSelect, FirstFit, HeftSelect, LotterySelect, RandomSelect, RoundRobin, WorstFit,
};
pub use sort::{CpopSort, DsSort, FcpSort, FifoSort, HeftSort, PisaSort, RandomSort, SrtfSort};

use std::collections::BTreeMap;

use crate::error::{PolicyError, SimError};
use crate::types::{MachineId, OwnerId, ProcId, TaskId};
use crate::workload::Workload;

/// Scheduler-side snapshot of one candidate machine.
///
/// `available` is the scheduler's core projection, which may lag the
/// machine's true state by one message round-trip; `load` derives from
/// it.
#[derive(Debug, Clone, Copy)]
pub struct MachineView {
    pub id: MachineId,
    pub proc: ProcId,
    pub cores: u32,
    pub available: u32,
    pub speed_per_core: f64,
    pub ethernet_speed: f64,
    pub load: f64,
}

/// Immutable inputs a policy may read.
pub struct PolicyContext<'a> {
    pub workload: &'a Workload,
    /// All registered machines with the tick-start core projection.
    pub machines: &'a [MachineView],
    pub running_by_owner: &'a BTreeMap<OwnerId, u32>,
}

/// Decides which queued tasks may be scheduled this tick.
pub trait TaskEligibilityPolicy {
    fn name(&self) -> &'static str;
    fn filter(&mut self, queued: &[TaskId], cx: &PolicyContext)
        -> Result<Vec<TaskId>, PolicyError>;
}

/// Orders the eligible tasks. All implementations sort stably: equal
/// keys preserve prior order.
pub trait TaskSortPolicy {
    fn name(&self) -> &'static str;
    fn sort(&mut self, tasks: Vec<TaskId>, cx: &PolicyContext) -> Result<Vec<TaskId>, PolicyError>;
}

/// Narrows the candidate machines for one task.
pub trait MachineFilterPolicy {
    fn name(&self) -> &'static str;
    fn filter(
        &mut self,
        task: TaskId,
        machines: &[MachineView],
        cx: &PolicyContext,
    ) -> Result<Vec<MachineView>, PolicyError>;
}

/// Picks the machine for one task, or `None` to leave it queued.
/// Must return `None` without error when `machines` is empty.
pub trait MachineSelectPolicy {
    fn name(&self) -> &'static str;
    fn select(
        &mut self,
        task: TaskId,
        machines: &[MachineView],
        cx: &PolicyContext,
    ) -> Result<Option<MachineId>, PolicyError>;
}

/// The four policies a scheduler runs with, built from a name like
/// `"SRTF-BESTFIT"`.
pub struct PolicySet {
    /// The spec string the set was built from.
    pub name: String,
    pub eligibility: Box<dyn TaskEligibilityPolicy>,
    pub sort: Box<dyn TaskSortPolicy>,
    pub machine_filter: Box<dyn MachineFilterPolicy>,
    pub select: Box<dyn MachineSelectPolicy>,
}

impl PolicySet {
    /// Resolve a scheduler name.
    ///
    /// Accepted forms: `SORT-SELECT` (e.g. `FIFO-FIRSTFIT`,
    /// `SRTF-BESTFIT`, `FIFO-LOTTERY`) and the single-name schedulers
    /// `HEFT`, `CPOP` (paired sort + select) and `FCP`, `DS` (first-fit
    /// selection). Case-insensitive.
    pub fn parse(spec: &str, seed: u64) -> Result<PolicySet, SimError> {
        let upper = spec.to_ascii_uppercase();
        let (sort, select): (Box<dyn TaskSortPolicy>, Box<dyn MachineSelectPolicy>) =
            match upper.as_str() {
                "HEFT" => (Box::new(HeftSort), Box::new(HeftSelect)),
                "CPOP" => (Box::new(CpopSort), Box::new(CpopSelect)),
                "FCP" => (Box::new(FcpSort), Box::new(FirstFit)),
                "DS" => (Box::new(DsSort::new()), Box::new(FirstFit)),
                _ => {
                    let (sort_name, select_name) = upper
                        .split_once('-')
                        .ok_or_else(|| SimError::UnknownPolicy(spec.to_string()))?;
                    (
                        sort_policy(sort_name, seed)
                            .ok_or_else(|| SimError::UnknownPolicy(spec.to_string()))?,
                        select_policy(select_name, seed)
                            .ok_or_else(|| SimError::UnknownPolicy(spec.to_string()))?,
                    )
                }
            };
        Ok(PolicySet {
            name: upper,
            eligibility: Box::new(ReadyTasksFilter),
            sort,
            machine_filter: Box::new(SufficientCoresFilter),
            select,
        })
    }
}

fn sort_policy(name: &str, seed: u64) -> Option<Box<dyn TaskSortPolicy>> {
    Some(match name {
        "FIFO" => Box::new(FifoSort),
        "SRTF" => Box::new(SrtfSort),
        "RANDOM" => Box::new(RandomSort::new(seed)),
        "HEFT" => Box::new(HeftSort),
        "CPOP" => Box::new(CpopSort),
        "PISA" => Box::new(PisaSort::new()),
        "FCP" => Box::new(FcpSort),
        "DS" => Box::new(DsSort::new()),
        _ => return None,
    })
}

fn select_policy(name: &str, seed: u64) -> Option<Box<dyn MachineSelectPolicy>> {
    Some(match name {
        "FIRSTFIT" => Box::new(FirstFit),
        "BESTFIT" => Box::new(BestFit),
        "WORSTFIT" => Box::new(WorstFit),
        "RANDOM" => Box::new(RandomSelect::new(seed)),
        "ROUNDROBIN" => Box::new(RoundRobin::new()),
        "HEFT" => Box::new(HeftSelect),
        "CPOP" => Box::new(CpopSelect),
        "LOTTERY" => Box::new(LotterySelect::new(seed)),
        _ => return None,
    })
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    /// A machine view with the given id and free cores; everything else
    /// neutral.
    pub fn view(id: u32, cores: u32, available: u32) -> MachineView {
        MachineView {
            id: MachineId(id),
            proc: ProcId(id),
            cores,
            available,
            speed_per_core: 1000.0,
            ethernet_speed: 1000.0,
            load: if cores == 0 {
                0.0
            } else {
                1.0 - available as f64 / cores as f64
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pair_and_single_names() {
        for name in [
            "FIFO-FIRSTFIT",
            "SRTF-BESTFIT",
            "fifo-worstfit",
            "FIFO-LOTTERY",
            "RANDOM-RANDOM",
            "PISA-ROUNDROBIN",
            "HEFT",
            "CPOP",
            "FCP",
            "DS",
        ] {
            let set = PolicySet::parse(name, 42).unwrap();
            assert_eq!(set.name, name.to_ascii_uppercase());
        }
    }

    #[test]
    fn single_name_expansion() {
        let heft = PolicySet::parse("HEFT", 42).unwrap();
        assert_eq!(heft.sort.name(), "HEFT");
        assert_eq!(heft.select.name(), "HEFT");

        let fcp = PolicySet::parse("FCP", 42).unwrap();
        assert_eq!(fcp.sort.name(), "FCP");
        assert_eq!(fcp.select.name(), "FIRSTFIT");
    }

    #[test]
    fn rejects_unknown_names() {
        assert!(PolicySet::parse("NOPE", 42).is_err());
        assert!(PolicySet::parse("FIFO", 42).is_err());
        assert!(PolicySet::parse("FIFO-NOPE", 42).is_err());
        assert!(PolicySet::parse("NOPE-FIRSTFIT", 42).is_err());
    }
}
