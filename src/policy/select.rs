//! Machine selection policies.
//!
//! Selection operates on the machine views that survived the machine
//! filter; every policy returns `None` without error when handed an
//! empty candidate list. Ties break toward the earlier candidate.

use std::collections::{BTreeMap, BTreeSet};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use super::{MachineSelectPolicy, MachineView, PolicyContext};
use crate::error::PolicyError;
use crate::types::{MachineId, TaskId};

/// First candidate wins.
pub struct FirstFit;

impl MachineSelectPolicy for FirstFit {
    fn name(&self) -> &'static str {
        "FIRSTFIT"
    }

    fn select(
        &mut self,
        _task: TaskId,
        machines: &[MachineView],
        _cx: &PolicyContext,
    ) -> Result<Option<MachineId>, PolicyError> {
        Ok(machines.first().map(|m| m.id))
    }
}

fn fit_distance(m: &MachineView, cores: u32) -> i64 {
    (m.available as i64 - cores as i64).abs()
}

/// Minimize `|available cores − task cores|`.
pub struct BestFit;

impl MachineSelectPolicy for BestFit {
    fn name(&self) -> &'static str {
        "BESTFIT"
    }

    fn select(
        &mut self,
        task: TaskId,
        machines: &[MachineView],
        cx: &PolicyContext,
    ) -> Result<Option<MachineId>, PolicyError> {
        let cores = cx.workload.task(task).cores;
        let mut best: Option<&MachineView> = None;
        for m in machines {
            if best.is_none_or(|b| fit_distance(m, cores) < fit_distance(b, cores)) {
                best = Some(m);
            }
        }
        Ok(best.map(|m| m.id))
    }
}

/// Maximize `|available cores − task cores|`.
pub struct WorstFit;

impl MachineSelectPolicy for WorstFit {
    fn name(&self) -> &'static str {
        "WORSTFIT"
    }

    fn select(
        &mut self,
        task: TaskId,
        machines: &[MachineView],
        cx: &PolicyContext,
    ) -> Result<Option<MachineId>, PolicyError> {
        let cores = cx.workload.task(task).cores;
        let mut worst: Option<&MachineView> = None;
        for m in machines {
            if worst.is_none_or(|w| fit_distance(m, cores) > fit_distance(w, cores)) {
                worst = Some(m);
            }
        }
        Ok(worst.map(|m| m.id))
    }
}

/// Seeded uniform pick.
pub struct RandomSelect {
    rng: SmallRng,
}

impl RandomSelect {
    pub fn new(seed: u64) -> Self {
        RandomSelect {
            rng: SmallRng::seed_from_u64(seed),
        }
    }
}

impl MachineSelectPolicy for RandomSelect {
    fn name(&self) -> &'static str {
        "RANDOM"
    }

    fn select(
        &mut self,
        _task: TaskId,
        machines: &[MachineView],
        _cx: &PolicyContext,
    ) -> Result<Option<MachineId>, PolicyError> {
        if machines.is_empty() {
            return Ok(None);
        }
        let idx = self.rng.gen_range(0..machines.len());
        Ok(Some(machines[idx].id))
    }
}

/// Advance a cursor over the candidate list, wrapping around. The
/// cursor is this policy's only cross-tick memo.
pub struct RoundRobin {
    cursor: usize,
}

impl RoundRobin {
    pub fn new() -> Self {
        RoundRobin { cursor: 0 }
    }
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

impl MachineSelectPolicy for RoundRobin {
    fn name(&self) -> &'static str {
        "ROUNDROBIN"
    }

    fn select(
        &mut self,
        _task: TaskId,
        machines: &[MachineView],
        _cx: &PolicyContext,
    ) -> Result<Option<MachineId>, PolicyError> {
        if machines.is_empty() {
            return Ok(None);
        }
        let pick = machines[self.cursor % machines.len()].id;
        self.cursor = self.cursor.wrapping_add(1);
        Ok(Some(pick))
    }
}

/// HEFT machine score: `ethernet_speed / input_size + (1 − load) × speed`.
/// A zero input size makes the communication term infinite, which every
/// candidate shares, so the tie breaks toward the earlier machine.
fn heft_score(m: &MachineView, input_size: u64) -> f64 {
    let comm = if input_size == 0 {
        f64::INFINITY
    } else {
        m.ethernet_speed / input_size as f64
    };
    comm + (1.0 - m.load) * m.speed_per_core
}

fn select_by_heft_score(
    task: TaskId,
    machines: &[MachineView],
    cx: &PolicyContext,
) -> Option<MachineId> {
    let input = cx.workload.task(task).input_size;
    let mut best: Option<(&MachineView, f64)> = None;
    for m in machines {
        let score = heft_score(m, input);
        if best.is_none_or(|(_, s)| score > s) {
            best = Some((m, score));
        }
    }
    best.map(|(m, _)| m.id)
}

/// Maximize the HEFT machine score.
pub struct HeftSelect;

impl MachineSelectPolicy for HeftSelect {
    fn name(&self) -> &'static str {
        "HEFT"
    }

    fn select(
        &mut self,
        task: TaskId,
        machines: &[MachineView],
        cx: &PolicyContext,
    ) -> Result<Option<MachineId>, PolicyError> {
        Ok(select_by_heft_score(task, machines, cx))
    }
}

/// CPOP selection mirrors the HEFT machine score.
pub struct CpopSelect;

impl MachineSelectPolicy for CpopSelect {
    fn name(&self) -> &'static str {
        "CPOP"
    }

    fn select(
        &mut self,
        task: TaskId,
        machines: &[MachineView],
        cx: &PolicyContext,
    ) -> Result<Option<MachineId>, PolicyError> {
        Ok(select_by_heft_score(task, machines, cx))
    }
}

/// Tickets granted to a machine the first time the policy sees it.
const LOTTERY_TICKETS_PER_MACHINE: u32 = 100;

/// Weighted ticket draw over every machine ever seen, retried until a
/// ticket belonging to an eligible machine is drawn. The ticket map is
/// this policy's only cross-tick memo.
pub struct LotterySelect {
    rng: SmallRng,
    tickets: BTreeMap<MachineId, u32>,
}

impl LotterySelect {
    pub fn new(seed: u64) -> Self {
        LotterySelect {
            rng: SmallRng::seed_from_u64(seed),
            tickets: BTreeMap::new(),
        }
    }
}

impl MachineSelectPolicy for LotterySelect {
    fn name(&self) -> &'static str {
        "LOTTERY"
    }

    fn select(
        &mut self,
        _task: TaskId,
        machines: &[MachineView],
        _cx: &PolicyContext,
    ) -> Result<Option<MachineId>, PolicyError> {
        if machines.is_empty() {
            return Ok(None);
        }
        for m in machines {
            self.tickets.entry(m.id).or_insert(LOTTERY_TICKETS_PER_MACHINE);
        }
        let eligible: BTreeSet<MachineId> = machines.iter().map(|m| m.id).collect();
        let total: u64 = self.tickets.values().map(|t| *t as u64).sum();

        // Eligible machines hold tickets (granted above), so a winning
        // draw occurs with positive probability on every retry.
        loop {
            let mut draw = self.rng.gen_range(0..total);
            for (machine, tickets) in &self.tickets {
                let tickets = *tickets as u64;
                if draw < tickets {
                    if eligible.contains(machine) {
                        return Ok(Some(*machine));
                    }
                    break;
                }
                draw -= tickets;
            }
        }
    }
}
