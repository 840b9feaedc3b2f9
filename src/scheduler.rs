//! Scheduler process: the staged scheduling pipeline.
//!
//! Per `Schedule` tick, wrapped in a [`StageAccumulator`]:
//! cache update (reap finished tasks, release their cores), task
//! eligibility filter, task sort, then a per-task machine filter +
//! machine select loop that dispatches each placed task. A policy
//! failure aborts the remainder of the tick only; mutations already
//! applied stand, the failure is journaled and published on the bus,
//! and the scheduler stays alive.
//!
//! The scheduler re-arms itself with an empty `Schedule` one tick later
//! whenever work is still outstanding, so declines retry and reaped
//! cores are eventually reused without an external driver.

use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use tracing::{debug, info, warn};

use crate::error::{Fault, PolicyError};
use crate::journal::JournalKind;
use crate::kernel::ProcessCtx;
use crate::machine::MachineHandle;
use crate::message::{BusEvent, Msg};
use crate::policy::{MachineView, PolicyContext, PolicySet};
use crate::process::{Process, Step};
use crate::stage::{Stage, StageAccumulator};
use crate::types::{MachineId, OwnerId, ProcId, TaskId};
use crate::workload::Workload;

/// The scheduler process.
pub struct SchedulerProc {
    workload: Rc<Workload>,
    bus: ProcId,
    policies: PolicySet,
    /// Registered fleet, keyed by machine id.
    machines: BTreeMap<MachineId, MachineHandle>,
    /// Every task ever handed to this scheduler.
    tasks: Vec<TaskId>,
    /// Waiting for dispatch, in submission order.
    queued: Vec<TaskId>,
    /// Dispatched, waiting for the machine's accept/decline.
    pending: BTreeSet<TaskId>,
    /// Finished tasks whose cores have been released.
    reaped: BTreeSet<TaskId>,
    /// Scheduler-side projection of free cores per machine. May lag the
    /// machine's true state by one message round-trip.
    machine_cores: BTreeMap<MachineId, u32>,
    /// Machine chosen for each in-flight task.
    task_machines: BTreeMap<TaskId, MachineId>,
    running_by_owner: BTreeMap<OwnerId, u32>,
    /// Whether a self-directed re-arm tick is already queued.
    rearm_queued: bool,
}

impl SchedulerProc {
    pub fn new(workload: Rc<Workload>, bus: ProcId, policies: PolicySet) -> Self {
        SchedulerProc {
            workload,
            bus,
            policies,
            machines: BTreeMap::new(),
            tasks: Vec::new(),
            queued: Vec::new(),
            pending: BTreeSet::new(),
            reaped: BTreeSet::new(),
            machine_cores: BTreeMap::new(),
            task_machines: BTreeMap::new(),
            running_by_owner: BTreeMap::new(),
            rearm_queued: false,
        }
    }

    pub fn queued(&self) -> &[TaskId] {
        &self.queued
    }

    pub fn pending(&self) -> &BTreeSet<TaskId> {
        &self.pending
    }

    pub fn known_tasks(&self) -> usize {
        self.tasks.len()
    }

    pub fn reaped(&self) -> usize {
        self.reaped.len()
    }

    pub fn projected_cores(&self, machine: MachineId) -> Option<u32> {
        self.machine_cores.get(&machine).copied()
    }

    pub fn running_by_owner(&self) -> &BTreeMap<OwnerId, u32> {
        &self.running_by_owner
    }

    pub fn machine_count(&self) -> usize {
        self.machines.len()
    }

    fn machine_views(&self) -> Vec<MachineView> {
        self.machines
            .values()
            .map(|h| {
                let available = self
                    .machine_cores
                    .get(&h.desc.id)
                    .copied()
                    .unwrap_or(0);
                let load = if h.desc.cores == 0 {
                    1.0
                } else {
                    1.0 - available as f64 / h.desc.cores as f64
                };
                MachineView {
                    id: h.desc.id,
                    proc: h.proc,
                    cores: h.desc.cores,
                    available,
                    speed_per_core: h.desc.speed_per_core,
                    ethernet_speed: h.desc.ethernet_speed,
                    load,
                }
            })
            .collect()
    }

    fn handle_resources(&mut self, registered: Vec<MachineHandle>, unregistered: Vec<MachineId>) {
        for handle in registered {
            info!(
                machine = %handle.desc.id,
                cores = handle.desc.cores,
                "REGISTERED"
            );
            self.machine_cores.insert(handle.desc.id, handle.desc.cores);
            self.machines.insert(handle.desc.id, handle);
        }
        for id in unregistered {
            // Tasks already dispatched to the machine are not disturbed.
            self.machines.remove(&id);
            self.machine_cores.remove(&id);
            info!(machine = %id, "UNREGISTERED");
        }
    }

    fn handle_accept(&mut self, ctx: &mut ProcessCtx, task: TaskId) {
        self.pending.remove(&task);
        if let Some(machine) = self.task_machines.get(&task) {
            ctx.record(JournalKind::TaskAccepted {
                task,
                machine: *machine,
            });
        }
    }

    /// Declined tasks go back to the queue and their reservation is
    /// rolled back, so the projection does not leak the cores of a
    /// dispatch that never happened.
    fn handle_decline(&mut self, task: TaskId) {
        if !self.pending.remove(&task) {
            return;
        }
        self.queued.push(task);
        let t = self.workload.task(task);
        if let Some(machine) = self.task_machines.remove(&task) {
            if let Some(cores) = self.machine_cores.get_mut(&machine) {
                *cores += t.cores;
            }
        }
        if let Some(n) = self.running_by_owner.get_mut(&t.owner) {
            *n = n.saturating_sub(1);
        }
        debug!(task = %task, "returned to queue after decline");
    }

    fn run_tick(&mut self, ctx: &mut ProcessCtx, new_tasks: Vec<TaskId>) {
        let mut acc = StageAccumulator::start(ctx.now());
        if let Err(e) = self.pipeline(ctx, &mut acc, new_tasks) {
            warn!(scheduler = self.policies.name.as_str(), error = %e, "TICK_ABORTED");
            ctx.record(JournalKind::PolicyFailed {
                reason: e.to_string(),
            });
            ctx.send(
                self.bus,
                Msg::Publish(BusEvent::PolicyFailure {
                    scheduler: self.policies.name.clone(),
                    reason: e.to_string(),
                }),
            );
        }
        for measurement in acc.finish() {
            ctx.send(self.bus, Msg::Publish(BusEvent::Stage(measurement)));
        }

        if (!self.queued.is_empty() || !self.pending.is_empty()) && !self.rearm_queued {
            self.rearm_queued = true;
            let me = ctx.pid();
            ctx.send_after(me, Msg::Schedule { new_tasks: Vec::new() }, 1);
        }
    }

    fn pipeline(
        &mut self,
        ctx: &mut ProcessCtx,
        acc: &mut StageAccumulator,
        new_tasks: Vec<TaskId>,
    ) -> Result<(), PolicyError> {
        let scan_size = (new_tasks.len() + self.tasks.len()) as u64;
        acc.run(Stage::UpdateCaches, scan_size, || {
            self.update_caches(ctx, new_tasks)
        });
        if self.queued.is_empty() {
            return Ok(());
        }

        // Snapshot for the task-level policies. The workload handle is
        // cloned out of `self` so the policy borrows stay disjoint from
        // the policy objects themselves.
        let workload = Rc::clone(&self.workload);
        let owners = self.running_by_owner.clone();
        let views = self.machine_views();
        let cx = PolicyContext {
            workload: &workload,
            machines: &views,
            running_by_owner: &owners,
        };

        let eligible = acc.run(Stage::TaskEligibility, self.queued.len() as u64, || {
            self.policies.eligibility.filter(&self.queued, &cx)
        })?;
        let sorted = acc.run(Stage::TaskSort, eligible.len() as u64, || {
            self.policies.sort.sort(eligible, &cx)
        })?;

        for task in sorted {
            // Rebuilt per task: each dispatch moves the projection.
            let fresh = self.machine_views();
            let candidates = acc.run(Stage::MachineFilter, fresh.len() as u64, || {
                self.policies.machine_filter.filter(task, &fresh, &cx)
            })?;
            let selected = acc.run(Stage::MachineSelect, candidates.len() as u64, || {
                self.policies.select.select(task, &candidates, &cx)
            })?;
            if let Some(machine) = selected {
                self.dispatch(ctx, task, machine);
            }
        }
        Ok(())
    }

    /// Append new tasks and reap finished ones: release their cores
    /// back into the projection and drop them from the owner counts.
    fn update_caches(&mut self, ctx: &mut ProcessCtx, new_tasks: Vec<TaskId>) {
        let now = ctx.now();
        for task in new_tasks {
            self.workload.task(task).mark_queued(now);
            ctx.record(JournalKind::TaskSubmitted { task });
            self.queued.push(task);
            self.tasks.push(task);
        }
        for i in 0..self.tasks.len() {
            let task = self.tasks[i];
            if self.reaped.contains(&task) {
                continue;
            }
            let t = self.workload.task(task);
            if !t.finished() {
                continue;
            }
            self.reaped.insert(task);
            self.pending.remove(&task);
            if let Some(machine) = self.task_machines.remove(&task) {
                if let Some(cores) = self.machine_cores.get_mut(&machine) {
                    *cores += t.cores;
                }
            }
            if let Some(n) = self.running_by_owner.get_mut(&t.owner) {
                *n = n.saturating_sub(1);
            }
        }
    }

    fn dispatch(&mut self, ctx: &mut ProcessCtx, task: TaskId, machine: MachineId) {
        let Some(handle) = self.machines.get(&machine).copied() else {
            warn!(task = %task, machine = %machine, "selection chose an unregistered machine");
            return;
        };
        let t = self.workload.task(task);
        ctx.send(handle.proc, Msg::Submit(task));
        self.queued.retain(|q| *q != task);
        self.pending.insert(task);
        self.task_machines.insert(task, machine);
        if let Some(cores) = self.machine_cores.get_mut(&machine) {
            *cores = cores.saturating_sub(t.cores);
        }
        *self.running_by_owner.entry(t.owner).or_insert(0) += 1;
        ctx.record(JournalKind::TaskDispatched { task, machine });
        debug!(task = %task, machine = %machine, cores = t.cores, "DISPATCH");
    }
}

impl Process for SchedulerProc {
    fn on_message(&mut self, ctx: &mut ProcessCtx, msg: Msg, _from: ProcId) -> Result<Step, Fault> {
        match msg {
            Msg::Schedule { new_tasks } => {
                self.rearm_queued = false;
                self.run_tick(ctx, new_tasks);
            }
            Msg::Resources {
                registered,
                unregistered,
            } => self.handle_resources(registered, unregistered),
            Msg::Accept(task) => self.handle_accept(ctx, task),
            Msg::Decline(task) => self.handle_decline(task),
            other => debug!(?other, "scheduler ignoring message"),
        }
        Ok(Step::receive())
    }
}
