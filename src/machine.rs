//! Machine process: per-machine state machine for task execution.
//!
//! A machine accepts tasks subject to its core capacity, advances their
//! work at `cores × speed_per_core` flops per tick, and signals
//! completion back to itself with a delayed `Done`. Capacity invariant:
//! `available_cores + Σ running cores == cores` at all times.

use std::collections::BTreeSet;
use std::rc::Rc;

use tracing::{debug, info};

use crate::error::Fault;
use crate::fmt::FmtN;
use crate::journal::JournalKind;
use crate::kernel::ProcessCtx;
use crate::message::Msg;
use crate::process::{Process, Step};
use crate::topology::MachineDescriptor;
use crate::types::{ProcId, TaskId, Tick};
use crate::workload::{Task, Workload};

/// Cosmetic bookkeeping deltas per running task, visible to observers
/// only.
const MEMORY_PER_TASK_MB: u64 = 50;
const TEMPERATURE_PER_TASK_C: f64 = 5.0;
const TEMPERATURE_IDLE_C: f64 = 23.0;

/// Machine lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineStatus {
    /// Zero cores: the machine ignores all messages.
    Halt,
    /// No running tasks.
    Idle,
    /// At least one running task.
    Running,
}

/// What the scheduler needs to know about a registered machine: its
/// descriptor plus the process to dispatch to.
#[derive(Debug, Clone, Copy)]
pub struct MachineHandle {
    pub proc: ProcId,
    pub desc: MachineDescriptor,
}

/// The per-machine process.
pub struct MachineProc {
    desc: MachineDescriptor,
    workload: Rc<Workload>,
    status: MachineStatus,
    running: BTreeSet<TaskId>,
    available_cores: u32,
    load: f64,
    memory_mb: u64,
    temperature_c: f64,
}

impl MachineProc {
    pub fn new(desc: MachineDescriptor, workload: Rc<Workload>) -> Self {
        MachineProc {
            desc,
            workload,
            status: MachineStatus::Idle,
            running: BTreeSet::new(),
            available_cores: desc.cores,
            load: 0.0,
            memory_mb: 0,
            temperature_c: TEMPERATURE_IDLE_C,
        }
    }

    pub fn status(&self) -> MachineStatus {
        self.status
    }

    pub fn available_cores(&self) -> u32 {
        self.available_cores
    }

    pub fn load(&self) -> f64 {
        self.load
    }

    pub fn memory_mb(&self) -> u64 {
        self.memory_mb
    }

    pub fn temperature_c(&self) -> f64 {
        self.temperature_c
    }

    pub fn running(&self) -> &BTreeSet<TaskId> {
        &self.running
    }

    /// Ticks the task will occupy this machine:
    /// `ceil(flops / (task cores × speed per core))`.
    fn runtime_ticks(&self, task: &Task) -> Tick {
        let rate = task.cores as f64 * self.desc.speed_per_core;
        (task.flops as f64 / rate).ceil() as Tick
    }

    fn admit(&mut self, ctx: &mut ProcessCtx, id: TaskId, from: ProcId) {
        let task = self.workload.task(id);
        if self.available_cores < task.cores {
            debug!(
                machine = %self.desc.id,
                task = %id,
                need = task.cores,
                free = self.available_cores,
                "DECLINED"
            );
            ctx.record(JournalKind::TaskDeclined {
                task: id,
                machine: self.desc.id,
            });
            ctx.send(from, Msg::Decline(id));
            return;
        }

        self.running.insert(id);
        self.available_cores -= task.cores;
        self.status = MachineStatus::Running;
        self.load += task.cores as f64 / self.desc.cores as f64;
        self.memory_mb += MEMORY_PER_TASK_MB;
        self.temperature_c += TEMPERATURE_PER_TASK_C;

        task.consume(ctx.now(), 0);
        ctx.record(JournalKind::TaskStarted {
            task: id,
            machine: self.desc.id,
        });
        ctx.send(from, Msg::Accept(id));

        let ticks = self.runtime_ticks(task);
        info!(
            machine = %self.desc.id,
            task = %id,
            cores = task.cores,
            flops = %FmtN(task.flops),
            ticks,
            "STARTED"
        );
        let me = ctx.pid();
        ctx.send_after(me, Msg::Done(id), ticks);
    }

    fn complete(&mut self, ctx: &mut ProcessCtx, id: TaskId) {
        if !self.running.remove(&id) {
            return;
        }
        let task = self.workload.task(id);
        task.consume(ctx.now(), task.remaining());
        self.available_cores += task.cores;
        self.load -= task.cores as f64 / self.desc.cores as f64;
        self.memory_mb = self.memory_mb.saturating_sub(MEMORY_PER_TASK_MB);
        self.temperature_c -= TEMPERATURE_PER_TASK_C;
        ctx.record(JournalKind::TaskCompleted {
            task: id,
            machine: self.desc.id,
        });
        info!(machine = %self.desc.id, task = %id, "COMPLETED");
    }
}

impl Process for MachineProc {
    fn on_start(&mut self, _ctx: &mut ProcessCtx) -> Result<Step, Fault> {
        if self.desc.cores == 0 {
            self.status = MachineStatus::Halt;
            info!(machine = %self.desc.id, "HALTED");
        }
        Ok(Step::receive())
    }

    fn on_message(&mut self, ctx: &mut ProcessCtx, msg: Msg, from: ProcId) -> Result<Step, Fault> {
        if self.status == MachineStatus::Halt {
            return Ok(Step::receive());
        }
        match msg {
            Msg::Submit(id) => self.admit(ctx, id, from),
            Msg::Done(id) => self.complete(ctx, id),
            other => debug!(machine = %self.desc.id, ?other, "ignoring message"),
        }
        if self.running.is_empty() && self.status == MachineStatus::Running {
            self.status = MachineStatus::Idle;
            self.load = 0.0;
            ctx.record(JournalKind::MachineIdle {
                machine: self.desc.id,
            });
            info!(machine = %self.desc.id, "IDLE");
        }
        Ok(Step::receive())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::Kernel;
    use crate::types::MachineId;
    use crate::workload::TraceSpec;
    use std::cell::RefCell;

    fn two_task_workload() -> Rc<Workload> {
        let spec = TraceSpec::from_json(
            r#"{"jobs": [{"id": 1, "tasks": [
                {"id": 0, "owner": 1, "flops": 4000, "cores": 2},
                {"id": 1, "owner": 1, "flops": 4000, "cores": 2}
            ]}]}"#,
        )
        .unwrap();
        Rc::new(Workload::new(&spec))
    }

    fn descriptor(cores: u32, speed: f64) -> MachineDescriptor {
        MachineDescriptor {
            id: MachineId(0),
            cores,
            speed_per_core: speed,
            ethernet_speed: 1000.0,
        }
    }

    /// Captures accept/decline replies from the machine.
    struct Replies {
        log: Rc<RefCell<Vec<(Tick, Msg)>>>,
    }

    impl Process for Replies {
        fn on_message(
            &mut self,
            ctx: &mut ProcessCtx,
            msg: Msg,
            _from: ProcId,
        ) -> Result<Step, Fault> {
            self.log.borrow_mut().push((ctx.now(), msg));
            Ok(Step::receive())
        }
    }

    fn setup(
        cores: u32,
        speed: f64,
    ) -> (
        Kernel,
        Rc<Workload>,
        ProcId,
        ProcId,
        Rc<RefCell<Vec<(Tick, Msg)>>>,
    ) {
        let mut kernel = Kernel::new();
        let wl = two_task_workload();
        for t in wl.tasks() {
            t.mark_queued(0);
        }
        let machine = kernel.spawn(
            "m0",
            Box::new(MachineProc::new(descriptor(cores, speed), Rc::clone(&wl))),
        );
        let log = Rc::new(RefCell::new(Vec::new()));
        let probe = kernel.spawn(
            "probe",
            Box::new(Replies {
                log: Rc::clone(&log),
            }),
        );
        (kernel, wl, machine, probe, log)
    }

    /// Drive a submit from the probe process so the machine replies to it.
    struct Submitter {
        machine: ProcId,
        task: TaskId,
    }

    impl Process for Submitter {
        fn on_start(&mut self, ctx: &mut ProcessCtx) -> Result<Step, Fault> {
            ctx.send(self.machine, Msg::Submit(self.task));
            Ok(Step::Stop)
        }

        fn on_message(
            &mut self,
            _ctx: &mut ProcessCtx,
            _msg: Msg,
            _from: ProcId,
        ) -> Result<Step, Fault> {
            Ok(Step::Stop)
        }
    }

    #[test]
    fn accepts_runs_and_completes() {
        let (mut kernel, wl, machine, _probe, _log) = setup(4, 1000.0);
        // 4000 flops on 2 cores at 1000 flops/tick/core -> 2 ticks.
        kernel.schedule(machine, Msg::Submit(TaskId(0)), 0).unwrap();
        kernel.run(100).unwrap();

        let task = wl.task(TaskId(0));
        assert!(task.finished());
        assert_eq!(task.start_time(), Some(0));
        assert_eq!(task.finish_time(), Some(2));
        assert_eq!(kernel.journal().completion_time(TaskId(0)), Some(2));
    }

    #[test]
    fn declines_when_capacity_is_short() {
        let (mut kernel, _wl, machine, probe, log) = setup(2, 1000.0);
        kernel.spawn(
            "sub0",
            Box::new(Submitter {
                machine,
                task: TaskId(0),
            }),
        );
        // Second task also needs 2 cores; the machine has none left.
        kernel.spawn(
            "sub1",
            Box::new(Submitter {
                machine,
                task: TaskId(1),
            }),
        );
        let _ = probe;
        kernel.run(0).unwrap();

        // sub0 and sub1 replies went to the (stopped) submitters, but the
        // journal shows one start and one decline.
        assert_eq!(kernel.journal().decline_count(TaskId(1)), 1);
        assert_eq!(kernel.journal().start_time(TaskId(0)), Some(0));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn capacity_invariant_and_idle_reset() {
        let mut kernel = Kernel::new();
        let wl = two_task_workload();
        for t in wl.tasks() {
            t.mark_queued(0);
        }
        let mut machine = MachineProc::new(descriptor(4, 1000.0), Rc::clone(&wl));
        let me = ProcId(0);
        let sender = ProcId(1);

        let check = |m: &MachineProc| {
            let used: u32 = m.running().iter().map(|t| wl.task(*t).cores).sum();
            assert_eq!(m.available_cores() + used, 4);
        };

        let mut ctx = kernel.test_ctx(me);
        machine.on_message(&mut ctx, Msg::Submit(TaskId(0)), sender).unwrap();
        check(&machine);
        assert_eq!(machine.status(), MachineStatus::Running);
        assert_eq!(machine.memory_mb(), MEMORY_PER_TASK_MB);

        let mut ctx = kernel.test_ctx(me);
        machine.on_message(&mut ctx, Msg::Submit(TaskId(1)), sender).unwrap();
        check(&machine);
        assert_eq!(machine.available_cores(), 0);
        assert!((machine.load() - 1.0).abs() < 1e-9);

        let mut ctx = kernel.test_ctx(me);
        machine.on_message(&mut ctx, Msg::Done(TaskId(0)), sender).unwrap();
        check(&machine);
        let mut ctx = kernel.test_ctx(me);
        machine.on_message(&mut ctx, Msg::Done(TaskId(1)), sender).unwrap();
        check(&machine);

        assert_eq!(machine.status(), MachineStatus::Idle);
        assert_eq!(machine.available_cores(), 4);
        assert_eq!(machine.load(), 0.0);
        assert_eq!(machine.memory_mb(), 0);
        assert!((machine.temperature_c() - TEMPERATURE_IDLE_C).abs() < 1e-9);
    }

    #[test]
    fn done_for_unknown_task_is_a_no_op() {
        let mut kernel = Kernel::new();
        let wl = two_task_workload();
        let mut machine = MachineProc::new(descriptor(4, 1000.0), Rc::clone(&wl));
        let mut ctx = kernel.test_ctx(ProcId(0));
        machine.on_message(&mut ctx, Msg::Done(TaskId(0)), ProcId(1)).unwrap();
        assert_eq!(machine.available_cores(), 4);
        assert!(!wl.task(TaskId(0)).finished());
    }

    #[test]
    fn zero_core_machine_halts_and_ignores() {
        let (mut kernel, wl, machine, _probe, _log) = setup(0, 0.0);
        kernel.schedule(machine, Msg::Submit(TaskId(0)), 0).unwrap();
        kernel.run(10).unwrap();
        assert!(!wl.task(TaskId(0)).finished());
        assert_eq!(kernel.journal().dispatch_count(TaskId(0)), 0);
        assert_eq!(kernel.journal().start_time(TaskId(0)), None);
    }

    #[test]
    fn runtime_rounds_up() {
        let wl = two_task_workload();
        let m = MachineProc::new(descriptor(4, 1500.0), Rc::clone(&wl));
        // 4000 / (2 * 1500) = 1.33... -> 2 ticks.
        assert_eq!(m.runtime_ticks(wl.task(TaskId(0))), 2);
    }
}
