//! Experiment assembly and execution.
//!
//! One experiment = one kernel instance with a bus, a measurement
//! collector, a scheduler, one process per machine, and a feeder that
//! injects `Schedule(new_tasks)` at each distinct submit tick. Repeats
//! and warmups expand into a flat experiment list executed across
//! worker threads; a kernel instance never crosses a thread boundary.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;
use std::sync::Mutex;

use tracing::{debug, info};

use crate::bus::BusProc;
use crate::error::{Fault, SimError};
use crate::journal::Journal;
use crate::kernel::{Kernel, ProcessCtx};
use crate::machine::{MachineHandle, MachineProc};
use crate::message::{BusEvent, Msg};
use crate::metrics::{job_metrics, task_metrics, JobMetric, TaskMetric};
use crate::policy::PolicySet;
use crate::process::{Process, Step};
use crate::scheduler::SchedulerProc;
use crate::stage::StageMeasurement;
use crate::topology::MachineDescriptor;
use crate::types::{ProcId, TaskId, Tick};
use crate::workload::{TraceSpec, Workload};

/// One planned simulation run.
#[derive(Debug, Clone)]
pub struct ExperimentPlan {
    /// Output row key; warmups keep their index but are not reported.
    pub index: u32,
    /// Scheduler name (`SORT-SELECT` or a single-name scheduler).
    pub scheduler: String,
    pub seed: u64,
    pub horizon: Tick,
    pub warmup: bool,
}

/// How an experiment ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every task finished within the horizon.
    Completed,
    /// The horizon was reached with work still outstanding. An outcome,
    /// not an error.
    Aborted,
}

/// Everything one experiment produced.
#[derive(Debug)]
pub struct ExperimentResult {
    pub index: u32,
    pub scheduler: String,
    pub trace: String,
    pub warmup: bool,
    pub outcome: Outcome,
    pub stages: Vec<StageMeasurement>,
    pub tasks: Vec<TaskMetric>,
    pub jobs: Vec<JobMetric>,
    pub journal: Journal,
}

/// Feeds `Schedule(new_tasks)` to the scheduler at each distinct
/// submit tick, then stops.
struct Feeder {
    scheduler: ProcId,
    batches: VecDeque<(Tick, Vec<TaskId>)>,
}

impl Feeder {
    fn new(workload: &Workload, scheduler: ProcId) -> Self {
        let mut by_tick: BTreeMap<Tick, Vec<TaskId>> = BTreeMap::new();
        for task in workload.tasks() {
            by_tick.entry(task.submit_time).or_default().push(task.id);
        }
        Feeder {
            scheduler,
            batches: by_tick.into_iter().collect(),
        }
    }

    fn arm(&mut self, ctx: &mut ProcessCtx) -> Step {
        match self.batches.front() {
            Some((tick, _)) => Step::Hold(tick - ctx.now()),
            None => Step::Stop,
        }
    }
}

impl Process for Feeder {
    fn on_start(&mut self, ctx: &mut ProcessCtx) -> Result<Step, Fault> {
        Ok(self.arm(ctx))
    }

    fn on_wake(&mut self, ctx: &mut ProcessCtx) -> Result<Step, Fault> {
        let (tick, new_tasks) = self.batches.pop_front().expect("armed without a batch");
        debug_assert_eq!(tick, ctx.now());
        debug!(count = new_tasks.len(), "feeding tasks");
        ctx.send(self.scheduler, Msg::Schedule { new_tasks });
        Ok(self.arm(ctx))
    }

    fn on_message(&mut self, _ctx: &mut ProcessCtx, _msg: Msg, _from: ProcId) -> Result<Step, Fault> {
        Ok(Step::receive())
    }
}

/// Subscribes to the bus and gathers stage measurements.
struct Collector {
    bus: ProcId,
    sink: Rc<RefCell<Vec<StageMeasurement>>>,
}

impl Process for Collector {
    fn on_start(&mut self, ctx: &mut ProcessCtx) -> Result<Step, Fault> {
        ctx.send(self.bus, Msg::Subscribe);
        Ok(Step::receive())
    }

    fn on_message(&mut self, _ctx: &mut ProcessCtx, msg: Msg, _from: ProcId) -> Result<Step, Fault> {
        if let Msg::Bus(BusEvent::Stage(m)) = msg {
            self.sink.borrow_mut().push(m);
        }
        Ok(Step::receive())
    }
}

/// Run one experiment to its horizon.
pub fn run_experiment(
    trace: &TraceSpec,
    fleet: &[MachineDescriptor],
    plan: &ExperimentPlan,
) -> Result<ExperimentResult, SimError> {
    let policies = PolicySet::parse(&plan.scheduler, plan.seed)?;
    let workload = Rc::new(Workload::new(trace));
    let mut kernel = Kernel::new();

    let bus = kernel.spawn("bus", Box::new(BusProc::new()));
    let sink = Rc::new(RefCell::new(Vec::new()));
    kernel.spawn(
        "collector",
        Box::new(Collector {
            bus,
            sink: Rc::clone(&sink),
        }),
    );
    let scheduler = kernel.spawn(
        "scheduler",
        Box::new(SchedulerProc::new(Rc::clone(&workload), bus, policies)),
    );

    let mut handles = Vec::with_capacity(fleet.len());
    for desc in fleet {
        let proc = kernel.spawn(
            &desc.id.to_string(),
            Box::new(MachineProc::new(*desc, Rc::clone(&workload))),
        );
        handles.push(MachineHandle { proc, desc: *desc });
    }
    kernel.schedule(
        scheduler,
        Msg::Resources {
            registered: handles,
            unregistered: Vec::new(),
        },
        0,
    )?;
    kernel.spawn(
        "feeder",
        Box::new(Feeder::new(&workload, scheduler)),
    );

    kernel.run(plan.horizon)?;

    let outcome = if workload.all_finished() {
        Outcome::Completed
    } else {
        Outcome::Aborted
    };
    info!(
        experiment = plan.index,
        scheduler = plan.scheduler.as_str(),
        ?outcome,
        events = kernel.events_dispatched(),
        "experiment finished"
    );

    let journal = kernel.into_journal();
    let stages = sink.borrow().clone();
    Ok(ExperimentResult {
        index: plan.index,
        scheduler: plan.scheduler.clone(),
        trace: trace.name.clone(),
        warmup: plan.warmup,
        outcome,
        stages,
        tasks: task_metrics(&workload),
        jobs: job_metrics(&workload),
        journal,
    })
}

/// Expand schedulers × (warmups + repeats) into a flat plan list.
pub fn plan_experiments(
    schedulers: &[String],
    repeat: u32,
    warmup: u32,
    seed: u64,
    horizon: Tick,
) -> Vec<ExperimentPlan> {
    let mut plans = Vec::new();
    let mut index = 0;
    for scheduler in schedulers {
        for run in 0..warmup + repeat {
            plans.push(ExperimentPlan {
                index,
                scheduler: scheduler.clone(),
                seed,
                horizon,
                warmup: run < warmup,
            });
            index += 1;
        }
    }
    plans
}

/// Run all planned experiments across up to `parallelism` worker
/// threads. Results come back ordered by plan index.
pub fn run_all(
    trace: &TraceSpec,
    fleet: &[MachineDescriptor],
    plans: Vec<ExperimentPlan>,
    parallelism: usize,
) -> Result<Vec<ExperimentResult>, SimError> {
    let mut results: Vec<ExperimentResult> = if parallelism <= 1 || plans.len() <= 1 {
        let mut out = Vec::with_capacity(plans.len());
        for plan in &plans {
            out.push(run_experiment(trace, fleet, plan)?);
        }
        out
    } else {
        let work: Mutex<VecDeque<ExperimentPlan>> = Mutex::new(plans.into());
        let collected: Mutex<Vec<Result<ExperimentResult, SimError>>> = Mutex::new(Vec::new());
        std::thread::scope(|scope| {
            for _ in 0..parallelism {
                scope.spawn(|| loop {
                    let Some(plan) = work.lock().unwrap().pop_front() else {
                        break;
                    };
                    let result = run_experiment(trace, fleet, &plan);
                    collected.lock().unwrap().push(result);
                });
            }
        });
        let mut out = Vec::new();
        for result in collected.into_inner().unwrap() {
            out.push(result?);
        }
        out
    };
    results.sort_by_key(|r| r.index);
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::fleet_from_json;

    fn trace() -> TraceSpec {
        TraceSpec::from_json(
            r#"{"name": "t", "jobs": [{"id": 1, "tasks": [
                {"id": 0, "owner": 1, "flops": 4000, "cores": 1},
                {"id": 1, "owner": 1, "flops": 4000, "cores": 1, "submit_time": 2}
            ]}]}"#,
        )
        .unwrap()
    }

    fn fleet() -> Vec<MachineDescriptor> {
        fleet_from_json(
            r#"{"datacenters": [{"rooms": [{"racks": [{"machines": [
                {"cpus": [{"clock_rate_mhz": 1000, "cores": 4}]}
            ]}]}]}]}"#,
        )
        .unwrap()
    }

    fn plan(horizon: Tick) -> ExperimentPlan {
        ExperimentPlan {
            index: 0,
            scheduler: "FIFO-FIRSTFIT".to_string(),
            seed: 42,
            horizon,
            warmup: false,
        }
    }

    #[test]
    fn runs_to_completion_and_collects_measurements() {
        let result = run_experiment(&trace(), &fleet(), &plan(1_000)).unwrap();
        assert_eq!(result.outcome, Outcome::Completed);
        assert_eq!(result.tasks.len(), 2);
        assert_eq!(result.jobs.len(), 1);
        assert!(!result.stages.is_empty());
        // Task 0: submitted at 0, 4 ticks of work.
        assert_eq!(result.journal.completion_time(TaskId(0)), Some(4));
        // Task 1: submitted at 2, runs alongside on free cores.
        assert_eq!(result.journal.completion_time(TaskId(1)), Some(6));
    }

    #[test]
    fn horizon_abort_is_an_outcome() {
        let result = run_experiment(&trace(), &fleet(), &plan(1)).unwrap();
        assert_eq!(result.outcome, Outcome::Aborted);
    }

    #[test]
    fn plans_expand_warmups_first() {
        let plans = plan_experiments(
            &["FIFO-FIRSTFIT".to_string(), "SRTF-BESTFIT".to_string()],
            2,
            1,
            42,
            100,
        );
        assert_eq!(plans.len(), 6);
        assert!(plans[0].warmup);
        assert!(!plans[1].warmup);
        assert!(!plans[2].warmup);
        assert_eq!(plans[3].scheduler, "SRTF-BESTFIT");
        let indices: Vec<u32> = plans.iter().map(|p| p.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn parallel_runs_match_serial_runs() {
        let plans = plan_experiments(
            &["FIFO-FIRSTFIT".to_string(), "SRTF-BESTFIT".to_string()],
            2,
            0,
            42,
            1_000,
        );
        let serial = run_all(&trace(), &fleet(), plans.clone(), 1).unwrap();
        let parallel = run_all(&trace(), &fleet(), plans, 4).unwrap();

        assert_eq!(serial.len(), parallel.len());
        for (a, b) in serial.iter().zip(parallel.iter()) {
            assert_eq!(a.index, b.index);
            assert_eq!(a.outcome, b.outcome);
            assert_eq!(a.tasks, b.tasks);
            assert_eq!(a.jobs, b.jobs);
        }
    }
}
