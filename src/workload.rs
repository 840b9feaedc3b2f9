//! Workload model: jobs, tasks, and the dependency DAG.
//!
//! A trace file is parsed and validated once into a [`TraceSpec`]
//! (plain data, shareable across experiment threads), then instantiated
//! per experiment into a [`Workload`] arena with fresh lifecycle state.
//! Dependency links are index vectors in both directions, built in a
//! single pass once all ids are known.
//!
//! The arena is shared between processes as `Rc<Workload>`; the mutable
//! lifecycle fields are `Cell`s, which is sound because the kernel is
//! single-threaded and handlers run to completion.

use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;

use crate::error::SimError;
use crate::types::{Flops, JobId, OwnerId, TaskId, Tick};

// ---- Trace file schema -------------------------------------------------

#[derive(Debug, Deserialize)]
struct TraceFile {
    #[serde(default)]
    name: Option<String>,
    jobs: Vec<JobFile>,
}

#[derive(Debug, Deserialize)]
struct JobFile {
    id: u64,
    tasks: Vec<TaskFile>,
}

#[derive(Debug, Deserialize)]
struct TaskFile {
    id: u64,
    owner: u32,
    #[serde(default)]
    priority: i64,
    flops: u64,
    cores: u32,
    #[serde(default)]
    input_size: u64,
    #[serde(default)]
    output_size: u64,
    #[serde(default)]
    submit_time: u64,
    #[serde(default)]
    dependencies: Vec<u64>,
}

// ---- Validated specification -------------------------------------------

/// One task as declared in the trace, with dependencies resolved to
/// arena indices.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    /// Task id as written in the trace file (reported in outputs).
    pub ext_id: u64,
    pub job: JobId,
    /// Job id as written in the trace file.
    pub job_ext_id: u64,
    pub owner: OwnerId,
    pub priority: i64,
    pub flops: Flops,
    pub cores: u32,
    pub input_size: u64,
    pub output_size: u64,
    pub submit_time: Tick,
    pub dependencies: Vec<TaskId>,
}

/// A validated workload trace: plain data, cheap to share across
/// experiment threads.
#[derive(Debug, Clone)]
pub struct TraceSpec {
    pub name: String,
    pub tasks: Vec<TaskSpec>,
    /// Arena indices per job, in file order.
    pub jobs: Vec<(u64, Vec<TaskId>)>,
}

impl TraceSpec {
    /// Parse and validate a JSON trace.
    ///
    /// Rejected with `MalformedTrace`: unparseable JSON (including
    /// negative flops/cores, which the unsigned schema refuses),
    /// duplicate task or job ids, dependencies on unknown tasks,
    /// dependencies crossing job boundaries, dependency cycles, and
    /// tasks with zero flops or zero cores.
    pub fn from_json(input: &str) -> Result<TraceSpec, SimError> {
        let file: TraceFile =
            serde_json::from_str(input).map_err(|e| SimError::MalformedTrace(e.to_string()))?;
        Self::build(file)
    }

    fn build(file: TraceFile) -> Result<TraceSpec, SimError> {
        let malformed = |msg: String| Err(SimError::MalformedTrace(msg));

        // First pass: assign arena indices, detect duplicates.
        let mut index_of: BTreeMap<u64, TaskId> = BTreeMap::new();
        let mut job_ids: BTreeSet<u64> = BTreeSet::new();
        let mut next = 0usize;
        for job in &file.jobs {
            if !job_ids.insert(job.id) {
                return malformed(format!("duplicate job id {}", job.id));
            }
            for task in &job.tasks {
                if index_of.insert(task.id, TaskId(next)).is_some() {
                    return malformed(format!("duplicate task id {}", task.id));
                }
                next += 1;
            }
        }

        // Second pass: resolve dependencies and validate fields.
        let mut tasks: Vec<TaskSpec> = Vec::with_capacity(next);
        let mut jobs: Vec<(u64, Vec<TaskId>)> = Vec::with_capacity(file.jobs.len());
        for (job_idx, job) in file.jobs.iter().enumerate() {
            let mut members = Vec::with_capacity(job.tasks.len());
            let job_task_ids: BTreeSet<u64> = job.tasks.iter().map(|t| t.id).collect();
            for task in &job.tasks {
                if task.cores == 0 {
                    return malformed(format!("task {} requests zero cores", task.id));
                }
                if task.flops == 0 {
                    return malformed(format!("task {} requests zero flops", task.id));
                }
                let mut deps = Vec::with_capacity(task.dependencies.len());
                for dep in &task.dependencies {
                    let Some(&dep_idx) = index_of.get(dep) else {
                        return malformed(format!(
                            "task {} depends on unknown task {dep}",
                            task.id
                        ));
                    };
                    if !job_task_ids.contains(dep) {
                        return malformed(format!(
                            "task {} depends on task {dep} outside its job",
                            task.id
                        ));
                    }
                    deps.push(dep_idx);
                }
                members.push(index_of[&task.id]);
                tasks.push(TaskSpec {
                    ext_id: task.id,
                    job: JobId(job_idx),
                    job_ext_id: job.id,
                    owner: OwnerId(task.owner),
                    priority: task.priority,
                    flops: task.flops,
                    cores: task.cores,
                    input_size: task.input_size,
                    output_size: task.output_size,
                    submit_time: task.submit_time,
                    dependencies: deps,
                });
            }
            jobs.push((job.id, members));
        }

        // Cycle check (Kahn's algorithm over dependency edges).
        let mut indegree: Vec<usize> = tasks.iter().map(|t| t.dependencies.len()).collect();
        let mut ready: Vec<usize> = indegree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| i)
            .collect();
        let mut visited = 0usize;
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); tasks.len()];
        for (i, task) in tasks.iter().enumerate() {
            for dep in &task.dependencies {
                dependents[dep.0].push(i);
            }
        }
        while let Some(i) = ready.pop() {
            visited += 1;
            for &dependent in &dependents[i] {
                indegree[dependent] -= 1;
                if indegree[dependent] == 0 {
                    ready.push(dependent);
                }
            }
        }
        if visited != tasks.len() {
            return malformed("dependency cycle detected".to_string());
        }

        Ok(TraceSpec {
            name: file.name.unwrap_or_else(|| "trace".to_string()),
            tasks,
            jobs,
        })
    }
}

// ---- Runtime arena -----------------------------------------------------

/// Task lifecycle state. The chain `Underway → Queued → Running →
/// Finished` admits no skips and no reversals; a `Finished` task is
/// never mutated again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Submitted to the platform, not yet queued at a scheduler.
    Underway,
    /// In the scheduler's queue.
    Queued { at: Tick },
    /// Executing on a machine.
    Running { at: Tick },
    /// All work consumed.
    Finished { started_at: Tick, at: Tick },
}

/// A task in the workload arena: immutable identity plus `Cell`-held
/// lifecycle state.
#[derive(Debug)]
pub struct Task {
    pub id: TaskId,
    pub ext_id: u64,
    pub job: JobId,
    pub owner: OwnerId,
    pub priority: i64,
    pub flops: Flops,
    pub cores: u32,
    pub input_size: u64,
    pub output_size: u64,
    pub submit_time: Tick,
    state: Cell<TaskState>,
    remaining: Cell<Flops>,
    dependencies: Vec<TaskId>,
    dependents: Vec<TaskId>,
}

impl Task {
    pub fn state(&self) -> TaskState {
        self.state.get()
    }

    pub fn remaining(&self) -> Flops {
        self.remaining.get()
    }

    pub fn finished(&self) -> bool {
        matches!(self.state.get(), TaskState::Finished { .. })
    }

    /// Tick the task started executing, if it has.
    pub fn start_time(&self) -> Option<Tick> {
        match self.state.get() {
            TaskState::Running { at } => Some(at),
            TaskState::Finished { started_at, .. } => Some(started_at),
            _ => None,
        }
    }

    /// Tick the task finished, if it has.
    pub fn finish_time(&self) -> Option<Tick> {
        match self.state.get() {
            TaskState::Finished { at, .. } => Some(at),
            _ => None,
        }
    }

    pub fn dependencies(&self) -> &[TaskId] {
        &self.dependencies
    }

    pub fn dependents(&self) -> &[TaskId] {
        &self.dependents
    }

    /// Transition `Underway → Queued`. Called when the scheduler takes
    /// the task into its queue.
    pub(crate) fn mark_queued(&self, now: Tick) {
        assert!(
            matches!(self.state.get(), TaskState::Underway),
            "{}: queued out of order from {:?}",
            self.id,
            self.state.get()
        );
        self.state.set(TaskState::Queued { at: now });
    }

    /// Consume `amount` flops of work at `now`.
    ///
    /// The first call on a queued task (conventionally with amount 0)
    /// transitions it to `Running`; the call that exhausts `remaining`
    /// transitions it to `Finished`.
    pub fn consume(&self, now: Tick, amount: Flops) {
        match self.state.get() {
            TaskState::Queued { .. } => {
                self.state.set(TaskState::Running { at: now });
            }
            TaskState::Running { .. } => {}
            other => panic!("{}: consume in state {other:?}", self.id),
        }
        let left = self.remaining.get().saturating_sub(amount);
        self.remaining.set(left);
        if left == 0 {
            let TaskState::Running { at } = self.state.get() else {
                unreachable!()
            };
            self.state.set(TaskState::Finished {
                started_at: at,
                at: now,
            });
        }
    }
}

/// A job: a set of tasks, finished when every task is finished.
#[derive(Debug)]
pub struct Job {
    pub id: JobId,
    pub ext_id: u64,
    pub tasks: Vec<TaskId>,
}

/// The workload arena: all tasks and jobs of one experiment, shared
/// read-mostly between the scheduler and machine processes.
#[derive(Debug)]
pub struct Workload {
    pub name: String,
    tasks: Vec<Task>,
    jobs: Vec<Job>,
}

impl Workload {
    /// Instantiate a fresh arena (all tasks `Underway`, full work
    /// remaining) from a validated spec.
    pub fn new(spec: &TraceSpec) -> Workload {
        let mut dependents: Vec<Vec<TaskId>> = vec![Vec::new(); spec.tasks.len()];
        for (i, t) in spec.tasks.iter().enumerate() {
            for dep in &t.dependencies {
                dependents[dep.0].push(TaskId(i));
            }
        }
        let tasks = spec
            .tasks
            .iter()
            .enumerate()
            .map(|(i, t)| Task {
                id: TaskId(i),
                ext_id: t.ext_id,
                job: t.job,
                owner: t.owner,
                priority: t.priority,
                flops: t.flops,
                cores: t.cores,
                input_size: t.input_size,
                output_size: t.output_size,
                submit_time: t.submit_time,
                state: Cell::new(TaskState::Underway),
                remaining: Cell::new(t.flops),
                dependencies: t.dependencies.clone(),
                dependents: std::mem::take(&mut dependents[i]),
            })
            .collect();
        let jobs = spec
            .jobs
            .iter()
            .enumerate()
            .map(|(i, (ext_id, members))| Job {
                id: JobId(i),
                ext_id: *ext_id,
                tasks: members.clone(),
            })
            .collect();
        Workload {
            name: spec.name.clone(),
            tasks,
            jobs,
        }
    }

    pub fn task(&self, id: TaskId) -> &Task {
        &self.tasks[id.0]
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn job(&self, id: JobId) -> &Job {
        &self.jobs[id.0]
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    /// A task is ready when every dependency is finished.
    pub fn is_ready(&self, id: TaskId) -> bool {
        self.tasks[id.0]
            .dependencies
            .iter()
            .all(|d| self.tasks[d.0].finished())
    }

    pub fn job_finished(&self, id: JobId) -> bool {
        self.jobs[id.0]
            .tasks
            .iter()
            .all(|t| self.tasks[t.0].finished())
    }

    pub fn all_finished(&self) -> bool {
        self.tasks.iter().all(|t| t.finished())
    }
}
