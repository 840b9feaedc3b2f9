//! Simulation journal: append-only record of lifecycle events.
//!
//! Every scheduling action (submit, dispatch, accept, decline, start,
//! complete, machine idle, policy failure, process crash) is recorded
//! with its tick. Tests and `--dump-journal` read it back through the
//! query helpers.

use crate::fmt::FmtTick;
use crate::types::{MachineId, ProcId, TaskId, Tick};

/// A single journal entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub tick: Tick,
    pub kind: JournalKind,
}

/// The kind of lifecycle event recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalKind {
    /// A task entered the scheduler's queue.
    TaskSubmitted { task: TaskId },
    /// The scheduler sent a task to a machine.
    TaskDispatched { task: TaskId, machine: MachineId },
    /// The machine confirmed it is running the task.
    TaskAccepted { task: TaskId, machine: MachineId },
    /// The machine refused the task for lack of cores.
    TaskDeclined { task: TaskId, machine: MachineId },
    /// The task began executing.
    TaskStarted { task: TaskId, machine: MachineId },
    /// The task finished executing.
    TaskCompleted { task: TaskId, machine: MachineId },
    /// A machine ran out of work.
    MachineIdle { machine: MachineId },
    /// A policy aborted a scheduling tick.
    PolicyFailed { reason: String },
    /// A process handler faulted and the process was terminated.
    ProcessCrashed { proc: ProcId },
}

/// A complete simulation journal, entries in dispatch order.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Vec<JournalEntry>,
}

impl Journal {
    pub fn new() -> Self {
        Journal::default()
    }

    pub(crate) fn record(&mut self, tick: Tick, kind: JournalKind) {
        self.entries.push(JournalEntry { tick, kind });
    }

    /// All entries in chronological order.
    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    /// Tick at which the task completed, if it did.
    pub fn completion_time(&self, task: TaskId) -> Option<Tick> {
        self.entries.iter().find_map(|e| match e.kind {
            JournalKind::TaskCompleted { task: t, .. } if t == task => Some(e.tick),
            _ => None,
        })
    }

    /// Tick at which the task started executing, if it did.
    pub fn start_time(&self, task: TaskId) -> Option<Tick> {
        self.entries.iter().find_map(|e| match e.kind {
            JournalKind::TaskStarted { task: t, .. } if t == task => Some(e.tick),
            _ => None,
        })
    }

    /// Machine the task was dispatched to on its last dispatch.
    pub fn dispatched_machine(&self, task: TaskId) -> Option<MachineId> {
        self.entries.iter().rev().find_map(|e| match e.kind {
            JournalKind::TaskDispatched { task: t, machine } if t == task => Some(machine),
            _ => None,
        })
    }

    /// How many times the task was dispatched (declines cause retries).
    pub fn dispatch_count(&self, task: TaskId) -> usize {
        self.count(|k| matches!(k, JournalKind::TaskDispatched { task: t, .. } if *t == task))
    }

    /// How many times the task was declined by a machine.
    pub fn decline_count(&self, task: TaskId) -> usize {
        self.count(|k| matches!(k, JournalKind::TaskDeclined { task: t, .. } if *t == task))
    }

    /// Number of tasks dispatched to the given machine.
    pub fn dispatches_to(&self, machine: MachineId) -> usize {
        self.count(|k| matches!(k, JournalKind::TaskDispatched { machine: m, .. } if *m == machine))
    }

    /// Number of recorded policy failures.
    pub fn policy_failure_count(&self) -> usize {
        self.count(|k| matches!(k, JournalKind::PolicyFailed { .. }))
    }

    fn count(&self, pred: impl Fn(&JournalKind) -> bool) -> usize {
        self.entries.iter().filter(|e| pred(&e.kind)).count()
    }

    /// Pretty-print the journal for debugging.
    pub fn dump(&self) {
        for entry in &self.entries {
            let desc = match &entry.kind {
                JournalKind::TaskSubmitted { task } => format!("SUBMIT   {task}"),
                JournalKind::TaskDispatched { task, machine } => {
                    format!("DISPATCH {task} -> {machine}")
                }
                JournalKind::TaskAccepted { task, machine } => {
                    format!("ACCEPT   {task} on {machine}")
                }
                JournalKind::TaskDeclined { task, machine } => {
                    format!("DECLINE  {task} by {machine}")
                }
                JournalKind::TaskStarted { task, machine } => {
                    format!("START    {task} on {machine}")
                }
                JournalKind::TaskCompleted { task, machine } => {
                    format!("COMPLETE {task} on {machine}")
                }
                JournalKind::MachineIdle { machine } => format!("IDLE     {machine}"),
                JournalKind::PolicyFailed { reason } => format!("POLICY_FAIL {reason}"),
                JournalKind::ProcessCrashed { proc } => format!("CRASH    {proc}"),
            };
            eprintln!("[{}] {desc}", FmtTick(entry.tick));
        }
    }
}
