//! Inter-process message payloads.
//!
//! One closed enum covers the whole simulation: scheduler, machine, and
//! bus traffic. Payloads are values (no shared references), so delivery
//! never aliases process state.

use crate::machine::MachineHandle;
use crate::stage::StageMeasurement;
use crate::types::{MachineId, TaskId};

/// Message payloads carried by kernel deliveries.
#[derive(Debug, Clone)]
pub enum Msg {
    /// Scheduling tick: newly submitted tasks (possibly none).
    Schedule { new_tasks: Vec<TaskId> },
    /// Fleet update: machines joining and leaving.
    Resources {
        registered: Vec<MachineHandle>,
        unregistered: Vec<MachineId>,
    },
    /// A machine confirmed a dispatched task is running.
    Accept(TaskId),
    /// A machine refused a dispatched task for lack of cores.
    Decline(TaskId),
    /// Hand a task to a machine.
    Submit(TaskId),
    /// Machine-internal completion signal for a running task.
    Done(TaskId),
    /// Register the sender as a bus subscriber.
    Subscribe,
    /// Remove the sender from the bus subscribers.
    Unsubscribe,
    /// Ask the bus to fan an event out to all subscribers.
    Publish(BusEvent),
    /// A bus event delivered to a subscriber. The original publisher's
    /// identity is not preserved; the bus is the sender.
    Bus(BusEvent),
}

/// Events carried over the bus.
#[derive(Debug, Clone)]
pub enum BusEvent {
    /// A per-stage measurement emitted at the end of a scheduling tick.
    Stage(StageMeasurement),
    /// A policy aborted a scheduling tick.
    PolicyFailure { scheduler: String, reason: String },
}
