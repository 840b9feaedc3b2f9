//! Process runtime: mailboxes and cooperative suspension.
//!
//! A process is a long-lived state machine with a private mailbox. The
//! kernel resumes it only at its suspension points; each handler returns
//! the next suspension as a [`Step`]:
//!
//! - `Step::Receive { timeout }` — wait for the next message; with a
//!   timeout, `on_timeout` fires exactly once if nothing arrives first.
//! - `Step::Hold(d)` — sleep for exactly `d` ticks; messages arriving in
//!   the meantime buffer in the mailbox and are drained after `on_wake`.
//! - `Step::Stop` — deregister; later messages to this process drop.
//!
//! Handlers run to completion within a single dispatch (the kernel is
//! single-threaded), so a process may read and write its state freely
//! between suspensions.

use std::collections::VecDeque;

use crate::error::Fault;
use crate::kernel::ProcessCtx;
use crate::message::Msg;
use crate::types::ProcId;

/// A message together with its sender.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub msg: Msg,
    pub from: ProcId,
}

/// The suspension a handler selects when it returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Suspend until a message arrives, or until `timeout` ticks elapse.
    Receive { timeout: Option<u64> },
    /// Suspend for exactly the given number of ticks.
    Hold(u64),
    /// Terminate the process and remove it from the registry.
    Stop,
}

impl Step {
    /// Wait for the next message, without a timeout.
    pub const fn receive() -> Step {
        Step::Receive { timeout: None }
    }

    /// Wait for the next message, at most `ticks` ticks.
    pub const fn receive_for(ticks: u64) -> Step {
        Step::Receive {
            timeout: Some(ticks),
        }
    }
}

/// A simulated process.
///
/// `on_start` runs before any message is delivered (the startup signal
/// is enqueued by `spawn` ahead of everything else addressed to the
/// process). The default implementations go straight to an untimed
/// receive, so a pure message-loop process only implements `on_message`.
pub trait Process {
    /// Startup hook, invoked once before the message loop.
    fn on_start(&mut self, _ctx: &mut ProcessCtx) -> Result<Step, Fault> {
        Ok(Step::receive())
    }

    /// A message arrived while the process was receiving.
    fn on_message(&mut self, ctx: &mut ProcessCtx, msg: Msg, from: ProcId) -> Result<Step, Fault>;

    /// A `receive` timeout elapsed with no message (the `null` return).
    fn on_timeout(&mut self, _ctx: &mut ProcessCtx) -> Result<Step, Fault> {
        Ok(Step::receive())
    }

    /// A `hold` duration elapsed.
    fn on_wake(&mut self, _ctx: &mut ProcessCtx) -> Result<Step, Fault> {
        Ok(Step::receive())
    }
}

/// Private message buffer, exclusively owned by its process and mutated
/// only through kernel delivery.
#[derive(Debug, Default)]
pub(crate) struct Mailbox {
    queue: VecDeque<Envelope>,
}

impl Mailbox {
    pub fn new() -> Self {
        Mailbox::default()
    }

    pub fn push(&mut self, env: Envelope) {
        self.queue.push_back(env);
    }

    pub fn pop(&mut self) -> Option<Envelope> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

/// Where a process is suspended between dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Suspension {
    /// Waiting in `receive`; `armed` carries the generation of the
    /// pending timeout event, if one was scheduled.
    Receive { armed: Option<u64> },
    /// Sleeping in `hold` until the wake event of the current generation.
    Hold,
}
