//! Event-driven simulation kernel.
//!
//! Owns the virtual clock, the event queue, the process registry, and
//! the journal. Strictly single-threaded and cooperatively scheduled:
//! one event is popped, handed to one process, and the process runs to
//! its next suspension before the next event is popped. Determinism
//! follows from the `(time, seq)` queue ordering and the absence of any
//! other scheduling freedom.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::error::{Fault, SimError};
use crate::fmt::set_sim_clock;
use crate::journal::{Journal, JournalKind};
use crate::message::Msg;
use crate::process::{Envelope, Mailbox, Process, Step, Suspension};
use crate::queue::{EventQueue, Payload};
use crate::types::{ProcId, Tick};

/// Registry entry for a live process.
struct Slot {
    name: String,
    parent: Option<ProcId>,
    process: Box<dyn Process>,
    mailbox: Mailbox,
    susp: Suspension,
    /// Suspension generation; bumped on every new suspension so stale
    /// timeout/wake events can be recognized and dropped.
    gen: u64,
}

/// How a resume was entered.
enum Entry {
    Start,
    Timeout,
    Wake,
    Delivery,
}

/// The simulation kernel.
pub struct Kernel {
    now: Tick,
    queue: EventQueue,
    procs: BTreeMap<ProcId, Slot>,
    next_pid: u32,
    journal: Journal,
    interrupt: Arc<AtomicBool>,
    events_dispatched: u64,
}

impl Kernel {
    pub fn new() -> Self {
        Kernel {
            now: 0,
            queue: EventQueue::new(),
            procs: BTreeMap::new(),
            next_pid: 0,
            journal: Journal::new(),
            interrupt: Arc::new(AtomicBool::new(false)),
            events_dispatched: 0,
        }
    }

    /// Current virtual time.
    pub fn now(&self) -> Tick {
        self.now
    }

    /// Number of pending deliveries.
    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    /// Total events dispatched so far.
    pub fn events_dispatched(&self) -> u64 {
        self.events_dispatched
    }

    /// Number of live processes.
    pub fn process_count(&self) -> usize {
        self.procs.len()
    }

    /// The journal recorded so far.
    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Consume the kernel, returning the journal.
    pub fn into_journal(self) -> Journal {
        self.journal
    }

    /// Handle for interrupting `run` from another thread.
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    /// Register a process. The startup signal is enqueued at the current
    /// time ahead of any other message to the process.
    pub fn spawn(&mut self, name: &str, process: Box<dyn Process>) -> ProcId {
        self.spawn_internal(None, name, process)
    }

    fn spawn_internal(
        &mut self,
        parent: Option<ProcId>,
        name: &str,
        process: Box<dyn Process>,
    ) -> ProcId {
        let pid = ProcId(self.next_pid);
        self.next_pid += 1;
        self.procs.insert(
            pid,
            Slot {
                name: name.to_string(),
                parent,
                process,
                mailbox: Mailbox::new(),
                susp: Suspension::Receive { armed: None },
                gen: 0,
            },
        );
        self.queue.push(self.now, pid, Payload::Start);
        debug!(proc = %pid, name, "spawned");
        pid
    }

    /// Deregister a process. Subsequent messages to it are dropped.
    /// Stopping an unknown or already-terminated process is a warning,
    /// not an error.
    pub fn stop(&mut self, pid: ProcId) {
        match self.procs.remove(&pid) {
            Some(slot) => debug!(proc = %pid, name = slot.name.as_str(), "stopped"),
            None => warn!(proc = %pid, "stop on unknown or terminated process"),
        }
    }

    /// Enqueue a delivery for `now + delay`. Fails with `InvalidDelay`
    /// if the delay is negative; the queue is left untouched.
    pub fn schedule(&mut self, dest: ProcId, msg: Msg, delay: i64) -> Result<(), SimError> {
        if delay < 0 {
            return Err(SimError::InvalidDelay(delay));
        }
        // External callers have no process identity; the kernel itself
        // is the sender.
        self.queue
            .push_message(self.now + delay as u64, dest, msg, ProcId(u32::MAX));
        Ok(())
    }

    /// Pop the earliest event, advance the clock, dispatch. Returns
    /// whether an event was processed.
    pub fn step(&mut self) -> bool {
        let Some(event) = self.queue.pop() else {
            return false;
        };
        assert!(
            event.time >= self.now,
            "time went backward: now={}, event={}",
            self.now,
            event.time
        );
        self.now = event.time;
        set_sim_clock(self.now);
        self.events_dispatched += 1;
        self.dispatch(event.dest, event.payload);
        true
    }

    /// Step while the next event's delivery time is within `until`, then
    /// advance the clock to `until`. An external interrupt aborts with
    /// `Interrupted`, leaving the kernel paused but consistent;
    /// re-entering `run` with a larger `until` resumes.
    pub fn run(&mut self, until: Tick) -> Result<u64, SimError> {
        let start = self.events_dispatched;
        while let Some(next) = self.queue.peek_time() {
            if next > until {
                break;
            }
            if self.interrupt.swap(false, Ordering::Relaxed) {
                return Err(SimError::Interrupted);
            }
            self.step();
        }
        self.now = self.now.max(until);
        set_sim_clock(self.now);
        Ok(self.events_dispatched - start)
    }

    fn dispatch(&mut self, dest: ProcId, payload: Payload) {
        let Some(slot) = self.procs.get_mut(&dest) else {
            debug!(proc = %dest, "dropping delivery to unknown process");
            return;
        };

        let entry = match payload {
            Payload::Message(env) => {
                slot.mailbox.push(env);
                // Buffer only: a holding process drains after its wake.
                if !matches!(slot.susp, Suspension::Receive { .. }) {
                    return;
                }
                Entry::Delivery
            }
            Payload::Start => Entry::Start,
            Payload::Timeout { gen } => {
                let live = matches!(slot.susp, Suspension::Receive { armed: Some(g) } if g == gen);
                if !live {
                    return;
                }
                Entry::Timeout
            }
            Payload::Wake { gen } => {
                if !(matches!(slot.susp, Suspension::Hold) && slot.gen == gen) {
                    return;
                }
                Entry::Wake
            }
        };

        self.resume(dest, entry);
    }

    /// Run a process from a resume point to its next quiescent state,
    /// draining the mailbox while it keeps returning to `receive`.
    fn resume(&mut self, pid: ProcId, entry: Entry) {
        let Some(mut slot) = self.procs.remove(&pid) else {
            return;
        };

        let mut stopped = false;
        let mut fault: Option<Fault> = None;

        let first = {
            let mut ctx = ProcessCtx {
                kernel: &mut *self,
                pid,
            };
            match entry {
                Entry::Start => Some(slot.process.on_start(&mut ctx)),
                Entry::Timeout => Some(slot.process.on_timeout(&mut ctx)),
                Entry::Wake => Some(slot.process.on_wake(&mut ctx)),
                Entry::Delivery => None,
            }
        };
        if let Some(result) = first {
            match result {
                Ok(step) => self.apply_step(pid, &mut slot, step, &mut stopped),
                Err(f) => fault = Some(f),
            }
        }

        while fault.is_none()
            && !stopped
            && matches!(slot.susp, Suspension::Receive { .. })
            && slot.mailbox.len() > 0
        {
            let Envelope { msg, from } = slot.mailbox.pop().expect("mailbox non-empty");
            let result = {
                let mut ctx = ProcessCtx {
                    kernel: &mut *self,
                    pid,
                };
                slot.process.on_message(&mut ctx, msg, from)
            };
            match result {
                Ok(step) => self.apply_step(pid, &mut slot, step, &mut stopped),
                Err(f) => fault = Some(f),
            }
        }

        if let Some(fault) = fault {
            error!(proc = %pid, name = slot.name.as_str(), %fault, "process crashed");
            self.journal
                .record(self.now, JournalKind::ProcessCrashed { proc: pid });
            self.stop_children(pid);
        } else if stopped {
            debug!(proc = %pid, name = slot.name.as_str(), "terminated");
        } else {
            self.procs.insert(pid, slot);
        }
    }

    fn apply_step(&mut self, pid: ProcId, slot: &mut Slot, step: Step, stopped: &mut bool) {
        slot.gen += 1;
        match step {
            Step::Receive { timeout } => {
                let armed = timeout.map(|ticks| {
                    self.queue
                        .push(self.now + ticks, pid, Payload::Timeout { gen: slot.gen });
                    slot.gen
                });
                slot.susp = Suspension::Receive { armed };
            }
            Step::Hold(ticks) => {
                self.queue
                    .push(self.now + ticks, pid, Payload::Wake { gen: slot.gen });
                slot.susp = Suspension::Hold;
            }
            Step::Stop => *stopped = true,
        }
    }

    /// Terminate the transitive children of a crashed process.
    fn stop_children(&mut self, parent: ProcId) {
        let children: Vec<ProcId> = self
            .procs
            .iter()
            .filter(|(_, s)| s.parent == Some(parent))
            .map(|(pid, _)| *pid)
            .collect();
        for child in children {
            if let Some(slot) = self.procs.remove(&child) {
                warn!(proc = %child, name = slot.name.as_str(), "terminated with crashed parent");
            }
            self.stop_children(child);
        }
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl Kernel {
    /// Build a context for driving a process directly in unit tests.
    pub(crate) fn test_ctx(&mut self, pid: ProcId) -> ProcessCtx<'_> {
        ProcessCtx { kernel: self, pid }
    }
}

/// Capability handed to a process while it runs: scheduling follow-up
/// deliveries, spawning children, recording journal entries. Borrowing
/// the kernel mutably keeps a handler from interfering with dispatch
/// outside of this API.
pub struct ProcessCtx<'a> {
    kernel: &'a mut Kernel,
    pid: ProcId,
}

impl ProcessCtx<'_> {
    /// Current virtual time.
    pub fn now(&self) -> Tick {
        self.kernel.now
    }

    /// The running process's own id.
    pub fn pid(&self) -> ProcId {
        self.pid
    }

    /// Send a message with the default delay of 0 ticks (same-tick
    /// delivery, FIFO ordered behind already-queued events).
    pub fn send(&mut self, dest: ProcId, msg: Msg) {
        self.send_after(dest, msg, 0);
    }

    /// Send a message delivered `delay` ticks from now.
    pub fn send_after(&mut self, dest: ProcId, msg: Msg, delay: u64) {
        self.kernel
            .queue
            .push_message(self.kernel.now + delay, dest, msg, self.pid);
    }

    /// Spawn a child process. It is terminated if this process crashes.
    pub fn spawn(&mut self, name: &str, process: Box<dyn Process>) -> ProcId {
        self.kernel.spawn_internal(Some(self.pid), name, process)
    }

    /// Record a journal entry at the current tick.
    pub fn record(&mut self, kind: JournalKind) {
        self.kernel.journal.record(self.kernel.now, kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Records every message it sees into a shared log.
    struct Probe {
        log: Rc<RefCell<Vec<(Tick, Msg)>>>,
    }

    impl Process for Probe {
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

    fn probe(kernel: &mut Kernel) -> (ProcId, Rc<RefCell<Vec<(Tick, Msg)>>>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let pid = kernel.spawn(
            "probe",
            Box::new(Probe {
                log: Rc::clone(&log),
            }),
        );
        (pid, log)
    }

    fn accept(task: usize) -> Msg {
        Msg::Accept(crate::types::TaskId(task))
    }

    #[test]
    fn negative_delay_rejected() {
        let mut kernel = Kernel::new();
        let (pid, _log) = probe(&mut kernel);
        let before = kernel.pending_events();
        let err = kernel.schedule(pid, accept(0), -1).unwrap_err();
        assert!(matches!(err, SimError::InvalidDelay(-1)));
        assert_eq!(kernel.pending_events(), before);
    }

    #[test]
    fn clock_is_monotone() {
        let mut kernel = Kernel::new();
        let (pid, _log) = probe(&mut kernel);
        kernel.schedule(pid, accept(0), 30).unwrap();
        kernel.schedule(pid, accept(1), 10).unwrap();
        kernel.schedule(pid, accept(2), 20).unwrap();

        let mut last = kernel.now();
        while kernel.step() {
            assert!(kernel.now() >= last);
            last = kernel.now();
        }
        assert_eq!(kernel.now(), 30);
    }

    #[test]
    fn fifo_within_tick() {
        let mut kernel = Kernel::new();
        let (pid, log) = probe(&mut kernel);
        kernel.schedule(pid, accept(0), 5).unwrap();
        kernel.schedule(pid, accept(1), 5).unwrap();
        kernel.schedule(pid, accept(2), 5).unwrap();
        kernel.run(100).unwrap();

        let seen: Vec<usize> = log
            .borrow()
            .iter()
            .map(|(_, m)| match m {
                Msg::Accept(t) => t.0,
                _ => panic!("unexpected message"),
            })
            .collect();
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[test]
    fn run_until_advances_clock_without_events() {
        let mut kernel = Kernel::new();
        let processed = kernel.run(500).unwrap();
        assert_eq!(processed, 0);
        assert_eq!(kernel.now(), 500);
    }

    #[test]
    fn run_leaves_future_events_pending() {
        let mut kernel = Kernel::new();
        let (pid, log) = probe(&mut kernel);
        kernel.schedule(pid, accept(0), 10).unwrap();
        kernel.schedule(pid, accept(1), 200).unwrap();

        kernel.run(100).unwrap();
        assert_eq!(log.borrow().len(), 1);
        assert_eq!(kernel.now(), 100);

        kernel.run(300).unwrap();
        assert_eq!(log.borrow().len(), 2);
        assert_eq!(kernel.now(), 300);
    }

    #[test]
    fn unknown_destination_drops_silently() {
        let mut kernel = Kernel::new();
        kernel.schedule(ProcId(99), accept(0), 0).unwrap();
        kernel.run(10).unwrap();
        assert_eq!(kernel.now(), 10);
    }

    #[test]
    fn stop_on_unknown_process_is_ignored() {
        let mut kernel = Kernel::new();
        kernel.stop(ProcId(7));
        let (pid, _log) = probe(&mut kernel);
        kernel.stop(pid);
        kernel.stop(pid); // second stop warns, does not panic
    }

    #[test]
    fn stopped_process_drops_messages() {
        let mut kernel = Kernel::new();
        let (pid, log) = probe(&mut kernel);
        kernel.run(0).unwrap();
        kernel.stop(pid);
        kernel.schedule(pid, accept(0), 1).unwrap();
        kernel.run(10).unwrap();
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn interrupt_pauses_and_resumes() {
        let mut kernel = Kernel::new();
        let (pid, log) = probe(&mut kernel);
        kernel.schedule(pid, accept(0), 10).unwrap();
        kernel.schedule(pid, accept(1), 20).unwrap();

        kernel.interrupt_handle().store(true, Ordering::Relaxed);
        let err = kernel.run(100).unwrap_err();
        assert!(matches!(err, SimError::Interrupted));
        assert!(log.borrow().is_empty());

        // Resuming picks the pending events back up.
        kernel.run(100).unwrap();
        assert_eq!(log.borrow().len(), 2);
    }

    /// Crashes on the first message; spawns a child on start.
    struct Crasher;

    impl Process for Crasher {
        fn on_start(&mut self, ctx: &mut ProcessCtx) -> Result<Step, Fault> {
            ctx.spawn("child", Box::new(Crasher));
            Ok(Step::receive())
        }

        fn on_message(
            &mut self,
            _ctx: &mut ProcessCtx,
            _msg: Msg,
            _from: ProcId,
        ) -> Result<Step, Fault> {
            Err(Fault::new("boom"))
        }
    }

    #[test]
    fn crash_terminates_process_and_children_only() {
        let mut kernel = Kernel::new();
        let crasher = kernel.spawn("crasher", Box::new(Crasher));
        let (probe_pid, log) = probe(&mut kernel);
        kernel.run(0).unwrap();
        assert_eq!(kernel.process_count(), 3);

        kernel.schedule(crasher, accept(0), 1).unwrap();
        kernel.schedule(probe_pid, accept(1), 2).unwrap();
        kernel.run(10).unwrap();

        // Crasher and its child are gone; the probe survived and the
        // kernel kept dispatching.
        assert_eq!(kernel.process_count(), 1);
        assert_eq!(log.borrow().len(), 1);
        assert_eq!(kernel.journal().entries().len(), 1);
    }

    /// Suspends in hold, counting wakes and buffered messages.
    struct Sleeper {
        log: Rc<RefCell<Vec<String>>>,
    }

    impl Process for Sleeper {
        fn on_start(&mut self, _ctx: &mut ProcessCtx) -> Result<Step, Fault> {
            Ok(Step::Hold(10))
        }

        fn on_message(
            &mut self,
            ctx: &mut ProcessCtx,
            _msg: Msg,
            _from: ProcId,
        ) -> Result<Step, Fault> {
            self.log.borrow_mut().push(format!("msg@{}", ctx.now()));
            Ok(Step::receive())
        }

        fn on_wake(&mut self, ctx: &mut ProcessCtx) -> Result<Step, Fault> {
            self.log.borrow_mut().push(format!("wake@{}", ctx.now()));
            Ok(Step::receive())
        }
    }

    #[test]
    fn hold_buffers_messages_until_wake() {
        let mut kernel = Kernel::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let pid = kernel.spawn(
            "sleeper",
            Box::new(Sleeper {
                log: Rc::clone(&log),
            }),
        );
        // Arrives at tick 3 while the process holds until tick 10.
        kernel.schedule(pid, accept(0), 3).unwrap();
        kernel.run(100).unwrap();

        assert_eq!(*log.borrow(), vec!["wake@10", "msg@10"]);
    }

    /// Receives with a timeout and records whether it fired.
    struct Timed {
        log: Rc<RefCell<Vec<String>>>,
    }

    impl Process for Timed {
        fn on_start(&mut self, _ctx: &mut ProcessCtx) -> Result<Step, Fault> {
            Ok(Step::receive_for(5))
        }

        fn on_message(
            &mut self,
            ctx: &mut ProcessCtx,
            _msg: Msg,
            _from: ProcId,
        ) -> Result<Step, Fault> {
            self.log.borrow_mut().push(format!("msg@{}", ctx.now()));
            Ok(Step::receive_for(5))
        }

        fn on_timeout(&mut self, ctx: &mut ProcessCtx) -> Result<Step, Fault> {
            self.log.borrow_mut().push(format!("timeout@{}", ctx.now()));
            Ok(Step::receive())
        }
    }

    #[test]
    fn receive_timeout_fires_once() {
        let mut kernel = Kernel::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        kernel.spawn(
            "timed",
            Box::new(Timed {
                log: Rc::clone(&log),
            }),
        );
        kernel.run(100).unwrap();
        assert_eq!(*log.borrow(), vec!["timeout@5"]);
    }

    #[test]
    fn message_cancels_pending_timeout() {
        let mut kernel = Kernel::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let pid = kernel.spawn(
            "timed",
            Box::new(Timed {
                log: Rc::clone(&log),
            }),
        );
        kernel.schedule(pid, accept(0), 2).unwrap();
        kernel.run(100).unwrap();
        // Message at 2 re-arms the timeout; it fires at 7, not 5.
        assert_eq!(*log.borrow(), vec!["msg@2", "timeout@7"]);
    }

    #[test]
    fn deterministic_replay() {
        fn trace() -> Vec<(Tick, usize)> {
            let mut kernel = Kernel::new();
            let (pid, log) = probe(&mut kernel);
            kernel.schedule(pid, accept(0), 5).unwrap();
            kernel.schedule(pid, accept(1), 3).unwrap();
            kernel.schedule(pid, accept(2), 5).unwrap();
            kernel.schedule(pid, accept(3), 1).unwrap();
            kernel.run(100).unwrap();
            let out = log
                .borrow()
                .iter()
                .map(|(t, m)| match m {
                    Msg::Accept(task) => (*t, task.0),
                    _ => panic!(),
                })
                .collect();
            out
        }

        assert_eq!(trace(), trace());
    }
}
