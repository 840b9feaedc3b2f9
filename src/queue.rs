//! Event queue: the ordered store of pending deliveries.
//!
//! A `BinaryHeap` of `Reverse`-wrapped events acts as a min-heap keyed
//! by `(time, seq)`. The sequence number is a monotonically increasing
//! insertion counter, so two events scheduled for the same tick are
//! delivered in the order they were scheduled (FIFO within a tick).

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::message::Msg;
use crate::process::Envelope;
use crate::types::{ProcId, Tick};

/// What a scheduled event carries to its destination process.
#[derive(Debug, Clone)]
pub(crate) enum Payload {
    /// An inter-process message.
    Message(Envelope),
    /// Startup signal enqueued by `spawn`, delivered before anything else.
    Start,
    /// A `receive` timeout elapsed. Stale generations are dropped.
    Timeout { gen: u64 },
    /// A `hold` duration elapsed. Stale generations are dropped.
    Wake { gen: u64 },
}

/// A pending delivery.
#[derive(Debug, Clone)]
pub(crate) struct QueuedEvent {
    pub time: Tick,
    pub seq: u64,
    pub dest: ProcId,
    pub payload: Payload,
}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for QueuedEvent {}

impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .cmp(&other.time)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Priority container keyed by `(delivery time, insertion sequence)`.
#[derive(Debug, Default)]
pub(crate) struct EventQueue {
    heap: BinaryHeap<Reverse<QueuedEvent>>,
    next_seq: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        EventQueue::default()
    }

    /// Enqueue a delivery. Assigns the tiebreaking sequence number.
    pub fn push(&mut self, time: Tick, dest: ProcId, payload: Payload) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(QueuedEvent {
            time,
            seq,
            dest,
            payload,
        }));
    }

    /// Pop the earliest event (lowest time, then lowest sequence).
    pub fn pop(&mut self) -> Option<QueuedEvent> {
        self.heap.pop().map(|Reverse(e)| e)
    }

    /// Delivery time of the next event without removing it.
    pub fn peek_time(&self) -> Option<Tick> {
        self.heap.peek().map(|Reverse(e)| e.time)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

/// Convenience for a message push (used by kernel and context).
impl EventQueue {
    pub fn push_message(&mut self, time: Tick, dest: ProcId, msg: Msg, from: ProcId) {
        self.push(time, dest, Payload::Message(Envelope { msg, from }));
    }
}
