//! Event bus: publish/subscribe fan-out, implemented as a process.
//!
//! Subscribers are held in an ordered set, so subscribing twice is a
//! no-op and fan-out order is deterministic. Published events reach
//! subscribers through the normal kernel send path (FIFO within a
//! tick); the original publisher's identity is not preserved — callers
//! that need it encode it in the event.

use std::collections::BTreeSet;

use tracing::debug;

use crate::error::Fault;
use crate::kernel::ProcessCtx;
use crate::message::Msg;
use crate::process::{Process, Step};
use crate::types::ProcId;

/// The bus process.
#[derive(Debug, Default)]
pub struct BusProc {
    subscribers: BTreeSet<ProcId>,
}

impl BusProc {
    pub fn new() -> Self {
        BusProc::default()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl Process for BusProc {
    fn on_message(&mut self, ctx: &mut ProcessCtx, msg: Msg, from: ProcId) -> Result<Step, Fault> {
        match msg {
            Msg::Subscribe => {
                self.subscribers.insert(from);
            }
            Msg::Unsubscribe => {
                // Unknown subscribers are a no-op by design.
                self.subscribers.remove(&from);
            }
            Msg::Publish(event) => {
                for sub in &self.subscribers {
                    ctx.send(*sub, Msg::Bus(event.clone()));
                }
            }
            other => debug!(?other, "bus ignoring message"),
        }
        Ok(Step::receive())
    }
}
