//! Error taxonomy for the simulation core.
//!
//! Kernel-level failures (`SimError`) are distinct from policy failures
//! (`PolicyError`): a policy failure aborts a single scheduling tick and
//! is published on the bus, while kernel errors surface to the caller of
//! `Kernel::schedule` / `Kernel::run`. Crashes inside a process handler
//! are reported as a `Fault` and terminate only that process subtree.

use thiserror::Error;

/// Errors surfaced by the simulation kernel and the input loaders.
#[derive(Debug, Error)]
pub enum SimError {
    /// A negative delay was passed to `Kernel::schedule`. The event queue
    /// is left untouched.
    #[error("invalid delay: {0} (must be >= 0)")]
    InvalidDelay(i64),

    /// `Kernel::run` was aborted by an external interrupt. The kernel is
    /// paused but consistent; re-entering `run` resumes.
    #[error("simulation interrupted")]
    Interrupted,

    /// The workload trace failed validation.
    #[error("malformed trace: {0}")]
    MalformedTrace(String),

    /// The topology setup file failed validation.
    #[error("malformed topology: {0}")]
    MalformedTopology(String),

    /// A scheduler name did not resolve to a known policy combination.
    #[error("unknown scheduler policy: {0:?}")]
    UnknownPolicy(String),
}

/// An error raised from inside a scheduling policy.
///
/// Caught at the scheduler's tick boundary: the tick is terminated,
/// bookkeeping mutations already applied stand, the error is published
/// on the event bus, and the scheduler stays alive.
#[derive(Debug, Clone, Error)]
#[error("policy {policy}: {reason}")]
pub struct PolicyError {
    /// Name of the failing policy.
    pub policy: &'static str,
    /// Human-readable failure description.
    pub reason: String,
}

impl PolicyError {
    pub fn new(policy: &'static str, reason: impl Into<String>) -> Self {
        PolicyError {
            policy,
            reason: reason.into(),
        }
    }
}

/// An uncaught failure inside a process message handler.
///
/// The kernel logs the fault, terminates the process and its transitive
/// children, and continues dispatching. The kernel itself never dies
/// from a process fault.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct Fault(pub String);

impl Fault {
    pub fn new(reason: impl Into<String>) -> Self {
        Fault(reason.into())
    }
}

impl From<PolicyError> for Fault {
    fn from(e: PolicyError) -> Self {
        Fault(e.to_string())
    }
}
