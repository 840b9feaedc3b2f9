//! fleetsim - Deterministic discrete-event simulator for datacenter
//! workflow scheduling.
//!
//! Dependent-task workloads ("workflows") execute over a modeled fleet
//! of machines under pluggable scheduling policies; the simulator emits
//! per-task, per-job, and per-scheduling-stage measurements.
//!
//! # Architecture
//!
//! - **Kernel**: single-threaded virtual-time event loop driving
//!   cooperatively-suspending processes with strict `(time, seq)`
//!   delivery order
//! - **Processes**: scheduler, one per machine, an event bus, plus the
//!   experiment's feeder and measurement collector
//! - **Policies**: task eligibility/sort and machine filter/select
//!   seams, built by name (e.g. `"SRTF-BESTFIT"`)
//! - **Outputs**: stage measurements, task metrics, job metrics as CSV
//!
//! # Usage
//!
//! ```no_run
//! use fleetsim::{plan_experiments, run_experiment, TraceSpec};
//! use fleetsim::topology::fleet_from_json;
//!
//! let trace = TraceSpec::from_json(r#"{"jobs": [{"id": 1, "tasks": [
//!     {"id": 0, "owner": 1, "flops": 4000, "cores": 1}
//! ]}]}"#).unwrap();
//! let fleet = fleet_from_json(r#"{"datacenters": [{"rooms": [{"racks": [
//!     {"machines": [{"cpus": [{"clock_rate_mhz": 1000, "cores": 4}]}]}
//! ]}]}]}"#).unwrap();
//!
//! let plans = plan_experiments(&["FIFO-FIRSTFIT".into()], 1, 0, 42, 1_000_000);
//! let result = run_experiment(&trace, &fleet, &plans[0]).unwrap();
//! assert_eq!(result.tasks.len(), 1);
//! ```

pub mod bus;
pub mod error;
pub mod experiment;
pub mod fmt;
pub mod journal;
pub mod kernel;
pub mod machine;
pub mod message;
pub mod metrics;
pub mod policy;
pub mod process;
mod queue;
pub mod report;
pub mod scheduler;
pub mod stage;
pub mod topology;
pub mod types;
pub mod workload;

// Re-exports for convenience.
pub use bus::BusProc;
pub use error::{Fault, PolicyError, SimError};
pub use experiment::{
    plan_experiments, run_all, run_experiment, ExperimentPlan, ExperimentResult, Outcome,
};
pub use fmt::{sim_clock, FmtN, FmtTick, SimFormat};
pub use journal::{Journal, JournalEntry, JournalKind};
pub use kernel::{Kernel, ProcessCtx};
pub use machine::{MachineHandle, MachineProc, MachineStatus};
pub use message::{BusEvent, Msg};
pub use metrics::{job_metrics, task_metrics, JobMetric, TaskMetric};
pub use policy::{MachineView, PolicyContext, PolicySet};
pub use process::{Process, Step};
pub use report::CsvReports;
pub use scheduler::SchedulerProc;
pub use stage::{Stage, StageAccumulator, StageMeasurement};
pub use topology::{fleet_from_json, MachineDescriptor};
pub use types::{Flops, JobId, MachineId, OwnerId, ProcId, TaskId, Tick};
pub use workload::{Task, TaskSpec, TaskState, TraceSpec, Workload};
