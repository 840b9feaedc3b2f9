//! Per-stage cost measurement for the scheduling pipeline.
//!
//! Each scheduling tick is bracketed by `start`/`finish`; every pipeline
//! stage runs inside `run(stage, size, f)`, which measures the block's
//! wall time and thread CPU time. Re-running a stage within one tick
//! (the per-task machine filter/select loop) accumulates cpu, wall, and
//! size and bumps the iteration count. `finish` yields one measurement
//! per touched stage plus a `total` record carrying the tick's
//! unattributed overhead.

use std::time::Instant;

use crate::types::Tick;

/// A pipeline stage, named for what it does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    UpdateCaches,
    TaskEligibility,
    TaskSort,
    MachineFilter,
    MachineSelect,
    Total,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::UpdateCaches => "update_caches",
            Stage::TaskEligibility => "task_eligibility",
            Stage::TaskSort => "task_sort",
            Stage::MachineFilter => "machine_filter",
            Stage::MachineSelect => "machine_select",
            Stage::Total => "total",
        }
    }
}

/// One stage's accumulated cost for one scheduling tick.
#[derive(Debug, Clone)]
pub struct StageMeasurement {
    pub stage: Stage,
    /// Virtual time of the tick this measurement belongs to.
    pub tick: Tick,
    /// Thread CPU time spent in the stage, in host nanoseconds.
    pub cpu_ns: u64,
    /// Wall time spent in the stage, in host nanoseconds.
    pub wall_ns: u64,
    /// Total input size across iterations.
    pub size: u64,
    /// How many times the stage ran this tick.
    pub iterations: u32,
}

/// CPU time of the calling thread, in nanoseconds.
///
/// Observational only; never feeds back into virtual-time ordering.
fn thread_cpu_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_THREAD_CPUTIME_ID, &mut ts) };
    if rc == 0 {
        ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64
    } else {
        0
    }
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    cpu_ns: u64,
    wall_ns: u64,
    size: u64,
    iterations: u32,
}

/// Accumulates stage costs for one invocation of the pipeline.
pub struct StageAccumulator {
    tick: Tick,
    entries: Vec<(Stage, Entry)>,
    opened: Option<(Instant, u64)>,
}

impl StageAccumulator {
    /// Begin measuring a tick at the given virtual time.
    pub fn start(tick: Tick) -> Self {
        StageAccumulator {
            tick,
            entries: Vec::new(),
            opened: Some((Instant::now(), thread_cpu_ns())),
        }
    }

    /// Run `f` as `stage`, accumulating its cost.
    pub fn run<R>(&mut self, stage: Stage, size: u64, f: impl FnOnce() -> R) -> R {
        let wall_start = Instant::now();
        let cpu_start = thread_cpu_ns();
        let out = f();
        let cpu = thread_cpu_ns().saturating_sub(cpu_start);
        let wall = wall_start.elapsed().as_nanos() as u64;

        match self.entries.iter_mut().find(|(s, _)| *s == stage) {
            Some((_, e)) => {
                e.cpu_ns += cpu;
                e.wall_ns += wall;
                e.size += size;
                e.iterations += 1;
            }
            None => self.entries.push((
                stage,
                Entry {
                    cpu_ns: cpu,
                    wall_ns: wall,
                    size,
                    iterations: 1,
                },
            )),
        }
        out
    }

    /// Close the tick. Returns a measurement per touched stage, in first-
    /// run order, with a final `total` record holding the overhead not
    /// attributed to any stage.
    pub fn finish(mut self) -> Vec<StageMeasurement> {
        let (wall_start, cpu_start) = self.opened.take().expect("accumulator already finished");
        let total_cpu = thread_cpu_ns().saturating_sub(cpu_start);
        let total_wall = wall_start.elapsed().as_nanos() as u64;

        let attributed_cpu: u64 = self.entries.iter().map(|(_, e)| e.cpu_ns).sum();
        let attributed_wall: u64 = self.entries.iter().map(|(_, e)| e.wall_ns).sum();

        let tick = self.tick;
        let mut out: Vec<StageMeasurement> = self
            .entries
            .iter()
            .map(|(stage, e)| StageMeasurement {
                stage: *stage,
                tick,
                cpu_ns: e.cpu_ns,
                wall_ns: e.wall_ns,
                size: e.size,
                iterations: e.iterations,
            })
            .collect();
        out.push(StageMeasurement {
            stage: Stage::Total,
            tick,
            cpu_ns: total_cpu.saturating_sub(attributed_cpu),
            wall_ns: total_wall.saturating_sub(attributed_wall),
            size: 0,
            iterations: 1,
        });
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_stages_accumulate() {
        let mut acc = StageAccumulator::start(7);
        acc.run(Stage::MachineFilter, 3, || {});
        acc.run(Stage::MachineSelect, 3, || {});
        acc.run(Stage::MachineFilter, 2, || {});
        let out = acc.finish();

        let filter = out
            .iter()
            .find(|m| m.stage == Stage::MachineFilter)
            .unwrap();
        assert_eq!(filter.iterations, 2);
        assert_eq!(filter.size, 5);
        assert_eq!(filter.tick, 7);

        let select = out
            .iter()
            .find(|m| m.stage == Stage::MachineSelect)
            .unwrap();
        assert_eq!(select.iterations, 1);
    }

    #[test]
    fn finish_appends_total_record() {
        let mut acc = StageAccumulator::start(0);
        acc.run(Stage::UpdateCaches, 1, || {});
        let out = acc.finish();
        assert_eq!(out.last().unwrap().stage, Stage::Total);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn stage_order_is_first_run_order() {
        let mut acc = StageAccumulator::start(0);
        acc.run(Stage::TaskSort, 1, || {});
        acc.run(Stage::TaskEligibility, 1, || {});
        acc.run(Stage::TaskSort, 1, || {});
        let stages: Vec<Stage> = acc.finish().iter().map(|m| m.stage).collect();
        assert_eq!(
            stages,
            vec![Stage::TaskSort, Stage::TaskEligibility, Stage::Total]
        );
    }

    #[test]
    fn run_returns_the_block_value() {
        let mut acc = StageAccumulator::start(0);
        let v = acc.run(Stage::TaskSort, 0, || 41 + 1);
        assert_eq!(v, 42);
    }
}
