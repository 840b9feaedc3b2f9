//! CSV emission for the three output streams.
//!
//! Rows are stream-written into caller-supplied writers; each stream's
//! row id restarts at 0 for every experiment. `finish` flushes all
//! three writers so an orderly shutdown leaves complete files behind.

use std::io::{self, Write};

use crate::experiment::ExperimentResult;

const STAGE_HEADER: &str = "id,experiment,trace,scheduler,stage,tick,cpu,wall,size,iterations";
const TASK_HEADER: &str = "id,experiment,scheduler,waiting,execution,turnaround,job_id,task_id";
const JOB_HEADER: &str =
    "id,experiment,scheduler,job_id,critical_path,critical_path_length,waiting_time,makespan,nsl";

/// Writers for `stage_measurements`, `task_metrics`, and `job_metrics`.
pub struct CsvReports<W: Write> {
    stages: W,
    tasks: W,
    jobs: W,
}

impl<W: Write> CsvReports<W> {
    /// Wrap the three writers and emit the header rows.
    pub fn new(mut stages: W, mut tasks: W, mut jobs: W) -> io::Result<Self> {
        writeln!(stages, "{STAGE_HEADER}")?;
        writeln!(tasks, "{TASK_HEADER}")?;
        writeln!(jobs, "{JOB_HEADER}")?;
        Ok(CsvReports {
            stages,
            tasks,
            jobs,
        })
    }

    /// Append one experiment's rows to all three streams.
    pub fn append(&mut self, result: &ExperimentResult) -> io::Result<()> {
        let exp = result.index;
        let scheduler = result.scheduler.as_str();

        for (id, m) in result.stages.iter().enumerate() {
            writeln!(
                self.stages,
                "{id},{exp},{trace},{scheduler},{stage},{tick},{cpu},{wall},{size},{iters}",
                trace = result.trace,
                stage = m.stage.name(),
                tick = m.tick,
                cpu = m.cpu_ns,
                wall = m.wall_ns,
                size = m.size,
                iters = m.iterations,
            )?;
        }
        for (id, t) in result.tasks.iter().enumerate() {
            writeln!(
                self.tasks,
                "{id},{exp},{scheduler},{waiting},{execution},{turnaround},{job},{task}",
                waiting = t.waiting,
                execution = t.execution,
                turnaround = t.turnaround,
                job = t.job,
                task = t.task,
            )?;
        }
        for (id, j) in result.jobs.iter().enumerate() {
            writeln!(
                self.jobs,
                "{id},{exp},{scheduler},{job},{cp},{cpl},{waiting},{makespan},{nsl}",
                job = j.job,
                cp = j.critical_path,
                cpl = j.critical_path_length,
                waiting = j.waiting_time,
                makespan = j.makespan,
                nsl = j.nsl,
            )?;
        }
        Ok(())
    }

    /// Flush all three streams.
    pub fn finish(mut self) -> io::Result<()> {
        self.stages.flush()?;
        self.tasks.flush()?;
        self.jobs.flush()
    }

    /// Take the underlying writers back (stages, tasks, jobs).
    pub fn into_buffers(self) -> (W, W, W) {
        (self.stages, self.tasks, self.jobs)
    }
}
