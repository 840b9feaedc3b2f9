//! Post-run metric derivation from the workload's recorded lifecycle.
//!
//! Task metrics cover every finished task; job metrics cover jobs whose
//! tasks all finished. The critical path of a job is the longest chain
//! of actual execution times through its DAG.

use crate::types::{TaskId, Tick};
use crate::workload::Workload;

/// Per-task timing row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskMetric {
    /// Job id as written in the trace file.
    pub job: u64,
    /// Task id as written in the trace file.
    pub task: u64,
    /// Ticks between submission and execution start.
    pub waiting: Tick,
    /// Ticks between execution start and finish.
    pub execution: Tick,
    /// Ticks between submission and finish.
    pub turnaround: Tick,
}

/// Per-job timing row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobMetric {
    pub job: u64,
    /// Virtual-time length of the longest execution chain.
    pub critical_path: Tick,
    /// Node count on that chain.
    pub critical_path_length: u32,
    /// `min(start) − min(submit)` over the job's tasks.
    pub waiting_time: Tick,
    /// `max(finish) − min(submit)` over the job's tasks.
    pub makespan: Tick,
    /// Normalized schedule length: `makespan / critical_path`, floored,
    /// with the critical path clamped to at least 1.
    pub nsl: u64,
}

/// Compute task metrics for all finished tasks, in arena order.
pub fn task_metrics(workload: &Workload) -> Vec<TaskMetric> {
    workload
        .tasks()
        .iter()
        .filter_map(|t| {
            let start = t.start_time()?;
            let finish = t.finish_time()?;
            Some(TaskMetric {
                job: workload.job(t.job).ext_id,
                task: t.ext_id,
                waiting: start - t.submit_time,
                execution: finish - start,
                turnaround: finish - t.submit_time,
            })
        })
        .collect()
}

/// Execution-chain lengths: for each task, the longest chain of actual
/// execution times ending at that task, with the node count alongside.
fn execution_chains(workload: &Workload) -> Vec<Option<(Tick, u32)>> {
    let n = workload.tasks().len();
    let mut chain: Vec<Option<(Tick, u32)>> = vec![None; n];
    let mut done = vec![false; n];
    let mut stack: Vec<usize> = Vec::new();

    for start in 0..n {
        if done[start] {
            continue;
        }
        stack.push(start);
        while let Some(&t) = stack.last() {
            if done[t] {
                stack.pop();
                continue;
            }
            let unresolved: Vec<usize> = workload
                .task(TaskId(t))
                .dependencies()
                .iter()
                .map(|d| d.0)
                .filter(|d| !done[*d])
                .collect();
            if !unresolved.is_empty() {
                stack.extend(unresolved);
                continue;
            }
            let task = workload.task(TaskId(t));
            let value = (|| {
                let duration = task.finish_time()? - task.start_time()?;
                let mut best: (Tick, u32) = (0, 0);
                for dep in task.dependencies() {
                    let (time, len) = chain[dep.0]?;
                    if time > best.0 {
                        best = (time, len);
                    }
                }
                Some((duration + best.0, best.1 + 1))
            })();
            chain[t] = value;
            done[t] = true;
            stack.pop();
        }
    }
    chain
}

/// Compute job metrics for all fully finished jobs, in job order.
pub fn job_metrics(workload: &Workload) -> Vec<JobMetric> {
    let chains = execution_chains(workload);
    workload
        .jobs()
        .iter()
        .filter(|job| workload.job_finished(job.id))
        .map(|job| {
            let mut min_submit = Tick::MAX;
            let mut min_start = Tick::MAX;
            let mut max_finish = 0;
            let mut critical: (Tick, u32) = (0, 0);
            for t in &job.tasks {
                let task = workload.task(*t);
                min_submit = min_submit.min(task.submit_time);
                min_start = min_start.min(task.start_time().expect("job finished"));
                max_finish = max_finish.max(task.finish_time().expect("job finished"));
                let (time, len) = chains[t.0].expect("job finished");
                if time > critical.0 {
                    critical = (time, len);
                }
            }
            let makespan = max_finish - min_submit;
            JobMetric {
                job: job.ext_id,
                critical_path: critical.0,
                critical_path_length: critical.1,
                waiting_time: min_start - min_submit,
                makespan,
                nsl: makespan / critical.0.max(1),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::TraceSpec;

    /// Chain a -> b -> c, executed back to back one tick each.
    fn finished_chain() -> Workload {
        let wl = Workload::new(
            &TraceSpec::from_json(
                r#"{"jobs": [{"id": 7, "tasks": [
                    {"id": 0, "owner": 1, "flops": 1000, "cores": 1},
                    {"id": 1, "owner": 1, "flops": 1000, "cores": 1, "dependencies": [0]},
                    {"id": 2, "owner": 1, "flops": 1000, "cores": 1, "dependencies": [1]}
                ]}]}"#,
            )
            .unwrap(),
        );
        for (i, t) in wl.tasks().iter().enumerate() {
            let start = i as Tick;
            t.mark_queued(0);
            t.consume(start, 0);
            t.consume(start + 1, t.remaining());
        }
        wl
    }

    #[test]
    fn task_rows_for_finished_tasks() {
        let wl = finished_chain();
        let rows = task_metrics(&wl);
        assert_eq!(rows.len(), 3);
        assert_eq!(
            rows[1],
            TaskMetric {
                job: 7,
                task: 1,
                waiting: 1,
                execution: 1,
                turnaround: 2,
            }
        );
    }

    #[test]
    fn critical_path_spans_the_chain() {
        let wl = finished_chain();
        let rows = job_metrics(&wl);
        assert_eq!(rows.len(), 1);
        let job = &rows[0];
        assert_eq!(job.job, 7);
        assert_eq!(job.critical_path, 3);
        assert_eq!(job.critical_path_length, 3);
        assert_eq!(job.waiting_time, 0);
        assert_eq!(job.makespan, 3);
        assert_eq!(job.nsl, 1);
    }

    #[test]
    fn unfinished_jobs_produce_no_rows() {
        let wl = Workload::new(
            &TraceSpec::from_json(
                r#"{"jobs": [{"id": 1, "tasks": [
                    {"id": 0, "owner": 1, "flops": 1000, "cores": 1}
                ]}]}"#,
            )
            .unwrap(),
        );
        assert!(task_metrics(&wl).is_empty());
        assert!(job_metrics(&wl).is_empty());
    }

    #[test]
    fn nsl_floors_and_clamps() {
        // Two parallel tasks: critical path 1 tick, makespan 3 ticks
        // (the second task starts late).
        let wl = Workload::new(
            &TraceSpec::from_json(
                r#"{"jobs": [{"id": 1, "tasks": [
                    {"id": 0, "owner": 1, "flops": 1000, "cores": 1},
                    {"id": 1, "owner": 1, "flops": 1000, "cores": 1}
                ]}]}"#,
            )
            .unwrap(),
        );
        let a = wl.task(TaskId(0));
        a.mark_queued(0);
        a.consume(0, 0);
        a.consume(1, a.remaining());
        let b = wl.task(TaskId(1));
        b.mark_queued(0);
        b.consume(2, 0);
        b.consume(3, b.remaining());

        let job = &job_metrics(&wl)[0];
        assert_eq!(job.critical_path, 1);
        assert_eq!(job.makespan, 3);
        assert_eq!(job.nsl, 3);
    }
}
