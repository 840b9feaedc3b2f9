//! Default eligibility and machine filters.

use super::{MachineFilterPolicy, MachineView, PolicyContext, TaskEligibilityPolicy};
use crate::error::PolicyError;
use crate::types::TaskId;

/// Keep only tasks whose dependencies have all finished.
pub struct ReadyTasksFilter;

impl TaskEligibilityPolicy for ReadyTasksFilter {
    fn name(&self) -> &'static str {
        "READY"
    }

    fn filter(
        &mut self,
        queued: &[TaskId],
        cx: &PolicyContext,
    ) -> Result<Vec<TaskId>, PolicyError> {
        Ok(queued
            .iter()
            .copied()
            .filter(|t| cx.workload.is_ready(*t))
            .collect())
    }
}

/// Keep only machines whose projected free cores fit the task.
pub struct SufficientCoresFilter;

impl MachineFilterPolicy for SufficientCoresFilter {
    fn name(&self) -> &'static str {
        "SUFFICIENT_CORES"
    }

    fn filter(
        &mut self,
        task: TaskId,
        machines: &[MachineView],
        cx: &PolicyContext,
    ) -> Result<Vec<MachineView>, PolicyError> {
        let cores = cx.workload.task(task).cores;
        Ok(machines
            .iter()
            .copied()
            .filter(|m| m.available >= cores)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::view;
    use super::*;
    use crate::workload::{TraceSpec, Workload};
    use std::collections::BTreeMap;

    fn chain() -> Workload {
        Workload::new(
            &TraceSpec::from_json(
                r#"{"jobs": [{"id": 1, "tasks": [
                    {"id": 0, "owner": 1, "flops": 1000, "cores": 2},
                    {"id": 1, "owner": 1, "flops": 1000, "cores": 4, "dependencies": [0]}
                ]}]}"#,
            )
            .unwrap(),
        )
    }

    #[test]
    fn ready_filter_respects_dependencies() {
        let wl = chain();
        let owners = BTreeMap::new();
        let cx = PolicyContext {
            workload: &wl,
            machines: &[],
            running_by_owner: &owners,
        };
        let queued = vec![TaskId(0), TaskId(1)];

        let mut policy = ReadyTasksFilter;
        assert_eq!(policy.filter(&queued, &cx).unwrap(), vec![TaskId(0)]);

        let t = wl.task(TaskId(0));
        t.mark_queued(0);
        t.consume(0, 0);
        t.consume(1, t.remaining());
        assert_eq!(
            policy.filter(&queued, &cx).unwrap(),
            vec![TaskId(0), TaskId(1)]
        );
    }

    #[test]
    fn core_filter_uses_the_projection() {
        let wl = chain();
        let owners = BTreeMap::new();
        let cx = PolicyContext {
            workload: &wl,
            machines: &[],
            running_by_owner: &owners,
        };
        let machines = [view(0, 8, 1), view(1, 8, 2), view(2, 8, 8)];

        let mut policy = SufficientCoresFilter;
        let kept = policy.filter(TaskId(0), &machines, &cx).unwrap();
        let ids: Vec<u32> = kept.iter().map(|m| m.id.0).collect();
        assert_eq!(ids, vec![1, 2]);

        // Empty input stays empty, no error.
        assert!(policy.filter(TaskId(0), &[], &cx).unwrap().is_empty());
    }
}
