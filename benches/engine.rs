//! Microbenchmarks for the hot engine paths.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

use fleetsim::topology::fleet_from_json;
use fleetsim::{plan_experiments, run_experiment, TraceSpec};

fn trace(tasks: usize) -> TraceSpec {
    let tasks: Vec<String> = (0..tasks)
        .map(|i| {
            format!(
                r#"{{"id": {i}, "owner": {owner}, "flops": {flops}, "cores": 1, "submit_time": {submit}}}"#,
                owner = i % 8,
                flops = 1000 + (i % 7) as u64 * 500,
                submit = i / 32,
            )
        })
        .collect();
    TraceSpec::from_json(&format!(
        r#"{{"jobs": [{{"id": 1, "tasks": [{}]}}]}}"#,
        tasks.join(",")
    ))
    .unwrap()
}

fn topology(machines: usize) -> String {
    let machines: Vec<String> = (0..machines)
        .map(|_| r#"{"cpus": [{"clock_rate_mhz": 1000, "cores": 8}]}"#.to_string())
        .collect();
    format!(
        r#"{{"datacenters": [{{"rooms": [{{"racks": [{{"machines": [{}]}}]}}]}}]}}"#,
        machines.join(",")
    )
}

fn bench_experiment(c: &mut Criterion) {
    let trace = trace(512);
    let fleet = fleet_from_json(&topology(16)).unwrap();
    let plans = plan_experiments(&["FIFO-FIRSTFIT".to_string()], 1, 0, 42, 1_000_000);

    c.bench_function("experiment_512_tasks_16_machines", |b| {
        b.iter_batched(
            || plans[0].clone(),
            |plan| run_experiment(&trace, &fleet, &plan).unwrap(),
            BatchSize::SmallInput,
        )
    });
}

fn bench_sorting_heavy(c: &mut Criterion) {
    let trace = trace(512);
    let fleet = fleet_from_json(&topology(16)).unwrap();
    let plans = plan_experiments(&["SRTF-BESTFIT".to_string()], 1, 0, 42, 1_000_000);

    c.bench_function("experiment_srtf_bestfit", |b| {
        b.iter_batched(
            || plans[0].clone(),
            |plan| run_experiment(&trace, &fleet, &plan).unwrap(),
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_experiment, bench_sorting_heavy);
criterion_main!(benches);
