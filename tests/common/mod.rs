use fleetsim::SimFormat;

/// Initialize tracing from `RUST_LOG`. `try_init` is idempotent: the
/// first call in the process wins, later calls are ignored.
pub fn setup_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .event_format(SimFormat)
        .try_init();
}

/// Build a one-rack topology JSON from `(cores, clock_rate_mhz)` pairs.
pub fn topology(machines: &[(u32, u64)]) -> String {
    let machines: Vec<String> = machines
        .iter()
        .map(|(cores, clock)| {
            format!(r#"{{"cpus": [{{"clock_rate_mhz": {clock}, "cores": {cores}}}]}}"#)
        })
        .collect();
    format!(
        r#"{{"datacenters": [{{"rooms": [{{"racks": [{{"machines": [{}]}}]}}]}}]}}"#,
        machines.join(",")
    )
}
