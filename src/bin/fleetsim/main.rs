//! fleetsim - Run workflow scheduling simulations over a modeled fleet.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;

use fleetsim::topology::fleet_from_json;
use fleetsim::{
    plan_experiments, run_all, CsvReports, Outcome, PolicySet, SimFormat, TraceSpec,
};

/// Run workflow scheduling simulations over a modeled fleet.
#[derive(Parser)]
#[command(name = "fleetsim", version)]
struct Cli {
    /// Path to a JSON workload trace.
    trace: PathBuf,

    /// Topology setup file.
    #[arg(long, value_name = "PATH")]
    setup: PathBuf,

    /// Schedulers to evaluate: SORT-SELECT (e.g. SRTF-BESTFIT,
    /// FIFO-LOTTERY) or a single-name scheduler (HEFT, CPOP, FCP, DS).
    #[arg(long = "schedulers", num_args = 1.., default_value = "FIFO-FIRSTFIT")]
    schedulers: Vec<String>,

    /// Measured runs per scheduler.
    #[arg(long, default_value_t = 1)]
    repeat: u32,

    /// Discarded warmup runs per scheduler.
    #[arg(long, default_value_t = 0)]
    warmup: u32,

    /// Worker threads for independent experiments (default: host cores).
    #[arg(long)]
    parallelism: Option<usize>,

    /// Directory for the three CSV output streams.
    #[arg(long, default_value = "results")]
    output: PathBuf,

    /// Simulation horizon in ticks. Experiments still holding work at
    /// the horizon are recorded as aborted.
    #[arg(long, default_value_t = u64::MAX)]
    horizon: u64,

    /// Seed for randomized policies.
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Print every experiment's journal to stderr.
    #[arg(long)]
    dump_journal: bool,
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    if let Err(e) = run(&cli) {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    // Fail fast on unknown scheduler names before any simulation runs.
    for name in &cli.schedulers {
        PolicySet::parse(name, cli.seed)
            .with_context(|| format!("--schedulers {name}"))?;
    }

    let setup = fs::read_to_string(&cli.setup)
        .with_context(|| format!("failed to read {}", cli.setup.display()))?;
    let fleet = fleet_from_json(&setup)?;

    let trace_text = fs::read_to_string(&cli.trace)
        .with_context(|| format!("failed to read {}", cli.trace.display()))?;
    let mut trace = TraceSpec::from_json(&trace_text)?;
    if let Some(stem) = cli.trace.file_stem().and_then(|s| s.to_str()) {
        trace.name = stem.to_string();
    }

    if cli.repeat == 0 {
        bail!("--repeat must be at least 1");
    }
    let parallelism = cli.parallelism.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    });

    let plans = plan_experiments(
        &cli.schedulers,
        cli.repeat,
        cli.warmup,
        cli.seed,
        cli.horizon,
    );
    let total = plans.len();
    let results = run_all(&trace, &fleet, plans, parallelism)?;

    fs::create_dir_all(&cli.output)
        .with_context(|| format!("failed to create {}", cli.output.display()))?;
    let open = |name: &str| -> Result<BufWriter<File>> {
        let path = cli.output.join(name);
        Ok(BufWriter::new(File::create(&path).with_context(|| {
            format!("failed to create {}", path.display())
        })?))
    };
    let mut reports = CsvReports::new(
        open("stage_measurements.csv")?,
        open("task_metrics.csv")?,
        open("job_metrics.csv")?,
    )?;

    let mut aborted = 0usize;
    for result in &results {
        if cli.dump_journal {
            eprintln!(
                "--- experiment {} ({}{}) ---",
                result.index,
                result.scheduler,
                if result.warmup { ", warmup" } else { "" }
            );
            result.journal.dump();
        }
        if result.warmup {
            continue;
        }
        if result.outcome == Outcome::Aborted {
            aborted += 1;
        }
        reports.append(result)?;
    }
    reports.finish()?;

    eprintln!(
        "{total} experiments ({aborted} aborted), reports written to {}",
        cli.output.display()
    );
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .event_format(SimFormat)
        .try_init();
}
