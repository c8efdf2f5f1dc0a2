use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use kernel_sim::io::loader::load_templates;
use kernel_sim::{Kernel, SchedulerKind, SimConfig};

#[derive(Debug, Parser)]
#[command(name = "kernel-sim", about = "Cycle-driven operating-system simulator", version)]
struct Args {
    /// Directory of workload template files (*.txt).
    #[arg(short, long, default_value = "templates")]
    templates: PathBuf,

    /// Processes to admit per template, in template (file-name) order. A
    /// single value applies to every template.
    #[arg(short = 'n', long, value_delimiter = ',', default_value = "5")]
    processes: Vec<usize>,

    /// Stop after this many cycles even if processes remain.
    #[arg(long)]
    cycles: Option<u64>,

    /// RNG seed; a random seed is drawn when omitted.
    #[arg(long)]
    seed: Option<u64>,

    /// Scheduling policy per core (rr, sjf, mlq).
    #[arg(long, value_delimiter = ',', default_values = ["sjf", "mlq"])]
    policies: Vec<SchedulerKind>,

    /// Worker threads per core.
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Wall-clock pause between cycles, in milliseconds.
    #[arg(long, default_value_t = 2)]
    cycle_delay_ms: u64,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .init();
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let templates = load_templates(&args.templates)
        .with_context(|| format!("loading templates from {:?}", args.templates))?;

    let counts = if args.processes.len() == 1 {
        vec![args.processes[0]; templates.len()]
    } else {
        args.processes.clone()
    };

    let seed = args.seed.unwrap_or_else(rand::random);
    tracing::info!(seed, templates = templates.len(), "workload loaded");

    let config = SimConfig {
        seed,
        core_policies: args.policies,
        workers_per_core: args.workers,
        cycle_delay: Duration::from_millis(args.cycle_delay_ms),
        ..SimConfig::default()
    };

    let mut kernel = Kernel::new(config, templates);
    kernel.set_cycle_limit(args.cycles);
    kernel.boot(&counts).context("booting workload")?;
    kernel.run();
    Ok(())
}
