#![forbid(unsafe_code)]
//! Command-line front end for the aging engine.

use agefs_backend::{BackendDriver, MemoryDriver, PosixDriver};
use agefs_dist::{AgeDistribution, DirDistribution, SizeDistribution};
use agefs_engine::{AgingEngine, EngineConfig};
use agefs_types::AgingTrigger;
use anyhow::{bail, Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

// ── CLI definition ──────────────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "agefs", about = "Filesystem aging workload generator")]
struct Cli {
    /// Disk size in bytes.
    #[arg(short = 'n', long)]
    disk_size: u64,

    /// Target utilization fraction in [0, 1].
    #[arg(short = 'u', long)]
    utilization: f64,

    /// Random seed.
    #[arg(short = 'r', long)]
    seed: u64,

    /// Mount point of the filesystem to age.
    #[arg(short = 'm', long)]
    mount: PathBuf,

    /// Age distribution input file.
    #[arg(short = 'a', long)]
    age_dist: PathBuf,

    /// Size distribution input file.
    #[arg(short = 's', long)]
    size_dist: PathBuf,

    /// Directory-depth distribution input file.
    #[arg(short = 'd', long)]
    dir_dist: PathBuf,

    /// Age distribution output file.
    #[arg(short = 'x', long)]
    age_out: PathBuf,

    /// Size distribution output file.
    #[arg(short = 'y', long)]
    size_out: PathBuf,

    /// Directory-depth distribution output file.
    #[arg(short = 'z', long)]
    dir_out: PathBuf,

    /// Backend I/O worker threads.
    #[arg(short = 't', long, default_value_t = 1)]
    workers: usize,

    /// Aging workload volume, in whole disk overwrites.
    #[arg(short = 'i', long)]
    runs: u64,

    /// Skip backend I/O; run the bookkeeping only.
    #[arg(short = 'f', long)]
    fake: bool,

    /// Inject idle time between operations.
    #[arg(short = 'p', long)]
    idle: bool,

    /// Chi-squared confidence target in [0, 1]; 0 disables the probe.
    #[arg(short = 'c', long, default_value_t = 0.0)]
    confidence: f64,

    /// Ask whether to resume aging when a stop trigger fires.
    #[arg(short = 'q', long)]
    query: bool,

    /// Runtime cap in minutes.
    #[arg(short = 'w', long)]
    max_minutes: f64,

    /// Backend driver: posix or memory.
    #[arg(short = 'b', long, default_value = "posix")]
    backend: String,

    /// Print the final statistics as JSON instead of the text banner.
    #[arg(long)]
    json: bool,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if matches!(
            err.kind(),
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion
        ) =>
        {
            err.exit();
        }
        Err(err) => {
            let _ = err.print();
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(cli) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let sizes = SizeDistribution::load(&cli.size_dist)?;
    let ages = AgeDistribution::load(&cli.age_dist)?;
    let dirs = DirDistribution::load(&cli.dir_dist)?;

    let backend: Arc<dyn BackendDriver> = match cli.backend.as_str() {
        "posix" => Arc::new(PosixDriver::new()),
        "memory" => Arc::new(MemoryDriver::new()),
        other => bail!("unknown backend {other:?} (expected posix or memory)"),
    };

    let config = EngineConfig {
        disk_capacity: cli.disk_size,
        utilization: cli.utilization,
        seed: cli.seed,
        mount_point: cli.mount,
        workers: cli.workers,
        runs: cli.runs,
        fake: cli.fake,
        idle: cli.idle,
        confidence: cli.confidence,
        runtime_max_mins: cli.max_minutes,
        age_out: cli.age_out,
        size_out: cli.size_out,
        dir_out: cli.dir_out,
    };
    let mut engine = AgingEngine::new(config, sizes, ages, dirs, backend)
        .context("failed to initialize the aging engine")?;

    let stop = engine.stop_flag();
    ctrlc::set_handler(move || stop.store(true, Ordering::Relaxed))
        .context("failed to install the interrupt handler")?;

    engine.run_rapid_fill()?;
    loop {
        let trigger = engine.run_stable_aging()?;
        println!("Aging stopped due to {trigger}.");
        if trigger == AgingTrigger::Interrupted {
            break;
        }
        if !cli.query || !resume_prompt(&mut engine)? {
            break;
        }
    }

    engine.write_distribution_tables()?;
    let report = engine.report();
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{report}");
    }
    Ok(())
}

// ── Resume prompt ───────────────────────────────────────────────────────────

fn ask(prompt: &str) -> Result<String> {
    print!("{prompt}");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line)
}

fn ask_parse<T: FromStr>(prompt: &str) -> Result<T> {
    loop {
        let line = ask(prompt)?;
        if let Ok(value) = line.trim().parse() {
            return Ok(value);
        }
        println!("Could not read that; try again.");
    }
}

/// Show where the run stands and ask whether to keep aging. On resume,
/// collect a new confidence level (when probing), a fresh runtime cap,
/// and additional overwrite runs.
fn resume_prompt(engine: &mut AgingEngine) -> Result<bool> {
    println!("=================== Aging trigger fired  =====================");
    match engine.current_goodness() {
        Some(goodness) => println!("Accuracy at this point = {goodness}"),
        None => println!("Perfect convergence mode selected."),
    }
    println!(
        "Number of disk overwrites = {}",
        engine.overwrites_achieved()
    );
    println!("Runtime till now = {} mins.", engine.runtime_mins());

    let resume = loop {
        let line = ask("Do you want to resume aging (y / n): ")?;
        match line.trim() {
            "y" => break true,
            "n" => break false,
            _ => {}
        }
    };
    if !resume {
        return Ok(false);
    }

    println!("==================================================");
    if engine.confidence() > 0.0 {
        println!("Current confidence level set = {}.", engine.confidence());
        let confidence: f64 =
            ask_parse("Enter new confidence level (fraction between 0 and 1): ")?;
        engine.set_confidence(confidence);
    }
    println!("Aging currently ran for {} mins.", engine.runtime_mins());
    let minutes: f64 =
        ask_parse("How many more mins do you want to age if confidence is not met: ")?;
    engine.extend_runtime(minutes);
    let more_runs: u64 = ask_parse("How many more disk overwrites do you want to age for: ")?;
    engine.add_runs(more_runs);
    println!("Happy Aging!!!");
    println!("==================================================");
    Ok(true)
}
