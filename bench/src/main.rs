use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use battery_bench::hw::{Dp8xx, Sdl1030x, TcpTransport};
use battery_bench::interrupt::install_ctrl_c;
use battery_bench::{
    BenchConfig, ConsoleMonitor, CsvRecorder, HostClock, RunNaming, StopFlag, describe_estimate,
    read_series, run_plan,
};
use chrono::Local;
use clap::{Parser, Subcommand};
use cycler_core::analysis::analyze;
use cycler_core::cycle::CycleEnv;
use tracing::info;

/// Charge/discharge cycling and characterization of single cells.
#[derive(Parser)]
#[command(name = "battery-bench")]
#[command(about = "Battery cycling on bench instruments", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Built-in battery profile; overrides the configuration file.
    #[arg(long, global = true)]
    profile: Option<String>,

    /// Overrides the number of cycles.
    #[arg(long, global = true)]
    cycles: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Runs the test plan on the configured instruments.
    Run {
        /// Short description of the battery, leading every file name.
        #[arg(long)]
        slug: Option<String>,

        /// Free-form notes stored with the run parameters.
        #[arg(long)]
        annotation: Option<String>,

        /// Directory for the data files.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Prints the resolved parameters and the runtime estimate.
    Estimate,
    /// Extracts resistance, capacity, and an OCV table from a discharge series.
    Analyze {
        /// Discharge CSV written by `run`.
        file: PathBuf,

        /// Nominal discharge rate in amps; defaults to the configured discharge current.
        #[arg(long)]
        rate: Option<f64>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    match cli.command {
        Command::Run {
            slug,
            annotation,
            output,
        } => run(config, slug, annotation, output),
        Command::Estimate => {
            println!("{}", describe_estimate(&config.spec()?));
            Ok(())
        }
        Command::Analyze { file, rate } => analyze_file(&config, &file, rate),
    }
}

fn load_config(cli: &Cli) -> Result<BenchConfig> {
    let mut config = match &cli.config {
        Some(path) => BenchConfig::load(path)?,
        None => BenchConfig::default(),
    };
    if let Some(profile) = &cli.profile {
        config.battery.profile = Some(profile.clone());
    }
    if let Some(cycles) = cli.cycles {
        config.test.number_of_cycles = Some(cycles);
    }
    Ok(config)
}

fn prompt(given: Option<String>, question: &str) -> Result<String> {
    if let Some(answer) = given {
        return Ok(answer);
    }
    print!("{question}: ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("reading from stdin")?;
    Ok(answer.trim().to_string())
}

fn run(
    mut config: BenchConfig,
    slug: Option<String>,
    annotation: Option<String>,
    output: Option<PathBuf>,
) -> Result<()> {
    if let Some(directory) = output {
        config.output.directory = directory;
    }
    let spec = config.spec()?;
    let wiring = config.instruments.wiring()?;
    println!("{}", describe_estimate(&spec));

    let slug = prompt(
        slug,
        "Short description of the battery (starts every file name)",
    )?;
    let annotation = prompt(annotation, "Anything useful for later analysis")?;
    let started = Local::now();
    let recorder = CsvRecorder::new(&config.output.directory, RunNaming::new(&slug, &started));

    let instruments = &config.instruments;
    let options = instruments.transport_options();
    let mut source = Dp8xx::connect(TcpTransport::connect(&instruments.power_supply, options)?)
        .context("connecting to the power supply")?;
    let mut load = Sdl1030x::connect(TcpTransport::connect(&instruments.load, options)?)
        .context("connecting to the load")?;

    let metadata = recorder.write_metadata(&spec, &wiring, &annotation, &started)?;
    info!(path = %metadata.display(), "run parameters saved");

    let stop = StopFlag::new();
    install_ctrl_c(&stop).context("installing the Ctrl-C handler")?;
    let mut env = CycleEnv::new(
        HostClock::new(stop.clone()),
        recorder,
        ConsoleMonitor::stdout(stop),
    );
    let summary = run_plan(&spec, wiring, &mut source, &mut load, &mut env)
        .map_err(|err| anyhow!("invalid battery spec: {err}"))?;

    if !summary.is_success() {
        bail!(
            "run {} after {} of {} cycle(s)",
            summary.state,
            summary.cycles_completed,
            spec.number_of_cycles
        );
    }
    Ok(())
}

fn analyze_file(config: &BenchConfig, file: &Path, rate: Option<f64>) -> Result<()> {
    let samples = read_series(file)?;
    let rate = match rate {
        Some(rate) => rate,
        None => config.spec()?.discharge_current,
    };
    let analysis =
        analyze(&samples, rate).map_err(|err| anyhow!("{}: {err}", file.display()))?;

    println!(
        "Measured resistance: {:.4} ohm (mean of {} mid-run pulses)",
        analysis.nominal_resistance, analysis.pulses_averaged
    );
    println!("Capacity: {:.1} mAh", analysis.capacity_mah());
    println!(
        "Capacity from rate and duration: {:.1} mAh",
        analysis.rate_capacity_mah()
    );
    println!("{}", analysis.ocv_table);
    Ok(())
}
