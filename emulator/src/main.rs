use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use cycler_core::analysis::analyze;
use cycler_core::cycle::ChargeWiring;
use cycler_core::instruments::Channel;
use cycler_core::recorder::PhaseKind;
use cycler_core::spec::{PROFILE_NAMES, by_name, coulombs_to_mah};
use cycler_core::telemetry::ShortDuration;
use cycler_emulator::SimulationConfig;
use tracing::warn;

/// Runs a battery test plan against a simulated cell at virtual time.
#[derive(Parser)]
#[command(name = "cycler-emulator")]
#[command(about = "Simulated charge/discharge cycling", long_about = None)]
struct Cli {
    /// Built-in battery profile.
    #[arg(long, default_value = "lipo-850")]
    profile: String,

    /// Overrides the profile's number of cycles.
    #[arg(long)]
    cycles: Option<u32>,

    /// Overrides both rests, in seconds.
    #[arg(long)]
    rest: Option<u64>,

    /// State of charge the simulated cell starts at.
    #[arg(long, default_value_t = 0.5)]
    initial_soc: f64,

    /// Series resistance of the simulated cell, in ohms.
    #[arg(long, default_value_t = 0.1)]
    resistance: f64,

    /// Wire the charger straight to this channel instead of behind the relay.
    #[arg(long)]
    direct_channel: Option<u8>,

    /// Fail this instrument command (1-based) once.
    #[arg(long)]
    fault_at: Option<usize>,

    /// Simulate an operator stop after this many virtual seconds.
    #[arg(long)]
    stop_after: Option<u64>,

    /// Plain samples between two transcript lines.
    #[arg(long, default_value_t = 60)]
    stride: usize,

    /// Transcript file.
    #[arg(long, default_value = "emulator-transcript.log")]
    transcript: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut spec = by_name(&cli.profile).ok_or_else(|| {
        anyhow!(
            "unknown profile `{}`; expected one of {}",
            cli.profile,
            PROFILE_NAMES.join(", ")
        )
    })?;
    if let Some(cycles) = cli.cycles {
        spec.number_of_cycles = cycles;
    }
    if let Some(rest) = cli.rest {
        spec.rest_charge_to_discharge = Duration::from_secs(rest);
        spec.rest_discharge_to_charge = Duration::from_secs(rest);
    }

    let mut config = SimulationConfig::new(spec);
    config.cell.initial_soc = cli.initial_soc;
    config.cell.resistance = cli.resistance;
    config.fault_at_command = cli.fault_at;
    config.stop_after = cli.stop_after.map(Duration::from_secs);
    config.sample_stride = cli.stride;
    if let Some(channel) = cli.direct_channel {
        config.wiring = ChargeWiring::direct(Channel(channel));
    }

    let file = std::fs::File::create(&cli.transcript)
        .with_context(|| format!("creating {}", cli.transcript.display()))?;
    let outcome = cycler_emulator::run(&config, std::io::BufWriter::new(file))?;

    println!(
        "Run {} after {} ({} of {} cycles)",
        outcome.summary.state,
        ShortDuration(outcome.elapsed()),
        outcome.summary.cycles_completed,
        config.spec.number_of_cycles
    );
    for phase in &outcome.summary.phases {
        let ending = phase
            .termination
            .map_or_else(|| "failed".to_string(), |termination| termination.to_string());
        println!(
            "  {:<5} {:>8} {:>8.1} mAh {:>6} samples  {ending}",
            phase.series.to_string(),
            ShortDuration(phase.duration).to_string(),
            coulombs_to_mah(phase.charge_coulombs),
            phase.samples,
        );
    }
    if let Some(failure) = &outcome.summary.failure {
        warn!(%failure, "run did not complete");
    }
    if let Err(err) = &outcome.summary.shutdown {
        warn!(output = %err.output, error = %err.error, "output did not switch off");
    }

    for (series, samples) in outcome.recorder.iter() {
        if series.phase != PhaseKind::Discharge {
            continue;
        }
        match analyze(samples, config.spec.discharge_current) {
            Ok(analysis) => {
                println!(
                    "{series}: R={:.4} ohm over {} pulses, capacity {:.1} mAh (rate estimate {:.1} mAh)",
                    analysis.nominal_resistance,
                    analysis.pulses_averaged,
                    analysis.capacity_mah(),
                    analysis.rate_capacity_mah()
                );
                println!("{}", analysis.ocv_table);
            }
            Err(err) => warn!(%series, %err, "no analysis"),
        }
    }

    println!("Transcript written to {}", cli.transcript.display());
    Ok(())
}
