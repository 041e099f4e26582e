//! Whole test plans: estimate, run, and report.

use std::fmt::{self, Write as _};

use cycler_core::clock::Clock;
use cycler_core::cycle::{ChargeWiring, CycleEnv};
use cycler_core::instruments::{ControllableLoad, ControllableSource};
use cycler_core::monitor::CycleMonitor;
use cycler_core::orchestrator::{CycleOrchestrator, RunSummary};
use cycler_core::recorder::Recorder;
use cycler_core::spec::{BatterySpec, SpecError, coulombs_to_mah};
use cycler_core::telemetry::ShortDuration;
use tracing::{info, warn};

/// Human-readable runtime estimate for `spec`.
#[must_use]
pub fn describe_estimate(spec: &BatterySpec) -> String {
    let mut text = String::new();
    let _ = writeln!(
        text,
        "{:.0} mAh cell: charge at {:.3} A to {:.2} V until {:.3} A, discharge at {:.3} A to {:.2} V",
        spec.nominal_capacity_mah,
        spec.charge_current,
        spec.charge_voltage,
        spec.charge_termination_current,
        spec.discharge_current,
        spec.discharge_termination_voltage,
    );
    let _ = writeln!(
        text,
        "Pulses of {:.3} A every {} (settle {})",
        spec.pulse_discharge_current,
        ShortDuration(spec.pulse_spacing),
        ShortDuration(spec.pulse_settle_time),
    );
    let _ = write!(
        text,
        "Estimated runtime per cycle: {:.1} hours, total runtime for {} cycle(s): {:.1} hours",
        hours(spec.estimated_cycle_time().as_secs_f64()),
        spec.number_of_cycles,
        hours(spec.estimated_total_time().as_secs_f64()),
    );
    text
}

fn hours(seconds: f64) -> f64 {
    seconds / 3600.0
}

/// Runs every cycle of `spec`, then switches all outputs off.
///
/// Fails only when `spec` is rejected; instrument and recorder failures end
/// up in the returned summary.
pub fn run_plan<S, L, C, R, M, E>(
    spec: &BatterySpec,
    wiring: ChargeWiring,
    source: &mut S,
    load: &mut L,
    env: &mut CycleEnv<C, R, M>,
) -> Result<RunSummary<E, R::Error>, SpecError>
where
    S: ControllableSource<Error = E> + ?Sized,
    L: ControllableLoad<Error = E> + ?Sized,
    C: Clock,
    R: Recorder,
    R::Error: fmt::Display,
    M: CycleMonitor,
    E: fmt::Display,
{
    let mut orchestrator = CycleOrchestrator::new(spec, wiring)?;
    info!(
        cycles = spec.number_of_cycles,
        per_cycle = %ShortDuration(spec.estimated_cycle_time()),
        total = %ShortDuration(spec.estimated_total_time()),
        charger = %wiring.charger,
        relay = wiring.relay.is_some(),
        "starting test plan"
    );

    let summary = orchestrator.run(source, load, env);
    log_summary(&summary);
    Ok(summary)
}

fn log_summary<E, F>(summary: &RunSummary<E, F>)
where
    E: fmt::Display,
    F: fmt::Display,
{
    for phase in &summary.phases {
        let ending = phase
            .termination
            .map_or_else(|| "failed".to_string(), |termination| termination.to_string());
        info!(
            series = %phase.series,
            duration = %ShortDuration(phase.duration),
            samples = phase.samples,
            "{:.1} mAh, {ending}",
            coulombs_to_mah(phase.charge_coulombs)
        );
    }
    if let Some(failure) = &summary.failure {
        warn!(%failure, "run did not complete");
    }
    if let Err(err) = &summary.shutdown {
        warn!(output = %err.output, error = %err.error, "output may still be on; check the bench");
    }
    info!(
        state = %summary.state,
        cycles = summary.cycles_completed,
        "test plan finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use cycler_core::spec::lipo_850mah;

    #[test]
    fn estimate_matches_the_plan() {
        let text = describe_estimate(&lipo_850mah());
        assert!(text.starts_with("850 mAh cell: charge at 0.850 A to 4.20 V until 0.085 A"));
        // 850 mAh at 0.085 A plus 850 mAh at 0.85 A plus two 5 minute rests.
        assert!(
            text.ends_with("per cycle: 11.2 hours, total runtime for 2 cycle(s): 22.3 hours"),
            "{text}"
        );
    }
}
