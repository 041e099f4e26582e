//! Constant-current discharge with periodic resistance pulses.

use super::{
    CycleEnv, CycleError, CycleReport, STARTUP_SETTLE, SeriesLog, Termination, finalize,
    note_release,
};
use crate::clock::{Clock, SAMPLE_PERIOD, pace};
use crate::instruments::{ControllableLoad, LoadInput, LoadMode, Output};
use crate::monitor::CycleMonitor;
use crate::recorder::{Recorder, SeriesId};
use crate::sample::{Sample, SampleKind, VoltageWindow, pulse_resistance};
use crate::spec::BatterySpec;
use crate::telemetry::{PulseTelemetry, TelemetryEventKind, TelemetryInstant, TelemetryPayload};

/// Drives one discharge phase down to the voltage cutoff.
///
/// Termination looks at the mean of the last
/// [`TERMINATION_WINDOW`](crate::sample::TERMINATION_WINDOW) plain discharge
/// samples, so neither a pulse sag nor a single noisy reading ends the phase.
/// The window is checked before a pulse is considered, which means the phase
/// ends on the sample that pulls the mean below the cutoff.
#[derive(Clone, Debug)]
pub struct DischargeController<'a> {
    spec: &'a BatterySpec,
}

impl<'a> DischargeController<'a> {
    #[must_use]
    pub const fn new(spec: &'a BatterySpec) -> Self {
        Self { spec }
    }

    /// Discharges the cell for `cycle` (1-based) and returns the finalized report.
    pub fn run<L, C, R, M>(
        &self,
        load: &mut L,
        env: &mut CycleEnv<C, R, M>,
        cycle: u32,
    ) -> CycleReport<L::Error, R::Error>
    where
        L: ControllableLoad + ?Sized,
        C: Clock,
        R: Recorder,
        M: CycleMonitor,
    {
        let series = SeriesId::discharge(cycle);
        let mut log = SeriesLog::begin(series, self.spec.nominal_capacity_mah, env.clock.now());
        env.note(
            TelemetryEventKind::PhaseStarted(series),
            TelemetryPayload::none(),
        );

        let mut input = LoadInput::new(load);
        let result = self.discharge(&mut input, env, &mut log);

        let engaged = input.is_engaged();
        let released = input.release();
        if engaged {
            note_release(env, &[Output::Load], &released);
        }

        finalize(env, log, result, released)
    }

    fn discharge<L, C, R, M>(
        &self,
        input: &mut LoadInput<'_, L>,
        env: &mut CycleEnv<C, R, M>,
        log: &mut SeriesLog<C::Instant>,
    ) -> Result<Termination, CycleError<L::Error, R::Error>>
    where
        L: ControllableLoad + ?Sized,
        C: Clock,
        R: Recorder,
        M: CycleMonitor,
    {
        input
            .set_source_mode(LoadMode::ConstantCurrent)
            .map_err(CycleError::Instrument)?;
        input
            .set_source_current(self.spec.discharge_current)
            .map_err(CycleError::Instrument)?;
        input.engage().map_err(CycleError::Instrument)?;
        env.note(
            TelemetryEventKind::OutputEnabled(Output::Load),
            TelemetryPayload::none(),
        );

        let mut last_pulse = env.clock.now();
        log.mark(last_pulse);

        if !env.settle(STARTUP_SETTLE) {
            return Err(CycleError::Interrupted);
        }

        let mut window: VoltageWindow = VoltageWindow::new();
        loop {
            if env.stop_requested() {
                return Err(CycleError::Interrupted);
            }

            let mut started = env.clock.now();
            let voltage = input.measure_voltage().map_err(CycleError::Instrument)?;
            let current = input.measure_current().map_err(CycleError::Instrument)?;
            let now = env.clock.now();
            let nominal = log.record(env, now, voltage, current, SampleKind::Discharge);

            window.push(voltage);
            if window.mean_below(self.spec.discharge_termination_voltage) {
                return Ok(Termination::VoltageCutoff);
            }

            if now.saturating_duration_since(last_pulse) > self.spec.pulse_spacing {
                last_pulse = env.clock.now();
                started = self.pulse(input, env, log, &nominal)?;
            }

            log.flush_if_due(env)?;
            pace(&mut env.clock, started, SAMPLE_PERIOD);
        }
    }

    /// Raises the load to the pulse current, measures, and restores it.
    ///
    /// Charge keeps accumulating at the measured rate in effect for each
    /// interval: nominal up to the pulse start, pulse until the current is
    /// restored. The integration mark ends at the restore so the next plain
    /// sample does not count the pulse again.
    ///
    /// Returns the instant the nominal current was restored; the next plain
    /// sample is paced from there.
    fn pulse<L, C, R, M>(
        &self,
        input: &mut LoadInput<'_, L>,
        env: &mut CycleEnv<C, R, M>,
        log: &mut SeriesLog<C::Instant>,
        nominal: &Sample,
    ) -> Result<C::Instant, CycleError<L::Error, R::Error>>
    where
        L: ControllableLoad + ?Sized,
        C: Clock,
        R: Recorder,
        M: CycleMonitor,
    {
        log.integrate(nominal.current, env.clock.now());
        input
            .set_source_current(self.spec.pulse_discharge_current)
            .map_err(CycleError::Instrument)?;

        if !env.settle(self.spec.pulse_settle_time) {
            return Err(CycleError::Interrupted);
        }

        let pulse_voltage = input.measure_voltage().map_err(CycleError::Instrument)?;
        let pulse_current = input.measure_current().map_err(CycleError::Instrument)?;
        let resistance = pulse_resistance(
            nominal.voltage,
            nominal.current,
            pulse_voltage,
            pulse_current,
        );

        let measured_at = env.clock.now();
        log.record(
            env,
            measured_at,
            pulse_voltage,
            pulse_current,
            SampleKind::DischargePulse(resistance),
        );
        let pulse = PulseTelemetry {
            nominal_voltage: nominal.voltage,
            nominal_current: nominal.current,
            pulse_voltage,
            pulse_current,
            resistance,
        };
        env.note(
            TelemetryEventKind::pulse(log.series(), resistance),
            TelemetryPayload::Pulse(pulse),
        );

        input
            .set_source_current(self.spec.discharge_current)
            .map_err(CycleError::Instrument)?;
        let restored = env.clock.now();
        log.integrate(pulse_current, restored);
        Ok(restored)
    }
}
