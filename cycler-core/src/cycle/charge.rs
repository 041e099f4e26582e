//! Constant-voltage, current-limited charging.

use alloc::vec::Vec;
use core::time::Duration;

use super::{
    CHARGE_SAFETY_TIMEOUT, CycleEnv, CycleError, CycleReport, STARTUP_SETTLE, SeriesLog,
    Termination, finalize, note_release,
};
use crate::clock::{Clock, SAMPLE_PERIOD, pace};
use crate::instruments::{Channel, ControllableSource, Output, SourceOutputs};
use crate::monitor::CycleMonitor;
use crate::recorder::{Recorder, SeriesId};
use crate::sample::SampleKind;
use crate::spec::BatterySpec;
use crate::telemetry::{TelemetryEventKind, TelemetryPayload};

/// Supply channel that drives the isolation relay coil.
///
/// The supply leaks current through a nominally disabled output. The relay
/// disconnects the charger from the cell so that leakage does not bias the
/// discharge that follows.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RelayWiring {
    pub channel: Channel,
    pub voltage: f64,
    pub current: f64,
    /// Time for the contacts to close before charging starts.
    pub settle: Duration,
}

/// Default relay: a 12 V coil on channel 1.
pub const DEFAULT_RELAY: RelayWiring = RelayWiring {
    channel: Channel::CH1,
    voltage: 12.0,
    current: 1.0,
    settle: Duration::from_secs(1),
};

/// How the cell is connected to the power supply.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ChargeWiring {
    pub charger: Channel,
    pub relay: Option<RelayWiring>,
}

impl ChargeWiring {
    /// Charger on channel 2 behind the default relay.
    #[must_use]
    pub const fn isolated() -> Self {
        Self {
            charger: Channel::CH2,
            relay: Some(DEFAULT_RELAY),
        }
    }

    /// Charger wired straight to the cell.
    #[must_use]
    pub const fn direct(charger: Channel) -> Self {
        Self {
            charger,
            relay: None,
        }
    }

    /// Every supply channel this wiring may switch on, relay first.
    pub fn channels(&self) -> impl Iterator<Item = Channel> + use<> {
        self.relay
            .map(|relay| relay.channel)
            .into_iter()
            .chain(core::iter::once(self.charger))
    }
}

impl Default for ChargeWiring {
    fn default() -> Self {
        Self::isolated()
    }
}

/// Drives one charge phase to current cutoff or the safety ceiling.
#[derive(Clone, Debug)]
pub struct ChargeController<'a> {
    spec: &'a BatterySpec,
    wiring: ChargeWiring,
    safety_timeout: Duration,
}

impl<'a> ChargeController<'a> {
    #[must_use]
    pub const fn new(spec: &'a BatterySpec, wiring: ChargeWiring) -> Self {
        Self {
            spec,
            wiring,
            safety_timeout: CHARGE_SAFETY_TIMEOUT,
        }
    }

    /// Overrides the safety ceiling.
    #[must_use]
    pub const fn with_safety_timeout(mut self, timeout: Duration) -> Self {
        self.safety_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn wiring(&self) -> &ChargeWiring {
        &self.wiring
    }

    /// Charges the cell for `cycle` (1-based) and returns the finalized report.
    ///
    /// Outputs switched on here are switched off again before this returns,
    /// and the series is written once more, whatever the outcome.
    pub fn run<S, C, R, M>(
        &self,
        source: &mut S,
        env: &mut CycleEnv<C, R, M>,
        cycle: u32,
    ) -> CycleReport<S::Error, R::Error>
    where
        S: ControllableSource + ?Sized,
        C: Clock,
        R: Recorder,
        M: CycleMonitor,
    {
        let series = SeriesId::charge(cycle);
        let mut log = SeriesLog::begin(series, self.spec.nominal_capacity_mah, env.clock.now());
        env.note(
            TelemetryEventKind::PhaseStarted(series),
            TelemetryPayload::none(),
        );

        let mut outputs = SourceOutputs::new(source);
        let result = self.charge(&mut outputs, env, &mut log);

        let enabled: Vec<Output> = outputs
            .enabled()
            .iter()
            .map(|channel| Output::Source(*channel))
            .collect();
        let released = outputs.release();
        note_release(env, &enabled, &released);

        finalize(env, log, result, released)
    }

    fn charge<S, C, R, M>(
        &self,
        outputs: &mut SourceOutputs<'_, S>,
        env: &mut CycleEnv<C, R, M>,
        log: &mut SeriesLog<C::Instant>,
    ) -> Result<Termination, CycleError<S::Error, R::Error>>
    where
        S: ControllableSource + ?Sized,
        C: Clock,
        R: Recorder,
        M: CycleMonitor,
    {
        let charger = self.wiring.charger;
        outputs
            .set_voltage(charger, self.spec.charge_voltage)
            .map_err(CycleError::Instrument)?;
        outputs
            .set_current(charger, self.spec.charge_current)
            .map_err(CycleError::Instrument)?;

        if let Some(relay) = self.wiring.relay {
            outputs
                .set_voltage(relay.channel, relay.voltage)
                .map_err(CycleError::Instrument)?;
            outputs
                .set_current(relay.channel, relay.current)
                .map_err(CycleError::Instrument)?;
            outputs
                .enable(relay.channel)
                .map_err(CycleError::Instrument)?;
            env.note(
                TelemetryEventKind::OutputEnabled(Output::Source(relay.channel)),
                TelemetryPayload::none(),
            );
            if !env.settle(relay.settle) {
                return Err(CycleError::Interrupted);
            }
        }

        outputs.enable(charger).map_err(CycleError::Instrument)?;
        env.note(
            TelemetryEventKind::OutputEnabled(Output::Source(charger)),
            TelemetryPayload::none(),
        );
        log.mark(env.clock.now());

        if !env.settle(STARTUP_SETTLE) {
            return Err(CycleError::Interrupted);
        }

        loop {
            if env.stop_requested() {
                return Err(CycleError::Interrupted);
            }

            let started = env.clock.now();
            let reading = outputs
                .measure_all(charger)
                .map_err(CycleError::Instrument)?;
            let now = env.clock.now();
            log.record(
                env,
                now,
                reading.voltage,
                reading.current,
                SampleKind::Charging,
            );

            if reading.current < self.spec.charge_termination_current {
                return Ok(Termination::CurrentCutoff);
            }

            if log.elapsed(now) >= self.safety_timeout {
                return Ok(Termination::SafetyTimeout);
            }

            log.flush_if_due(env)?;
            pace(&mut env.clock, started, SAMPLE_PERIOD);
        }
    }
}
