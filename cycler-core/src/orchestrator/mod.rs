//! Sequencing of charge and discharge phases across a run.
//!
//! The orchestrator owns nothing but bookkeeping: the instruments, clock,
//! recorder, and monitor are borrowed for the duration of [`run`]. Each phase
//! is gated on the previous one succeeding. Whatever state the run ends in,
//! every output the wiring knows about is switched off before returning.
//!
//! [`run`]: CycleOrchestrator::run

use alloc::vec::Vec;
use core::fmt;
use core::time::Duration;

use crate::clock::Clock;
use crate::cycle::{
    ChargeController, ChargeWiring, CycleEnv, CycleError, CycleOutcome, CycleReport,
    DischargeController,
};
use crate::instruments::{ControllableLoad, ControllableSource, Output, ReleaseError};
use crate::monitor::CycleMonitor;
use crate::recorder::{Recorder, SeriesId};
use crate::spec::{BatterySpec, SpecError};
use crate::telemetry::{PhaseTelemetry, TelemetryEventKind, TelemetryPayload};

/// Position of the run in the charge, rest, discharge, rest sequence.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OrchestratorState {
    Charging,
    RestingToDischarge,
    Discharging,
    RestingToCharge,
    /// Every cycle completed.
    Done,
    /// A phase failed or the operator stopped the run.
    Aborted,
}

impl OrchestratorState {
    /// Returns `true` when the orchestrator has reached a terminal state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OrchestratorState::Charging => "charging",
            OrchestratorState::RestingToDischarge => "resting-to-discharge",
            OrchestratorState::Discharging => "discharging",
            OrchestratorState::RestingToCharge => "resting-to-charge",
            OrchestratorState::Done => "done",
            OrchestratorState::Aborted => "aborted",
        };
        f.write_str(label)
    }
}

/// Why a run stopped before completing every cycle.
#[derive(Debug, PartialEq)]
pub enum RunFailure<E, F> {
    /// A charge or discharge phase reported failure.
    Phase {
        series: SeriesId,
        error: CycleError<E, F>,
    },
    /// The operator stopped the run between phases.
    InterruptedDuringRest,
}

impl<E, F> fmt::Display for RunFailure<E, F>
where
    E: fmt::Display,
    F: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunFailure::Phase { series, error } => write!(f, "{series} failed: {error}"),
            RunFailure::InterruptedDuringRest => f.write_str("interrupted during rest"),
        }
    }
}

/// Outcome of a whole run.
#[derive(Debug)]
pub struct RunSummary<E, F> {
    pub state: OrchestratorState,
    pub cycles_completed: u32,
    /// One entry per phase that ran, in order.
    pub phases: Vec<PhaseTelemetry>,
    pub failure: Option<RunFailure<E, F>>,
    /// Result of the final switch-off of every output.
    pub shutdown: Result<(), ReleaseError<E>>,
}

impl<E, F> RunSummary<E, F> {
    /// Returns `true` when every cycle completed and every output switched off.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.state, OrchestratorState::Done) && self.shutdown.is_ok()
    }
}

/// Runs `number_of_cycles` repetitions of charge, rest, discharge, rest.
#[derive(Clone, Debug)]
pub struct CycleOrchestrator<'a> {
    spec: &'a BatterySpec,
    charge: ChargeController<'a>,
    discharge: DischargeController<'a>,
    state: OrchestratorState,
    cycle: u32,
    cycles_completed: u32,
}

impl<'a> CycleOrchestrator<'a> {
    /// Validates `spec` and prepares a run starting with the first charge.
    ///
    /// # Errors
    ///
    /// Returns the [`SpecError`] from [`BatterySpec::validate`].
    pub fn new(spec: &'a BatterySpec, wiring: ChargeWiring) -> Result<Self, SpecError> {
        spec.validate()?;
        Ok(Self::with_controllers(
            spec,
            ChargeController::new(spec, wiring),
            DischargeController::new(spec),
        ))
    }

    /// Uses pre-built controllers, for example with a shorter charge ceiling.
    ///
    /// `spec` is used as given, without validation.
    #[must_use]
    pub const fn with_controllers(
        spec: &'a BatterySpec,
        charge: ChargeController<'a>,
        discharge: DischargeController<'a>,
    ) -> Self {
        Self {
            spec,
            charge,
            discharge,
            state: OrchestratorState::Charging,
            cycle: 1,
            cycles_completed: 0,
        }
    }

    #[must_use]
    pub const fn state(&self) -> OrchestratorState {
        self.state
    }

    /// 1-based cycle currently in progress.
    #[must_use]
    pub const fn cycle(&self) -> u32 {
        self.cycle
    }

    #[must_use]
    pub const fn cycles_completed(&self) -> u32 {
        self.cycles_completed
    }

    /// Runs every remaining step, then switches all outputs off.
    pub fn run<S, L, C, R, M, E>(
        &mut self,
        source: &mut S,
        load: &mut L,
        env: &mut CycleEnv<C, R, M>,
    ) -> RunSummary<E, R::Error>
    where
        S: ControllableSource<Error = E> + ?Sized,
        L: ControllableLoad<Error = E> + ?Sized,
        C: Clock,
        R: Recorder,
        M: CycleMonitor,
    {
        let started = env.clock.now();
        env.note(TelemetryEventKind::RunStarted, TelemetryPayload::none());

        let mut phases = Vec::new();
        let mut failure = None;
        while !self.state.is_terminal() {
            if let Some(reason) = self.step(source, load, env, &mut phases) {
                failure = Some(reason);
            }
        }

        let shutdown = self.shutdown(source, load, env);
        env.telemetry.record_run_completion(
            self.state == OrchestratorState::Aborted,
            self.cycles_completed,
            Some(started),
            env.clock.now(),
        );
        if let Some(record) = env.telemetry.latest().copied() {
            env.monitor.event(record.event, &record.details);
        }

        RunSummary {
            state: self.state,
            cycles_completed: self.cycles_completed,
            phases,
            failure,
            shutdown,
        }
    }

    /// Advances the state machine by one phase or rest.
    ///
    /// Returns the failure that moved the run to [`OrchestratorState::Aborted`], if any.
    pub fn step<S, L, C, R, M, E>(
        &mut self,
        source: &mut S,
        load: &mut L,
        env: &mut CycleEnv<C, R, M>,
        phases: &mut Vec<PhaseTelemetry>,
    ) -> Option<RunFailure<E, R::Error>>
    where
        S: ControllableSource<Error = E> + ?Sized,
        L: ControllableLoad<Error = E> + ?Sized,
        C: Clock,
        R: Recorder,
        M: CycleMonitor,
    {
        match self.state {
            OrchestratorState::Charging => {
                let report = self.charge.run(source, env, self.cycle);
                self.advance(report, phases, OrchestratorState::RestingToDischarge)
            }
            OrchestratorState::RestingToDischarge => {
                self.rest(env, self.spec.rest_charge_to_discharge, OrchestratorState::Discharging)
            }
            OrchestratorState::Discharging => {
                let report = self.discharge.run(load, env, self.cycle);
                let failure = self.advance(report, phases, OrchestratorState::RestingToCharge);
                if failure.is_none() {
                    self.cycles_completed += 1;
                }
                failure
            }
            OrchestratorState::RestingToCharge => {
                let next = if self.cycle >= self.spec.number_of_cycles {
                    OrchestratorState::Done
                } else {
                    OrchestratorState::Charging
                };
                let failure = self.rest(env, self.spec.rest_discharge_to_charge, next);
                if self.state == OrchestratorState::Charging {
                    self.cycle += 1;
                }
                failure
            }
            OrchestratorState::Done | OrchestratorState::Aborted => None,
        }
    }

    fn advance<E, F>(
        &mut self,
        report: CycleReport<E, F>,
        phases: &mut Vec<PhaseTelemetry>,
        next: OrchestratorState,
    ) -> Option<RunFailure<E, F>> {
        phases.push(report.telemetry());
        let series = report.series;
        match report.outcome {
            CycleOutcome::Completed(_) => {
                self.state = next;
                None
            }
            CycleOutcome::Failed(error) => {
                self.state = OrchestratorState::Aborted;
                Some(RunFailure::Phase { series, error })
            }
        }
    }

    fn rest<C, R, M, E, F>(
        &mut self,
        env: &mut CycleEnv<C, R, M>,
        duration: Duration,
        next: OrchestratorState,
    ) -> Option<RunFailure<E, F>>
    where
        C: Clock,
        R: Recorder,
        M: CycleMonitor,
    {
        env.note(TelemetryEventKind::RestStarted, TelemetryPayload::Rest(duration));
        if env.settle(duration) {
            self.state = next;
            None
        } else {
            self.state = OrchestratorState::Aborted;
            Some(RunFailure::InterruptedDuringRest)
        }
    }

    /// Switches off the relay, the charger, and the load, attempting each.
    fn shutdown<S, L, C, R, M, E>(
        &self,
        source: &mut S,
        load: &mut L,
        env: &mut CycleEnv<C, R, M>,
    ) -> Result<(), ReleaseError<E>>
    where
        S: ControllableSource<Error = E> + ?Sized,
        L: ControllableLoad<Error = E> + ?Sized,
        C: Clock,
        R: Recorder,
        M: CycleMonitor,
    {
        let mut results: Vec<(Output, Result<(), E>)> = Vec::new();
        for channel in self.charge.wiring().channels() {
            results.push((Output::Source(channel), source.set_output(channel, false)));
        }
        results.push((Output::Load, load.set_source_state(false)));

        let mut first_error = None;
        for (output, result) in results {
            match result {
                Ok(()) => {
                    env.note(
                        TelemetryEventKind::OutputReleased(output),
                        TelemetryPayload::none(),
                    );
                }
                Err(error) => {
                    env.note(
                        TelemetryEventKind::ReleaseFailed(output),
                        TelemetryPayload::none(),
                    );
                    first_error.get_or_insert(ReleaseError { output, error });
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::lipo_850mah;

    #[test]
    fn rejects_invalid_spec() {
        let mut spec = lipo_850mah();
        spec.number_of_cycles = 0;
        assert_eq!(
            CycleOrchestrator::new(&spec, ChargeWiring::isolated()).map(|o| o.state()),
            Err(SpecError::NoCycles)
        );
    }

    #[test]
    fn starts_charging_first_cycle() {
        let spec = lipo_850mah();
        let orchestrator =
            CycleOrchestrator::new(&spec, ChargeWiring::isolated()).expect("valid spec");
        assert_eq!(orchestrator.state(), OrchestratorState::Charging);
        assert_eq!(orchestrator.cycle(), 1);
        assert_eq!(orchestrator.cycles_completed(), 0);
        assert!(!orchestrator.state().is_terminal());
    }
}
