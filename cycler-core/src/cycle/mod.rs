//! Charge and discharge controllers plus the bookkeeping they share.
//!
//! Both controllers follow the same shape: switch outputs on through a guard,
//! sample at a fixed cadence until a termination condition or a fault, then
//! run the same finalization whatever happened. Finalization switches the
//! owned outputs off, writes the whole series one last time, and reports the
//! integrated charge together with the destination it was written to.

use alloc::vec::Vec;
use core::fmt;
use core::time::Duration;

use crate::clock::Clock;
use crate::instruments::{Output, ReleaseError};
use crate::monitor::{CycleMonitor, Progress};
use crate::recorder::{FLUSH_INTERVAL, Recorder, SeriesId};
use crate::sample::{CoulombCounter, Sample, SampleKind};
use crate::telemetry::{
    EventId, PhaseTelemetry, TelemetryEventKind, TelemetryInstant, TelemetryPayload,
    TelemetryRecorder,
};

pub mod charge;
pub mod discharge;

pub use charge::{ChargeController, ChargeWiring, RelayWiring};
pub use discharge::DischargeController;

/// Delay between switching an output on and taking the first sample.
pub const STARTUP_SETTLE: Duration = Duration::from_secs(1);

/// Hard ceiling on a single charge phase.
pub const CHARGE_SAFETY_TIMEOUT: Duration = Duration::from_hours(3);

/// Condition that ended a phase normally.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Termination {
    /// Charge current fell below the termination current.
    CurrentCutoff,
    /// Charging hit the safety ceiling before the current fell.
    SafetyTimeout,
    /// The trailing mean discharge voltage fell below the cutoff.
    VoltageCutoff,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::CurrentCutoff => f.write_str("current-cutoff"),
            Termination::SafetyTimeout => f.write_str("safety-timeout"),
            Termination::VoltageCutoff => f.write_str("voltage-cutoff"),
        }
    }
}

/// Category of a phase failure, without the underlying error value.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FaultKind {
    Instrument,
    Recorder,
    Interrupted,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultKind::Instrument => f.write_str("instrument"),
            FaultKind::Recorder => f.write_str("recorder"),
            FaultKind::Interrupted => f.write_str("interrupted"),
        }
    }
}

/// Reason a phase failed.
#[derive(Debug, PartialEq)]
pub enum CycleError<E, F> {
    /// An instrument command or query failed.
    Instrument(E),
    /// The recorder could not persist the series.
    Recorder(F),
    /// The operator asked the run to stop.
    Interrupted,
}

impl<E, F> CycleError<E, F> {
    #[must_use]
    pub const fn kind(&self) -> FaultKind {
        match self {
            CycleError::Instrument(_) => FaultKind::Instrument,
            CycleError::Recorder(_) => FaultKind::Recorder,
            CycleError::Interrupted => FaultKind::Interrupted,
        }
    }
}

impl<E, F> fmt::Display for CycleError<E, F>
where
    E: fmt::Display,
    F: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleError::Instrument(err) => write!(f, "instrument fault: {err}"),
            CycleError::Recorder(err) => write!(f, "recorder fault: {err}"),
            CycleError::Interrupted => f.write_str("interrupted by operator"),
        }
    }
}

/// How a phase ended.
#[derive(Debug, PartialEq)]
pub enum CycleOutcome<E, F> {
    Completed(Termination),
    Failed(CycleError<E, F>),
}

/// Result of one controller invocation.
#[derive(Debug)]
pub struct CycleReport<E, F> {
    pub series: SeriesId,
    pub outcome: CycleOutcome<E, F>,
    pub samples: Vec<Sample>,
    /// Integrated charge in coulombs.
    pub charge_coulombs: f64,
    pub duration: Duration,
}

impl<E, F> CycleReport<E, F> {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.outcome, CycleOutcome::Completed(_))
    }

    #[must_use]
    pub const fn termination(&self) -> Option<Termination> {
        match self.outcome {
            CycleOutcome::Completed(termination) => Some(termination),
            CycleOutcome::Failed(_) => None,
        }
    }

    #[must_use]
    pub const fn error(&self) -> Option<&CycleError<E, F>> {
        match &self.outcome {
            CycleOutcome::Completed(_) => None,
            CycleOutcome::Failed(error) => Some(error),
        }
    }

    /// Summary without the sample data.
    #[must_use]
    pub fn telemetry(&self) -> PhaseTelemetry {
        PhaseTelemetry {
            series: self.series,
            duration: self.duration,
            charge_coulombs: self.charge_coulombs,
            samples: self.samples.len(),
            termination: self.termination(),
        }
    }
}

/// Everything a controller needs besides its instrument.
pub struct CycleEnv<C, R, M>
where
    C: Clock,
{
    pub clock: C,
    pub recorder: R,
    pub monitor: M,
    pub telemetry: TelemetryRecorder<C::Instant>,
}

impl<C, R, M> CycleEnv<C, R, M>
where
    C: Clock,
    R: Recorder,
    M: CycleMonitor,
{
    #[must_use]
    pub fn new(clock: C, recorder: R, monitor: M) -> Self {
        Self {
            clock,
            recorder,
            monitor,
            telemetry: TelemetryRecorder::new(),
        }
    }

    /// Stores a telemetry record and forwards it to the monitor.
    pub fn note(&mut self, event: TelemetryEventKind, details: TelemetryPayload) -> EventId {
        let now = self.clock.now();
        let id = self.telemetry.record(event, details, now);
        self.monitor.event(event, &details);
        id
    }

    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.monitor.stop_requested()
    }

    /// Sleeps unless a stop was already requested; reports whether to carry on.
    pub fn settle(&mut self, duration: Duration) -> bool {
        if self.stop_requested() {
            return false;
        }
        self.clock.sleep(duration);
        !self.stop_requested()
    }
}

/// Sample series under construction for one phase.
pub(crate) struct SeriesLog<I> {
    series: SeriesId,
    nominal_mah: f64,
    started: I,
    last_sample: I,
    last_flush: I,
    counter: CoulombCounter,
    samples: Vec<Sample>,
}

impl<I> SeriesLog<I>
where
    I: TelemetryInstant,
{
    pub(crate) fn begin(series: SeriesId, nominal_mah: f64, now: I) -> Self {
        Self {
            series,
            nominal_mah,
            started: now,
            last_sample: now,
            last_flush: now,
            counter: CoulombCounter::new(),
            samples: Vec::new(),
        }
    }

    pub(crate) const fn series(&self) -> SeriesId {
        self.series
    }

    /// Restarts the integration interval, for when current starts flowing.
    pub(crate) fn mark(&mut self, now: I) {
        self.last_sample = now;
    }

    /// Adds `current` held since the previous mark up to `at`.
    pub(crate) fn integrate(&mut self, current: f64, at: I) -> f64 {
        let interval = at.saturating_duration_since(self.last_sample);
        self.last_sample = at;
        self.counter.accumulate(current, interval)
    }

    /// Integrates up to `at`, then appends a sample carrying the new total.
    pub(crate) fn record<C, R, M>(
        &mut self,
        env: &mut CycleEnv<C, R, M>,
        at: I,
        voltage: f64,
        current: f64,
        kind: SampleKind,
    ) -> Sample
    where
        C: Clock<Instant = I>,
        R: Recorder,
        M: CycleMonitor,
    {
        let charge = self.integrate(current, at);
        let sample = Sample {
            time: at.saturating_duration_since(self.started),
            voltage,
            current,
            charge,
            kind,
        };
        self.samples.push(sample);

        let progress = Progress::new(charge, self.nominal_mah);
        env.monitor.sample(self.series, &sample, progress);
        sample
    }

    pub(crate) fn elapsed(&self, now: I) -> Duration {
        now.saturating_duration_since(self.started)
    }

    pub(crate) fn flush_due(&self, now: I) -> bool {
        now.saturating_duration_since(self.last_flush) >= FLUSH_INTERVAL
    }

    /// Hands the whole series to the recorder.
    pub(crate) fn flush<C, R, M>(&mut self, env: &mut CycleEnv<C, R, M>) -> Result<(), R::Error>
    where
        C: Clock<Instant = I>,
        R: Recorder,
        M: CycleMonitor,
    {
        self.last_flush = env.clock.now();
        match env.recorder.write_series(self.series, &self.samples) {
            Ok(()) => {
                env.note(
                    TelemetryEventKind::SeriesFlushed(self.series),
                    TelemetryPayload::Flush {
                        samples: self.samples.len(),
                    },
                );
                Ok(())
            }
            Err(err) => {
                env.note(
                    TelemetryEventKind::FlushFailed(self.series),
                    TelemetryPayload::none(),
                );
                Err(err)
            }
        }
    }

    /// Periodic flush from inside a sampling loop.
    pub(crate) fn flush_if_due<C, R, M, E>(
        &mut self,
        env: &mut CycleEnv<C, R, M>,
    ) -> Result<(), CycleError<E, R::Error>>
    where
        C: Clock<Instant = I>,
        R: Recorder,
        M: CycleMonitor,
    {
        if self.flush_due(env.clock.now()) {
            self.flush(env).map_err(CycleError::Recorder)?;
        }
        Ok(())
    }
}

/// Notes which outputs were switched off, or which one refused.
pub(crate) fn note_release<C, R, M, E>(
    env: &mut CycleEnv<C, R, M>,
    outputs: &[Output],
    released: &Result<(), ReleaseError<E>>,
) where
    C: Clock,
    R: Recorder,
    M: CycleMonitor,
{
    let failed = released.as_ref().err().map(|err| err.output);
    for output in outputs {
        if failed == Some(*output) {
            env.note(
                TelemetryEventKind::ReleaseFailed(*output),
                TelemetryPayload::none(),
            );
        } else {
            env.note(
                TelemetryEventKind::OutputReleased(*output),
                TelemetryPayload::none(),
            );
        }
    }
}

/// Runs after the outputs are released, on every exit path.
///
/// A loop error takes precedence. Otherwise a failed release or a failed final
/// write turns a completed phase into a failed one, since the outputs may still
/// be live or the data may be missing.
pub(crate) fn finalize<C, R, M, E>(
    env: &mut CycleEnv<C, R, M>,
    mut log: SeriesLog<C::Instant>,
    result: Result<Termination, CycleError<E, R::Error>>,
    released: Result<(), ReleaseError<E>>,
) -> CycleReport<E, R::Error>
where
    C: Clock,
    R: Recorder,
    M: CycleMonitor,
{
    let flushed = log.flush(env);

    let outcome = match (result, released, flushed) {
        (Err(err), _, _) => CycleOutcome::Failed(err),
        (Ok(_), Err(release), _) => CycleOutcome::Failed(CycleError::Instrument(release.error)),
        (Ok(_), Ok(()), Err(err)) => CycleOutcome::Failed(CycleError::Recorder(err)),
        (Ok(termination), Ok(()), Ok(())) => CycleOutcome::Completed(termination),
    };

    let report = CycleReport {
        series: log.series,
        outcome,
        charge_coulombs: log.counter.total(),
        duration: log.elapsed(env.clock.now()),
        samples: log.samples,
    };

    let summary = report.telemetry();
    let event = match &report.outcome {
        CycleOutcome::Completed(termination) => {
            TelemetryEventKind::PhaseTerminated(report.series, *termination)
        }
        CycleOutcome::Failed(err) => TelemetryEventKind::PhaseFaulted(report.series, err.kind()),
    };
    env.note(event, TelemetryPayload::Phase(summary));

    let location = env.recorder.location(report.series);
    env.monitor.finished(&summary, &location);

    report
}
