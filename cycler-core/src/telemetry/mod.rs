//! Telemetry event catalog and payload structures shared by the bench and the emulator.
//!
//! Controllers emit one record per noteworthy transition (outputs switched,
//! pulses measured, series flushed, phases finished). Records land in a
//! fixed-size ring so a long run never grows memory, and every record is also
//! forwarded to the active [`CycleMonitor`](crate::monitor::CycleMonitor) for
//! live reporting.

use core::{fmt, time::Duration};

use heapless::{HistoryBuf, OldestOrdered};

use crate::cycle::{FaultKind, Termination};
use crate::instruments::Output;
use crate::recorder::SeriesId;
use crate::sample::PulseResistance;

/// Sequence number of a cycle telemetry record.
pub type EventId = u32;

/// Discriminated telemetry events emitted by controllers and the orchestrator.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TelemetryEventKind {
    RunStarted,
    PhaseStarted(SeriesId),
    OutputEnabled(Output),
    OutputReleased(Output),
    ReleaseFailed(Output),
    PulseMeasured(SeriesId),
    PulseUndefined(SeriesId),
    SeriesFlushed(SeriesId),
    FlushFailed(SeriesId),
    PhaseTerminated(SeriesId, Termination),
    PhaseFaulted(SeriesId, FaultKind),
    RestStarted,
    RunComplete,
    RunAborted,
}

impl fmt::Display for TelemetryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryEventKind::RunStarted => f.write_str("run-started"),
            TelemetryEventKind::PhaseStarted(series) => write!(f, "phase-started {series}"),
            TelemetryEventKind::OutputEnabled(output) => write!(f, "output-enabled {output}"),
            TelemetryEventKind::OutputReleased(output) => write!(f, "output-released {output}"),
            TelemetryEventKind::ReleaseFailed(output) => write!(f, "release-failed {output}"),
            TelemetryEventKind::PulseMeasured(series) => write!(f, "pulse-measured {series}"),
            TelemetryEventKind::PulseUndefined(series) => write!(f, "pulse-undefined {series}"),
            TelemetryEventKind::SeriesFlushed(series) => write!(f, "series-flushed {series}"),
            TelemetryEventKind::FlushFailed(series) => write!(f, "flush-failed {series}"),
            TelemetryEventKind::PhaseTerminated(series, reason) => {
                write!(f, "phase-terminated {series} {reason}")
            }
            TelemetryEventKind::PhaseFaulted(series, fault) => {
                write!(f, "phase-faulted {series} {fault}")
            }
            TelemetryEventKind::RestStarted => f.write_str("rest-started"),
            TelemetryEventKind::RunComplete => f.write_str("run-complete"),
            TelemetryEventKind::RunAborted => f.write_str("run-aborted"),
        }
    }
}

impl TelemetryEventKind {
    /// Pulse event, tagging undefined resistance distinctly.
    #[must_use]
    pub const fn pulse(series: SeriesId, resistance: PulseResistance) -> Self {
        match resistance {
            PulseResistance::Ohms(_) => TelemetryEventKind::PulseMeasured(series),
            PulseResistance::Undefined => TelemetryEventKind::PulseUndefined(series),
        }
    }
}

/// Measurements attached to a cycle event.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum TelemetryPayload {
    /// Nothing beyond the event itself.
    None,
    /// Both operating points of a resistance pulse.
    Pulse(PulseTelemetry),
    /// Number of samples handed to the recorder.
    Flush { samples: usize },
    /// Summary of a finished charge or discharge phase.
    Phase(PhaseTelemetry),
    /// Dead time about to elapse.
    Rest(Duration),
    /// Summary of a whole run.
    Run(RunTelemetry),
}

impl TelemetryPayload {
    /// Empty payload.
    #[must_use]
    pub const fn none() -> Self {
        TelemetryPayload::None
    }
}

/// Renders the payload as space-prefixed `key=value` pairs; `None` renders empty.
impl fmt::Display for TelemetryPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryPayload::None => Ok(()),
            TelemetryPayload::Pulse(pulse) => write!(
                f,
                " nominal={:.4}V@{:.3}A pulse={:.4}V@{:.3}A",
                pulse.nominal_voltage,
                pulse.nominal_current,
                pulse.pulse_voltage,
                pulse.pulse_current
            ),
            TelemetryPayload::Flush { samples } => write!(f, " samples={samples}"),
            TelemetryPayload::Phase(phase) => write!(
                f,
                " duration={} charge={:.1}C",
                ShortDuration(phase.duration),
                phase.charge_coulombs
            ),
            TelemetryPayload::Rest(duration) => write!(f, " for={}", ShortDuration(*duration)),
            TelemetryPayload::Run(run) => {
                write!(f, " cycles={}", run.cycles_completed)?;
                match run.duration {
                    Some(duration) => write!(f, " duration={}", ShortDuration(duration)),
                    None => Ok(()),
                }
            }
        }
    }
}

/// Formats as `h:mm:ss`, or milliseconds below one second.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ShortDuration(pub Duration);

impl fmt::Display for ShortDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let seconds = self.0.as_secs();
        if seconds == 0 {
            write!(f, "{}ms", self.0.as_millis())
        } else {
            write!(
                f,
                "{}:{:02}:{:02}",
                seconds / 3600,
                seconds / 60 % 60,
                seconds % 60
            )
        }
    }
}

/// Operating points captured around one pulse.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PulseTelemetry {
    pub nominal_voltage: f64,
    pub nominal_current: f64,
    pub pulse_voltage: f64,
    pub pulse_current: f64,
    pub resistance: PulseResistance,
}

/// Summary of one finished phase.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PhaseTelemetry {
    pub series: SeriesId,
    pub duration: Duration,
    /// Integrated charge in coulombs.
    pub charge_coulombs: f64,
    pub samples: usize,
    /// Termination reason when the phase completed, `None` when it failed.
    pub termination: Option<Termination>,
}

impl PhaseTelemetry {
    /// Returns `true` when the phase reached a termination condition.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.termination.is_some()
    }
}

/// Summary of a finished run.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RunTelemetry {
    pub cycles_completed: u32,
    pub duration: Option<Duration>,
}

/// Records kept before the oldest is overwritten.
pub const TELEMETRY_RING_CAPACITY: usize = 128;

/// Monotonic timestamp a record can be stamped with.
pub trait TelemetryInstant: Copy {
    /// Time from `earlier` to `self`, or zero if `earlier` is later.
    fn saturating_duration_since(&self, earlier: Self) -> Duration;
}

/// Offsets from a fixed epoch act as instants for virtual clocks.
impl TelemetryInstant for Duration {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        self.saturating_sub(earlier)
    }
}

/// One cycle event with its timestamp.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TelemetryRecord<TInstant>
where
    TInstant: Copy,
{
    pub id: EventId,
    pub timestamp: TInstant,
    pub event: TelemetryEventKind,
    pub details: TelemetryPayload,
}

pub type TelemetryRing<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY> =
    HistoryBuf<TelemetryRecord<TInstant>, CAPACITY>;

/// Keeps the most recent cycle events of a run.
pub struct TelemetryRecorder<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY>
where
    TInstant: Copy,
{
    ring: TelemetryRing<TInstant, CAPACITY>,
    next_event_id: EventId,
}

impl<TInstant, const CAPACITY: usize> TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: TelemetryInstant,
{
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            next_event_id: 0,
        }
    }

    /// Records from oldest to newest.
    #[must_use]
    pub fn oldest_first(&self) -> OldestOrdered<'_, TelemetryRecord<TInstant>> {
        self.ring.oldest_ordered()
    }

    #[must_use]
    pub fn latest(&self) -> Option<&TelemetryRecord<TInstant>> {
        self.ring.recent()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Counts stored records matching `event`.
    #[must_use]
    pub fn count(&self, event: TelemetryEventKind) -> usize {
        self.ring
            .oldest_ordered()
            .filter(|record| record.event == event)
            .count()
    }

    /// Stamps `event` with `timestamp` and stores it, evicting the oldest record when full.
    pub fn record(
        &mut self,
        event: TelemetryEventKind,
        payload: TelemetryPayload,
        timestamp: TInstant,
    ) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);

        self.ring.write(TelemetryRecord {
            id,
            timestamp,
            event,
            details: payload,
        });

        id
    }

    /// Records the end of a run along with its duration.
    pub fn record_run_completion(
        &mut self,
        aborted: bool,
        cycles_completed: u32,
        started_at: Option<TInstant>,
        timestamp: TInstant,
    ) -> EventId {
        let duration = started_at.map(|start| timestamp.saturating_duration_since(start));
        let event = if aborted {
            TelemetryEventKind::RunAborted
        } else {
            TelemetryEventKind::RunComplete
        };

        self.record(
            event,
            TelemetryPayload::Run(RunTelemetry {
                cycles_completed,
                duration,
            }),
            timestamp,
        )
    }
}

impl<TInstant, const CAPACITY: usize> Default for TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: TelemetryInstant,
{
    fn default() -> Self {
        Self::new()
    }
}
