//! Operator-facing hooks invoked by the controllers.

use core::fmt;

use crate::recorder::SeriesId;
use crate::sample::Sample;
use crate::spec::coulombs_to_mah;
use crate::telemetry::{PhaseTelemetry, TelemetryEventKind, TelemetryPayload};

/// Charge moved so far against the rated capacity.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Progress {
    pub charge_mah: f64,
    pub nominal_mah: f64,
}

impl Progress {
    #[must_use]
    pub fn new(charge_coulombs: f64, nominal_mah: f64) -> Self {
        Self {
            charge_mah: coulombs_to_mah(charge_coulombs),
            nominal_mah,
        }
    }

    /// Fraction of nominal capacity, clamped to `0.0..=1.0`.
    #[must_use]
    pub fn fraction(&self) -> f64 {
        if self.nominal_mah > 0.0 {
            (self.charge_mah / self.nominal_mah).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

/// Receives live progress from the controllers.
///
/// Every method has an empty default so hosts implement only what they display.
pub trait CycleMonitor {
    /// Called after each sample is appended.
    fn sample(&mut self, _series: SeriesId, _sample: &Sample, _progress: Progress) {}

    /// Called for every telemetry record.
    fn event(&mut self, _event: TelemetryEventKind, _details: &TelemetryPayload) {}

    /// Called once per phase after finalization, whatever the outcome.
    fn finished(&mut self, _summary: &PhaseTelemetry, _location: &dyn fmt::Display) {}

    /// Polled once per loop iteration; returning `true` interrupts the phase.
    fn stop_requested(&self) -> bool {
        false
    }
}

impl<T> CycleMonitor for &mut T
where
    T: CycleMonitor + ?Sized,
{
    fn sample(&mut self, series: SeriesId, sample: &Sample, progress: Progress) {
        (**self).sample(series, sample, progress);
    }

    fn event(&mut self, event: TelemetryEventKind, details: &TelemetryPayload) {
        (**self).event(event, details);
    }

    fn finished(&mut self, summary: &PhaseTelemetry, location: &dyn fmt::Display) {
        (**self).finished(summary, location);
    }

    fn stop_requested(&self) -> bool {
        (**self).stop_requested()
    }
}

/// Monitor that reports nothing and never requests a stop.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopMonitor;

impl NoopMonitor {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl CycleMonitor for NoopMonitor {}
