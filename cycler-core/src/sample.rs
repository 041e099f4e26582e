//! Telemetry samples, coulomb counting, and the trailing voltage window.

use core::time::Duration;

use heapless::Deque;

/// Number of plain discharge samples averaged for the termination check.
pub const TERMINATION_WINDOW: usize = 20;

/// Internal resistance derived from one pulse.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum PulseResistance {
    /// Resistance in ohms.
    Ohms(f64),
    /// The pulse did not change the current, so the two-point model has no answer.
    Undefined,
}

impl PulseResistance {
    /// Returns the value in ohms when defined.
    #[must_use]
    pub const fn ohms(self) -> Option<f64> {
        match self {
            PulseResistance::Ohms(value) => Some(value),
            PulseResistance::Undefined => None,
        }
    }
}

/// Two-point linear estimate of internal resistance.
///
/// With `V = Voc - I * R` at both load levels,
/// `R = (V_nominal - V_pulse) / (I_pulse - I_nominal)`.
#[must_use]
pub fn pulse_resistance(
    nominal_voltage: f64,
    nominal_current: f64,
    pulse_voltage: f64,
    pulse_current: f64,
) -> PulseResistance {
    let resistance = (nominal_voltage - pulse_voltage) / (pulse_current - nominal_current);
    if resistance.is_finite() {
        PulseResistance::Ohms(resistance)
    } else {
        PulseResistance::Undefined
    }
}

/// Phase tag carried by every sample.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum SampleKind {
    Charging,
    Discharge,
    DischargePulse(PulseResistance),
}

impl SampleKind {
    /// Status label written to the persisted series.
    #[must_use]
    pub const fn status(self) -> &'static str {
        match self {
            SampleKind::Charging => "charging",
            SampleKind::Discharge => "discharge",
            SampleKind::DischargePulse(_) => "discharge_pulse",
        }
    }

    #[must_use]
    pub const fn is_pulse(self) -> bool {
        matches!(self, SampleKind::DischargePulse(_))
    }
}

/// One telemetry record.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Sample {
    /// Elapsed time since the cycle started.
    pub time: Duration,
    /// Volts.
    pub voltage: f64,
    /// Amps.
    pub current: f64,
    /// Coulombs accumulated since the cycle started, including this sample's interval.
    pub charge: f64,
    pub kind: SampleKind,
}

impl Sample {
    /// Elapsed time in seconds.
    #[must_use]
    pub fn time_secs(&self) -> f64 {
        self.time.as_secs_f64()
    }

    /// Pulse resistance, or `None` on non-pulse rows.
    #[must_use]
    pub const fn resistance(&self) -> Option<PulseResistance> {
        match self.kind {
            SampleKind::DischargePulse(resistance) => Some(resistance),
            SampleKind::Charging | SampleKind::Discharge => None,
        }
    }
}

/// Rectangular-rule coulomb counter.
///
/// Each reading is held for the whole interval since the previous one. The
/// error this introduces on sloped current is accepted; at 1 Hz it stays well
/// below the instruments' own accuracy.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct CoulombCounter {
    total: f64,
}

impl CoulombCounter {
    #[must_use]
    pub const fn new() -> Self {
        Self { total: 0.0 }
    }

    /// Adds `current × elapsed` and returns the running total.
    pub fn accumulate(&mut self, current: f64, elapsed: Duration) -> f64 {
        self.total += current * elapsed.as_secs_f64();
        self.total
    }

    /// Charge counted so far, in coulombs.
    #[must_use]
    pub const fn total(&self) -> f64 {
        self.total
    }
}

/// Trailing window of plain discharge voltages.
#[derive(Clone, Debug)]
pub struct VoltageWindow<const N: usize = TERMINATION_WINDOW> {
    readings: Deque<f64, N>,
}

impl<const N: usize> VoltageWindow<N> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            readings: Deque::new(),
        }
    }

    /// Adds a reading, evicting the oldest once the window is full.
    pub fn push(&mut self, voltage: f64) {
        if self.readings.is_full() {
            self.readings.pop_front();
        }
        // Cannot fail: a slot was freed above.
        let _ = self.readings.push_back(voltage);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.readings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.readings.is_full()
    }

    /// Arithmetic mean of the window, available once it holds `N` readings.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean(&self) -> Option<f64> {
        if !self.is_full() {
            return None;
        }
        let sum: f64 = self.readings.iter().sum();
        Some(sum / N as f64)
    }

    /// Returns `true` when the full-window mean sits below `threshold`.
    #[must_use]
    pub fn mean_below(&self, threshold: f64) -> bool {
        self.mean().is_some_and(|mean| mean < threshold)
    }
}

impl<const N: usize> Default for VoltageWindow<N> {
    fn default() -> Self {
        Self::new()
    }
}
