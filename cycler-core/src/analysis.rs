//! Offline reduction of a recorded discharge series.
//!
//! The nominal internal resistance is the mean of the pulse resistances
//! recorded strictly inside the 30 %..70 % span of pulse times, which keeps
//! the steep ends of the curve out of the estimate. Each plain discharge
//! sample is then corrected by the IR drop to estimate open-circuit voltage,
//! and the corrected curve is resampled into a fixed-size lookup table.

use core::fmt;

use crate::sample::{PulseResistance, Sample, SampleKind};
use crate::spec::coulombs_to_mah;

/// Intervals in the OCV table; the table holds one more point than this.
pub const OCV_TABLE_INTERVALS: usize = 20;
pub const OCV_TABLE_POINTS: usize = OCV_TABLE_INTERVALS + 1;

const MID_RUN_START: f64 = 0.3;
const MID_RUN_END: f64 = 0.7;

/// Open-circuit voltage at evenly spaced points, 0 % state of charge first.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct OcvTable(pub [f64; OCV_TABLE_POINTS]);

impl OcvTable {
    #[must_use]
    pub const fn points(&self) -> &[f64; OCV_TABLE_POINTS] {
        &self.0
    }
}

/// Renders the table as a C array declaration for firmware fuel gauges.
impl fmt::Display for OcvTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("const float ocv_samples[] = {")?;
        for (index, voltage) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{voltage:.4}f")?;
        }
        f.write_str("};")
    }
}

/// Figures derived from one discharge series.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DischargeAnalysis {
    /// Mean mid-run pulse resistance in ohms.
    pub nominal_resistance: f64,
    /// Number of pulses averaged into [`nominal_resistance`](Self::nominal_resistance).
    pub pulses_averaged: usize,
    pub ocv_table: OcvTable,
    /// Integrated charge at the last sample, in coulombs.
    pub capacity_coulombs: f64,
    /// Nominal rate times the discharge duration, in coulombs.
    ///
    /// Under-estimates the capacity since it ignores the extra charge drawn by pulses.
    pub rate_capacity_coulombs: f64,
}

impl DischargeAnalysis {
    #[must_use]
    pub fn capacity_mah(&self) -> f64 {
        coulombs_to_mah(self.capacity_coulombs)
    }

    #[must_use]
    pub fn rate_capacity_mah(&self) -> f64 {
        coulombs_to_mah(self.rate_capacity_coulombs)
    }
}

/// Reasons a series cannot be reduced.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AnalysisError {
    /// The series holds no plain discharge samples.
    NoDischargeSamples,
    /// The series holds no pulse with a defined resistance.
    NoPulses,
    /// No defined pulse falls strictly inside the mid-run span.
    NoMidRunPulses,
}

impl fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisError::NoDischargeSamples => f.write_str("series has no discharge samples"),
            AnalysisError::NoPulses => f.write_str("series has no resistance pulses"),
            AnalysisError::NoMidRunPulses => {
                f.write_str("no resistance pulse inside the 30%..70% span")
            }
        }
    }
}

/// Reduces a discharge series recorded at `discharge_rate` amps.
///
/// # Errors
///
/// Fails when the series has no discharge samples or no usable pulse
/// between 30% and 70% of the run.
pub fn analyze(samples: &[Sample], discharge_rate: f64) -> Result<DischargeAnalysis, AnalysisError> {
    let (nominal_resistance, pulses_averaged) = mid_run_resistance(samples)?;

    let discharge = || {
        samples
            .iter()
            .filter(|sample| matches!(sample.kind, SampleKind::Discharge))
    };
    let count = discharge().count();
    let (Some(first), Some(last)) = (discharge().next(), discharge().next_back()) else {
        return Err(AnalysisError::NoDischargeSamples);
    };

    let mut table = [0.0; OCV_TABLE_POINTS];
    for (slot, point) in table.iter_mut().rev().zip(0..OCV_TABLE_POINTS) {
        let index = point * (count - 1) / OCV_TABLE_INTERVALS;
        if let Some(sample) = discharge().nth(index) {
            *slot = sample.voltage + sample.current * nominal_resistance;
        }
    }

    let capacity_coulombs = samples.last().map_or(0.0, |sample| sample.charge);
    let rate_capacity_coulombs =
        discharge_rate * last.time.saturating_sub(first.time).as_secs_f64();

    Ok(DischargeAnalysis {
        nominal_resistance,
        pulses_averaged,
        ocv_table: OcvTable(table),
        capacity_coulombs,
        rate_capacity_coulombs,
    })
}

fn mid_run_resistance(samples: &[Sample]) -> Result<(f64, usize), AnalysisError> {
    let pulses = || {
        samples.iter().filter_map(|sample| {
            sample
                .resistance()
                .and_then(PulseResistance::ohms)
                .map(|ohms| (sample.time_secs(), ohms))
        })
    };

    let (Some((first, _)), Some((last, _))) = (pulses().next(), pulses().next_back()) else {
        return Err(AnalysisError::NoPulses);
    };

    let span = last - first;
    let lower = first + MID_RUN_START * span;
    let upper = first + MID_RUN_END * span;

    let (sum, count) = pulses()
        .filter(|(time, _)| *time > lower && *time < upper)
        .fold((0.0, 0_usize), |(sum, count), (_, ohms)| (sum + ohms, count + 1));

    if count == 0 {
        return Err(AnalysisError::NoMidRunPulses);
    }

    #[allow(clippy::cast_precision_loss)]
    let mean = sum / count as f64;
    Ok((mean, count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;
    use core::time::Duration;

    fn close(a: f64, b: f64) -> bool {
        let delta = a - b;
        delta < 1e-9 && delta > -1e-9
    }

    fn series() -> Vec<Sample> {
        let mut samples = Vec::new();
        for step in 0..=100_u32 {
            let voltage = 4.0 - f64::from(step) * 0.01;
            samples.push(Sample {
                time: Duration::from_secs(u64::from(step) * 10),
                voltage,
                current: 0.1,
                charge: 0.1 * f64::from(step) * 10.0,
                kind: SampleKind::Discharge,
            });
            if step % 10 == 5 {
                // Pulses at 53 s, 153 s, ... 953 s; the mid-run span is (323 s, 683 s).
                let ohms = if step > 30 && step < 70 { 0.2 } else { 5.0 };
                samples.push(Sample {
                    time: Duration::from_secs(u64::from(step) * 10 + 3),
                    voltage: voltage - 0.1,
                    current: 0.5,
                    charge: 0.1 * f64::from(step) * 10.0,
                    kind: SampleKind::DischargePulse(PulseResistance::Ohms(ohms)),
                });
            }
        }
        samples
    }

    #[test]
    fn averages_only_mid_run_pulses() {
        let analysis = analyze(&series(), 0.1).expect("analysis");
        assert!(close(analysis.nominal_resistance, 0.2));
        assert_eq!(analysis.pulses_averaged, 4);
    }

    #[test]
    fn table_runs_from_empty_to_full() {
        let analysis = analyze(&series(), 0.1).expect("analysis");
        let table = analysis.ocv_table.points();
        // Last discharge sample: 3.0 V + 0.1 A * 0.2 ohm.
        assert!(close(table[0], 3.02));
        // First discharge sample: 4.0 V + 0.1 A * 0.2 ohm.
        assert!(close(table[OCV_TABLE_INTERVALS], 4.02));
        assert!(table.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn capacity_uses_last_sample_charge() {
        let analysis = analyze(&series(), 0.1).expect("analysis");
        assert!(close(analysis.capacity_coulombs, 100.0));
        assert!(close(analysis.rate_capacity_coulombs, 100.0));
        assert!(close(analysis.capacity_mah(), 100.0 / 3.6));
    }

    #[test]
    fn undefined_pulses_are_skipped() {
        let mut samples = series();
        for sample in &mut samples {
            if sample.kind.is_pulse() {
                sample.kind = SampleKind::DischargePulse(PulseResistance::Undefined);
            }
        }
        assert_eq!(analyze(&samples, 0.1), Err(AnalysisError::NoPulses));
    }

    #[test]
    fn single_pulse_has_no_mid_run() {
        let samples: Vec<Sample> = series()
            .into_iter()
            .filter(|sample| !sample.kind.is_pulse() || sample.time == Duration::from_secs(53))
            .collect();
        assert_eq!(analyze(&samples, 0.1), Err(AnalysisError::NoMidRunPulses));
    }

    #[test]
    fn renders_c_array() {
        let mut points = [3.0; OCV_TABLE_POINTS];
        points[OCV_TABLE_INTERVALS] = 4.2;
        let text = alloc::format!("{}", OcvTable(points));
        assert!(text.starts_with("const float ocv_samples[] = {3.0000f, "));
        assert!(text.ends_with("4.2000f};"));
    }
}
