//! Battery and test-plan parameters shared by every controller.
//!
//! A [`BatterySpec`] is resolved once when a run starts and handed to the
//! orchestrator and controllers by reference. Nothing in the crate mutates it
//! after validation, so every phase of every cycle sees the same numbers the
//! metadata file recorded.

use core::fmt;
use core::time::Duration;

pub mod profiles;

pub use profiles::{LIHV_1000MAH, LIPO_850MAH, PROFILE_NAMES, by_name, lihv_1000mah, lipo_850mah};

/// Seconds in one hour, used by the mAh/coulomb conversions.
pub const SECONDS_PER_HOUR: f64 = 3600.0;

/// Converts a capacity in milliamp-hours to coulombs (amp-seconds).
#[must_use]
pub fn mah_to_coulombs(mah: f64) -> f64 {
    mah / 1000.0 * SECONDS_PER_HOUR
}

/// Converts a charge in coulombs to milliamp-hours.
#[must_use]
pub fn coulombs_to_mah(coulombs: f64) -> f64 {
    coulombs / SECONDS_PER_HOUR * 1000.0
}

/// Current in amps corresponding to `multiple` C for a cell of `capacity_mah`.
#[must_use]
pub fn c_rate(capacity_mah: f64, multiple: f64) -> f64 {
    capacity_mah / 1000.0 * multiple
}

/// Static description of the cell under test and the plan to exercise it.
#[derive(Clone, Debug, PartialEq)]
pub struct BatterySpec {
    /// Rated capacity in milliamp-hours.
    pub nominal_capacity_mah: f64,
    /// Constant-voltage setpoint used while charging (V).
    pub charge_voltage: f64,
    /// Current limit applied while charging (A).
    pub charge_current: f64,
    /// Charging stops once the measured current falls below this value (A).
    pub charge_termination_current: f64,
    /// Constant-current load setting during discharge (A).
    pub discharge_current: f64,
    /// Discharge stops once the trailing mean voltage falls below this (V).
    pub discharge_termination_voltage: f64,
    /// Load setting while probing internal resistance (A).
    pub pulse_discharge_current: f64,
    /// How long the pulse current is held before measuring.
    pub pulse_settle_time: Duration,
    /// Minimum time between two resistance pulses.
    pub pulse_spacing: Duration,
    /// Number of charge/discharge repetitions.
    pub number_of_cycles: u32,
    /// Dead time between the end of a charge and the following discharge.
    pub rest_charge_to_discharge: Duration,
    /// Dead time between the end of a discharge and the next charge.
    pub rest_discharge_to_charge: Duration,
}

impl BatterySpec {
    /// Checks the parameters for values that would make a run meaningless or unsafe.
    ///
    /// # Errors
    ///
    /// Returns the first parameter found out of range.
    pub fn validate(&self) -> Result<(), SpecError> {
        let positive = [
            ("nominal_capacity_mah", self.nominal_capacity_mah),
            ("charge_voltage", self.charge_voltage),
            ("charge_current", self.charge_current),
            ("charge_termination_current", self.charge_termination_current),
            ("discharge_current", self.discharge_current),
            (
                "discharge_termination_voltage",
                self.discharge_termination_voltage,
            ),
            ("pulse_discharge_current", self.pulse_discharge_current),
        ];

        for (field, value) in positive {
            // Also rejects NaN.
            if !(value > 0.0 && value.is_finite()) {
                return Err(SpecError::NotPositive { field });
            }
        }

        if self.charge_termination_current >= self.charge_current {
            return Err(SpecError::TerminationCurrentTooHigh);
        }

        if self.discharge_termination_voltage >= self.charge_voltage {
            return Err(SpecError::TerminationVoltageTooHigh);
        }

        if self.pulse_discharge_current <= self.discharge_current {
            return Err(SpecError::PulseNotAboveNominal);
        }

        if self.pulse_spacing.is_zero() {
            return Err(SpecError::ZeroPulseSpacing);
        }

        if self.number_of_cycles == 0 {
            return Err(SpecError::NoCycles);
        }

        Ok(())
    }

    /// Rated capacity expressed in coulombs.
    #[must_use]
    pub fn nominal_capacity_coulombs(&self) -> f64 {
        mah_to_coulombs(self.nominal_capacity_mah)
    }

    /// Rough duration of one charge, rest, discharge, rest repetition.
    ///
    /// Assumes the full nominal capacity moves at the configured rates, so it
    /// ignores the constant-voltage taper and the pulses.
    #[must_use]
    pub fn estimated_cycle_time(&self) -> Duration {
        let capacity = self.nominal_capacity_coulombs();
        let active = capacity / self.discharge_current + capacity / self.charge_current;
        let active = Duration::try_from_secs_f64(active).unwrap_or(Duration::MAX);

        active
            .saturating_add(self.rest_charge_to_discharge)
            .saturating_add(self.rest_discharge_to_charge)
    }

    /// Rough duration of the whole run.
    #[must_use]
    pub fn estimated_total_time(&self) -> Duration {
        self.estimated_cycle_time()
            .saturating_mul(self.number_of_cycles)
    }
}

/// Reasons a [`BatterySpec`] is rejected.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SpecError {
    /// A current, voltage or capacity is zero, negative or not a number.
    NotPositive { field: &'static str },
    /// The charge would never terminate on current.
    TerminationCurrentTooHigh,
    /// The discharge would terminate immediately after a full charge.
    TerminationVoltageTooHigh,
    /// The pulse does not raise the load current, so resistance is undefined.
    PulseNotAboveNominal,
    ZeroPulseSpacing,
    NoCycles,
}

impl fmt::Display for SpecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpecError::NotPositive { field } => write!(f, "{field} must be a positive number"),
            SpecError::TerminationCurrentTooHigh => {
                f.write_str("charge_termination_current must be below charge_current")
            }
            SpecError::TerminationVoltageTooHigh => {
                f.write_str("discharge_termination_voltage must be below charge_voltage")
            }
            SpecError::PulseNotAboveNominal => {
                f.write_str("pulse_discharge_current must exceed discharge_current")
            }
            SpecError::ZeroPulseSpacing => f.write_str("pulse_spacing must be non-zero"),
            SpecError::NoCycles => f.write_str("number_of_cycles must be at least 1"),
        }
    }
}
