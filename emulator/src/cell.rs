//! Lumped single-cell model: linear open-circuit voltage behind a series resistance.

use std::time::Duration;

use cycler_core::spec::mah_to_coulombs;

/// Open-circuit voltage of a full cell.
pub const OCV_FULL: f64 = 4.2;
/// Open-circuit voltage of an empty cell.
pub const OCV_EMPTY: f64 = 2.5;

/// Parameters for a simulated cell.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CellParams {
    pub capacity_mah: f64,
    /// Series resistance in ohms.
    pub resistance: f64,
    /// State of charge at the start of the simulation, 0.0 to 1.0.
    pub initial_soc: f64,
}

impl Default for CellParams {
    fn default() -> Self {
        Self {
            capacity_mah: 850.0,
            resistance: 0.1,
            initial_soc: 0.5,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SimulatedCell {
    capacity_coulombs: f64,
    charge: f64,
    resistance: f64,
}

impl SimulatedCell {
    #[must_use]
    pub fn new(params: &CellParams) -> Self {
        let capacity_coulombs = mah_to_coulombs(params.capacity_mah);
        Self {
            capacity_coulombs,
            charge: capacity_coulombs * params.initial_soc.clamp(0.0, 1.0),
            resistance: params.resistance,
        }
    }

    #[must_use]
    pub fn state_of_charge(&self) -> f64 {
        (self.charge / self.capacity_coulombs).clamp(0.0, 1.0)
    }

    #[must_use]
    pub fn open_circuit_voltage(&self) -> f64 {
        OCV_EMPTY + (OCV_FULL - OCV_EMPTY) * self.state_of_charge()
    }

    /// Voltage at the terminals while `current` flows into the cell.
    ///
    /// Discharge currents are negative.
    #[must_use]
    pub fn terminal_voltage(&self, current: f64) -> f64 {
        self.open_circuit_voltage() + current * self.resistance
    }

    /// Current a constant-voltage, current-limited charger pushes into the cell.
    #[must_use]
    pub fn charge_current(&self, voltage_limit: f64, current_limit: f64) -> f64 {
        ((voltage_limit - self.open_circuit_voltage()) / self.resistance).clamp(0.0, current_limit)
    }

    /// Moves `current` amps into the cell for `elapsed`.
    pub fn transfer(&mut self, current: f64, elapsed: Duration) {
        self.charge = (self.charge + current * elapsed.as_secs_f64()).clamp(0.0, self.capacity_coulombs);
    }
}
