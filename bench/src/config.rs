//! Bench configuration file.
//!
//! Every section is optional. Battery parameters fall back to the selected
//! built-in profile, or to `lipo-850` when the `[battery]` table is empty.
//! Durations are whole seconds.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cycler_core::cycle::charge::DEFAULT_RELAY;
use cycler_core::cycle::{ChargeWiring, RelayWiring};
use cycler_core::instruments::Channel;
use cycler_core::spec::profiles::{
    DEFAULT_CYCLES, DEFAULT_PULSE_SETTLE, DEFAULT_PULSE_SPACING, DEFAULT_REST,
};
use cycler_core::spec::{BatterySpec, PROFILE_NAMES, by_name};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::hw::{DEFAULT_TIMEOUT, TransportOptions};

const SUPPLY_CHANNELS: u8 = 3;

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BenchConfig {
    pub battery: BatteryConfig,
    pub test: TestConfig,
    pub instruments: InstrumentsConfig,
    pub output: OutputConfig,
}

/// Cell ratings; unset fields come from `profile`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BatteryConfig {
    pub profile: Option<String>,
    pub nominal_capacity_mah: Option<f64>,
    pub charge_voltage: Option<f64>,
    pub charge_current: Option<f64>,
    pub charge_termination_current: Option<f64>,
    pub discharge_current: Option<f64>,
    pub discharge_termination_voltage: Option<f64>,
}

impl BatteryConfig {
    fn has_ratings(&self) -> bool {
        [
            self.nominal_capacity_mah,
            self.charge_voltage,
            self.charge_current,
            self.charge_termination_current,
            self.discharge_current,
            self.discharge_termination_voltage,
        ]
        .iter()
        .any(Option::is_some)
    }
}

/// Test plan; unset fields come from the profile.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct TestConfig {
    pub number_of_cycles: Option<u32>,
    pub pulse_discharge_current: Option<f64>,
    pub pulse_settle_secs: Option<u64>,
    pub pulse_spacing_secs: Option<u64>,
    pub rest_charge_to_discharge_secs: Option<u64>,
    pub rest_discharge_to_charge_secs: Option<u64>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct InstrumentsConfig {
    /// `host:port` of the power supply's raw SCPI socket.
    pub power_supply: String,
    /// `host:port` of the load's raw SCPI socket.
    pub load: String,
    pub timeout_secs: u64,
    /// Pause after every write; zero disables it.
    pub write_delay_ms: u64,
    pub charger_channel: u8,
    pub relay_channel: u8,
    /// Charge through the isolation relay.
    pub use_relay: bool,
}

impl Default for InstrumentsConfig {
    fn default() -> Self {
        Self {
            power_supply: "10.0.0.10:5555".to_string(),
            load: "10.0.0.11:5025".to_string(),
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            write_delay_ms: 0,
            charger_channel: 2,
            relay_channel: DEFAULT_RELAY.channel.number(),
            use_relay: true,
        }
    }
}

impl InstrumentsConfig {
    #[must_use]
    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            timeout: Duration::from_secs(self.timeout_secs),
            write_delay: (self.write_delay_ms > 0)
                .then(|| Duration::from_millis(self.write_delay_ms)),
        }
    }

    /// How the charger reaches the cell.
    pub fn wiring(&self) -> Result<ChargeWiring, ConfigError> {
        let charger = channel(self.charger_channel)?;
        if !self.use_relay {
            return Ok(ChargeWiring::direct(charger));
        }

        let relay = channel(self.relay_channel)?;
        if relay == charger {
            return Err(ConfigError::SharedChannel(relay.number()));
        }
        Ok(ChargeWiring {
            charger,
            relay: Some(RelayWiring {
                channel: relay,
                ..DEFAULT_RELAY
            }),
        })
    }
}

fn channel(number: u8) -> Result<Channel, ConfigError> {
    if (1..=SUPPLY_CHANNELS).contains(&number) {
        Ok(Channel(number))
    } else {
        Err(ConfigError::InvalidChannel(number))
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    pub directory: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
        }
    }
}

impl BenchConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Resolves every battery and test parameter and validates the result.
    pub fn spec(&self) -> Result<BatterySpec, ConfigError> {
        let battery = &self.battery;
        let profile = match &battery.profile {
            Some(name) => Some(
                by_name(name).ok_or_else(|| ConfigError::UnknownProfile(name.clone()))?,
            ),
            None if battery.has_ratings() => None,
            None => by_name(PROFILE_NAMES[0]),
        };

        let rating = |value: Option<f64>, field: &'static str, pick: fn(&BatterySpec) -> f64| {
            value
                .or_else(|| profile.as_ref().map(pick))
                .ok_or(ConfigError::MissingField(field))
        };
        let nominal_capacity_mah = rating(
            battery.nominal_capacity_mah,
            "nominal_capacity_mah",
            |spec| spec.nominal_capacity_mah,
        )?;
        let charge_voltage = rating(battery.charge_voltage, "charge_voltage", |spec| {
            spec.charge_voltage
        })?;
        let charge_current = rating(battery.charge_current, "charge_current", |spec| {
            spec.charge_current
        })?;
        let charge_termination_current = rating(
            battery.charge_termination_current,
            "charge_termination_current",
            |spec| spec.charge_termination_current,
        )?;
        let discharge_current = rating(battery.discharge_current, "discharge_current", |spec| {
            spec.discharge_current
        })?;
        let discharge_termination_voltage = rating(
            battery.discharge_termination_voltage,
            "discharge_termination_voltage",
            |spec| spec.discharge_termination_voltage,
        )?;

        let test = &self.test;
        let plan = |value: Option<u64>, pick: fn(&BatterySpec) -> Duration, default: Duration| {
            value.map_or_else(
                || profile.as_ref().map_or(default, pick),
                Duration::from_secs,
            )
        };
        let spec = BatterySpec {
            nominal_capacity_mah,
            charge_voltage,
            charge_current,
            charge_termination_current,
            discharge_current,
            discharge_termination_voltage,
            pulse_discharge_current: test.pulse_discharge_current.unwrap_or_else(|| {
                profile
                    .as_ref()
                    .map_or(2.0 * discharge_current, |spec| spec.pulse_discharge_current)
            }),
            pulse_settle_time: plan(
                test.pulse_settle_secs,
                |spec| spec.pulse_settle_time,
                DEFAULT_PULSE_SETTLE,
            ),
            pulse_spacing: plan(
                test.pulse_spacing_secs,
                |spec| spec.pulse_spacing,
                DEFAULT_PULSE_SPACING,
            ),
            number_of_cycles: test.number_of_cycles.unwrap_or_else(|| {
                profile
                    .as_ref()
                    .map_or(DEFAULT_CYCLES, |spec| spec.number_of_cycles)
            }),
            rest_charge_to_discharge: plan(
                test.rest_charge_to_discharge_secs,
                |spec| spec.rest_charge_to_discharge,
                DEFAULT_REST,
            ),
            rest_discharge_to_charge: plan(
                test.rest_discharge_to_charge_secs,
                |spec| spec.rest_discharge_to_charge,
                DEFAULT_REST,
            ),
        };

        spec.validate().map_err(ConfigError::Spec)?;
        Ok(spec)
    }
}
