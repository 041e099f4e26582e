//! Built-in battery profiles.
//!
//! Pulse and rest parameters are not part of a cell datasheet; the defaults
//! below are the bench settings used for small single-cell packs. Profiles are
//! plain constants so a configuration file can start from one and override
//! individual fields.

use core::time::Duration;

use super::BatterySpec;

/// Settle time before the pulse voltage is sampled.
pub const DEFAULT_PULSE_SETTLE: Duration = Duration::from_secs(2);
/// Spacing between resistance pulses.
pub const DEFAULT_PULSE_SPACING: Duration = Duration::from_secs(120);
/// Dead time between phases.
pub const DEFAULT_REST: Duration = Duration::from_mins(5);
/// Charge/discharge repetitions per run.
pub const DEFAULT_CYCLES: u32 = 2;

/// 850 mAh, 4.2 V lithium-polymer cell charged at 1C and discharged at 0.1C.
pub const LIPO_850MAH: BatterySpec = BatterySpec {
    nominal_capacity_mah: 850.0,
    charge_voltage: 4.2,
    charge_current: 0.85,
    charge_termination_current: 0.085,
    discharge_current: 0.085,
    discharge_termination_voltage: 3.0,
    pulse_discharge_current: 0.85,
    pulse_settle_time: Duration::from_secs(3),
    pulse_spacing: Duration::from_secs(60),
    number_of_cycles: DEFAULT_CYCLES,
    rest_charge_to_discharge: DEFAULT_REST,
    rest_discharge_to_charge: DEFAULT_REST,
};

/// 1000 mAh, 4.35 V high-voltage lithium-polymer cell charged at 0.5C.
///
/// The pulse runs at twice the discharge current.
pub const LIHV_1000MAH: BatterySpec = BatterySpec {
    nominal_capacity_mah: 1000.0,
    charge_voltage: 4.35,
    charge_current: 0.5,
    charge_termination_current: 0.05,
    discharge_current: 0.2,
    discharge_termination_voltage: 3.0,
    pulse_discharge_current: 0.4,
    pulse_settle_time: DEFAULT_PULSE_SETTLE,
    pulse_spacing: DEFAULT_PULSE_SPACING,
    number_of_cycles: DEFAULT_CYCLES,
    rest_charge_to_discharge: DEFAULT_REST,
    rest_discharge_to_charge: DEFAULT_REST,
};

/// Names accepted by [`by_name`].
pub const PROFILE_NAMES: [&str; 2] = ["lipo-850", "lihv-1000"];

/// Returns the 850 mAh lithium-polymer profile.
#[must_use]
pub fn lipo_850mah() -> BatterySpec {
    LIPO_850MAH
}

/// Returns the 1000 mAh high-voltage profile.
#[must_use]
pub fn lihv_1000mah() -> BatterySpec {
    LIHV_1000MAH
}

/// Looks up a built-in profile, ignoring ASCII case.
#[must_use]
pub fn by_name(name: &str) -> Option<BatterySpec> {
    if name.eq_ignore_ascii_case(PROFILE_NAMES[0]) {
        Some(lipo_850mah())
    } else if name.eq_ignore_ascii_case(PROFILE_NAMES[1]) {
        Some(lihv_1000mah())
    } else {
        None
    }
}
