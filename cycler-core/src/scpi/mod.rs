//! SCPI command encoding and reply parsing for the bench instruments.
//!
//! Commands are plain `Display` values so a transport can write them with a
//! single `write!`. Replies are parsed with `winnow` combinators; every parser
//! must consume the whole reply (after trimming line terminators) or the
//! reply is reported as malformed.

use alloc::string::{String, ToString};
use core::fmt;

use winnow::ascii::{Caseless, float, multispace0};
use winnow::combinator::{alt, delimited};
use winnow::error::ContextError;
use winnow::prelude::*;
use winnow::token::{rest, take_till};

use crate::instruments::{Channel, LoadMode, Measurement};

/// Power supply models the driver has been exercised against.
pub const KNOWN_SOURCE_MODELS: [&str; 2] = ["DP832A", "DP832"];
/// Electronic load models the driver has been exercised against.
pub const KNOWN_LOAD_MODELS: [&str; 2] = ["SDL1030X", "SDL1030X-E"];

/// Commands understood by the DP800-series power supplies.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum PsuCommand {
    Identify,
    SetVoltage { channel: Channel, volts: f64 },
    SetCurrent { channel: Channel, amps: f64 },
    SetOutput { channel: Channel, enabled: bool },
    QueryVoltageSetpoint(Channel),
    QueryCurrentSetpoint(Channel),
    MeasureVoltage(Channel),
    MeasureCurrent(Channel),
    MeasurePower(Channel),
    MeasureAll(Channel),
}

impl fmt::Display for PsuCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PsuCommand::Identify => f.write_str("*IDN?"),
            PsuCommand::SetVoltage { channel, volts } => {
                write!(f, "SOUR{}:VOLT {volts:.3}", channel.number())
            }
            PsuCommand::SetCurrent { channel, amps } => {
                write!(f, "SOUR{}:CURR {amps:.3}", channel.number())
            }
            PsuCommand::SetOutput { channel, enabled } => {
                let state = if *enabled { "ON" } else { "OFF" };
                write!(f, "OUTP {channel},{state}")
            }
            PsuCommand::QueryVoltageSetpoint(channel) => {
                write!(f, "SOUR{}:VOLT?", channel.number())
            }
            PsuCommand::QueryCurrentSetpoint(channel) => {
                write!(f, "SOUR{}:CURR?", channel.number())
            }
            PsuCommand::MeasureVoltage(channel) => write!(f, "MEAS:VOLT? {channel}"),
            PsuCommand::MeasureCurrent(channel) => write!(f, "MEAS:CURR? {channel}"),
            PsuCommand::MeasurePower(channel) => write!(f, "MEAS:POWE? {channel}"),
            PsuCommand::MeasureAll(channel) => write!(f, "MEAS:ALL? {channel}"),
        }
    }
}

/// Commands understood by the SDL1000X-series electronic loads.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum LoadCommand {
    Identify,
    MeasureVoltage,
    MeasureCurrent,
    MeasurePower,
    MeasureResistance,
    MeasureExternal,
    SetInput(bool),
    QueryInput,
    SetMode(LoadMode),
    QueryMode,
    SetCurrent(f64),
    QueryCurrent,
    SetVoltage(f64),
    QueryVoltage,
}

impl fmt::Display for LoadCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadCommand::Identify => f.write_str("*IDN?"),
            LoadCommand::MeasureVoltage => f.write_str("MEAS:VOLT:DC?"),
            LoadCommand::MeasureCurrent => f.write_str("MEAS:CURR:DC?"),
            LoadCommand::MeasurePower => f.write_str("MEAS:POW:DC?"),
            LoadCommand::MeasureResistance => f.write_str("MEAS:RES:DC?"),
            LoadCommand::MeasureExternal => f.write_str("MEAS:EXT?"),
            LoadCommand::SetInput(enabled) => {
                write!(f, "SOUR:INP:STAT {}", u8::from(*enabled))
            }
            LoadCommand::QueryInput => f.write_str("SOUR:INP:STAT?"),
            LoadCommand::SetMode(mode) => write!(f, "SOUR:FUNC {}", mode_keyword(*mode)),
            LoadCommand::QueryMode => f.write_str("SOUR:FUNC?"),
            LoadCommand::SetCurrent(amps) => write!(f, "SOUR:CURR:LEV:IMM {amps}"),
            LoadCommand::QueryCurrent => f.write_str("SOUR:CURR:LEV:IMM?"),
            LoadCommand::SetVoltage(volts) => write!(f, "SOUR:VOLT:LEV:IMM {volts}"),
            LoadCommand::QueryVoltage => f.write_str("SOUR:VOLT:LEV:IMM?"),
        }
    }
}

const fn mode_keyword(mode: LoadMode) -> &'static str {
    match mode {
        LoadMode::ConstantCurrent => "CC",
        LoadMode::ConstantVoltage => "CV",
        LoadMode::ConstantPower => "CP",
        LoadMode::ConstantResistance => "CR",
        LoadMode::Led => "LED",
    }
}

/// Reply that did not match the expected shape.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplyError {
    pub expected: &'static str,
    pub reply: String,
}

impl ReplyError {
    fn new(expected: &'static str, reply: &str) -> Self {
        Self {
            expected,
            reply: reply.to_string(),
        }
    }
}

impl fmt::Display for ReplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expected {}, got {:?}", self.expected, self.reply)
    }
}

/// Fields of an `*IDN?` reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub manufacturer: String,
    pub model: String,
    pub serial: String,
    pub firmware: String,
}

impl Identity {
    /// Short vendor name for log lines.
    #[must_use]
    pub fn vendor(&self) -> &str {
        if self.manufacturer.eq_ignore_ascii_case("RIGOL TECHNOLOGIES") {
            "Rigol"
        } else if self.manufacturer.eq_ignore_ascii_case("Siglent Technologies") {
            "Siglent"
        } else {
            &self.manufacturer
        }
    }

    /// Returns `true` when the model appears in `known`.
    #[must_use]
    pub fn is_known(&self, known: &[&str]) -> bool {
        known
            .iter()
            .any(|model| model.eq_ignore_ascii_case(&self.model))
    }
}

fn terminators(reply: &str) -> &str {
    reply.trim_end_matches(['\r', '\n'])
}

fn number(input: &mut &str) -> Result<f64, ContextError> {
    delimited(multispace0, float, multispace0).parse_next(input)
}

fn field<'a>(input: &mut &'a str) -> Result<&'a str, ContextError> {
    take_till(0.., ',').map(str::trim).parse_next(input)
}

fn remainder<'a>(input: &mut &'a str) -> Result<&'a str, ContextError> {
    rest.map(str::trim).parse_next(input)
}

/// Parses a single numeric reply such as `4.2000`.
pub fn parse_number(reply: &str) -> Result<f64, ReplyError> {
    number
        .parse(terminators(reply))
        .map_err(|_| ReplyError::new("number", reply))
}

/// Parses the `voltage,current,power` reply to `MEAS:ALL?`.
pub fn parse_measurement(reply: &str) -> Result<Measurement, ReplyError> {
    (number, ',', number, ',', number)
        .map(|(voltage, _, current, _, power)| Measurement {
            voltage,
            current,
            power,
        })
        .parse(terminators(reply))
        .map_err(|_| ReplyError::new("voltage,current,power", reply))
}

/// Parses a `manufacturer,model,serial,firmware` identity reply.
pub fn parse_identity(reply: &str) -> Result<Identity, ReplyError> {
    (field, ',', field, ',', field, ',', remainder)
        .map(|(manufacturer, _, model, _, serial, _, firmware)| Identity {
            manufacturer: manufacturer.to_string(),
            model: model.to_string(),
            serial: serial.to_string(),
            firmware: firmware.to_string(),
        })
        .parse(terminators(reply))
        .map_err(|_| ReplyError::new("manufacturer,model,serial,firmware", reply))
}

fn state(input: &mut &str) -> Result<bool, ContextError> {
    delimited(
        multispace0,
        alt((
            '1'.value(true),
            '0'.value(false),
            Caseless("ON").value(true),
            Caseless("OFF").value(false),
        )),
        multispace0,
    )
    .parse_next(input)
}

fn mode(input: &mut &str) -> Result<LoadMode, ContextError> {
    delimited(
        multispace0,
        alt((
            Caseless("CURRENT").value(LoadMode::ConstantCurrent),
            Caseless("VOLTAGE").value(LoadMode::ConstantVoltage),
            Caseless("POWER").value(LoadMode::ConstantPower),
            Caseless("RESISTANCE").value(LoadMode::ConstantResistance),
            Caseless("LED").value(LoadMode::Led),
        )),
        multispace0,
    )
    .parse_next(input)
}

/// Parses an on/off state reply (`1`, `0`, `ON`, `OFF`).
pub fn parse_bool(reply: &str) -> Result<bool, ReplyError> {
    state
        .parse(terminators(reply))
        .map_err(|_| ReplyError::new("on/off state", reply))
}

/// Parses the `SOUR:FUNC?` reply, which spells modes out in full.
pub fn parse_mode(reply: &str) -> Result<LoadMode, ReplyError> {
    mode.parse(terminators(reply))
        .map_err(|_| ReplyError::new("load mode", reply))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::format;

    #[test]
    fn encodes_supply_commands() {
        let cases = [
            (
                PsuCommand::SetVoltage {
                    channel: Channel::CH2,
                    volts: 4.2,
                },
                "SOUR2:VOLT 4.200",
            ),
            (
                PsuCommand::SetCurrent {
                    channel: Channel::CH2,
                    amps: 0.85,
                },
                "SOUR2:CURR 0.850",
            ),
            (
                PsuCommand::SetOutput {
                    channel: Channel::CH1,
                    enabled: true,
                },
                "OUTP CH1,ON",
            ),
            (PsuCommand::MeasureAll(Channel::CH2), "MEAS:ALL? CH2"),
            (PsuCommand::QueryVoltageSetpoint(Channel::CH3), "SOUR3:VOLT?"),
        ];

        for (command, expected) in cases {
            assert_eq!(format!("{command}"), expected);
        }
    }

    #[test]
    fn encodes_load_commands() {
        assert_eq!(format!("{}", LoadCommand::SetInput(true)), "SOUR:INP:STAT 1");
        assert_eq!(format!("{}", LoadCommand::SetInput(false)), "SOUR:INP:STAT 0");
        assert_eq!(
            format!("{}", LoadCommand::SetMode(LoadMode::ConstantCurrent)),
            "SOUR:FUNC CC"
        );
        assert_eq!(
            format!("{}", LoadCommand::SetCurrent(0.085)),
            "SOUR:CURR:LEV:IMM 0.085"
        );
        assert_eq!(format!("{}", LoadCommand::MeasureVoltage), "MEAS:VOLT:DC?");
    }

    #[test]
    fn parses_numbers_with_terminators() {
        assert_eq!(parse_number("4.1985\n"), Ok(4.1985));
        assert_eq!(parse_number(" -0.002\r\n"), Ok(-0.002));
        assert_eq!(parse_number("1.2E-3"), Ok(0.0012));
        assert!(parse_number("4.19V").is_err());
        assert!(parse_number("").is_err());
    }

    #[test]
    fn parses_measure_all_reply() {
        let reading = parse_measurement("4.2000,0.8500,3.5700\n").expect("valid");
        assert_eq!(
            reading,
            Measurement {
                voltage: 4.2,
                current: 0.85,
                power: 3.57,
            }
        );
        assert!(parse_measurement("4.2,0.85").is_err());
    }

    #[test]
    fn parses_identity_and_vendor() {
        let identity =
            parse_identity("RIGOL TECHNOLOGIES,DP832A,DP8C000001,00.01.16\n").expect("valid");
        assert_eq!(identity.model, "DP832A");
        assert_eq!(identity.serial, "DP8C000001");
        assert_eq!(identity.firmware, "00.01.16");
        assert_eq!(identity.vendor(), "Rigol");
        assert!(identity.is_known(&KNOWN_SOURCE_MODELS));
        assert!(!identity.is_known(&KNOWN_LOAD_MODELS));

        assert!(parse_identity("garbage").is_err());
    }

    #[test]
    fn parses_states_and_modes() {
        assert_eq!(parse_bool("1\n"), Ok(true));
        assert_eq!(parse_bool("off"), Ok(false));
        assert!(parse_bool("maybe").is_err());

        assert_eq!(parse_mode("CURRENT\n"), Ok(LoadMode::ConstantCurrent));
        assert_eq!(parse_mode("led"), Ok(LoadMode::Led));
        assert!(parse_mode("CC-CV").is_err());
    }
}
