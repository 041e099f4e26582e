//! Rigol DP800-series programmable power supply.

use cycler_core::instruments::{Channel, ControllableSource, Measurement};
use cycler_core::scpi::{
    Identity, KNOWN_SOURCE_MODELS, PsuCommand, ReplyError, parse_measurement, parse_number,
};
use tracing::info;

use super::{ScpiTransport, identify, non_negative};
use crate::error::DriverError;

pub struct Dp8xx<T> {
    transport: T,
    identity: Identity,
}

impl<T> Dp8xx<T>
where
    T: ScpiTransport,
{
    /// Identifies the instrument behind `transport` and rejects unsupported models.
    pub fn connect(mut transport: T) -> Result<Self, DriverError> {
        let identity = identify(
            &mut transport,
            "power supply",
            &PsuCommand::Identify.to_string(),
            &KNOWN_SOURCE_MODELS,
        )?;
        info!(
            peer = transport.peer(),
            "{} {} power supply ready",
            identity.vendor(),
            identity.model
        );
        Ok(Self {
            transport,
            identity,
        })
    }

    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Programmed voltage limit of `channel`.
    pub fn voltage_setpoint(&mut self, channel: Channel) -> Result<f64, DriverError> {
        self.query(PsuCommand::QueryVoltageSetpoint(channel), parse_number)
    }

    /// Programmed current limit of `channel`.
    pub fn current_setpoint(&mut self, channel: Channel) -> Result<f64, DriverError> {
        self.query(PsuCommand::QueryCurrentSetpoint(channel), parse_number)
    }

    pub fn measure_power(&mut self, channel: Channel) -> Result<f64, DriverError> {
        self.query(PsuCommand::MeasurePower(channel), parse_number)
    }

    #[must_use]
    pub fn into_transport(self) -> T {
        self.transport
    }

    fn send(&mut self, command: PsuCommand) -> Result<(), DriverError> {
        self.transport.send(&command.to_string())
    }

    fn query<V>(
        &mut self,
        command: PsuCommand,
        parse: fn(&str) -> Result<V, ReplyError>,
    ) -> Result<V, DriverError> {
        let command = command.to_string();
        let reply = self.transport.query(&command)?;
        parse(&reply).map_err(|reason| DriverError::Reply { command, reason })
    }
}

impl<T> ControllableSource for Dp8xx<T>
where
    T: ScpiTransport,
{
    type Error = DriverError;

    fn set_voltage(&mut self, channel: Channel, volts: f64) -> Result<(), DriverError> {
        let volts = non_negative("voltage", volts)?;
        self.send(PsuCommand::SetVoltage { channel, volts })
    }

    fn set_current(&mut self, channel: Channel, amps: f64) -> Result<(), DriverError> {
        let amps = non_negative("current", amps)?;
        self.send(PsuCommand::SetCurrent { channel, amps })
    }

    fn set_output(&mut self, channel: Channel, enabled: bool) -> Result<(), DriverError> {
        self.send(PsuCommand::SetOutput { channel, enabled })
    }

    fn measure_voltage(&mut self, channel: Channel) -> Result<f64, DriverError> {
        self.query(PsuCommand::MeasureVoltage(channel), parse_number)
    }

    fn measure_current(&mut self, channel: Channel) -> Result<f64, DriverError> {
        self.query(PsuCommand::MeasureCurrent(channel), parse_number)
    }

    fn measure_all(&mut self, channel: Channel) -> Result<Measurement, DriverError> {
        self.query(PsuCommand::MeasureAll(channel), parse_measurement)
    }
}
