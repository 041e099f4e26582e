//! Siglent SDL1000X-series DC electronic load.

use cycler_core::instruments::{ControllableLoad, LoadMode};
use cycler_core::scpi::{
    Identity, KNOWN_LOAD_MODELS, LoadCommand, ReplyError, parse_bool, parse_mode, parse_number,
};
use tracing::info;

use super::{ScpiTransport, identify, non_negative};
use crate::error::DriverError;

pub struct Sdl1030x<T> {
    transport: T,
    identity: Identity,
}

impl<T> Sdl1030x<T>
where
    T: ScpiTransport,
{
    /// Identifies the instrument behind `transport` and rejects unsupported models.
    pub fn connect(mut transport: T) -> Result<Self, DriverError> {
        let identity = identify(
            &mut transport,
            "load",
            &LoadCommand::Identify.to_string(),
            &KNOWN_LOAD_MODELS,
        )?;
        info!(
            peer = transport.peer(),
            "{} {} load ready",
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

    pub fn source_mode(&mut self) -> Result<LoadMode, DriverError> {
        self.query(LoadCommand::QueryMode, parse_mode)
    }

    /// Returns `true` while the input is drawing current.
    pub fn source_state(&mut self) -> Result<bool, DriverError> {
        self.query(LoadCommand::QueryInput, parse_bool)
    }

    pub fn source_current(&mut self) -> Result<f64, DriverError> {
        self.query(LoadCommand::QueryCurrent, parse_number)
    }

    /// Regulation voltage for constant-voltage mode.
    pub fn set_source_voltage(&mut self, volts: f64) -> Result<(), DriverError> {
        let volts = non_negative("voltage", volts)?;
        self.send(LoadCommand::SetVoltage(volts))
    }

    pub fn source_voltage(&mut self) -> Result<f64, DriverError> {
        self.query(LoadCommand::QueryVoltage, parse_number)
    }

    pub fn measure_power(&mut self) -> Result<f64, DriverError> {
        self.query(LoadCommand::MeasurePower, parse_number)
    }

    pub fn measure_resistance(&mut self) -> Result<f64, DriverError> {
        self.query(LoadCommand::MeasureResistance, parse_number)
    }

    /// Reading of the external sense input.
    pub fn measure_external(&mut self) -> Result<f64, DriverError> {
        self.query(LoadCommand::MeasureExternal, parse_number)
    }

    #[must_use]
    pub fn into_transport(self) -> T {
        self.transport
    }

    fn send(&mut self, command: LoadCommand) -> Result<(), DriverError> {
        self.transport.send(&command.to_string())
    }

    fn query<V>(
        &mut self,
        command: LoadCommand,
        parse: fn(&str) -> Result<V, ReplyError>,
    ) -> Result<V, DriverError> {
        let command = command.to_string();
        let reply = self.transport.query(&command)?;
        parse(&reply).map_err(|reason| DriverError::Reply { command, reason })
    }
}

impl<T> ControllableLoad for Sdl1030x<T>
where
    T: ScpiTransport,
{
    type Error = DriverError;

    fn set_source_mode(&mut self, mode: LoadMode) -> Result<(), DriverError> {
        self.send(LoadCommand::SetMode(mode))
    }

    fn set_source_current(&mut self, amps: f64) -> Result<(), DriverError> {
        let amps = non_negative("current", amps)?;
        self.send(LoadCommand::SetCurrent(amps))
    }

    fn set_source_state(&mut self, enabled: bool) -> Result<(), DriverError> {
        self.send(LoadCommand::SetInput(enabled))
    }

    fn measure_voltage(&mut self) -> Result<f64, DriverError> {
        self.query(LoadCommand::MeasureVoltage, parse_number)
    }

    fn measure_current(&mut self) -> Result<f64, DriverError> {
        self.query(LoadCommand::MeasureCurrent, parse_number)
    }
}
