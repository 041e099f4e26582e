//! Capability traits for the bench instruments and the guards that switch them off.
//!
//! The power supply and the electronic load expose different command sets, so
//! they get separate traits instead of a shared one. Every operation is a
//! blocking round-trip that may fail; controllers treat any failure as fatal
//! for the current cycle.

use alloc::vec::Vec;
use core::fmt;
use core::ops::{Deref, DerefMut};

/// Power supply output channel, numbered from 1 as on the front panel.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Channel(pub u8);

impl Channel {
    pub const CH1: Channel = Channel(1);
    pub const CH2: Channel = Channel(2);
    pub const CH3: Channel = Channel(3);

    #[must_use]
    pub const fn number(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CH{}", self.0)
    }
}

/// Anything a controller can switch on.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Output {
    Source(Channel),
    Load,
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Output::Source(channel) => write!(f, "{channel}"),
            Output::Load => f.write_str("load"),
        }
    }
}

/// Voltage, current, and power read back in one query.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Measurement {
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
}

/// Regulation mode of the electronic load.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LoadMode {
    ConstantCurrent,
    ConstantVoltage,
    ConstantPower,
    ConstantResistance,
    Led,
}

/// Programmable power supply.
pub trait ControllableSource {
    type Error;

    fn set_voltage(&mut self, channel: Channel, volts: f64) -> Result<(), Self::Error>;

    fn set_current(&mut self, channel: Channel, amps: f64) -> Result<(), Self::Error>;

    fn set_output(&mut self, channel: Channel, enabled: bool) -> Result<(), Self::Error>;

    fn measure_voltage(&mut self, channel: Channel) -> Result<f64, Self::Error>;

    fn measure_current(&mut self, channel: Channel) -> Result<f64, Self::Error>;

    /// Reads voltage, current, and power.
    ///
    /// The default issues two queries; drivers with a combined query should override it.
    fn measure_all(&mut self, channel: Channel) -> Result<Measurement, Self::Error> {
        let voltage = self.measure_voltage(channel)?;
        let current = self.measure_current(channel)?;
        Ok(Measurement {
            voltage,
            current,
            power: voltage * current,
        })
    }
}

/// Programmable electronic load.
pub trait ControllableLoad {
    type Error;

    fn set_source_mode(&mut self, mode: LoadMode) -> Result<(), Self::Error>;

    fn set_source_current(&mut self, amps: f64) -> Result<(), Self::Error>;

    fn set_source_state(&mut self, enabled: bool) -> Result<(), Self::Error>;

    fn measure_voltage(&mut self) -> Result<f64, Self::Error>;

    fn measure_current(&mut self) -> Result<f64, Self::Error>;
}

impl<T> ControllableSource for &mut T
where
    T: ControllableSource + ?Sized,
{
    type Error = T::Error;

    fn set_voltage(&mut self, channel: Channel, volts: f64) -> Result<(), Self::Error> {
        (**self).set_voltage(channel, volts)
    }

    fn set_current(&mut self, channel: Channel, amps: f64) -> Result<(), Self::Error> {
        (**self).set_current(channel, amps)
    }

    fn set_output(&mut self, channel: Channel, enabled: bool) -> Result<(), Self::Error> {
        (**self).set_output(channel, enabled)
    }

    fn measure_voltage(&mut self, channel: Channel) -> Result<f64, Self::Error> {
        (**self).measure_voltage(channel)
    }

    fn measure_current(&mut self, channel: Channel) -> Result<f64, Self::Error> {
        (**self).measure_current(channel)
    }

    fn measure_all(&mut self, channel: Channel) -> Result<Measurement, Self::Error> {
        (**self).measure_all(channel)
    }
}

impl<T> ControllableLoad for &mut T
where
    T: ControllableLoad + ?Sized,
{
    type Error = T::Error;

    fn set_source_mode(&mut self, mode: LoadMode) -> Result<(), Self::Error> {
        (**self).set_source_mode(mode)
    }

    fn set_source_current(&mut self, amps: f64) -> Result<(), Self::Error> {
        (**self).set_source_current(amps)
    }

    fn set_source_state(&mut self, enabled: bool) -> Result<(), Self::Error> {
        (**self).set_source_state(enabled)
    }

    fn measure_voltage(&mut self) -> Result<f64, Self::Error> {
        (**self).measure_voltage()
    }

    fn measure_current(&mut self) -> Result<f64, Self::Error> {
        (**self).measure_current()
    }
}

/// First failure seen while switching outputs off.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ReleaseError<E> {
    pub output: Output,
    pub error: E,
}

/// Power supply channels switched on by the current owner.
///
/// Channels are released in the order they were enabled. Dropping the guard
/// without calling [`release`](Self::release) still switches every channel
/// off, discarding errors.
pub struct SourceOutputs<'a, S>
where
    S: ControllableSource + ?Sized,
{
    source: &'a mut S,
    enabled: Vec<Channel>,
}

impl<'a, S> SourceOutputs<'a, S>
where
    S: ControllableSource + ?Sized,
{
    pub fn new(source: &'a mut S) -> Self {
        Self {
            source,
            enabled: Vec::new(),
        }
    }

    /// Switches `channel` on and tracks it for release.
    ///
    /// The channel is tracked before the command is sent, so a failed enable
    /// is still followed by an explicit disable.
    pub fn enable(&mut self, channel: Channel) -> Result<(), S::Error> {
        if !self.enabled.contains(&channel) {
            self.enabled.push(channel);
        }
        self.source.set_output(channel, true)
    }

    /// Channels currently tracked, in enable order.
    #[must_use]
    pub fn enabled(&self) -> &[Channel] {
        &self.enabled
    }

    /// Switches every tracked channel off, attempting all of them.
    pub fn release(&mut self) -> Result<(), ReleaseError<S::Error>> {
        let mut first_error = None;
        for channel in self.enabled.drain(..) {
            if let Err(error) = self.source.set_output(channel, false) {
                first_error.get_or_insert(ReleaseError {
                    output: Output::Source(channel),
                    error,
                });
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl<S> Deref for SourceOutputs<'_, S>
where
    S: ControllableSource + ?Sized,
{
    type Target = S;

    fn deref(&self) -> &S {
        self.source
    }
}

impl<S> DerefMut for SourceOutputs<'_, S>
where
    S: ControllableSource + ?Sized,
{
    fn deref_mut(&mut self) -> &mut S {
        self.source
    }
}

impl<S> Drop for SourceOutputs<'_, S>
where
    S: ControllableSource + ?Sized,
{
    fn drop(&mut self) {
        let _ = self.release();
    }
}

/// Load input switched on by the current owner.
pub struct LoadInput<'a, L>
where
    L: ControllableLoad + ?Sized,
{
    load: &'a mut L,
    engaged: bool,
}

impl<'a, L> LoadInput<'a, L>
where
    L: ControllableLoad + ?Sized,
{
    pub fn new(load: &'a mut L) -> Self {
        Self {
            load,
            engaged: false,
        }
    }

    /// Switches the input on and tracks it for release.
    pub fn engage(&mut self) -> Result<(), L::Error> {
        self.engaged = true;
        self.load.set_source_state(true)
    }

    #[must_use]
    pub const fn is_engaged(&self) -> bool {
        self.engaged
    }

    /// Switches the input off if it was engaged.
    pub fn release(&mut self) -> Result<(), ReleaseError<L::Error>> {
        if !core::mem::replace(&mut self.engaged, false) {
            return Ok(());
        }
        self.load
            .set_source_state(false)
            .map_err(|error| ReleaseError {
                output: Output::Load,
                error,
            })
    }
}

impl<L> Deref for LoadInput<'_, L>
where
    L: ControllableLoad + ?Sized,
{
    type Target = L;

    fn deref(&self) -> &L {
        self.load
    }
}

impl<L> DerefMut for LoadInput<'_, L>
where
    L: ControllableLoad + ?Sized,
{
    fn deref_mut(&mut self) -> &mut L {
        self.load
    }
}

impl<L> Drop for LoadInput<'_, L>
where
    L: ControllableLoad + ?Sized,
{
    fn drop(&mut self) {
        let _ = self.release();
    }
}
