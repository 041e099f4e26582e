//! Simulated power supply and electronic load wired to one cell.
//!
//! Both instruments and the [`VirtualClock`](crate::clock::VirtualClock) share
//! a single [`Simulator`] through a [`SimHandle`]. Every command and query
//! counts towards an optional fault trigger, and every query advances virtual
//! time by the configured latency.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use cycler_core::cycle::ChargeWiring;
use cycler_core::instruments::{Channel, ControllableLoad, ControllableSource, LoadMode};
use thiserror::Error;
use tracing::debug;

use crate::cell::SimulatedCell;

/// Current drawn by the relay coil while its channel is on.
pub const RELAY_COIL_CURRENT: f64 = 0.08;

/// Integration step used when virtual time advances.
const STEP: Duration = Duration::from_millis(100);

const CHANNELS: usize = 3;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimError {
    #[error("channel {0} does not exist")]
    NoSuchChannel(u8),
    #[error("negative setpoint {0}")]
    NegativeSetpoint(f64),
    #[error("injected fault on command {0}")]
    Injected(usize),
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ChannelState {
    pub voltage: f64,
    pub current: f64,
    pub enabled: bool,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct LoadState {
    pub mode: LoadMode,
    pub current: f64,
    pub enabled: bool,
}

/// Shared state of the simulated bench.
#[derive(Clone, Debug)]
pub struct Simulator {
    now: Duration,
    cell: SimulatedCell,
    wiring: ChargeWiring,
    channels: [ChannelState; CHANNELS],
    load: LoadState,
    latency: Duration,
    commands: usize,
    fail_at: Option<usize>,
}

pub type SimHandle = Rc<RefCell<Simulator>>;

impl Simulator {
    #[must_use]
    pub fn new(cell: SimulatedCell, wiring: ChargeWiring) -> Self {
        Self {
            now: Duration::ZERO,
            cell,
            wiring,
            channels: [ChannelState::default(); CHANNELS],
            load: LoadState {
                mode: LoadMode::ConstantCurrent,
                current: 0.0,
                enabled: false,
            },
            latency: Duration::ZERO,
            commands: 0,
            fail_at: None,
        }
    }

    /// Time each query takes to answer.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fails the `command`th command or query (1-based), once.
    #[must_use]
    pub fn with_fault_at(mut self, command: Option<usize>) -> Self {
        self.fail_at = command;
        self
    }

    #[must_use]
    pub fn into_handle(self) -> SimHandle {
        Rc::new(RefCell::new(self))
    }

    #[must_use]
    pub fn now(&self) -> Duration {
        self.now
    }

    #[must_use]
    pub fn cell(&self) -> &SimulatedCell {
        &self.cell
    }

    #[must_use]
    pub fn load(&self) -> LoadState {
        self.load
    }

    #[must_use]
    pub fn commands(&self) -> usize {
        self.commands
    }

    pub fn channel(&self, channel: Channel) -> Result<ChannelState, SimError> {
        self.channels
            .get(Self::index(channel)?)
            .copied()
            .ok_or(SimError::NoSuchChannel(channel.number()))
    }

    /// Returns `true` when no supply channel is on and the load input is off.
    #[must_use]
    pub fn outputs_off(&self) -> bool {
        !self.load.enabled && self.channels.iter().all(|channel| !channel.enabled)
    }

    fn index(channel: Channel) -> Result<usize, SimError> {
        match usize::from(channel.number()) {
            number @ 1..=CHANNELS => Ok(number - 1),
            _ => Err(SimError::NoSuchChannel(channel.number())),
        }
    }

    fn channel_mut(&mut self, channel: Channel) -> Result<&mut ChannelState, SimError> {
        let index = Self::index(channel)?;
        Ok(&mut self.channels[index])
    }

    fn command(&mut self) -> Result<(), SimError> {
        self.commands += 1;
        if self.fail_at == Some(self.commands) {
            debug!(command = self.commands, "injecting instrument fault");
            return Err(SimError::Injected(self.commands));
        }
        Ok(())
    }

    fn query(&mut self) -> Result<(), SimError> {
        self.command()?;
        self.advance(self.latency);
        Ok(())
    }

    fn charger_connected(&self) -> bool {
        let relay_closed = self.wiring.relay.is_none_or(|relay| {
            self.channel(relay.channel)
                .is_ok_and(|state| state.enabled)
        });
        relay_closed
            && self
                .channel(self.wiring.charger)
                .is_ok_and(|state| state.enabled)
    }

    fn charger_current(&self) -> f64 {
        if !self.charger_connected() {
            return 0.0;
        }
        self.channel(self.wiring.charger)
            .map_or(0.0, |state| self.cell.charge_current(state.voltage, state.current))
    }

    fn load_current(&self) -> f64 {
        match self.load {
            LoadState {
                enabled: true,
                mode: LoadMode::ConstantCurrent,
                current,
            } => current,
            _ => 0.0,
        }
    }

    /// Net current into the cell.
    fn cell_current(&self) -> f64 {
        self.charger_current() - self.load_current()
    }

    /// Moves virtual time forward, integrating the cell as it goes.
    pub fn advance(&mut self, by: Duration) {
        let mut remaining = by;
        while !remaining.is_zero() {
            let step = remaining.min(STEP);
            let current = self.cell_current();
            self.cell.transfer(current, step);
            self.now += step;
            remaining -= step;
        }
    }

    fn source_voltage(&self, channel: Channel) -> Result<f64, SimError> {
        let state = self.channel(channel)?;
        if !state.enabled {
            return Ok(0.0);
        }
        if channel == self.wiring.charger && self.charger_connected() {
            return Ok(self.cell.terminal_voltage(self.cell_current()));
        }
        Ok(state.voltage)
    }

    fn source_current(&self, channel: Channel) -> Result<f64, SimError> {
        let state = self.channel(channel)?;
        if !state.enabled {
            return Ok(0.0);
        }
        if channel == self.wiring.charger {
            return Ok(self.charger_current());
        }
        let relay = self.wiring.relay.map(|relay| relay.channel);
        Ok(if relay == Some(channel) {
            RELAY_COIL_CURRENT.min(state.current)
        } else {
            0.0
        })
    }
}

fn non_negative(value: f64) -> Result<f64, SimError> {
    if value < 0.0 {
        Err(SimError::NegativeSetpoint(value))
    } else {
        Ok(value)
    }
}

/// Three-channel power supply front end.
#[derive(Clone, Debug)]
pub struct SimPowerSupply {
    sim: SimHandle,
}

impl SimPowerSupply {
    #[must_use]
    pub fn new(sim: &SimHandle) -> Self {
        Self { sim: Rc::clone(sim) }
    }
}

impl ControllableSource for SimPowerSupply {
    type Error = SimError;

    fn set_voltage(&mut self, channel: Channel, volts: f64) -> Result<(), SimError> {
        let mut sim = self.sim.borrow_mut();
        sim.command()?;
        sim.channel_mut(channel)?.voltage = non_negative(volts)?;
        Ok(())
    }

    fn set_current(&mut self, channel: Channel, amps: f64) -> Result<(), SimError> {
        let mut sim = self.sim.borrow_mut();
        sim.command()?;
        sim.channel_mut(channel)?.current = non_negative(amps)?;
        Ok(())
    }

    fn set_output(&mut self, channel: Channel, enabled: bool) -> Result<(), SimError> {
        let mut sim = self.sim.borrow_mut();
        sim.command()?;
        sim.channel_mut(channel)?.enabled = enabled;
        debug!(%channel, enabled, at = ?sim.now(), "supply output");
        Ok(())
    }

    fn measure_voltage(&mut self, channel: Channel) -> Result<f64, SimError> {
        let mut sim = self.sim.borrow_mut();
        sim.query()?;
        sim.source_voltage(channel)
    }

    fn measure_current(&mut self, channel: Channel) -> Result<f64, SimError> {
        let mut sim = self.sim.borrow_mut();
        sim.query()?;
        sim.source_current(channel)
    }
}

/// Single-input electronic load front end.
#[derive(Clone, Debug)]
pub struct SimLoad {
    sim: SimHandle,
}

impl SimLoad {
    #[must_use]
    pub fn new(sim: &SimHandle) -> Self {
        Self { sim: Rc::clone(sim) }
    }
}

impl ControllableLoad for SimLoad {
    type Error = SimError;

    fn set_source_mode(&mut self, mode: LoadMode) -> Result<(), SimError> {
        let mut sim = self.sim.borrow_mut();
        sim.command()?;
        sim.load.mode = mode;
        Ok(())
    }

    fn set_source_current(&mut self, amps: f64) -> Result<(), SimError> {
        let mut sim = self.sim.borrow_mut();
        sim.command()?;
        sim.load.current = non_negative(amps)?;
        Ok(())
    }

    fn set_source_state(&mut self, enabled: bool) -> Result<(), SimError> {
        let mut sim = self.sim.borrow_mut();
        sim.command()?;
        sim.load.enabled = enabled;
        debug!(enabled, at = ?sim.now(), "load input");
        Ok(())
    }

    fn measure_voltage(&mut self) -> Result<f64, SimError> {
        let mut sim = self.sim.borrow_mut();
        sim.query()?;
        Ok(sim.cell.terminal_voltage(sim.cell_current()))
    }

    fn measure_current(&mut self) -> Result<f64, SimError> {
        let mut sim = self.sim.borrow_mut();
        sim.query()?;
        Ok(sim.load_current())
    }
}
