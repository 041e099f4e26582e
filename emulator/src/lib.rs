//! Host-side emulator: a simulated cell behind simulated instruments, driven at virtual time.

#![allow(clippy::missing_errors_doc)]

pub mod cell;
pub mod clock;
pub mod instruments;
pub mod session;
pub mod simulation;

pub use cell::{CellParams, SimulatedCell};
pub use clock::VirtualClock;
pub use instruments::{SimError, SimHandle, SimLoad, SimPowerSupply, Simulator};
pub use session::TranscriptMonitor;
pub use simulation::{SimulationConfig, SimulationError, SimulationOutcome, run};
