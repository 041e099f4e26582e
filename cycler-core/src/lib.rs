#![no_std]
#![allow(clippy::missing_errors_doc)]

extern crate alloc;

// Shared logic for the battery cycler.
//
// Controllers, the orchestrator, and the SCPI codec avoid the Rust standard
// library so the same code backs the bench binary, the emulator, and the
// integration tests. Hosts plug in clocks, instruments, recorders, and
// monitors through the traits exposed here.

pub mod analysis;
pub mod clock;
pub mod cycle;
pub mod instruments;
pub mod monitor;
pub mod orchestrator;
pub mod recorder;
pub mod sample;
pub mod scpi;
pub mod spec;
pub mod telemetry;
