//! Host side of the battery cycler for real bench instruments.
//!
//! Connects to a Rigol DP800 power supply and a Siglent SDL1000X load over
//! raw SCPI sockets, persists every series as CSV, and reports progress on
//! the console while the shared controllers run the test plan.

#![allow(clippy::missing_errors_doc)]

pub mod clock;
pub mod config;
pub mod error;
pub mod hw;
pub mod interrupt;
pub mod plan;
pub mod recorder;
pub mod status;

pub use clock::HostClock;
pub use config::BenchConfig;
pub use error::{ConfigError, DriverError, RecorderError};
pub use interrupt::StopFlag;
pub use plan::{describe_estimate, run_plan};
pub use recorder::{CsvRecorder, RunNaming, read_series};
pub use status::ConsoleMonitor;
