//! Whole-run simulation: a profile driven through the orchestrator at virtual time.

use std::convert::Infallible;
use std::io::{self, Write};
use std::time::Duration;

use cycler_core::cycle::{ChargeWiring, CycleEnv};
use cycler_core::orchestrator::{CycleOrchestrator, RunSummary};
use cycler_core::recorder::MemoryRecorder;
use cycler_core::spec::{BatterySpec, SpecError};
use cycler_core::telemetry::ShortDuration;
use thiserror::Error;
use tracing::info;

use crate::cell::{CellParams, SimulatedCell};
use crate::clock::VirtualClock;
use crate::instruments::{SimError, SimHandle, SimLoad, SimPowerSupply, Simulator};
use crate::session::{DEFAULT_SAMPLE_STRIDE, TranscriptMonitor};

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("invalid battery spec: {0}")]
    Spec(SpecError),
    #[error("transcript: {0}")]
    Transcript(#[from] io::Error),
}

/// Everything needed to reproduce one simulated run.
#[derive(Clone, Debug)]
pub struct SimulationConfig {
    pub spec: BatterySpec,
    pub wiring: ChargeWiring,
    pub cell: CellParams,
    /// Time each instrument query takes.
    pub latency: Duration,
    /// Fails this instrument command (1-based) once.
    pub fault_at_command: Option<usize>,
    /// Virtual time at which the operator asks the run to stop.
    pub stop_after: Option<Duration>,
    pub sample_stride: usize,
}

impl SimulationConfig {
    #[must_use]
    pub fn new(spec: BatterySpec) -> Self {
        Self {
            cell: CellParams {
                capacity_mah: spec.nominal_capacity_mah,
                ..CellParams::default()
            },
            spec,
            wiring: ChargeWiring::isolated(),
            latency: Duration::from_millis(20),
            fault_at_command: None,
            stop_after: None,
            sample_stride: DEFAULT_SAMPLE_STRIDE,
        }
    }
}

/// What a simulated run leaves behind.
pub struct SimulationOutcome<W: Write> {
    pub summary: RunSummary<SimError, Infallible>,
    pub recorder: MemoryRecorder,
    /// Final simulator state, for checking the outputs were left off.
    pub sim: SimHandle,
    pub transcript: W,
}

impl<W: Write> SimulationOutcome<W> {
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.sim.borrow().now()
    }
}

/// Runs every cycle of `config.spec` against a simulated cell.
pub fn run<W: Write>(
    config: &SimulationConfig,
    transcript: W,
) -> Result<SimulationOutcome<W>, SimulationError> {
    let sim = Simulator::new(SimulatedCell::new(&config.cell), config.wiring)
        .with_latency(config.latency)
        .with_fault_at(config.fault_at_command)
        .into_handle();

    let mut orchestrator =
        CycleOrchestrator::new(&config.spec, config.wiring).map_err(SimulationError::Spec)?;
    info!(
        estimated = %ShortDuration(config.spec.estimated_total_time()),
        cycles = config.spec.number_of_cycles,
        "starting simulated run"
    );

    let header = format!(
        "Simulated {:.0} mAh cell, {} cycle(s)",
        config.spec.nominal_capacity_mah, config.spec.number_of_cycles
    );
    let monitor = TranscriptMonitor::new(transcript, &sim, &header)?
        .with_sample_stride(config.sample_stride)
        .with_stop_at(config.stop_after);

    let mut source = SimPowerSupply::new(&sim);
    let mut load = SimLoad::new(&sim);
    let mut env = CycleEnv::new(VirtualClock::new(&sim), MemoryRecorder::new(), monitor);

    let summary = orchestrator.run(&mut source, &mut load, &mut env);
    info!(
        state = %summary.state,
        cycles = summary.cycles_completed,
        elapsed = %ShortDuration(sim.borrow().now()),
        "simulated run finished"
    );

    let CycleEnv {
        recorder, monitor, ..
    } = env;
    Ok(SimulationOutcome {
        summary,
        recorder,
        sim,
        transcript: monitor.finish()?,
    })
}
