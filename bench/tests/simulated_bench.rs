use std::fs;
use std::time::Duration;

use battery_bench::{ConsoleMonitor, CsvRecorder, RunNaming, StopFlag, read_series, run_plan};
use chrono::{Local, TimeZone};
use cycler_core::analysis::analyze;
use cycler_core::cycle::{ChargeWiring, CycleEnv, CycleError, Termination};
use cycler_core::orchestrator::{OrchestratorState, RunFailure};
use cycler_core::recorder::SeriesId;
use cycler_core::sample::SampleKind;
use cycler_core::spec::{BatterySpec, SpecError};
use cycler_emulator::{
    CellParams, SimError, SimHandle, SimLoad, SimPowerSupply, SimulatedCell, Simulator,
    VirtualClock,
};
use tempfile::TempDir;

/// Small cell so a whole cycle stays quick at virtual time.
fn small_cell() -> BatterySpec {
    BatterySpec {
        nominal_capacity_mah: 100.0,
        charge_voltage: 4.2,
        charge_current: 0.1,
        charge_termination_current: 0.01,
        discharge_current: 0.05,
        discharge_termination_voltage: 3.0,
        pulse_discharge_current: 0.2,
        pulse_settle_time: Duration::from_secs(2),
        pulse_spacing: Duration::from_secs(60),
        number_of_cycles: 1,
        rest_charge_to_discharge: Duration::from_secs(10),
        rest_discharge_to_charge: Duration::from_secs(10),
    }
}

fn simulator(fault_at: Option<usize>) -> SimHandle {
    let cell = CellParams {
        capacity_mah: 100.0,
        resistance: 0.1,
        initial_soc: 0.5,
    };
    Simulator::new(SimulatedCell::new(&cell), ChargeWiring::isolated())
        .with_latency(Duration::from_millis(20))
        .with_fault_at(fault_at)
        .into_handle()
}

fn recorder(dir: &TempDir) -> CsvRecorder {
    let started = Local
        .with_ymd_and_hms(2024, 5, 1, 9, 30, 0)
        .single()
        .expect("unambiguous local time");
    CsvRecorder::new(dir.path(), RunNaming::new("sim cell", &started))
}

#[test]
fn full_cycle_lands_on_disk_and_analyzes() {
    let dir = TempDir::new().expect("temp dir");
    let spec = small_cell();
    let sim = simulator(None);
    let mut source = SimPowerSupply::new(&sim);
    let mut load = SimLoad::new(&sim);
    let mut env = CycleEnv::new(
        VirtualClock::new(&sim),
        recorder(&dir),
        ConsoleMonitor::new(Vec::new(), StopFlag::new(), false),
    );

    let summary = run_plan(
        &spec,
        ChargeWiring::isolated(),
        &mut source,
        &mut load,
        &mut env,
    )
    .expect("valid spec");

    assert_eq!(summary.state, OrchestratorState::Done);
    assert!(summary.is_success());
    assert!(sim.borrow().outputs_off());

    let charge_path = env.recorder.series_path(SeriesId::charge(1));
    assert!(
        charge_path
            .file_name()
            .is_some_and(|name| name == "sim-cell_chg1_20240501_093000.csv")
    );
    let charge = read_series(&charge_path).expect("charge series");
    assert!(
        charge
            .iter()
            .all(|sample| sample.kind == SampleKind::Charging)
    );
    assert_eq!(
        summary.phases[0].termination,
        Some(Termination::CurrentCutoff)
    );
    assert_eq!(charge.len(), summary.phases[0].samples);

    let discharge =
        read_series(&env.recorder.series_path(SeriesId::discharge(1))).expect("discharge series");
    assert_eq!(discharge.len(), summary.phases[1].samples);
    let analysis = analyze(&discharge, spec.discharge_current).expect("analysis");
    // The open-circuit voltage sags a little during each settle.
    assert!(
        (0.1..0.12).contains(&analysis.nominal_resistance),
        "resistance {}",
        analysis.nominal_resistance
    );
    // Loaded voltage averages 3.0 V a little above 30 % state of charge.
    assert!(
        (60.0..80.0).contains(&analysis.capacity_mah()),
        "capacity {}",
        analysis.capacity_mah()
    );
    assert!(analysis.capacity_mah() > analysis.rate_capacity_mah());
}

#[test]
fn instrument_fault_keeps_partial_data() {
    let dir = TempDir::new().expect("temp dir");
    let sim = simulator(Some(25));
    let mut source = SimPowerSupply::new(&sim);
    let mut load = SimLoad::new(&sim);
    let mut env = CycleEnv::new(
        VirtualClock::new(&sim),
        recorder(&dir),
        ConsoleMonitor::new(Vec::new(), StopFlag::new(), false),
    );

    let summary = run_plan(
        &small_cell(),
        ChargeWiring::isolated(),
        &mut source,
        &mut load,
        &mut env,
    )
    .expect("valid spec");

    assert_eq!(summary.state, OrchestratorState::Aborted);
    assert!(matches!(
        summary.failure,
        Some(RunFailure::Phase {
            series,
            error: CycleError::Instrument(SimError::Injected(25)),
        }) if series == SeriesId::charge(1)
    ));
    assert!(sim.borrow().outputs_off());

    let partial = read_series(&env.recorder.series_path(SeriesId::charge(1))).expect("partial");
    assert_eq!(partial.len(), summary.phases[0].samples);
    assert!(!env.recorder.series_path(SeriesId::discharge(1)).exists());
}

#[test]
fn operator_stop_interrupts_the_first_phase() {
    let dir = TempDir::new().expect("temp dir");
    let stop = StopFlag::new();
    stop.request();
    let sim = simulator(None);
    let mut source = SimPowerSupply::new(&sim);
    let mut load = SimLoad::new(&sim);
    let mut env = CycleEnv::new(
        VirtualClock::new(&sim),
        recorder(&dir),
        ConsoleMonitor::new(Vec::new(), stop, false),
    );

    let summary = run_plan(
        &small_cell(),
        ChargeWiring::isolated(),
        &mut source,
        &mut load,
        &mut env,
    )
    .expect("valid spec");

    assert_eq!(summary.state, OrchestratorState::Aborted);
    assert!(matches!(
        summary.failure,
        Some(RunFailure::Phase {
            error: CycleError::Interrupted,
            ..
        })
    ));
    assert!(sim.borrow().outputs_off());
}

#[test]
fn rejected_spec_touches_nothing() {
    let dir = TempDir::new().expect("temp dir");
    let spec = BatterySpec {
        number_of_cycles: 0,
        ..small_cell()
    };
    let sim = simulator(None);
    let mut source = SimPowerSupply::new(&sim);
    let mut load = SimLoad::new(&sim);
    let mut env = CycleEnv::new(
        VirtualClock::new(&sim),
        recorder(&dir),
        ConsoleMonitor::new(Vec::new(), StopFlag::new(), false),
    );

    let result = run_plan(
        &spec,
        ChargeWiring::isolated(),
        &mut source,
        &mut load,
        &mut env,
    );

    assert!(matches!(result, Err(SpecError::NoCycles)));
    assert_eq!(sim.borrow().commands(), 0);
    assert_eq!(fs::read_dir(dir.path()).expect("list").count(), 0);
}
