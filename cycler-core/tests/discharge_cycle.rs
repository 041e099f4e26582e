mod common;

use core::time::Duration;

use common::{
    CountingMonitor, MockClock, MockError, ScriptedLoad, SimTime, assert_strictly_increasing,
    close,
};
use cycler_core::clock::SAMPLE_PERIOD;
use cycler_core::cycle::{CycleEnv, CycleError, DischargeController, Termination};
use cycler_core::instruments::LoadMode;
use cycler_core::recorder::{MemoryRecorder, SeriesId};
use cycler_core::sample::{PulseResistance, Sample, SampleKind};
use cycler_core::spec::{BatterySpec, lipo_850mah};
use cycler_core::telemetry::TelemetryEventKind;

const LATENCY: Duration = Duration::from_millis(10);

type Env = CycleEnv<MockClock, MemoryRecorder, CountingMonitor>;

fn env(time: &SimTime) -> Env {
    CycleEnv::new(
        MockClock::new(time),
        MemoryRecorder::new(),
        CountingMonitor::default(),
    )
}

/// Cell losing a millivolt per second from 4.0 V behind 150 mOhm.
fn sloped_load(time: &SimTime) -> ScriptedLoad {
    let mut load = ScriptedLoad::new(time, |_, elapsed| 4.0 - 0.001 * elapsed.as_secs_f64());
    load.latency = LATENCY;
    load.resistance = 0.15;
    load
}

fn pulses(samples: &[Sample]) -> Vec<&Sample> {
    samples.iter().filter(|sample| sample.kind.is_pulse()).collect()
}

#[test]
fn trailing_mean_ignores_an_isolated_dip() {
    let spec = BatterySpec {
        pulse_spacing: Duration::from_hours(10),
        ..lipo_850mah()
    };
    let time = SimTime::default();
    let mut load = ScriptedLoad::new(&time, |reads, _| match reads {
        10 => 2.0,
        reads if reads < 30 => 3.7,
        _ => 2.9,
    });
    load.latency = LATENCY;
    let mut env = env(&time);

    let report = DischargeController::new(&spec).run(&mut load, &mut env, 1);

    assert_eq!(report.termination(), Some(Termination::VoltageCutoff));
    assert!(close(report.samples[10].voltage, 2.0, 1e-12));
    // Eighteen 2.9 V readings pull the mean of twenty below 3.0 V; seventeen do not.
    assert_eq!(report.samples.len(), 30 + 18);
    assert!(pulses(&report.samples).is_empty());
    assert_eq!(load.mode, Some(LoadMode::ConstantCurrent));
    assert_eq!(load.state_calls, [true, false]);
}

#[test]
fn pulses_measure_internal_resistance_at_the_configured_spacing() {
    let spec = lipo_850mah();
    let time = SimTime::default();
    let mut load = sloped_load(&time);
    let mut env = env(&time);

    let report = DischargeController::new(&spec).run(&mut load, &mut env, 1);

    assert_eq!(report.termination(), Some(Termination::VoltageCutoff));
    assert_strictly_increasing(&report.samples);

    let pulses = pulses(&report.samples);
    assert!(pulses.len() >= 10, "only {} pulses", pulses.len());
    for pulse in &pulses {
        let ohms = pulse
            .resistance()
            .and_then(PulseResistance::ohms)
            .expect("defined resistance");
        assert!(close(ohms, 0.15, 0.01), "resistance {ohms}");
        assert!(close(pulse.current, spec.pulse_discharge_current, 1e-12));
    }
    assert!(pulses[0].time > spec.pulse_spacing);
    for pair in pulses.windows(2) {
        let gap = pair[1].time - pair[0].time;
        assert!(
            gap > spec.pulse_spacing && gap < spec.pulse_spacing + Duration::from_secs(5),
            "pulses {gap:?} apart"
        );
    }

    assert_eq!(
        env.monitor
            .count(TelemetryEventKind::PulseMeasured(SeriesId::discharge(1))),
        pulses.len()
    );
    assert_eq!(load.setpoints.len(), 1 + 2 * pulses.len());
    for (index, setpoint) in load.setpoints.iter().enumerate() {
        let expected = if index % 2 == 1 {
            spec.pulse_discharge_current
        } else {
            spec.discharge_current
        };
        assert!(close(*setpoint, expected, 1e-12));
    }
    assert!(!load.engaged);
}

#[test]
fn plain_sampling_resumes_a_full_period_after_each_pulse() {
    let spec = lipo_850mah();
    for latency in [LATENCY, Duration::ZERO] {
        let time = SimTime::default();
        let mut load = sloped_load(&time);
        load.latency = latency;
        let mut env = env(&time);

        let report = DischargeController::new(&spec).run(&mut load, &mut env, 1);

        assert_eq!(report.termination(), Some(Termination::VoltageCutoff));
        assert_strictly_increasing(&report.samples);
        let mut checked = 0;
        for pair in report.samples.windows(2) {
            if !pair[0].kind.is_pulse() {
                continue;
            }
            assert_eq!(pair[1].kind, SampleKind::Discharge);
            let gap = pair[1].time - pair[0].time;
            assert_eq!(gap, SAMPLE_PERIOD + latency, "latency {latency:?}");
            checked += 1;
        }
        assert!(checked >= 10, "only {checked} pulses followed by a plain sample");
    }
}

#[test]
fn pulse_samples_stay_out_of_the_termination_window() {
    let spec = lipo_850mah();
    let time = SimTime::default();
    let mut load = sloped_load(&time);
    // A pulse sag far below the cutoff on a cell that is nowhere near empty.
    load.resistance = 2.0;
    let mut env = env(&time);

    let report = DischargeController::new(&spec).run(&mut load, &mut env, 1);

    let first_pulse = pulses(&report.samples)[0].time;
    assert!(first_pulse < report.samples.last().expect("samples").time);
    assert!(pulses(&report.samples)[0].voltage < spec.discharge_termination_voltage);
    assert_eq!(report.termination(), Some(Termination::VoltageCutoff));
    // Plain readings sit 0.17 V below the 4.0 V start, so the cell still has
    // roughly 830 s to go when the first pulse sags below the cutoff.
    assert!(report.samples.last().expect("samples").time > Duration::from_secs(800));
}

#[test]
fn equal_currents_give_undefined_resistance_without_ending_the_phase() {
    let spec = lipo_850mah();
    let time = SimTime::default();
    let mut load = sloped_load(&time);
    load.stuck_current = true;
    let mut env = env(&time);

    let report = DischargeController::new(&spec).run(&mut load, &mut env, 1);

    assert_eq!(report.termination(), Some(Termination::VoltageCutoff));
    let pulses = pulses(&report.samples);
    assert!(!pulses.is_empty());
    assert!(
        pulses
            .iter()
            .all(|pulse| pulse.kind == SampleKind::DischargePulse(PulseResistance::Undefined))
    );
    assert_eq!(
        env.monitor
            .count(TelemetryEventKind::PulseUndefined(SeriesId::discharge(1))),
        pulses.len()
    );
}

#[test]
fn charge_counts_the_pulse_current_while_it_flows() {
    let spec = lipo_850mah();
    let time = SimTime::default();
    let mut load = sloped_load(&time);
    let mut env = env(&time);

    let report = DischargeController::new(&spec).run(&mut load, &mut env, 1);

    let last = report.samples.last().expect("samples recorded");
    let pulses = pulses(&report.samples);
    #[allow(clippy::cast_precision_loss)]
    let pulse_count = pulses.len() as f64;
    // Each pulse holds the higher current for the settle time plus one reading.
    let pulse_hold = (spec.pulse_settle_time + LATENCY).as_secs_f64();
    let expected = spec.discharge_current * last.time_secs()
        + (spec.pulse_discharge_current - spec.discharge_current) * pulse_hold * pulse_count;
    assert!(
        close(report.charge_coulombs, expected, 1e-6),
        "{} != {expected}",
        report.charge_coulombs
    );
    assert!(close(last.charge, report.charge_coulombs, 1e-12));
    assert!(
        report
            .samples
            .windows(2)
            .all(|pair| pair[1].charge >= pair[0].charge)
    );
}

#[test]
fn fault_mid_pulse_disengages_the_load_and_flushes() {
    let spec = lipo_850mah();
    let time = SimTime::default();
    let mut load = sloped_load(&time);
    // Sixty plain readings reach the spacing; the 61st read is the pulse.
    load.fail_on_measure = Some(61);
    let mut env = env(&time);

    let report = DischargeController::new(&spec).run(&mut load, &mut env, 1);

    assert_eq!(
        report.error(),
        Some(&CycleError::Instrument(MockError("load timeout")))
    );
    assert_eq!(report.samples.len(), 60);
    assert!(!load.engaged);
    assert_eq!(load.state_calls, [true, false]);
    assert_eq!(load.setpoints.len(), 2);
    assert_eq!(
        env.recorder.series(SeriesId::discharge(1)).map(<[_]>::len),
        Some(60)
    );
}

#[test]
fn stop_during_pulse_settle_interrupts() {
    let spec = lipo_850mah();
    let time = SimTime::default();
    let mut load = sloped_load(&time);
    let mut env = env(&time);
    env.monitor.stop_after = Some(60);

    let report = DischargeController::new(&spec).run(&mut load, &mut env, 1);

    assert_eq!(report.error(), Some(&CycleError::Interrupted));
    assert_eq!(report.samples.len(), 60);
    assert!(pulses(&report.samples).is_empty());
    assert!(!load.engaged);
}

#[test]
fn series_is_flushed_every_minute_and_at_the_end() {
    let spec = lipo_850mah();
    let time = SimTime::default();
    let mut load = sloped_load(&time);
    let mut env = env(&time);

    let report = DischargeController::new(&spec).run(&mut load, &mut env, 2);

    assert_eq!(report.series, SeriesId::discharge(2));
    // One write per elapsed minute, give or take the sampling granularity, plus the final one.
    let minutes = usize::try_from(report.duration.as_secs() / 60).expect("minutes fit");
    let writes = env.recorder.writes(SeriesId::discharge(2));
    assert!(
        (minutes..=minutes + 1).contains(&writes),
        "{writes} writes over {minutes} minutes"
    );
    assert_eq!(
        env.recorder.series(SeriesId::discharge(2)),
        Some(report.samples.as_slice())
    );
}
