#![allow(dead_code)]

use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use cycler_core::clock::Clock;
use cycler_core::instruments::{Channel, ControllableLoad, ControllableSource, LoadMode};
use cycler_core::monitor::{CycleMonitor, Progress};
use cycler_core::recorder::{MemoryRecorder, Recorder, SeriesId};
use cycler_core::sample::Sample;
use cycler_core::telemetry::{PhaseTelemetry, TelemetryEventKind, TelemetryPayload};

/// Shared virtual time, advanced by sleeps and instrument latency.
#[derive(Clone, Default)]
pub struct SimTime(Rc<Cell<Duration>>);

impl SimTime {
    pub fn now(&self) -> Duration {
        self.0.get()
    }

    pub fn advance(&self, by: Duration) {
        self.0.set(self.0.get() + by);
    }
}

pub struct MockClock {
    pub time: SimTime,
    pub sleeps: Vec<Duration>,
}

impl MockClock {
    pub fn new(time: &SimTime) -> Self {
        Self {
            time: time.clone(),
            sleeps: Vec::new(),
        }
    }
}

impl Clock for MockClock {
    type Instant = Duration;

    fn now(&self) -> Duration {
        self.time.now()
    }

    fn sleep(&mut self, duration: Duration) {
        self.sleeps.push(duration);
        self.time.advance(duration);
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MockError(pub &'static str);

impl fmt::Display for MockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum SourceCall {
    Voltage(Channel, f64),
    Current(Channel, f64),
    Output(Channel, bool),
    Measure(Channel),
}

/// Power supply whose charge current follows a script of time since the charger came on.
pub struct ScriptedSource {
    time: SimTime,
    pub latency: Duration,
    pub calls: Vec<SourceCall>,
    pub outputs: HashMap<Channel, bool>,
    charger_on_at: Option<Duration>,
    charger: Channel,
    current: Box<dyn FnMut(Duration) -> f64>,
    pub fail_on_measure: Option<usize>,
    pub fail_on_enable: Option<Channel>,
    measures: usize,
}

impl ScriptedSource {
    pub fn new(time: &SimTime, current: impl FnMut(Duration) -> f64 + 'static) -> Self {
        Self {
            time: time.clone(),
            latency: Duration::ZERO,
            calls: Vec::new(),
            outputs: HashMap::new(),
            charger_on_at: None,
            charger: Channel::CH2,
            current: Box::new(current),
            fail_on_measure: None,
            fail_on_enable: None,
            measures: 0,
        }
    }

    /// Current tapering exponentially from `start` with time constant `tau`.
    pub fn tapering(time: &SimTime, start: f64, tau: Duration) -> Self {
        Self::new(time, move |elapsed| {
            start * (-elapsed.as_secs_f64() / tau.as_secs_f64()).exp()
        })
    }

    pub fn is_on(&self, channel: Channel) -> bool {
        self.outputs.get(&channel).copied().unwrap_or(false)
    }

    pub fn output_calls(&self) -> Vec<(Channel, bool)> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                SourceCall::Output(channel, enabled) => Some((*channel, *enabled)),
                _ => None,
            })
            .collect()
    }
}

impl ControllableSource for ScriptedSource {
    type Error = MockError;

    fn set_voltage(&mut self, channel: Channel, volts: f64) -> Result<(), MockError> {
        self.calls.push(SourceCall::Voltage(channel, volts));
        Ok(())
    }

    fn set_current(&mut self, channel: Channel, amps: f64) -> Result<(), MockError> {
        self.calls.push(SourceCall::Current(channel, amps));
        Ok(())
    }

    fn set_output(&mut self, channel: Channel, enabled: bool) -> Result<(), MockError> {
        self.calls.push(SourceCall::Output(channel, enabled));
        if enabled && self.fail_on_enable == Some(channel) {
            return Err(MockError("enable refused"));
        }
        self.outputs.insert(channel, enabled);
        if channel == self.charger {
            self.charger_on_at = enabled.then(|| self.time.now());
        }
        Ok(())
    }

    fn measure_voltage(&mut self, channel: Channel) -> Result<f64, MockError> {
        self.calls.push(SourceCall::Measure(channel));
        Ok(4.2)
    }

    fn measure_current(&mut self, channel: Channel) -> Result<f64, MockError> {
        self.calls.push(SourceCall::Measure(channel));
        self.measures += 1;
        if self.fail_on_measure == Some(self.measures) {
            return Err(MockError("link dropped"));
        }
        self.time.advance(self.latency);
        let elapsed = self
            .charger_on_at
            .map_or(Duration::ZERO, |on| self.time.now().saturating_sub(on));
        if self.is_on(channel) {
            Ok((self.current)(elapsed))
        } else {
            Ok(0.0)
        }
    }
}

/// Electronic load in front of a cell whose open-circuit voltage follows a script.
pub struct ScriptedLoad {
    time: SimTime,
    pub latency: Duration,
    pub setpoint: f64,
    pub mode: Option<LoadMode>,
    pub engaged: bool,
    pub resistance: f64,
    /// When set, the load ignores setpoint changes after the first one.
    pub stuck_current: bool,
    pub state_calls: Vec<bool>,
    pub setpoints: Vec<f64>,
    pub fail_on_measure: Option<usize>,
    ocv: Box<dyn FnMut(usize, Duration) -> f64>,
    engaged_at: Duration,
    measures: usize,
    voltage_reads: usize,
}

impl ScriptedLoad {
    /// `ocv` receives the number of prior voltage reads and the time since the input engaged.
    pub fn new(time: &SimTime, ocv: impl FnMut(usize, Duration) -> f64 + 'static) -> Self {
        Self {
            time: time.clone(),
            latency: Duration::ZERO,
            setpoint: 0.0,
            mode: None,
            engaged: false,
            resistance: 0.0,
            stuck_current: false,
            state_calls: Vec::new(),
            setpoints: Vec::new(),
            fail_on_measure: None,
            ocv: Box::new(ocv),
            engaged_at: Duration::ZERO,
            measures: 0,
            voltage_reads: 0,
        }
    }

    fn current(&self) -> f64 {
        if self.engaged { self.setpoint } else { 0.0 }
    }
}

impl ControllableLoad for ScriptedLoad {
    type Error = MockError;

    fn set_source_mode(&mut self, mode: LoadMode) -> Result<(), MockError> {
        self.mode = Some(mode);
        Ok(())
    }

    fn set_source_current(&mut self, amps: f64) -> Result<(), MockError> {
        self.setpoints.push(amps);
        if !self.stuck_current || self.setpoints.len() == 1 {
            self.setpoint = amps;
        }
        Ok(())
    }

    fn set_source_state(&mut self, enabled: bool) -> Result<(), MockError> {
        self.state_calls.push(enabled);
        if enabled && !self.engaged {
            self.engaged_at = self.time.now();
        }
        self.engaged = enabled;
        Ok(())
    }

    fn measure_voltage(&mut self) -> Result<f64, MockError> {
        self.measures += 1;
        if self.fail_on_measure == Some(self.measures) {
            return Err(MockError("load timeout"));
        }
        self.time.advance(self.latency);
        let elapsed = self.time.now().saturating_sub(self.engaged_at);
        let ocv = (self.ocv)(self.voltage_reads, elapsed);
        self.voltage_reads += 1;
        Ok(ocv - self.current() * self.resistance)
    }

    fn measure_current(&mut self) -> Result<f64, MockError> {
        Ok(self.current())
    }
}

/// Monitor that counts callbacks and can request a stop.
#[derive(Default)]
pub struct CountingMonitor {
    pub samples: usize,
    pub events: Vec<TelemetryEventKind>,
    pub finished: Vec<(PhaseTelemetry, String)>,
    /// Requests a stop once this many samples were seen.
    pub stop_after: Option<usize>,
    /// Requests a stop as soon as a rest begins.
    pub stop_on_rest: bool,
    pub last_progress: Option<Progress>,
}

impl CountingMonitor {
    pub fn count(&self, event: TelemetryEventKind) -> usize {
        self.events.iter().filter(|seen| **seen == event).count()
    }
}

impl CycleMonitor for CountingMonitor {
    fn sample(&mut self, _series: SeriesId, _sample: &Sample, progress: Progress) {
        self.samples += 1;
        self.last_progress = Some(progress);
    }

    fn event(&mut self, event: TelemetryEventKind, _details: &TelemetryPayload) {
        self.events.push(event);
    }

    fn finished(&mut self, summary: &PhaseTelemetry, location: &dyn fmt::Display) {
        self.finished.push((*summary, location.to_string()));
    }

    fn stop_requested(&self) -> bool {
        let resting = self.stop_on_rest && self.events.contains(&TelemetryEventKind::RestStarted);
        resting || self.stop_after.is_some_and(|limit| self.samples >= limit)
    }
}

/// Memory recorder that fails every write from the Nth on.
pub struct FlakyRecorder {
    pub inner: MemoryRecorder,
    pub fail_from: usize,
    pub attempts: usize,
}

impl FlakyRecorder {
    pub fn new(fail_from: usize) -> Self {
        Self {
            inner: MemoryRecorder::new(),
            fail_from,
            attempts: 0,
        }
    }
}

impl Recorder for FlakyRecorder {
    type Error = MockError;
    type Location = String;

    fn location(&self, series: SeriesId) -> String {
        format!("flaky:{series}")
    }

    fn write_series(&mut self, series: SeriesId, samples: &[Sample]) -> Result<(), MockError> {
        self.attempts += 1;
        if self.attempts >= self.fail_from {
            return Err(MockError("disk full"));
        }
        let Ok(()) = self.inner.write_series(series, samples);
        Ok(())
    }
}

pub fn close(a: f64, b: f64, tolerance: f64) -> bool {
    (a - b).abs() <= tolerance
}

/// Asserts the sample clock strictly increases.
pub fn assert_strictly_increasing(samples: &[Sample]) {
    for pair in samples.windows(2) {
        assert!(
            pair[1].time > pair[0].time,
            "time went from {:?} to {:?}",
            pair[0].time,
            pair[1].time
        );
    }
}
