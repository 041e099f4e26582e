//! Transcript of a simulated run.
//!
//! Every telemetry record becomes one controller line, and every Nth sample a
//! cell line, each stamped with virtual time since the simulation started.

use std::fmt;
use std::io::{self, Write};
use std::time::Duration;

use cycler_core::monitor::{CycleMonitor, Progress};
use cycler_core::recorder::SeriesId;
use cycler_core::sample::{PulseResistance, Sample};
use cycler_core::telemetry::{PhaseTelemetry, TelemetryEventKind, TelemetryPayload};

use crate::instruments::SimHandle;

/// Samples between two cell lines when none is configured.
pub const DEFAULT_SAMPLE_STRIDE: usize = 60;

pub struct TranscriptMonitor<W: Write> {
    writer: W,
    sim: SimHandle,
    sample_stride: usize,
    samples_seen: usize,
    stop_at: Option<Duration>,
    error: Option<io::Error>,
}

impl<W: Write> TranscriptMonitor<W> {
    pub fn new(writer: W, sim: &SimHandle, header: &str) -> io::Result<Self> {
        let mut monitor = Self {
            writer,
            sim: SimHandle::clone(sim),
            sample_stride: DEFAULT_SAMPLE_STRIDE,
            samples_seen: 0,
            stop_at: None,
            error: None,
        };
        monitor.write_header(header)?;
        Ok(monitor)
    }

    /// Logs one plain sample in `stride`; pulses are always logged.
    #[must_use]
    pub fn with_sample_stride(mut self, stride: usize) -> Self {
        self.sample_stride = stride.max(1);
        self
    }

    /// Requests a stop once virtual time reaches `at`, standing in for an operator interrupt.
    #[must_use]
    pub fn with_stop_at(mut self, at: Option<Duration>) -> Self {
        self.stop_at = at;
        self
    }

    /// Flushes the transcript and returns the writer, or the first write error.
    pub fn finish(mut self) -> io::Result<W> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        self.writer.flush()?;
        Ok(self.writer)
    }

    fn write_header(&mut self, header: &str) -> io::Result<()> {
        writeln!(self.writer, "# {header}")?;
        writeln!(
            self.writer,
            "# Timestamps are virtual milliseconds since the simulation started"
        )?;
        writeln!(self.writer)?;
        self.writer.flush()
    }

    fn append_line(&mut self, role: TranscriptRole, line: fmt::Arguments<'_>) {
        if self.error.is_some() {
            return;
        }
        let elapsed = self.sim.borrow().now();
        if let Err(err) = writeln!(
            self.writer,
            "[+{:>10} ms] {} {}",
            elapsed.as_millis(),
            role.prefix(),
            line
        ) {
            self.error = Some(err);
        }
    }
}

impl<W: Write> CycleMonitor for TranscriptMonitor<W> {
    fn sample(&mut self, series: SeriesId, sample: &Sample, progress: Progress) {
        self.samples_seen += 1;
        let pulse = sample.resistance();
        if pulse.is_none() && (self.samples_seen - 1) % self.sample_stride != 0 {
            return;
        }

        let resistance = match pulse {
            Some(PulseResistance::Ohms(ohms)) => format!(" R={ohms:.4}"),
            Some(PulseResistance::Undefined) => " R=undefined".to_string(),
            None => String::new(),
        };
        self.append_line(
            TranscriptRole::Cell,
            format_args!(
                "{series} t={:.0}s V={:.4} I={:.4} Q={:.1}/{:.0} mAh{resistance}",
                sample.time_secs(),
                sample.voltage,
                sample.current,
                progress.charge_mah,
                progress.nominal_mah,
            ),
        );
    }

    fn event(&mut self, event: TelemetryEventKind, details: &TelemetryPayload) {
        self.append_line(TranscriptRole::Controller, format_args!("{event}{details}"));
    }

    fn finished(&mut self, summary: &PhaseTelemetry, location: &dyn fmt::Display) {
        self.append_line(
            TranscriptRole::Controller,
            format_args!(
                "{} wrote {} samples to {location}",
                summary.series, summary.samples
            ),
        );
    }

    fn stop_requested(&self) -> bool {
        self.stop_at
            .is_some_and(|at| self.sim.borrow().now() >= at)
    }
}

enum TranscriptRole {
    Controller,
    Cell,
}

impl TranscriptRole {
    fn prefix(&self) -> &'static str {
        match self {
            TranscriptRole::Controller => "CTRL>",
            TranscriptRole::Cell => "CELL<",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{CellParams, SimulatedCell};
    use crate::instruments::Simulator;
    use cycler_core::cycle::{ChargeWiring, Termination};
    use cycler_core::sample::SampleKind;

    fn sim() -> SimHandle {
        Simulator::new(
            SimulatedCell::new(&CellParams::default()),
            ChargeWiring::isolated(),
        )
        .into_handle()
    }

    fn text(monitor: TranscriptMonitor<Vec<u8>>) -> String {
        String::from_utf8(monitor.finish().expect("transcript")).expect("utf-8")
    }

    fn sample(seconds: u64, kind: SampleKind) -> Sample {
        Sample {
            time: Duration::from_secs(seconds),
            voltage: 3.7,
            current: 0.085,
            charge: 0.0,
            kind,
        }
    }

    #[test]
    fn writes_header_and_stamps_lines() {
        let sim = sim();
        let mut monitor = TranscriptMonitor::new(Vec::new(), &sim, "unit test").expect("monitor");
        sim.borrow_mut().advance(Duration::from_millis(1500));
        monitor.event(
            TelemetryEventKind::PhaseTerminated(SeriesId::charge(1), Termination::CurrentCutoff),
            &TelemetryPayload::none(),
        );

        let text = text(monitor);
        assert!(text.starts_with("# unit test\n"));
        assert!(text.contains("[+      1500 ms] CTRL> phase-terminated chg1 current-cutoff"));
    }

    #[test]
    fn decimates_plain_samples_but_keeps_pulses() {
        let sim = sim();
        let mut monitor = TranscriptMonitor::new(Vec::new(), &sim, "stride")
            .expect("monitor")
            .with_sample_stride(10);
        let progress = Progress::new(0.0, 850.0);
        for second in 0..25 {
            monitor.sample(
                SeriesId::discharge(1),
                &sample(second, SampleKind::Discharge),
                progress,
            );
        }
        monitor.sample(
            SeriesId::discharge(1),
            &sample(25, SampleKind::DischargePulse(PulseResistance::Ohms(0.1))),
            progress,
        );

        let text = text(monitor);
        assert_eq!(text.matches("CELL<").count(), 4);
        assert!(text.contains("R=0.1000"));
    }

    #[test]
    fn stop_follows_virtual_time() {
        let sim = sim();
        let monitor = TranscriptMonitor::new(Vec::new(), &sim, "stop")
            .expect("monitor")
            .with_stop_at(Some(Duration::from_secs(10)));
        assert!(!monitor.stop_requested());
        sim.borrow_mut().advance(Duration::from_secs(10));
        assert!(monitor.stop_requested());
    }
}
