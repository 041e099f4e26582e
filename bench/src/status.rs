//! Operator console: event log lines plus a live progress line.
//!
//! Telemetry goes through `tracing`. While a phase runs, the last line of a
//! terminal shows a progress bar that is redrawn in place on every sample and
//! cleared before any log line is printed.

use std::fmt;
use std::io::{self, IsTerminal, Stdout, Write};

use crossterm::cursor::MoveToColumn;
use crossterm::queue;
use crossterm::style::Print;
use crossterm::terminal::{Clear, ClearType};
use cycler_core::monitor::{CycleMonitor, Progress};
use cycler_core::recorder::SeriesId;
use cycler_core::sample::Sample;
use cycler_core::spec::coulombs_to_mah;
use cycler_core::telemetry::{
    PhaseTelemetry, ShortDuration, TelemetryEventKind, TelemetryPayload,
};
use tracing::{debug, info, warn};

use crate::interrupt::StopFlag;

const BAR_WIDTH: u32 = 30;

pub struct ConsoleMonitor<W: Write> {
    out: W,
    stop: StopFlag,
    /// Draw the progress line; off when output is not a terminal.
    live: bool,
    line_drawn: bool,
}

impl ConsoleMonitor<Stdout> {
    /// Monitor on standard output, drawing progress only on a terminal.
    #[must_use]
    pub fn stdout(stop: StopFlag) -> Self {
        let out = io::stdout();
        let live = out.is_terminal();
        Self::new(out, stop, live)
    }
}

impl<W: Write> ConsoleMonitor<W> {
    #[must_use]
    pub fn new(out: W, stop: StopFlag, live: bool) -> Self {
        Self {
            out,
            stop,
            live,
            line_drawn: false,
        }
    }

    #[must_use]
    pub fn into_inner(mut self) -> W {
        self.clear_line();
        self.out
    }

    fn draw(&mut self, series: SeriesId, sample: &Sample, progress: Progress) -> io::Result<()> {
        let line = progress_line(series, sample, progress);
        queue!(
            self.out,
            MoveToColumn(0),
            Clear(ClearType::CurrentLine),
            Print(line)
        )?;
        self.out.flush()?;
        self.line_drawn = true;
        Ok(())
    }

    fn clear_line(&mut self) {
        if !self.line_drawn {
            return;
        }
        self.line_drawn = false;
        let cleared = queue!(self.out, MoveToColumn(0), Clear(ClearType::CurrentLine))
            .and_then(|()| self.out.flush());
        if let Err(err) = cleared {
            debug!(%err, "progress line not cleared");
        }
    }
}

/// `chg1 [#####.........] 412.3/850 mAh  0.850 A  4.012 V  0:08:05`
fn progress_line(series: SeriesId, sample: &Sample, progress: Progress) -> String {
    let filled = progress.fraction() * f64::from(BAR_WIDTH);
    let bar: String = (0..BAR_WIDTH)
        .map(|cell| if f64::from(cell) + 0.5 < filled { '#' } else { '.' })
        .collect();
    format!(
        "{series} [{bar}] {:.1}/{:.0} mAh  {:.3} A  {:.3} V  {}",
        progress.charge_mah,
        progress.nominal_mah,
        sample.current,
        sample.voltage,
        ShortDuration(sample.time)
    )
}

impl<W: Write> CycleMonitor for ConsoleMonitor<W> {
    fn sample(&mut self, series: SeriesId, sample: &Sample, progress: Progress) {
        if !self.live {
            return;
        }
        if let Err(err) = self.draw(series, sample, progress) {
            self.live = false;
            warn!(%err, "progress display disabled");
        }
    }

    fn event(&mut self, event: TelemetryEventKind, details: &TelemetryPayload) {
        self.clear_line();
        match event {
            TelemetryEventKind::ReleaseFailed(_)
            | TelemetryEventKind::FlushFailed(_)
            | TelemetryEventKind::PhaseFaulted(..)
            | TelemetryEventKind::PulseUndefined(_)
            | TelemetryEventKind::RunAborted => warn!("{event}{details}"),
            TelemetryEventKind::OutputEnabled(_)
            | TelemetryEventKind::OutputReleased(_)
            | TelemetryEventKind::SeriesFlushed(_) => debug!("{event}{details}"),
            _ => info!("{event}{details}"),
        }
    }

    fn finished(&mut self, summary: &PhaseTelemetry, location: &dyn fmt::Display) {
        self.clear_line();
        let charge_mah = coulombs_to_mah(summary.charge_coulombs);
        if summary.succeeded() {
            info!(
                samples = summary.samples,
                duration = %ShortDuration(summary.duration),
                "{} moved {charge_mah:.1} mAh ({:.1} C); data saved to {location}",
                summary.series,
                summary.charge_coulombs
            );
        } else {
            warn!(
                samples = summary.samples,
                duration = %ShortDuration(summary.duration),
                "{} stopped after {charge_mah:.1} mAh ({:.1} C); partial data saved to {location}",
                summary.series,
                summary.charge_coulombs
            );
        }
    }

    fn stop_requested(&self) -> bool {
        self.stop.is_requested()
    }
}
