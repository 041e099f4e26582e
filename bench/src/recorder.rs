//! CSV persistence for sample series, plus the per-run metadata file.
//!
//! Each series goes to `{slug}_{series}_{identifier}.csv` in the output
//! directory. Writes go to a sibling temporary file that is then renamed over
//! the destination, so a crash mid-write leaves the previous flush intact.

use std::fmt::{self, Write as _};
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};
use cycler_core::cycle::ChargeWiring;
use cycler_core::recorder::{PhaseKind, Recorder, SeriesId};
use cycler_core::sample::{PulseResistance, Sample, SampleKind};
use cycler_core::spec::BatterySpec;
use tracing::debug;

use crate::error::RecorderError;

/// Resistance cell of rows that carry no pulse.
pub const NO_RESISTANCE: &str = "-";
/// Resistance cell of pulses whose resistance could not be computed.
pub const UNDEFINED_RESISTANCE: &str = "NaN";

/// Identifies one run's files.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunNaming {
    /// Short operator-chosen description leading every file name.
    pub slug: String,
    /// Date stamp shared by every file of the run.
    pub identifier: String,
}

impl RunNaming {
    /// Stamps `slug` with `started` as `%Y%m%d_%H%M%S`.
    #[must_use]
    pub fn new(slug: &str, started: &DateTime<Local>) -> Self {
        Self {
            slug: sanitize_slug(slug),
            identifier: started.format("%Y%m%d_%H%M%S").to_string(),
        }
    }
}

/// Keeps file names portable: whitespace and path separators become `-`.
#[must_use]
pub fn sanitize_slug(slug: &str) -> String {
    let cleaned: String = slug
        .trim()
        .chars()
        .map(|c| {
            if c.is_whitespace() || matches!(c, '/' | '\\' | ':') {
                '-'
            } else {
                c
            }
        })
        .collect();
    if cleaned.is_empty() {
        "battery".to_string()
    } else {
        cleaned
    }
}

/// Path of a written series.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeriesPath(pub PathBuf);

impl fmt::Display for SeriesPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Writes each series as a CSV table.
#[derive(Clone, Debug)]
pub struct CsvRecorder {
    directory: PathBuf,
    naming: RunNaming,
}

impl CsvRecorder {
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>, naming: RunNaming) -> Self {
        Self {
            directory: directory.into(),
            naming,
        }
    }

    #[must_use]
    pub fn naming(&self) -> &RunNaming {
        &self.naming
    }

    #[must_use]
    pub fn series_path(&self, series: SeriesId) -> PathBuf {
        self.directory.join(format!(
            "{}_{series}_{}.csv",
            self.naming.slug, self.naming.identifier
        ))
    }

    #[must_use]
    pub fn metadata_path(&self) -> PathBuf {
        self.directory.join(format!(
            "{}_{}_info.txt",
            self.naming.slug, self.naming.identifier
        ))
    }

    /// Creates the output directory and records the resolved run parameters.
    pub fn write_metadata(
        &self,
        spec: &BatterySpec,
        wiring: &ChargeWiring,
        annotation: &str,
        started: &DateTime<Local>,
    ) -> Result<PathBuf, RecorderError> {
        let path = self.metadata_path();
        fs::create_dir_all(&self.directory).map_err(|source| RecorderError::Write {
            path: self.directory.clone(),
            source,
        })?;
        let text = metadata(spec, wiring, annotation, &self.naming.identifier, started);
        replace(&path, text.as_bytes())?;
        Ok(path)
    }
}

impl Recorder for CsvRecorder {
    type Error = RecorderError;
    type Location = SeriesPath;

    fn location(&self, series: SeriesId) -> SeriesPath {
        SeriesPath(self.series_path(series))
    }

    fn write_series(&mut self, series: SeriesId, samples: &[Sample]) -> Result<(), RecorderError> {
        let path = self.series_path(series);
        let table = render(series.phase, samples);
        replace(&path, table.as_bytes())?;
        debug!(path = %path.display(), samples = samples.len(), "series written");
        Ok(())
    }
}

fn replace(path: &Path, contents: &[u8]) -> Result<(), RecorderError> {
    let staging = path.with_extension("tmp");
    let write_error = |source| RecorderError::Write {
        path: path.to_path_buf(),
        source,
    };
    let mut file = fs::File::create(&staging).map_err(write_error)?;
    file.write_all(contents)
        .and_then(|()| file.sync_all())
        .map_err(write_error)?;
    fs::rename(&staging, path).map_err(write_error)
}

fn render(phase: PhaseKind, samples: &[Sample]) -> String {
    let mut table = phase.columns().join(",");
    table.push('\n');
    for sample in samples {
        let _ = write!(
            table,
            "{},{},{},{},",
            sample.time_secs(),
            sample.voltage,
            sample.current,
            sample.charge
        );
        if phase == PhaseKind::Discharge {
            match sample.resistance() {
                Some(PulseResistance::Ohms(ohms)) => {
                    let _ = write!(table, "{ohms},");
                }
                Some(PulseResistance::Undefined) => {
                    table.push_str(UNDEFINED_RESISTANCE);
                    table.push(',');
                }
                None => {
                    table.push_str(NO_RESISTANCE);
                    table.push(',');
                }
            }
        }
        table.push_str(sample.kind.status());
        table.push('\n');
    }
    table
}

fn metadata(
    spec: &BatterySpec,
    wiring: &ChargeWiring,
    annotation: &str,
    identifier: &str,
    started: &DateTime<Local>,
) -> String {
    let secs = |duration: Duration| duration.as_secs_f64();
    let mut text = String::new();
    let _ = writeln!(text, "Test started at {}", started.format("%Y-%m-%d %H:%M:%S%.3f %z"));
    let _ = writeln!(text, "User info: {annotation}");
    let _ = writeln!(text, "Identifier: {identifier}");
    let _ = writeln!(text, "Nominal capacity: {} mAh", spec.nominal_capacity_mah);
    let _ = writeln!(text, "Charge voltage: {} V", spec.charge_voltage);
    let _ = writeln!(text, "Charge current: {:.1} mA", spec.charge_current * 1000.0);
    let _ = writeln!(
        text,
        "Charge termination: {:.1} mA",
        spec.charge_termination_current * 1000.0
    );
    let _ = writeln!(text, "Discharge current: {:.1} mA", spec.discharge_current * 1000.0);
    let _ = writeln!(
        text,
        "Discharge termination: {} V",
        spec.discharge_termination_voltage
    );
    let _ = writeln!(
        text,
        "Pulse discharge current: {:.1} mA",
        spec.pulse_discharge_current * 1000.0
    );
    let _ = writeln!(text, "Pulse settle time: {} s", secs(spec.pulse_settle_time));
    let _ = writeln!(text, "Pulse spacing: {} s", secs(spec.pulse_spacing));
    let _ = writeln!(text, "Number of cycles: {}", spec.number_of_cycles);
    let _ = writeln!(
        text,
        "Rest time between charge and discharge: {} s",
        secs(spec.rest_charge_to_discharge)
    );
    let _ = writeln!(
        text,
        "Rest time between discharge and charge: {} s",
        secs(spec.rest_discharge_to_charge)
    );
    let _ = writeln!(text, "Charger channel: {}", wiring.charger);
    match wiring.relay {
        Some(relay) => {
            let _ = writeln!(
                text,
                "Isolation relay: {} at {} V / {} A",
                relay.channel, relay.voltage, relay.current
            );
        }
        None => {
            let _ = writeln!(text, "Isolation relay: none");
        }
    }
    text
}

/// Reads a series written by [`CsvRecorder`] back into samples.
///
/// Columns are located by header name, so both the charge and the discharge
/// layouts are accepted.
pub fn read_series(path: &Path) -> Result<Vec<Sample>, RecorderError> {
    let text = fs::read_to_string(path).map_err(|source| RecorderError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut lines = text.lines();
    let header: Vec<&str> = lines.next().unwrap_or_default().split(',').collect();
    let column = |name: &'static str| {
        header
            .iter()
            .position(|column| column.trim() == name)
            .ok_or_else(|| RecorderError::MissingColumn {
                path: path.to_path_buf(),
                column: name,
            })
    };
    let time = column("time")?;
    let voltage = column("voltage")?;
    let current = column("current")?;
    let charge = column("charge")?;
    let status = column("status")?;
    let resistance = column("resistance").ok();

    let mut samples = Vec::new();
    for (index, line) in lines.enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let line_number = index + 2;
        let malformed = |reason: String| RecorderError::Malformed {
            path: path.to_path_buf(),
            line: line_number,
            reason,
        };
        let cells: Vec<&str> = line.split(',').map(str::trim).collect();
        let cell = |at: usize| {
            cells
                .get(at)
                .copied()
                .ok_or_else(|| malformed(format!("missing column {}", at + 1)))
        };
        let number = |at: usize| {
            let text = cell(at)?;
            text.parse::<f64>()
                .map_err(|_| malformed(format!("`{text}` is not a number")))
        };

        let seconds = number(time)?;
        let elapsed = Duration::try_from_secs_f64(seconds)
            .map_err(|_| malformed(format!("`{seconds}` is not a valid time")))?;
        let kind = match cell(status)? {
            "charging" => SampleKind::Charging,
            "discharge" => SampleKind::Discharge,
            "discharge_pulse" => {
                let ohms = match resistance {
                    Some(at) => cell(at)?,
                    None => UNDEFINED_RESISTANCE,
                };
                SampleKind::DischargePulse(match ohms.parse::<f64>() {
                    Ok(value) if value.is_finite() => PulseResistance::Ohms(value),
                    _ => PulseResistance::Undefined,
                })
            }
            other => return Err(malformed(format!("unknown status `{other}`"))),
        };
        samples.push(Sample {
            time: elapsed,
            voltage: number(voltage)?,
            current: number(current)?,
            charge: number(charge)?,
            kind,
        });
    }
    Ok(samples)
}
